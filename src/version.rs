// src/version.rs

//! Dotted numeric version handling
//!
//! Versions are dot-separated sequences of non-negative integers. Missing
//! components compare as zero, so `1`, `1.0` and `1.0.0` are all equal.
//! Dependency strings may carry a trailing constraint such as `>= 1.2.3`.

use std::cmp::Ordering;

/// A parsed dotted version, e.g. "1.21.0"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    /// Parse a dotted version string. Components that fail to parse as
    /// integers count as zero, matching the lenient behavior expected of
    /// repository metadata in the wild.
    pub fn parse(s: &str) -> Self {
        let components = s
            .split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect();
        Self { components }
    }

    fn component(&self, idx: usize) -> u64 {
        self.components.get(idx).copied().unwrap_or(0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let n = self.components.len().max(other.components.len());
        for i in 0..n {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

/// Compare two dotted version strings: -1, 0, or 1
pub fn compare_versions(a: &str, b: &str) -> i32 {
    match Version::parse(a).cmp(&Version::parse(b)) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Version comparison operator from a constraint string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Equal,
    NotEqual,
}

impl ConstraintOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            ConstraintOp::Greater => ordering == Ordering::Greater,
            ConstraintOp::GreaterEq => ordering != Ordering::Less,
            ConstraintOp::Less => ordering == Ordering::Less,
            ConstraintOp::LessEq => ordering != Ordering::Greater,
            ConstraintOp::Equal => ordering == Ordering::Equal,
            ConstraintOp::NotEqual => ordering != Ordering::Equal,
        }
    }
}

/// A version constraint, e.g. ">= 1.2.3". The empty constraint accepts
/// any version.
#[derive(Debug, Clone)]
pub struct Constraint {
    op: ConstraintOp,
    version: Option<Version>,
}

impl Constraint {
    /// Parse a constraint string. A bare version means exact match; no
    /// version at all matches everything.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Self {
                op: ConstraintOp::Equal,
                version: None,
            };
        }

        let (op, rest) = if let Some(rest) = s.strip_prefix("!=") {
            (ConstraintOp::NotEqual, rest)
        } else if let Some(rest) = s.strip_prefix(">=") {
            (ConstraintOp::GreaterEq, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (ConstraintOp::LessEq, rest)
        } else if let Some(rest) = s.strip_prefix("==") {
            (ConstraintOp::Equal, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (ConstraintOp::Greater, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (ConstraintOp::Less, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (ConstraintOp::Equal, rest)
        } else {
            (ConstraintOp::Equal, s)
        };

        Self {
            op,
            version: Some(Version::parse(rest.trim())),
        }
    }

    /// Check whether `available` satisfies this constraint
    pub fn matches(&self, available: &str) -> bool {
        match &self.version {
            None => true,
            Some(wanted) => {
                let ordering = Version::parse(available).cmp(wanted);
                self.op.holds(ordering)
            }
        }
    }
}

/// Split a dependency string like "zlib >= 1.2" into its package name and
/// the constraint remainder (empty if unconstrained).
pub fn split_dependency(dep: &str) -> (&str, &str) {
    match dep.find(|c| c == '>' || c == '<' || c == '=' || c == '!') {
        Some(pos) => {
            let (name, constraint) = dep.split_at(pos);
            (name.trim(), constraint.trim())
        }
        None => (dep.trim(), ""),
    }
}
