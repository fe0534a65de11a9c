// src/chroot.rs

//! Chrooted command execution
//!
//! Hooks that target a non-`/` install root run inside a chroot with
//! `proc` and `devpts` bind-mounted. The mounts are torn down in reverse
//! order on every exit path, using lazy detach with a plain unmount
//! fallback, so a failing hook never leaves the target root with stale
//! pseudo-filesystems.

use crate::error::{Error, Result};
use nix::mount::{mount, umount, umount2, MntFlags, MsFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, chroot, execve, fork, ForkResult};
use std::ffi::CString;
use std::fs;
use std::path::Path;
use tracing::{error, warn};

/// Minimal environment for chrooted commands
const CHROOT_PATH: &str = "PATH=/usr/bin:/bin:/usr/sbin:/sbin";

fn mount_pseudo(
    source: &str,
    target: &Path,
    fstype: &str,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    fs::create_dir_all(target)?;
    mount(Some(source), target, Some(fstype), flags, data).map_err(|e| {
        Error::Chroot(format!(
            "mounting {} at {}: {}",
            fstype,
            target.display(),
            e
        ))
    })
}

/// Unmount with detach semantics; EINVAL falls back to a plain unmount and
/// an already-gone mount point counts as success.
fn unmount_pseudo(target: &Path) -> bool {
    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => true,
        Err(nix::errno::Errno::ENOENT) => true,
        Err(nix::errno::Errno::EINVAL) => match umount(target) {
            Ok(()) => true,
            Err(nix::errno::Errno::ENOENT) => true,
            Err(e) => {
                error!("Unmounting {} failed: {}", target.display(), e);
                false
            }
        },
        Err(e) => {
            error!("Unmounting {} (detach) failed: {}", target.display(), e);
            false
        }
    }
}

/// Run `command` with `args` inside a chroot of `dir`, starting in
/// `workdir`. Returns Ok(true) only when the command exited zero and both
/// pseudo-filesystems unmounted cleanly.
pub fn exec_in_chroot(dir: &Path, command: &str, args: &[String], workdir: &str) -> Result<bool> {
    if command.is_empty() || args.is_empty() {
        return Err(Error::Chroot("empty command or argument list".into()));
    }
    if !dir.is_dir() {
        return Err(Error::Chroot(format!(
            "chroot directory {} does not exist",
            dir.display()
        )));
    }

    let proc_target = dir.join("proc");
    let devpts_target = dir.join("dev/pts");
    let mut proc_mounted = false;
    let mut devpts_mounted = false;

    let mut run = || -> Result<bool> {
        mount_pseudo(
            "proc",
            &proc_target,
            "proc",
            MsFlags::MS_NODEV | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID,
            None,
        )?;
        proc_mounted = true;

        let devpts_flags = MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC;
        if mount_pseudo(
            "devpts",
            &devpts_target,
            "devpts",
            devpts_flags,
            Some("gid=5,mode=620"),
        )
        .is_err()
        {
            // Some kernels reject the options; retry bare
            mount_pseudo("devpts", &devpts_target, "devpts", devpts_flags, None)?;
        }
        devpts_mounted = true;

        // CStrings are built before the fork; the child only execs or exits
        let c_command = CString::new(command)
            .map_err(|_| Error::Chroot("command contains a NUL byte".into()))?;
        let c_args: Vec<CString> = args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::Chroot("argument contains a NUL byte".into()))?;
        let c_env = [CString::new(CHROOT_PATH).expect("static env string")];

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let status = (|| -> nix::Result<()> {
                    chroot(dir)?;
                    chdir(Path::new(workdir))?;
                    execve(&c_command, &c_args, &c_env)?;
                    Ok(())
                })();
                // execve only returns on failure
                let _ = status;
                std::process::exit(127);
            }
            Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, code)) => Ok(code == 0),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    warn!("Chrooted process terminated by signal {:?}", signal);
                    Ok(false)
                }
                Ok(other) => {
                    warn!("Chrooted process finished with status {:?}", other);
                    Ok(false)
                }
                Err(e) => Err(Error::Chroot(format!("waitpid failed: {}", e))),
            },
            Err(e) => Err(Error::Chroot(format!("fork failed: {}", e))),
        }
    };

    let command_result = run();

    // Teardown happens in reverse mount order on every path
    let mut cleanup_ok = true;
    if devpts_mounted {
        cleanup_ok &= unmount_pseudo(&devpts_target);
    }
    if proc_mounted {
        cleanup_ok &= unmount_pseudo(&proc_target);
    }
    if !cleanup_ok {
        warn!(
            "Failed to unmount pseudo-filesystems under {}; manual cleanup may be required",
            dir.display()
        );
    }

    match command_result {
        Ok(success) => Ok(success && cleanup_ok),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_empty_command() {
        let dir = TempDir::new().unwrap();
        let result = exec_in_chroot(dir.path(), "", &[], "/");
        assert!(matches!(result, Err(Error::Chroot(_))));
    }

    #[test]
    fn test_rejects_missing_directory() {
        let result = exec_in_chroot(
            Path::new("/nonexistent/chroot"),
            "/bin/sh",
            &["/bin/sh".to_string()],
            "/",
        );
        assert!(matches!(result, Err(Error::Chroot(_))));
    }
}
