// tests/integration_test.rs

//! Integration tests for Starpack
//!
//! These tests verify end-to-end functionality across modules against
//! scratch install roots.

use flate2::write::GzEncoder;
use flate2::Compression;
use starpack::db::InstalledDb;
use starpack::indexer;
use starpack::manifest::{ManifestEntry, PackageSources, RepoIndex};
use starpack::remove;
use starpack::resolver;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn make_archive(dir: &Path, file_name: &str, metadata: &str, files: &[(&str, &str)]) {
    let file = fs::File::create(dir.join(file_name)).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut add = |path: &str, data: &str| {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, path, data.as_bytes())
            .unwrap();
    };

    add("metadata.yaml", metadata);
    for (path, data) in files {
        add(path, data);
    }
    builder
        .into_inner()
        .unwrap()
        .finish()
        .unwrap()
        .flush()
        .unwrap();
}

#[test]
fn test_database_lifecycle() {
    let root = TempDir::new().unwrap();
    let db = InstalledDb::for_root(root.path());

    // ensure_exists creates the nested directory structure
    db.ensure_exists().unwrap();
    assert!(root
        .path()
        .join("var/lib/starpack/installed.db")
        .exists());

    let entry = ManifestEntry {
        name: "nginx".to_string(),
        version: "1.21.0".to_string(),
        description: "HTTP and reverse proxy server".to_string(),
        files: vec![
            "usr/bin/nginx".to_string(),
            "etc/nginx/nginx.conf".to_string(),
        ],
        dependencies: vec!["openssl".to_string()],
        update_time: Some("2024-06-01T00:00:00Z".to_string()),
        ..Default::default()
    };
    db.append_record("nginx", &entry).unwrap();

    assert!(db.is_installed("nginx").unwrap());
    assert_eq!(db.version_of("nginx").unwrap().unwrap(), "1.21.0");
    assert_eq!(
        db.files_of("nginx").unwrap(),
        vec!["/usr/bin/nginx", "/etc/nginx/nginx.conf"]
    );
    assert_eq!(db.dependencies_of("nginx").unwrap(), vec!["openssl"]);

    db.splice_record("nginx").unwrap();
    assert!(!db.is_installed("nginx").unwrap());
}

#[test]
fn test_index_then_resolve_pipeline() {
    // Build a repository directory from raw archives, index it, and run
    // the planner over the result.
    let repo = TempDir::new().unwrap();
    make_archive(
        repo.path(),
        "app.starpack",
        "name: app\nversion: 2.0.0\ndescription: The app\ndependencies:\n  - libfoo\n",
        &[("files/usr/bin/app", "app binary")],
    );
    make_archive(
        repo.path(),
        "libfoo.starpack",
        "name: libfoo\nversion: 1.4.0\ndescription: Support library\n",
        &[("files/usr/lib/libfoo.so", "elf")],
    );

    indexer::build_index(repo.path()).unwrap();

    let index = RepoIndex::load(&repo.path().join("repo.db.yaml")).unwrap();
    assert_eq!(index.packages.len(), 2);

    let mut sources = PackageSources::new();
    sources.ingest("https://repo.example/", index);

    let root = TempDir::new().unwrap();
    let db = InstalledDb::for_root(root.path());
    db.ensure_exists().unwrap();

    let plan = resolver::plan_installation(&["app".to_string()], &sources, &db).unwrap();
    assert_eq!(plan, vec!["libfoo", "app"]);

    // A second plan over the same request after "installing" is empty
    for name in &plan {
        let (_, entry) = sources.get(name).unwrap();
        db.append_record(name, entry).unwrap();
    }
    let replan = resolver::plan_installation(&["app".to_string()], &sources, &db).unwrap();
    assert!(replan.is_empty());
}

#[test]
fn test_dependency_cycle_still_installs() {
    let mut sources = PackageSources::new();
    sources.ingest(
        "https://repo.example/",
        RepoIndex {
            packages: vec![
                ManifestEntry {
                    name: "foo".to_string(),
                    version: "1.0.0".to_string(),
                    file_name: "foo.starpack".to_string(),
                    dependencies: vec!["bar".to_string()],
                    ..Default::default()
                },
                ManifestEntry {
                    name: "bar".to_string(),
                    version: "1.0.0".to_string(),
                    file_name: "bar.starpack".to_string(),
                    dependencies: vec!["foo".to_string()],
                    ..Default::default()
                },
            ],
        },
    );

    let root = TempDir::new().unwrap();
    let db = InstalledDb::for_root(root.path());
    db.ensure_exists().unwrap();

    let plan = resolver::plan_installation(&["foo".to_string()], &sources, &db).unwrap();
    assert_eq!(plan, vec!["bar", "foo"]);
}

#[test]
fn test_remove_transaction_cleans_disk_and_database() {
    let root = TempDir::new().unwrap();
    let db = InstalledDb::for_root(root.path());
    db.ensure_exists().unwrap();

    // Lay the package's files down as an install would
    fs::create_dir_all(root.path().join("usr/bin")).unwrap();
    fs::write(root.path().join("usr/bin/app"), "binary").unwrap();
    fs::create_dir_all(root.path().join("usr/share/app")).unwrap();
    fs::write(root.path().join("usr/share/app/data"), "data").unwrap();
    fs::create_dir_all(root.path().join("usr/lib")).unwrap();
    fs::write(root.path().join("usr/lib/libfoo.so"), "elf").unwrap();

    db.append_record(
        "libfoo",
        &ManifestEntry {
            name: "libfoo".to_string(),
            version: "1.0".to_string(),
            files: vec!["usr/lib/libfoo.so".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    db.append_record(
        "app",
        &ManifestEntry {
            name: "app".to_string(),
            version: "2.0".to_string(),
            files: vec![
                "usr/bin/app".to_string(),
                "usr/share/app/data".to_string(),
                "usr/share/app".to_string(),
            ],
            dependencies: vec!["libfoo".to_string()],
            ..Default::default()
        },
    )
    .unwrap();

    remove::remove_packages(&["app".to_string()], &db, false, root.path()).unwrap();

    // app's payload is gone, and so is the orphaned dependency
    assert!(!root.path().join("usr/bin/app").exists());
    assert!(!root.path().join("usr/share/app").exists());
    assert!(!root.path().join("usr/lib/libfoo.so").exists());
    assert!(!db.is_installed("app").unwrap());
    assert!(!db.is_installed("libfoo").unwrap());

    // Shared directories survive
    assert!(root.path().join("usr/bin").exists());
}

#[test]
fn test_remove_refuses_when_reverse_dependency_remains() {
    let root = TempDir::new().unwrap();
    let db = InstalledDb::for_root(root.path());
    db.ensure_exists().unwrap();

    db.append_record(
        "foo",
        &ManifestEntry {
            name: "foo".to_string(),
            version: "1.0".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    db.append_record(
        "baz",
        &ManifestEntry {
            name: "baz".to_string(),
            version: "1.0".to_string(),
            dependencies: vec!["foo".to_string()],
            ..Default::default()
        },
    )
    .unwrap();

    let result = remove::remove_packages(&["foo".to_string()], &db, false, root.path());
    assert!(result.is_err());
    assert!(db.is_installed("foo").unwrap());
    assert!(db.is_installed("baz").unwrap());
}

#[test]
fn test_update_patches_record_in_place() {
    let root = TempDir::new().unwrap();
    let db = InstalledDb::for_root(root.path());
    db.ensure_exists().unwrap();

    db.append_record(
        "demo",
        &ManifestEntry {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            files: vec!["usr/bin/demo".to_string()],
            dependencies: vec!["zlib".to_string()],
            update_time: Some("01/01/2024".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let before = fs::read_to_string(db.path()).unwrap();
    db.update_version_and_time("demo", "1.0.0", "01/06/2024")
        .unwrap();
    let after = fs::read_to_string(db.path()).unwrap();

    // Only the Update-time line changed
    assert_eq!(
        before.replace("Update-time: 01/01/2024", "Update-time: 01/06/2024"),
        after
    );
    assert_eq!(db.files_of("demo").unwrap(), vec!["/usr/bin/demo"]);
    assert_eq!(db.dependencies_of("demo").unwrap(), vec!["zlib"]);
}

#[test]
fn test_augmented_index_resolves_new_packages() {
    let repo = TempDir::new().unwrap();
    make_archive(
        repo.path(),
        "first.starpack",
        "name: first\nversion: 1.0\n",
        &[("files/usr/bin/first", "x")],
    );
    indexer::build_index(repo.path()).unwrap();

    make_archive(
        repo.path(),
        "second.starpack",
        "name: second\nversion: 1.0\ndependencies:\n  - first\n",
        &[("files/usr/bin/second", "y")],
    );
    indexer::augment_index(repo.path()).unwrap();

    let index = RepoIndex::load(&repo.path().join("repo.db.yaml")).unwrap();
    let mut sources = PackageSources::new();
    sources.ingest("https://repo.example/", index);

    let root = TempDir::new().unwrap();
    let db = InstalledDb::for_root(root.path());
    db.ensure_exists().unwrap();

    let plan = resolver::plan_installation(&["second".to_string()], &sources, &db).unwrap();
    assert_eq!(plan, vec!["first", "second"]);
}
