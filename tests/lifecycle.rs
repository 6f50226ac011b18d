//! Integration tests for sandbox creation, teardown and the cascade that
//! removes shared parents once they are empty.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use fs_sandbox::{SandboxEnvironment, SandboxError, CONTAINER_NAME};
use tempfile::TempDir;

fn environment_in(temp: &TempDir) -> SandboxEnvironment {
    SandboxEnvironment::with_base_target(temp.path()).expect("Failed to create environment")
}

/// A custom root that does not exist yet, inside a temp dir we own.
fn custom_root(temp: &TempDir, name: &str) -> PathBuf {
    temp.path().join(name)
}

#[test]
fn test_custom_root_scenario() {
    let temp = TempDir::new().unwrap();
    let environment = environment_in(&temp);
    let root = custom_root(&temp, "custom-root");

    let sandbox = environment.create(Some(&root)).unwrap();
    assert!(root.is_dir());
    assert!(sandbox.path().starts_with(&root));
    assert_eq!(sandbox.root_hint(), Some(root.as_path()));

    sandbox.write_file("note.txt", "abc").unwrap();
    assert_eq!(sandbox.stat("note.txt").unwrap().len(), 3);
    assert!(sandbox.stat("missing.txt").is_none());

    sandbox.destroy().unwrap();
    assert!(!sandbox.path().exists());
    assert!(!root.exists());
}

#[test]
fn test_default_root_is_left_in_place() {
    let temp = TempDir::new().unwrap();
    let environment = environment_in(&temp);

    let sandbox = environment.create(None).unwrap();
    assert_eq!(
        sandbox.container_path(),
        temp.path().join(CONTAINER_NAME).as_path()
    );

    sandbox.destroy().unwrap();
    assert!(!sandbox.container_path().exists());
    assert!(temp.path().is_dir());
}

#[test]
fn test_container_survives_until_last_sibling() {
    let temp = TempDir::new().unwrap();
    let environment = environment_in(&temp);
    let root = custom_root(&temp, "shared");

    let first = environment.create(Some(&root)).unwrap();
    let second = environment.create(Some(&root)).unwrap();
    assert_ne!(first.path(), second.path());
    assert_eq!(first.container_path(), second.container_path());

    first.destroy().unwrap();
    assert!(!first.path().exists());
    assert!(second.path().is_dir());
    assert!(second.container_path().is_dir());

    second.destroy().unwrap();
    assert!(!second.path().exists());
    assert!(!second.container_path().exists());
    assert!(!root.exists());
}

#[test]
fn test_destroy_order_does_not_matter() {
    let temp = TempDir::new().unwrap();
    let environment = environment_in(&temp);
    let root = custom_root(&temp, "reverse");

    let sandboxes: Vec<_> = (0..4)
        .map(|_| environment.create(Some(&root)).unwrap())
        .collect();
    for sandbox in sandboxes.iter().rev() {
        assert!(root.is_dir());
        sandbox.destroy().unwrap();
    }
    assert!(!root.exists());
}

#[test]
fn test_custom_root_with_foreign_content_is_kept() {
    let temp = TempDir::new().unwrap();
    let environment = environment_in(&temp);
    let root = custom_root(&temp, "populated");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("keep.me"), "mine").unwrap();

    let sandbox = environment.create(Some(&root)).unwrap();
    sandbox.destroy().unwrap();

    assert!(!sandbox.container_path().exists());
    assert!(root.join("keep.me").is_file());
}

#[test]
fn test_destroy_all_removes_everything() {
    let temp = TempDir::new().unwrap();
    let environment = environment_in(&temp);
    let root = custom_root(&temp, "bulk");

    let a = environment.create(Some(&root)).unwrap();
    let b = environment.create(Some(&root)).unwrap();
    let c = environment.create(None).unwrap();
    assert_eq!(environment.live_count(), 3);

    environment.destroy_all().unwrap();

    assert_eq!(environment.live_count(), 0);
    for sandbox in [&a, &b, &c] {
        assert!(!sandbox.path().exists());
        assert!(sandbox.is_destroyed());
    }
    assert!(!root.exists());
    assert!(!environment.container_path().exists());

    // Already-destroyed handles stay quiet.
    a.destroy().unwrap();
    environment.destroy_all().unwrap();
}

#[test]
fn test_destroy_any_clears_leftovers_from_earlier_runs() {
    let temp = TempDir::new().unwrap();
    let leftover = temp.path().join(CONTAINER_NAME).join("crashed-run");
    fs::create_dir_all(leftover.join("deep")).unwrap();

    let environment = environment_in(&temp);
    assert_eq!(environment.orphans().unwrap(), vec![leftover.clone()]);

    environment.destroy_any().unwrap();
    assert!(!leftover.exists());
    assert!(environment.orphans().unwrap().is_empty());
}

#[test]
fn test_environments_are_independent() {
    let temp = TempDir::new().unwrap();
    let one = environment_in(&temp);
    let two = environment_in(&temp);

    let a = one.create(None).unwrap();
    let b = two.create(None).unwrap();

    one.destroy_all().unwrap();
    assert!(!a.path().exists());
    assert!(b.path().is_dir());
    assert_eq!(two.live_count(), 1);

    two.destroy_all().unwrap();
    assert!(!temp.path().join(CONTAINER_NAME).exists());
}

#[test]
fn test_concurrent_create_and_destroy_keep_registry_consistent() {
    let temp = TempDir::new().unwrap();
    let environment = Arc::new(environment_in(&temp));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let environment = Arc::clone(&environment);
            thread::spawn(move || {
                let sandbox = environment.create(None).unwrap();
                sandbox.write_file("marker", format!("{i}")).unwrap();
                if i % 2 == 0 {
                    sandbox.destroy().unwrap();
                }
                sandbox
            })
        })
        .collect();
    let sandboxes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(environment.live_count(), 4);
    let mut paths: Vec<_> = sandboxes.iter().map(|s| s.path().to_path_buf()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 8);

    environment.destroy_all().unwrap();
    assert!(sandboxes.iter().all(|s| !s.path().exists()));
    assert!(!environment.container_path().exists());
}

#[test]
fn test_creation_failure_propagates() {
    let temp = TempDir::new().unwrap();
    let environment = environment_in(&temp);
    let file_root = temp.path().join("not-a-dir");
    fs::write(&file_root, "blocking").unwrap();

    let err = environment.create(Some(&file_root)).unwrap_err();
    assert!(matches!(err, SandboxError::IoError(_)));
    assert_eq!(environment.live_count(), 0);
}
