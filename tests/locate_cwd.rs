//! An empty search root resolves against the process working directory.
//!
//! Kept in its own test binary because it changes the current directory.

use clrbridge::{locator, paths};
use std::fs;

#[test]
fn test_empty_root_is_current_directory() {
    let cwd = tempfile::tempdir().unwrap();
    fs::write(cwd.path().join("Bridge.dll"), b"MZ").unwrap();
    std::env::set_current_dir(cwd.path()).unwrap();

    let roots = ["/nonexistent-app-root", ""];
    let found = locator::locate(&roots, "Bridge.dll").unwrap();
    assert_eq!(found, paths::absolute_path(cwd.path()).unwrap());

    let roots = [""];
    assert!(locator::locate(&roots, "Other.dll").is_err());
}
