//! Scoped working-directory changes.
// crates/calib-core/tests/work_dir_guard.rs
// ============================================================================
// Module: Working Directory Guard Tests
// Description: Scoped working-directory changes.
// Purpose: Kept in its own binary because the working directory is process-wide.
// Dependencies: calib-core, tempfile
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::env;

use calib_core::runtime::WorkDirGuard;

#[test]
fn guard_restores_previous_directory_on_every_exit_path() {
    let original = env::current_dir().unwrap();
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("slice-3").join("run");

    {
        let guard = WorkDirGuard::enter(&target).unwrap();
        assert_eq!(guard.previous(), original.as_path());
        let current = env::current_dir().unwrap().canonicalize().unwrap();
        assert_eq!(current, target.canonicalize().unwrap());
    }
    assert_eq!(env::current_dir().unwrap(), original);

    let guard = WorkDirGuard::enter(&target).unwrap();
    guard.restore().unwrap();
    assert_eq!(env::current_dir().unwrap(), original);
}
