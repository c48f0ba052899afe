//! Module ordering, error short-circuit, and ignored errors.
// crates/calib-core/tests/workflow.rs
// ============================================================================
// Module: Workflow Engine Tests
// Description: Module ordering, error short-circuit, and ignored errors.
// Purpose: Pin worker workflow semantics.
// Dependencies: calib-core
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

use calib_core::ErrorKind;
use calib_core::ServiceError;
use calib_core::runtime::WorkflowContext;
use calib_core::runtime::WorkflowEngine;
use calib_core::runtime::WorkflowModule;

struct Step {
    name: &'static str,
    fail: bool,
    ignore: bool,
}

impl WorkflowModule for Step {
    fn name(&self) -> &str {
        self.name
    }

    fn ignore_app_error(&self) -> bool {
        self.ignore
    }

    fn execute(&mut self, context: &mut WorkflowContext) -> Result<(), ServiceError> {
        if self.fail {
            return Err(ServiceError::operator(format!("{} exited with 1", self.name)));
        }
        let trail = context.get("trail").unwrap_or_default().to_string();
        context.set("trail", format!("{trail}{};", self.name));
        Ok(())
    }
}

fn step(name: &'static str, fail: bool, ignore: bool) -> Box<dyn WorkflowModule> {
    Box::new(Step { name, fail, ignore })
}

#[test]
fn modules_run_in_order() {
    let mut engine = WorkflowEngine::new()
        .with_module(step("marlin", false, false))
        .with_module(step("slcio_merge", false, false));
    let mut context = WorkflowContext::new("/tmp/slice-0");
    let report = engine.run(&mut context).unwrap();
    assert_eq!(report.completed, vec!["marlin", "slcio_merge"]);
    assert_eq!(context.get("trail"), Some("marlin;slcio_merge;"));
}

#[test]
fn first_error_stops_the_workflow() {
    let mut engine = WorkflowEngine::new()
        .with_module(step("marlin", true, false))
        .with_module(step("slcio_merge", false, false));
    let mut context = WorkflowContext::new("/tmp/slice-1");
    let err = engine.run(&mut context).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Operator);
    assert!(err.message.contains("module marlin failed"));
    assert_eq!(context.get("trail"), None);
}

#[test]
fn ignored_errors_are_reported_and_skipped() {
    let mut engine = WorkflowEngine::new();
    engine.push(step("upload_logs", true, true));
    engine.push(step("marlin", false, false));
    let mut context = WorkflowContext::new("/tmp/slice-2");
    let report = engine.run(&mut context).unwrap();
    assert_eq!(report.completed, vec!["marlin"]);
    assert_eq!(report.ignored.len(), 1);
    assert_eq!(report.ignored[0].0, "upload_logs");
}
