// crates/calib-core/src/runtime/workflow.rs
// ============================================================================
// Module: Worker Workflow Engine
// Description: Ordered workflow modules and scoped working directories.
// Purpose: Drive the per-slice application steps on a worker node.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! A worker runs a list of [`WorkflowModule`]s in order. Each module returns
//! a tagged result; the [`WorkflowEngine`] stops at the first error unless
//! that module ignores application errors, in which case the error is
//! recorded and the next module runs.
//!
//! [`WorkDirGuard`] switches the process working directory and restores the
//! previous one when dropped, on every exit path. I/O failures surface as
//! `Transport` errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use crate::core::ServiceError;

// ============================================================================
// SECTION: Context
// ============================================================================

/// State shared between the modules of one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowContext {
    /// Directory the workflow operates in.
    pub work_dir: PathBuf,
    /// Named values passed from module to module.
    pub values: BTreeMap<String, String>,
}

impl WorkflowContext {
    /// Creates a context rooted at `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self { work_dir: work_dir.into(), values: BTreeMap::new() }
    }

    /// Stores a named value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Reads a named value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

// ============================================================================
// SECTION: Modules
// ============================================================================

/// One workflow step.
pub trait WorkflowModule {
    /// Module name used in reports.
    fn name(&self) -> &str;

    /// When true, an error from this module does not stop the workflow.
    fn ignore_app_error(&self) -> bool {
        false
    }

    /// Executes the module.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] describing the failure.
    fn execute(&mut self, context: &mut WorkflowContext) -> Result<(), ServiceError>;
}

/// Outcome of a workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowReport {
    /// Modules that succeeded, in order.
    pub completed: Vec<String>,
    /// Modules whose errors were ignored.
    pub ignored: Vec<(String, ServiceError)>,
}

/// Ordered list of modules.
#[derive(Default)]
pub struct WorkflowEngine {
    /// Modules in execution order.
    modules: Vec<Box<dyn WorkflowModule>>,
}

impl WorkflowEngine {
    /// Creates an empty workflow.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a module.
    #[must_use]
    pub fn with_module(mut self, module: Box<dyn WorkflowModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Appends a module in place.
    pub fn push(&mut self, module: Box<dyn WorkflowModule>) {
        self.modules.push(module);
    }

    /// Runs every module in order.
    ///
    /// # Errors
    ///
    /// Returns the first error from a module that does not ignore application errors.
    pub fn run(&mut self, context: &mut WorkflowContext) -> Result<WorkflowReport, ServiceError> {
        let mut report = WorkflowReport::default();
        for module in &mut self.modules {
            match module.execute(context) {
                Ok(()) => report.completed.push(module.name().to_string()),
                Err(err) if module.ignore_app_error() => {
                    report.ignored.push((module.name().to_string(), err));
                }
                Err(err) => {
                    return Err(ServiceError::new(
                        err.kind,
                        format!("module {} failed: {}", module.name(), err.message),
                    ));
                }
            }
        }
        Ok(report)
    }
}

// ============================================================================
// SECTION: Working Directory Guard
// ============================================================================

/// Scoped working-directory change.
///
/// # Invariants
/// - The previous working directory is restored when the guard is dropped.
#[derive(Debug)]
pub struct WorkDirGuard {
    /// Directory active before the guard was created.
    previous: PathBuf,
    /// Set once the previous directory has been restored.
    restored: bool,
}

impl WorkDirGuard {
    /// Creates `path` if needed and makes it the working directory.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error when the directory cannot be created or entered.
    pub fn enter(path: &Path) -> Result<Self, ServiceError> {
        let previous = env::current_dir().map_err(|err| io_error("read working directory", &err))?;
        fs::create_dir_all(path).map_err(|err| io_error("create working directory", &err))?;
        env::set_current_dir(path).map_err(|err| io_error("enter working directory", &err))?;
        Ok(Self { previous, restored: false })
    }

    /// Directory that will be restored.
    #[must_use]
    pub fn previous(&self) -> &Path {
        &self.previous
    }

    /// Restores the previous directory and reports failure.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error when the previous directory cannot be entered.
    pub fn restore(mut self) -> Result<(), ServiceError> {
        self.restored = true;
        env::set_current_dir(&self.previous)
            .map_err(|err| io_error("restore working directory", &err))
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if !self.restored {
            let _ = env::set_current_dir(&self.previous);
        }
    }
}

/// Maps an I/O failure to a `Transport` error.
fn io_error(action: &str, err: &std::io::Error) -> ServiceError {
    ServiceError::transport(format!("failed to {action}: {err}"))
}
