// crates/calib-cli/src/worker.rs
// ============================================================================
// Module: Worker Runner
// Description: Pull-run-push cycle executed on a worker node.
// Purpose: Run the application for one slice and report its result.
// Dependencies: calib-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! [`run_worker`] pulls the slice input from the coordinator, runs a
//! [`WorkflowEngine`] inside the work directory, and pushes the resulting
//! [`Payload`]. The workflow writes the settings snapshot and slice
//! assignment, runs the application, and parses its result file. Any workflow
//! failure becomes an error payload so the coordinator still hears from the
//! slice.
//!
//! Application arguments may reference `{settings}`, `{input}`, `{result}`,
//! `{slice}`, `{events}`, and `{skip}`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use calib_core::CampaignId;
use calib_core::Histogram;
use calib_core::Payload;
use calib_core::ServiceError;
use calib_core::SliceIndex;
use calib_core::StepCursor;
use calib_core::SubmitOutcome;
use calib_core::WorkerInput;
use calib_core::runtime::WorkDirGuard;
use calib_core::runtime::WorkflowContext;
use calib_core::runtime::WorkflowEngine;
use calib_core::runtime::WorkflowModule;
use clap::ValueEnum;
use serde::Deserialize;

use crate::client::ClientError;
use crate::client::RpcClient;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Settings snapshot written for the application.
pub const SETTINGS_FILE: &str = "settings.json";
/// Slice assignment written for the application.
pub const INPUT_FILE: &str = "input.json";
/// Result file name used when none is configured.
pub const DEFAULT_RESULT_FILE: &str = "result.out";
/// Largest result file the worker will read.
pub const MAX_RESULT_BYTES: u64 = 64 * 1024 * 1024;

/// Context key holding the serialized payload.
const PAYLOAD_KEY: &str = "payload";

// ============================================================================
// SECTION: Options
// ============================================================================

/// Layout of the application's result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResultFormat {
    /// JSON scalar: a bare number or `{"value": .., "events": ..}`.
    Scalar,
    /// Raw histogram blob.
    Histogram,
}

/// Settings for one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Directory the application runs in.
    pub work_dir: PathBuf,
    /// Application program.
    pub program: String,
    /// Application argument template.
    pub args: Vec<String>,
    /// Result file, relative to the work directory.
    pub result_file: String,
    /// Result file layout.
    pub format: ResultFormat,
}

/// Outcome of one worker run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    /// Step the result was produced for.
    pub cursor: StepCursor,
    /// Payload kind label.
    pub kind: &'static str,
    /// Coordinator answer.
    pub outcome: SubmitOutcome,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Pulls, runs, and pushes one slice.
///
/// # Errors
///
/// Returns [`ClientError`] when the coordinator cannot be reached or rejects
/// a request. Application failures are reported as error payloads instead.
pub async fn run_worker(
    client: &RpcClient,
    campaign_id: CampaignId,
    slice: SliceIndex,
    options: WorkerOptions,
) -> Result<WorkerReport, ClientError> {
    let input = client.get_input(campaign_id, slice).await?;
    let cursor = input.cursor;
    let payload = tokio::task::spawn_blocking(move || execute(input, &options))
        .await
        .map_err(|err| ClientError::Protocol(format!("worker task failed: {err}")))?;
    let kind = payload.kind();
    let outcome = client.submit_result(campaign_id, slice, cursor, payload).await?;
    Ok(WorkerReport { cursor, kind, outcome })
}

/// Runs the workflow for `input`, folding failures into an error payload.
#[must_use]
pub fn execute(input: WorkerInput, options: &WorkerOptions) -> Payload {
    run_workflow(input, options)
        .unwrap_or_else(|err| Payload::Error { message: err.message })
}

/// Runs the workflow inside the work directory.
///
/// # Errors
///
/// Returns the first failing module's error.
pub fn run_workflow(input: WorkerInput, options: &WorkerOptions) -> Result<Payload, ServiceError> {
    let work_dir = path::absolute(&options.work_dir)
        .map_err(|err| ServiceError::transport(format!("failed to resolve work dir: {err}")))?;
    let guard = WorkDirGuard::enter(&work_dir)?;
    let mut context = WorkflowContext::new(work_dir);
    let mut engine = WorkflowEngine::new()
        .with_module(Box::new(WriteInputs { input }))
        .with_module(Box::new(RunApplication {
            program: options.program.clone(),
            args: options.args.clone(),
            result_file: options.result_file.clone(),
        }))
        .with_module(Box::new(ReadResult {
            result_file: options.result_file.clone(),
            format: options.format,
        }))
        .with_module(Box::new(RemoveInputs));
    engine.run(&mut context)?;
    guard.restore()?;
    let encoded = context
        .get(PAYLOAD_KEY)
        .ok_or_else(|| ServiceError::internal("workflow produced no payload"))?;
    serde_json::from_str(encoded)
        .map_err(|err| ServiceError::internal(format!("payload decode failed: {err}")))
}

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Writes the settings snapshot and slice assignment.
struct WriteInputs {
    /// Input pulled from the coordinator.
    input: WorkerInput,
}

impl WorkflowModule for WriteInputs {
    fn name(&self) -> &str {
        "write_inputs"
    }

    fn execute(&mut self, context: &mut WorkflowContext) -> Result<(), ServiceError> {
        let settings = context.work_dir.join(SETTINGS_FILE);
        let assignment = context.work_dir.join(INPUT_FILE);
        write_json(&settings, &self.input.settings)?;
        write_json(&assignment, &self.input.assignment)?;
        context.set("settings", settings.display().to_string());
        context.set("input", assignment.display().to_string());
        context.set("slice", self.input.assignment.slice.to_string());
        context.set("events", self.input.assignment.events.to_string());
        context.set("skip", self.input.assignment.skip_events.to_string());
        Ok(())
    }
}

/// Runs the application and checks its exit status.
struct RunApplication {
    /// Program to run.
    program: String,
    /// Argument template.
    args: Vec<String>,
    /// Result file the application writes.
    result_file: String,
}

impl WorkflowModule for RunApplication {
    fn name(&self) -> &str {
        "run_application"
    }

    fn execute(&mut self, context: &mut WorkflowContext) -> Result<(), ServiceError> {
        let result = context.work_dir.join(&self.result_file);
        if result.exists() {
            fs::remove_file(&result).map_err(|err| {
                ServiceError::transport(format!("failed to clear stale result: {err}"))
            })?;
        }
        context.set("result", result.display().to_string());
        let args: Vec<String> = self.args.iter().map(|arg| expand(arg, context)).collect();
        let status = Command::new(&self.program)
            .args(&args)
            .current_dir(&context.work_dir)
            .stdin(Stdio::null())
            .status()
            .map_err(|err| ServiceError::operator(format!("cannot run {}: {err}", self.program)))?;
        if !status.success() {
            return Err(ServiceError::operator(format!("{} exited with {status}", self.program)));
        }
        Ok(())
    }
}

/// Parses the result file into a payload.
struct ReadResult {
    /// Result file relative to the work directory.
    result_file: String,
    /// Result layout.
    format: ResultFormat,
}

impl WorkflowModule for ReadResult {
    fn name(&self) -> &str {
        "read_result"
    }

    fn execute(&mut self, context: &mut WorkflowContext) -> Result<(), ServiceError> {
        let path = context.work_dir.join(&self.result_file);
        let bytes = read_result_file(&path)?;
        let payload = parse_result(&bytes, self.format)?;
        let encoded = serde_json::to_string(&payload)
            .map_err(|err| ServiceError::internal(format!("payload encode failed: {err}")))?;
        context.set(PAYLOAD_KEY, encoded);
        Ok(())
    }
}

/// Removes the files written for the application.
struct RemoveInputs;

impl WorkflowModule for RemoveInputs {
    fn name(&self) -> &str {
        "remove_inputs"
    }

    fn ignore_app_error(&self) -> bool {
        true
    }

    fn execute(&mut self, context: &mut WorkflowContext) -> Result<(), ServiceError> {
        for name in [SETTINGS_FILE, INPUT_FILE] {
            fs::remove_file(context.work_dir.join(name)).map_err(|err| {
                ServiceError::transport(format!("failed to remove {name}: {err}"))
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Result Parsing
// ============================================================================

/// Scalar result file body.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarResult {
    /// Bare number.
    Bare(f64),
    /// Value with its event count.
    Weighted {
        /// Measured value.
        value: f64,
        /// Events behind the value.
        #[serde(default)]
        events: u64,
    },
}

/// Parses result file bytes.
///
/// # Errors
///
/// Returns an `operator` error when the bytes do not match `format`.
pub fn parse_result(bytes: &[u8], format: ResultFormat) -> Result<Payload, ServiceError> {
    match format {
        ResultFormat::Scalar => {
            let scalar: ScalarResult = serde_json::from_slice(bytes)
                .map_err(|err| ServiceError::operator(format!("invalid scalar result: {err}")))?;
            let (value, events) = match scalar {
                ScalarResult::Bare(value) => (value, 0),
                ScalarResult::Weighted { value, events } => (value, events),
            };
            if !value.is_finite() {
                return Err(ServiceError::operator("scalar result is not finite"));
            }
            Ok(Payload::Scalar { value, events })
        }
        ResultFormat::Histogram => {
            Histogram::decode(bytes)
                .map_err(|err| ServiceError::operator(format!("invalid histogram result: {err}")))?;
            Ok(Payload::Histogram { data: bytes.to_vec() })
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Substitutes context placeholders into one argument.
fn expand(arg: &str, context: &WorkflowContext) -> String {
    ["settings", "input", "result", "slice", "events", "skip"].iter().fold(
        arg.to_string(),
        |acc, key| match context.get(key) {
            Some(value) => acc.replace(&format!("{{{key}}}"), value),
            None => acc,
        },
    )
}

/// Writes pretty JSON to `path`.
fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), ServiceError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| ServiceError::internal(format!("json encode failed: {err}")))?;
    fs::write(path, bytes).map_err(|err| {
        ServiceError::transport(format!("failed to write {}: {err}", path.display()))
    })
}

/// Reads the result file, enforcing the size limit.
fn read_result_file(path: &Path) -> Result<Vec<u8>, ServiceError> {
    let metadata = fs::metadata(path).map_err(|err| {
        ServiceError::operator(format!("missing result file {}: {err}", path.display()))
    })?;
    if metadata.len() > MAX_RESULT_BYTES {
        return Err(ServiceError::operator(format!(
            "result file {} is {} bytes (limit {MAX_RESULT_BYTES})",
            path.display(),
            metadata.len()
        )));
    }
    fs::read(path).map_err(|err| {
        ServiceError::operator(format!("failed to read {}: {err}", path.display()))
    })
}
