// crates/calib-server/src/submitter.rs
// ============================================================================
// Module: Job Submitters
// Description: JobSubmitter implementations shipped with the server.
// Purpose: Start worker jobs manually (grid) or as local processes.
// Dependencies: calib-core
// ============================================================================

//! ## Overview
//! [`ManualJobSubmitter`] only records jobs; grid workers are launched
//! outside the coordinator and pull their input by campaign and slice.
//! [`CommandJobSubmitter`] spawns one local process per slice, substituting
//! placeholders into its argument template.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;

use calib_core::JobId;
use calib_core::JobRequest;
use calib_core::JobSubmitter;
use calib_core::SubmitError;

// ============================================================================
// SECTION: Manual Submitter
// ============================================================================

/// Submitter that records jobs without starting anything.
#[derive(Debug, Default)]
pub struct ManualJobSubmitter {
    /// Jobs issued and not cancelled.
    open: Mutex<BTreeMap<JobId, JobRequest>>,
}

impl ManualJobSubmitter {
    /// Creates an empty submitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs issued and not cancelled, by identifier.
    #[must_use]
    pub fn open_jobs(&self) -> Vec<JobId> {
        self.open.lock().map(|open| open.keys().cloned().collect()).unwrap_or_default()
    }
}

impl JobSubmitter for ManualJobSubmitter {
    fn submit(&self, request: &JobRequest) -> Result<JobId, SubmitError> {
        let job_id = JobId::new(format!(
            "manual-c{}-{}-{}-s{}-a{}",
            request.campaign_id,
            request.cursor.phase,
            request.cursor.step,
            request.input.slice,
            request.attempt
        ));
        self.open
            .lock()
            .map_err(|_| SubmitError::Fatal("manual submitter lock poisoned".to_string()))?
            .insert(job_id.clone(), request.clone());
        Ok(job_id)
    }

    fn cancel(&self, job_id: &JobId) -> Result<(), SubmitError> {
        self.open
            .lock()
            .map_err(|_| SubmitError::Fatal("manual submitter lock poisoned".to_string()))?
            .remove(job_id);
        Ok(())
    }
}

// ============================================================================
// SECTION: Command Submitter
// ============================================================================

/// Submitter spawning one local process per job.
///
/// Recognised placeholders: `{campaign}`, `{slice}`, `{phase}`, `{step}`,
/// `{attempt}`, and `{endpoint}`.
pub struct CommandJobSubmitter {
    /// Program to run.
    program: String,
    /// Argument template.
    args: Vec<String>,
    /// Request channel URL handed to workers.
    endpoint: String,
    /// Running children by job.
    children: Mutex<BTreeMap<JobId, Child>>,
}

impl CommandJobSubmitter {
    /// Creates a submitter for `program` with an argument template.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, endpoint: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            endpoint: endpoint.into(),
            children: Mutex::new(BTreeMap::new()),
        }
    }

    /// Arguments for one job after placeholder substitution.
    #[must_use]
    pub fn expand_args(&self, request: &JobRequest) -> Vec<String> {
        let campaign = request.campaign_id.to_string();
        let slice = request.input.slice.to_string();
        let phase = request.cursor.phase.to_string();
        let step = request.cursor.step.to_string();
        let attempt = request.attempt.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{campaign}", &campaign)
                    .replace("{slice}", &slice)
                    .replace("{phase}", &phase)
                    .replace("{step}", &step)
                    .replace("{attempt}", &attempt)
                    .replace("{endpoint}", &self.endpoint)
            })
            .collect()
    }

    /// Number of spawned children not yet reaped.
    #[must_use]
    pub fn running(&self) -> usize {
        self.children.lock().map(|mut children| reap(&mut children)).unwrap_or(0)
    }
}

impl JobSubmitter for CommandJobSubmitter {
    fn submit(&self, request: &JobRequest) -> Result<JobId, SubmitError> {
        let child = Command::new(&self.program)
            .args(self.expand_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| spawn_error(&self.program, &err))?;
        let job_id = JobId::new(format!(
            "pid-{}-c{}-s{}-a{}",
            child.id(),
            request.campaign_id,
            request.input.slice,
            request.attempt
        ));
        let mut children = self
            .children
            .lock()
            .map_err(|_| SubmitError::Fatal("command submitter lock poisoned".to_string()))?;
        reap(&mut children);
        children.insert(job_id.clone(), child);
        Ok(job_id)
    }

    fn cancel(&self, job_id: &JobId) -> Result<(), SubmitError> {
        let child = self
            .children
            .lock()
            .map_err(|_| SubmitError::Fatal("command submitter lock poisoned".to_string()))?
            .remove(job_id);
        let Some(mut child) = child else {
            return Ok(());
        };
        if let Err(err) = child.kill()
            && err.kind() != io::ErrorKind::InvalidInput
        {
            return Err(SubmitError::Transient(format!("kill {job_id} failed: {err}")));
        }
        child.wait().map_err(|err| SubmitError::Transient(format!("wait {job_id} failed: {err}")))?;
        Ok(())
    }
}

/// Drops exited children; returns the number still running.
fn reap(children: &mut BTreeMap<JobId, Child>) -> usize {
    children.retain(|_, child| matches!(child.try_wait(), Ok(None)));
    children.len()
}

/// Classifies a spawn failure.
fn spawn_error(program: &str, err: &io::Error) -> SubmitError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            SubmitError::Fatal(format!("cannot spawn {program}: {err}"))
        }
        _ => SubmitError::Transient(format!("spawn {program} failed: {err}")),
    }
}
