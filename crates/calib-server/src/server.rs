// crates/calib-server/src/server.rs
// ============================================================================
// Module: Calibration Server
// Description: HTTP request channel, ticker, and lifecycle for the service.
// Purpose: Host a CalibrationService built from configuration.
// Dependencies: calib-core, calib-config, calib-store-sqlite, axum, tokio
// ============================================================================

//! ## Overview
//! [`CalibrationServer::from_config`] builds the store, audit sink, and job
//! submitter named by the configuration and restores open campaigns from the
//! store. [`CalibrationServer::serve`] exposes `POST /rpc` and runs the
//! maintenance ticker until the shutdown signal fires, then persists every
//! open campaign. The service is synchronous; each request runs on the
//! blocking pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use calib_config::CalibrationConfig;
use calib_config::StoreType;
use calib_config::SubmissionMode;
use calib_core::AccessRegistry;
use calib_core::AuditSink;
use calib_core::CalibrationAuditEvent;
use calib_core::CalibrationService;
use calib_core::Clock;
use calib_core::JobSubmitter;
use calib_core::Reply;
use calib_core::ServiceComponents;
use calib_core::ServiceError;
use calib_core::SharedCampaignStore;
use calib_core::StrategyRegistry;
use calib_core::runtime::AuditLevel;
use calib_core::runtime::FileAuditSink;
use calib_core::runtime::InMemoryCampaignStore;
use calib_core::runtime::NoopAuditSink;
use calib_core::runtime::StderrAuditSink;
use calib_core::runtime::SystemClock;
use calib_store_sqlite::SqliteCampaignStore;
use serde_json::Value;
use tokio::net::TcpListener;

use crate::rpc::dispatch;
use crate::rpc::parse_request;
use crate::submitter::CommandJobSubmitter;
use crate::submitter::ManualJobSubmitter;

// ============================================================================
// SECTION: Server
// ============================================================================

/// Calibration server instance.
pub struct CalibrationServer {
    /// Validated configuration.
    config: CalibrationConfig,
    /// Hosted service.
    service: Arc<CalibrationService>,
    /// Audit destination shared with the service.
    audit: Arc<dyn AuditSink>,
    /// Time source shared with the service.
    clock: Arc<dyn Clock>,
}

impl CalibrationServer {
    /// Builds a server from configuration and restores stored campaigns.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the configuration is invalid or a
    /// collaborator cannot be initialised.
    pub fn from_config(config: CalibrationConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let store = build_store(&config)?;
        let audit = build_audit(&config)?;
        let submitter = build_submitter(&config)?;
        Self::with_components(config, submitter, store, audit)
    }

    /// Builds a server around explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Init`] when stored campaigns cannot be restored.
    pub fn with_components(
        config: CalibrationConfig,
        submitter: Arc<dyn JobSubmitter>,
        store: SharedCampaignStore,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ServerError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = CalibrationService::new(
            ServiceComponents {
                submitter,
                store,
                audit: Arc::clone(&audit),
                clock: Arc::clone(&clock),
                strategies: StrategyRegistry::with_reference_strategies(),
                accessors: AccessRegistry::with_defaults(),
            },
            config.service_config(),
        );
        service.restore().map_err(|err| ServerError::Init(err.to_string()))?;
        Ok(Self { config, service: Arc::new(service), audit, clock })
    }

    /// Hosted service.
    #[must_use]
    pub fn service(&self) -> Arc<CalibrationService> {
        Arc::clone(&self.service)
    }

    /// Router exposing `POST /rpc`.
    #[must_use]
    pub fn router(&self) -> Router {
        let max_body_bytes = self.config.server.max_body_bytes;
        let state = Arc::new(ServerState { service: self.service(), max_body_bytes });
        Router::new()
            .route("/rpc", post(handle_rpc))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .with_state(state)
    }

    /// Serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when binding, serving, or the final snapshot fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr =
            self.config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Transport(format!("bind {addr} failed: {err}")))?;
        self.serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serves on `listener` until `shutdown` completes, then persists open campaigns.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when serving or the final snapshot fails.
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let local = listener.local_addr().ok();
        self.emit_started(local);
        let ticker = tokio::spawn(run_ticker(
            self.service(),
            Arc::clone(&self.audit),
            Arc::clone(&self.clock),
            Duration::from_millis(self.config.server.tick_ms),
        ));
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|err| ServerError::Transport(format!("http server failed: {err}")));
        ticker.abort();
        let service = self.service();
        let saved = tokio::task::spawn_blocking(move || service.shutdown())
            .await
            .map_err(|err| ServerError::Init(format!("shutdown task failed: {err}")))?
            .map_err(|err| ServerError::Init(err.to_string()))?;
        self.audit.record(
            &CalibrationAuditEvent::new("server_stopped", AuditLevel::Info, self.clock.now())
                .detail(format!("{saved} campaigns persisted")),
        );
        served
    }

    /// Records the start event, flagging remote binds.
    fn emit_started(&self, local: Option<SocketAddr>) {
        let detail = local.map_or_else(|| self.config.server.bind.clone(), |addr| addr.to_string());
        self.audit.record(
            &CalibrationAuditEvent::new("server_started", AuditLevel::Info, self.clock.now())
                .detail(detail.clone()),
        );
        if local.is_some_and(|addr| !addr.ip().is_loopback()) {
            self.audit.record(
                &CalibrationAuditEvent::new("remote_bind", AuditLevel::Warn, self.clock.now())
                    .detail(format!("request channel reachable beyond loopback at {detail}")),
            );
        }
    }
}

// ============================================================================
// SECTION: Collaborators
// ============================================================================

/// Builds the campaign store named by the configuration.
fn build_store(config: &CalibrationConfig) -> Result<SharedCampaignStore, ServerError> {
    match config.store.store_type {
        StoreType::Memory => Ok(SharedCampaignStore::from_store(InMemoryCampaignStore::new())),
        StoreType::Sqlite => {
            let sqlite = config
                .sqlite_config()
                .ok_or_else(|| ServerError::Config("sqlite store requires path".to_string()))?;
            let store =
                SqliteCampaignStore::new(sqlite).map_err(|err| ServerError::Init(err.to_string()))?;
            Ok(SharedCampaignStore::from_store(store))
        }
    }
}

/// Builds the audit sink named by the configuration.
fn build_audit(config: &CalibrationConfig) -> Result<Arc<dyn AuditSink>, ServerError> {
    if !config.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match &config.audit.path {
        Some(path) => {
            let sink = FileAuditSink::new(Path::new(path.trim()))
                .map_err(|err| ServerError::Init(format!("audit file {path}: {err}")))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

/// Builds the job submitter named by the configuration.
fn build_submitter(config: &CalibrationConfig) -> Result<Arc<dyn JobSubmitter>, ServerError> {
    let submission = &config.submission;
    match submission.mode {
        SubmissionMode::Manual => Ok(Arc::new(ManualJobSubmitter::new())),
        SubmissionMode::Command => {
            let program = submission.command.clone().ok_or_else(|| {
                ServerError::Config("command submission requires command".to_string())
            })?;
            Ok(Arc::new(CommandJobSubmitter::new(
                program,
                submission.args.clone(),
                submission.endpoint.clone(),
            )))
        }
    }
}

// ============================================================================
// SECTION: Ticker
// ============================================================================

/// Reaps timed-out jobs and evicts retained campaigns every `period`.
async fn run_ticker(
    service: Arc<CalibrationService>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let service = Arc::clone(&service);
        let outcome = tokio::task::spawn_blocking(move || {
            service.expire_jobs()?;
            service.purge_finished().map(|_| ())
        })
        .await;
        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(err) => err.to_string(),
        };
        audit.record(
            &CalibrationAuditEvent::new("maintenance_failed", AuditLevel::Error, clock.now())
                .detail(failure),
        );
    }
}

// ============================================================================
// SECTION: HTTP Handling
// ============================================================================

/// Shared state for the RPC handler.
struct ServerState {
    /// Hosted service.
    service: Arc<CalibrationService>,
    /// Maximum allowed request body size.
    max_body_bytes: usize,
}

/// Handles one `POST /rpc` request.
async fn handle_rpc(State(state): State<Arc<ServerState>>, bytes: Bytes) -> impl IntoResponse {
    let (status, reply) = answer(&state, bytes).await;
    (status, axum::Json(reply))
}

/// Decodes, dispatches, and classifies one request.
async fn answer(state: &ServerState, bytes: Bytes) -> (StatusCode, Reply<Value>) {
    if bytes.len() > state.max_body_bytes {
        let error = ServiceError::operator("request body too large");
        return (StatusCode::PAYLOAD_TOO_LARGE, Reply::failure(error));
    }
    let request = match parse_request(&bytes) {
        Ok(request) => request,
        Err(error) => return (StatusCode::BAD_REQUEST, Reply::failure(error)),
    };
    let service = Arc::clone(&state.service);
    match tokio::task::spawn_blocking(move || dispatch(&service, request)).await {
        Ok(reply) => (StatusCode::OK, reply),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Reply::failure(ServiceError::internal(format!("request task failed: {err}"))),
        ),
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}
