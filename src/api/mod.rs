//! # Management HTTP API (feature `api`).
//!
//! Every route is a `GET` and requires `?secret=<api.secret>`:
//!
//! ```text
//! /stat                     all statistics
//! /{type}/add               add one worker of a type
//! /{selector}/start         start stopped uid(s)
//! /{selector}/restart       restart running worker(s)
//! /{selector}/stop          remove running worker(s)
//! /{selector}/reset         zero counters of running worker(s)
//! /{selector}/remove        forget stopped uid(s) and free them
//!
//! selector: "type:NN" (one uid) | "type" | "all"
//! ```
//!
//! The server is closed when the supervisor stops.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::future::join_all;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::core::Supervisor;
use crate::error::SupervisorError;
use crate::subscribers::WorkerStat;

#[derive(Clone)]
struct ApiState {
    sup: Supervisor,
    secret: Arc<str>,
}

#[derive(Deserialize)]
struct SecretQuery {
    secret: Option<String>,
}

struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(status = %self.0, error = %self.1, "api request failed");
        (self.0, self.1).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Binds the API listener and serves until `token` is cancelled.
pub(crate) async fn serve(
    sup: Supervisor,
    token: CancellationToken,
) -> Result<SocketAddr, SupervisorError> {
    let cfg = &sup.config().api;
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| SupervisorError::Listen {
            addr: addr.clone(),
            source,
        })?;
    let local = listener
        .local_addr()
        .map_err(|source| SupervisorError::Listen { addr, source })?;

    let app = router(sup);
    tracing::info!(addr = %local, "management api listening");
    tokio::spawn(async move {
        let res = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
        match res {
            Ok(()) => tracing::debug!("management api closed"),
            Err(e) => tracing::error!(error = %e, "management api failed"),
        }
    });
    Ok(local)
}

fn router(sup: Supervisor) -> Router {
    let state = ApiState {
        secret: sup.config().api.secret.as_str().into(),
        sup,
    };
    Router::new()
        .route("/stat", get(stat))
        .route("/{selector}/add", get(add))
        .route("/{selector}/start", get(start))
        .route("/{selector}/restart", get(restart))
        .route("/{selector}/stop", get(stop))
        .route("/{selector}/reset", get(reset))
        .route("/{selector}/remove", get(remove))
        .layer(middleware::from_fn_with_state(state.clone(), check_secret))
        .with_state(state)
}

async fn check_secret(
    State(state): State<ApiState>,
    Query(query): Query<SecretQuery>,
    req: Request,
    next: Next,
) -> Response {
    if query.secret.as_deref() != Some(&*state.secret) {
        return (StatusCode::FORBIDDEN, "Not allowed").into_response();
    }
    next.run(req).await
}

enum Selector<'a> {
    Uid(&'a str),
    /// `None` selects every type.
    Type(Option<&'a str>),
}

impl<'a> Selector<'a> {
    fn parse(raw: &'a str) -> Self {
        if raw.contains(':') {
            Selector::Uid(raw)
        } else if raw == "all" {
            Selector::Type(None)
        } else {
            Selector::Type(Some(raw))
        }
    }
}

impl ApiState {
    fn known(&self, uid: &str) -> Result<WorkerStat, ApiError> {
        self.sup
            .stat()
            .get(uid)
            .ok_or_else(|| ApiError::bad_request("Invalid id: no process found"))
    }

    fn running(&self, uid: &str) -> Result<WorkerStat, ApiError> {
        let stat = self.known(uid)?;
        if !stat.is_online() {
            return Err(ApiError::bad_request("Process is not running"));
        }
        Ok(stat)
    }

    async fn current_uids(&self, app_type: Option<&str>) -> Vec<String> {
        self.sup
            .workers(app_type)
            .await
            .into_iter()
            .map(|w| w.info.uid)
            .collect()
    }

    fn stats_of(&self, uids: &[String]) -> Vec<WorkerStat> {
        uids.iter().filter_map(|uid| self.sup.stat().get(uid)).collect()
    }
}

fn matches_type(stat: &WorkerStat, app_type: Option<&str>) -> bool {
    app_type.map_or(true, |t| t == stat.app_type)
}

async fn stat(State(state): State<ApiState>) -> Json<Vec<WorkerStat>> {
    Json(state.sup.stat().all())
}

async fn add(State(state): State<ApiState>, Path(app_type): Path<String>) -> ApiResult<WorkerStat> {
    let id = state.sup.add_worker(&app_type).await?;
    let worker = state
        .sup
        .worker(id)
        .await
        .ok_or_else(|| SupervisorError::not_found(id))?;
    Ok(Json(state.known(&worker.info.uid)?))
}

async fn start(
    State(state): State<ApiState>,
    Path(selector): Path<String>,
) -> Result<Response, ApiError> {
    match Selector::parse(&selector) {
        Selector::Uid(uid) => {
            let stat = state.known(uid)?;
            if stat.is_online() {
                return Err(ApiError::bad_request("Process is already running"));
            }
            state.sup.add_worker_with_uid(&stat.app_type, uid).await?;
            state.sup.stat().reset(uid);
            Ok(Json(state.known(uid)?).into_response())
        }
        Selector::Type(app_type) => {
            let stopped: Vec<WorkerStat> = state
                .sup
                .stat()
                .all()
                .into_iter()
                .filter(|s| !s.is_online() && matches_type(s, app_type))
                .collect();
            let results = join_all(
                stopped
                    .iter()
                    .map(|s| state.sup.add_worker_with_uid(&s.app_type, &s.uid)),
            )
            .await;
            if let Some(err) = results.into_iter().find_map(Result::err) {
                return Err(ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()));
            }
            let uids: Vec<String> = stopped.into_iter().map(|s| s.uid).collect();
            for uid in &uids {
                state.sup.stat().reset(uid);
            }
            Ok(Json(state.stats_of(&uids)).into_response())
        }
    }
}

async fn restart(
    State(state): State<ApiState>,
    Path(selector): Path<String>,
) -> Result<Response, ApiError> {
    match Selector::parse(&selector) {
        Selector::Uid(uid) => {
            let stat = state.running(uid)?;
            let id = stat
                .id
                .ok_or_else(|| ApiError::bad_request("Process is not running"))?;
            state.sup.restart_worker(id).await?;
            state.sup.stat().reset(uid);
            Ok(Json(state.known(uid)?).into_response())
        }
        Selector::Type(app_type) => {
            let uids = state.current_uids(app_type).await;
            state
                .sup
                .restart_all_workers(app_type)
                .await
                .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            for uid in &uids {
                state.sup.stat().reset(uid);
            }
            Ok(Json(state.stats_of(&uids)).into_response())
        }
    }
}

async fn stop(
    State(state): State<ApiState>,
    Path(selector): Path<String>,
) -> Result<Response, ApiError> {
    match Selector::parse(&selector) {
        Selector::Uid(uid) => {
            let stat = state.running(uid)?;
            let id = stat
                .id
                .ok_or_else(|| ApiError::bad_request("Process is not running"))?;
            state.sup.remove_worker(id).await?;
            Ok(Json(state.known(uid)?).into_response())
        }
        Selector::Type(app_type) => {
            let uids = state.current_uids(app_type).await;
            state
                .sup
                .remove_all_workers(app_type)
                .await
                .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Ok(Json(state.stats_of(&uids)).into_response())
        }
    }
}

async fn reset(
    State(state): State<ApiState>,
    Path(selector): Path<String>,
) -> Result<Response, ApiError> {
    match Selector::parse(&selector) {
        Selector::Uid(uid) => {
            state.running(uid)?;
            state.sup.stat().reset(uid);
            Ok(Json(state.known(uid)?).into_response())
        }
        Selector::Type(app_type) => {
            let uids = state.current_uids(app_type).await;
            for uid in &uids {
                state.sup.stat().reset(uid);
            }
            Ok(Json(state.stats_of(&uids)).into_response())
        }
    }
}

async fn remove(
    State(state): State<ApiState>,
    Path(selector): Path<String>,
) -> ApiResult<Vec<WorkerStat>> {
    match Selector::parse(&selector) {
        Selector::Uid(uid) => {
            let stat = state.known(uid)?;
            if stat.is_online() {
                return Err(ApiError::bad_request(
                    "To remove, process should be stopped first",
                ));
            }
            forget(&state, uid).await?;
        }
        Selector::Type(app_type) => {
            let stopped = state
                .sup
                .stat()
                .all()
                .into_iter()
                .filter(|s| !s.is_online() && matches_type(s, app_type));
            for s in stopped {
                if let Err(e) = forget(&state, &s.uid).await {
                    tracing::debug!(uid = %s.uid, error = %e.1, "uid kept");
                }
            }
        }
    }
    Ok(Json(state.sup.stat().all()))
}

/// Frees a stopped uid and drops its statistics.
async fn forget(state: &ApiState, uid: &str) -> Result<(), ApiError> {
    match state.sup.free_uid(uid).await {
        Ok(()) | Err(SupervisorError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    state.sup.stat().remove(uid);
    Ok(())
}
