use crate::{
    config::Config,
    dto::{CreateDirRequest, DeleteRequest, PathRef, RenameRequest},
    errors::{AppError, AppResult},
    security,
    storage::{StorageGateway, UploadOutcome},
};
use anyhow::Context;
use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::{header, HeaderValue, Method};
use serde::Serialize;
use serde_json::json;
use std::{convert::Infallible, sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub gateway: Arc<StorageGateway>,
}

pub async fn serve(cfg: Config, gateway: StorageGateway) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port)
        .parse()
        .context("parsing bind address")?;
    let shared = AppState { cfg: Arc::new(cfg), gateway: Arc::new(gateway) };
    let app = build_router(shared);

    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(shared: AppState) -> Router {
    let base = shared.cfg.server.base_path.clone();
    let json_limit = shared.cfg.limits.max_request_kb * 1024;
    let upload_limit = shared.cfg.limits.max_upload_mb * 1024 * 1024;

    let ops = Router::new()
        .route("/content", post(content).layer(RequestBodyLimitLayer::new(json_limit)))
        .route("/createdir", post(create_dir).layer(RequestBodyLimitLayer::new(json_limit)))
        .route("/rename", post(rename).layer(RequestBodyLimitLayer::new(json_limit)))
        .route("/delete", post(delete).layer(RequestBodyLimitLayer::new(json_limit)))
        .route("/download", post(download).layer(RequestBodyLimitLayer::new(json_limit)))
        .route("/opentree", post(open_tree).layer(RequestBodyLimitLayer::new(json_limit)))
        .route(
            "/upload",
            post(upload)
                .layer::<_, Infallible>(RequestBodyLimitLayer::new(upload_limit))
                .layer(DefaultBodyLimit::disable()),
        );

    let cors = cors_layer(&shared.cfg.cors.allowed_origins);
    Router::new()
        .route("/healthz", get(health))
        .nest(&base, ops)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(shared)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring malformed CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION])
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

async fn content(State(state): State<AppState>, payload: Result<Json<PathRef>, JsonRejection>) -> Response {
    let started = Instant::now();
    let result = match json_body(payload) {
        Ok(req) => state.gateway.list_content(&req.path).await,
        Err(e) => Err(e),
    };
    finish("content", started, result)
}

async fn create_dir(
    State(state): State<AppState>,
    payload: Result<Json<CreateDirRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let result = match json_body(payload) {
        Ok(req) => state.gateway.create_directory(&req.parent.path, &req.name).await,
        Err(e) => Err(e),
    };
    finish("createdir", started, result)
}

async fn rename(State(state): State<AppState>, payload: Result<Json<RenameRequest>, JsonRejection>) -> Response {
    let started = Instant::now();
    let result = match json_body(payload) {
        Ok(req) => state.gateway.rename(&req.target.path, &req.new_name).await,
        Err(e) => Err(e),
    };
    finish("rename", started, result)
}

async fn delete(State(state): State<AppState>, payload: Result<Json<DeleteRequest>, JsonRejection>) -> Response {
    let started = Instant::now();
    let result = match json_body(payload) {
        Ok(req) => {
            let paths: Vec<String> = req.into_iter().map(|r| r.path).collect();
            state.gateway.delete(&paths).await
        }
        Err(e) => Err(e),
    };
    finish("delete", started, result)
}

async fn open_tree(State(state): State<AppState>, payload: Result<Json<PathRef>, JsonRejection>) -> Response {
    let started = Instant::now();
    let result = match json_body(payload) {
        Ok(req) => state.gateway.open_tree(&req.path).await,
        Err(e) => Err(e),
    };
    finish("opentree", started, result)
}

async fn download(State(state): State<AppState>, payload: Result<Json<PathRef>, JsonRejection>) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let result = match json_body(payload) {
        Ok(req) => state.gateway.download(&req.path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(dl) => {
            audit(&request_id, "download", "allow", "OK", started, dl.len);
            let disposition = security::attachment_disposition(&dl.file_name);
            let mut resp = Body::from_stream(dl.into_stream()).into_response();
            let headers = resp.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
            if let Ok(v) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, v);
            }
            with_request_id(resp, &request_id)
        }
        Err(e) => {
            audit(&request_id, "download", "error", e.code(), started, 0);
            with_request_id(e.into_response(), &request_id)
        }
    }
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let started = Instant::now();
    let limit = state.cfg.limits.max_upload_mb * 1024 * 1024;
    let mut outcome = UploadOutcome::default();
    let result = match security::content_length_ok(&headers, limit) {
        Err(e) => Err(e),
        Ok(()) => match multipart {
            Ok(mp) => receive_upload(&state.gateway, mp, &mut outcome).await,
            Err(r) => Err(rejection_error(r.status(), r.body_text())),
        },
    };
    match result {
        Err(e) if !outcome.uploaded.is_empty() => {
            let request_id = uuid::Uuid::new_v4().to_string();
            audit(&request_id, "upload", "error", e.code(), started, 0);
            let mut body = e.body();
            body.uploaded = Some(outcome.uploaded);
            with_request_id((e.status(), Json(body)).into_response(), &request_id)
        }
        other => finish("upload", started, other.map(|()| outcome)),
    }
}

/// Expects a `parent` part (JSON `{"path": ...}`) ahead of the `files` parts.
/// Completed files are recorded in `outcome` as they land, so a failure on a
/// later part still tells the caller which earlier files were written.
async fn receive_upload(gateway: &StorageGateway, mut multipart: Multipart, outcome: &mut UploadOutcome) -> AppResult<()> {
    let mut target = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or_default().to_ascii_lowercase();
        match field_name.as_str() {
            "parent" => {
                if target.is_some() {
                    return Err(AppError::BadRequest("duplicate parent part".into()));
                }
                let raw = field.text().await.map_err(multipart_error)?;
                let parent: PathRef = if raw.trim().is_empty() {
                    PathRef::default()
                } else {
                    serde_json::from_str(&raw).map_err(|e| AppError::BadRequest(format!("parent: {e}")))?
                };
                target = Some(gateway.upload_target(&parent.path).await?);
            }
            "files" => {
                let Some(t) = target.as_ref() else {
                    return Err(AppError::BadRequest("parent part must precede files".into()));
                };
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::InvalidArgument("file part without a file name".into()))?;
                outcome.uploaded.push(t.write(&name, field).await?);
            }
            other => debug!(field = other, "ignoring multipart part"),
        }
    }
    if outcome.uploaded.is_empty() {
        return Err(AppError::InvalidArgument("no files in upload".into()));
    }
    Ok(())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload.map(|Json(v)| v).map_err(|r| rejection_error(r.status(), r.body_text()))
}

fn multipart_error(e: MultipartError) -> AppError {
    rejection_error(e.status(), e.body_text())
}

fn rejection_error(status: StatusCode, text: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::RequestTooLarge
    } else {
        AppError::BadRequest(text)
    }
}

fn finish<T: Serialize>(op: &'static str, started: Instant, result: AppResult<T>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let result = result.and_then(|v| serde_json::to_vec(&v).map_err(|e| AppError::Io(e.to_string())));
    let resp = match result {
        Ok(bytes) => {
            audit(&request_id, op, "allow", "OK", started, bytes.len() as u64);
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Err(e) => {
            audit(&request_id, op, "error", e.code(), started, 0);
            e.into_response()
        }
    };
    with_request_id(resp, &request_id)
}

fn with_request_id(mut resp: Response, request_id: &str) -> Response {
    if let Ok(v) = HeaderValue::from_str(request_id) {
        resp.headers_mut().insert("x-request-id", v);
    }
    resp
}

fn audit(request_id: &str, op: &str, decision: &str, code: &str, started: Instant, bytes_out: u64) {
    tracing::info!(
        request_id = request_id,
        op = op,
        decision = decision,
        code = code,
        duration_ms = started.elapsed().as_millis() as u64,
        bytes_out = bytes_out,
        "audit"
    );
}
