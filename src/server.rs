//! HTTP 接口
//!
//! - `POST /translation/start` 提交任务，返回 202 与轮询地址
//! - `GET /translation/status/{task_id}` 查询状态
//! - `GET /translation/result/{task_id}` 获取结果：完成 200，处理中 202，
//!   未知任务 404，任务失败 500 并附带保存的错误
//! - `GET /health` 健康检查

use anyhow::Context;
use axum::{
    extract::{Json as ExtractJson, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent_error;
use crate::api_constants::{error_messages, service_config};
use crate::error::AgentError;
use crate::extract::{decode_base64, extract_plain_text, DocumentFormat};
use crate::llm::Terminology;
use crate::task_manager::{TaskManager, TaskStatus};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub manager: TaskManager,
}

/// 提交翻译请求
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    /// 纯文本内容
    pub content: Option<String>,
    /// base64 编码的文件内容
    pub content_base64: Option<String>,
    /// 文档格式提示，如 `md`、`html`
    pub format: Option<String>,
    pub target_language: Option<String>,
    #[serde(default)]
    pub terminology: Terminology,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub status_url: String,
    pub result_url: String,
}

/// 把 [`AgentError`] 映射为HTTP响应
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            AgentError::Validation { .. } | AgentError::Extraction { .. } => StatusCode::BAD_REQUEST,
            AgentError::NotFound { .. } => StatusCode::NOT_FOUND,
            AgentError::NotReady { .. } => StatusCode::ACCEPTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self.0 {
            AgentError::NotReady { task_id, status } => json!({
                "task_id": task_id,
                "status": status,
                "message": "翻译仍在进行中",
            }),
            error => json!({
                "status": "error",
                "error": error.kind(),
                "message": error.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// 创建路由
pub fn router(manager: TaskManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/translation/start", post(start_translation))
        .route("/translation/status/{task_id}", get(translation_status))
        .route("/translation/result/{task_id}", get(translation_result))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { manager })
}

/// 启动HTTP服务，收到 Ctrl+C 后优雅退出
pub async fn serve(manager: TaskManager, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("无法监听地址: {}", addr))?;

    info!("🌐 翻译服务已启动: http://{}", addr);

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP服务异常退出")?;

    info!("👋 翻译服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("无法监听退出信号: {}", e);
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "tasks": state.manager.snapshot(),
    }))
}

async fn start_translation(
    State(state): State<AppState>,
    ExtractJson(request): ExtractJson<StartRequest>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let content = resolve_content(&request)?;
    let target_language = request
        .target_language
        .as_deref()
        .filter(|lang| !lang.trim().is_empty())
        .unwrap_or(service_config::DEFAULT_TARGET_LANGUAGE);

    let task_id = state
        .manager
        .submit(content, target_language, request.terminology)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            status_url: format!("/translation/status/{}", task_id),
            result_url: format!("/translation/result/{}", task_id),
            status: TaskStatus::Pending,
            task_id,
        }),
    ))
}

async fn translation_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.manager.status(&task_id)?;
    Ok(Json(json!({
        "task_id": view.task_id,
        "status": view.status,
        "error": view.error,
        "usage": view.usage,
        "created_at": view.created_at,
        "started_at": view.started_at,
        "finished_at": view.finished_at,
    })))
}

async fn translation_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let output = state.manager.result(&task_id)?;
    Ok(Json(json!({
        "task_id": output.task_id,
        "status": TaskStatus::Completed,
        "translated_content": output.translated_content,
        "original_content": output.original_content,
        "target_language": output.target_language,
        "usage": {
            "total_input_tokens": output.usage.input_tokens,
            "total_output_tokens": output.usage.output_tokens,
        },
    })))
}

/// 取出请求中的文本内容，必要时先做格式提取
fn resolve_content(request: &StartRequest) -> Result<String, AgentError> {
    let format = request
        .format
        .as_deref()
        .map(DocumentFormat::from_hint)
        .transpose()?;

    match (&request.content, &request.content_base64) {
        (Some(content), _) => match format {
            Some(format @ DocumentFormat::Html) => extract_plain_text(content.as_bytes(), format),
            _ => Ok(content.clone()),
        },
        (None, Some(encoded)) => {
            let raw = decode_base64(encoded)?;
            extract_plain_text(&raw, format.unwrap_or(DocumentFormat::Text))
        }
        (None, None) => Err(agent_error!(validation, "content", error_messages::EMPTY_CONTENT)),
    }
}
