// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/server.rs - HTTP 服务边界
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::bundle::ModelBundle;
use crate::freshness::round_to;
use crate::pipeline;
use crate::preprocess;

/// 支持的上传内容类型
const SUPPORTED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/bmp"];
/// 上传大小上限（业务层校验，超出返回 422）
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
/// 框架层请求体上限，须高于业务上限，保证 422 由处理器给出
const BODY_LIMIT_BYTES: usize = 32 * 1024 * 1024;

/// 共享给各处理器的服务状态；模型包在启动时注入，处理器不访问全局
#[derive(Clone)]
pub struct AppState {
  pub bundle: Arc<ModelBundle>,
}

/// 成功响应负载
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
  pub food: String,
  pub freshness: &'static str,
  pub confidence: f32,
  pub detected: bool,
  pub inference_time_ms: f64,
}

/// 对客户端可见的错误。内部细节只进日志，不随响应外泄。
#[derive(Error, Debug)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error("File too large ({size_kb} KB). Max 10 MB allowed.")]
  PayloadTooLarge { size_kb: usize },
  #[error("Model inference failed. Please try again.")]
  Inference,
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::PayloadTooLarge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Inference => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
  }
}

/// 构建服务路由
pub fn app(bundle: Arc<ModelBundle>, origins: &[String]) -> Router {
  Router::new()
    .route("/predict", post(predict))
    .route("/health", get(health))
    .route("/", get(root))
    .layer(cors_layer(origins))
    .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
    .with_state(AppState { bundle })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
  let origins: Vec<HeaderValue> = origins
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
  CorsLayer::new()
    .allow_origin(origins)
    .allow_methods([Method::GET, Method::POST])
    .allow_headers([header::CONTENT_TYPE])
    .allow_credentials(true)
}

/// 健康探针
async fn health() -> Json<serde_json::Value> {
  Json(json!({ "status": "ok", "service": "food-freshness-api" }))
}

async fn root() -> Json<serde_json::Value> {
  Json(json!({
    "message": "Food Freshness Detection API",
    "health": "/health",
  }))
}

/// 接收上传的食物图像，执行两阶段推理并返回结构化结果
async fn predict(
  State(state): State<AppState>,
  mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, ApiError> {
  // 取出 file 字段
  let mut upload = None;
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|err| ApiError::BadRequest(format!("invalid multipart payload: {err}")))?
  {
    if field.name() == Some("file") {
      let content_type = field.content_type().map(|value| value.to_string());
      let bytes = field
        .bytes()
        .await
        .map_err(|err| ApiError::BadRequest(format!("failed to read upload: {err}")))?;
      upload = Some((content_type, bytes));
      break;
    }
  }
  let Some((content_type, bytes)) = upload else {
    return Err(ApiError::BadRequest(
      "missing multipart field 'file'".to_string(),
    ));
  };

  // 内容类型与大小校验先于解码与推理
  let content_type = content_type.unwrap_or_default();
  if !SUPPORTED_CONTENT_TYPES.contains(&content_type.as_str()) {
    return Err(unsupported_content_type(&content_type));
  }
  if bytes.len() > MAX_UPLOAD_BYTES {
    return Err(ApiError::PayloadTooLarge {
      size_kb: bytes.len() / 1024,
    });
  }

  let image =
    preprocess::decode_image(&bytes).map_err(|err| ApiError::BadRequest(err.to_string()))?;

  // 模型调用是计算阻塞的，放到阻塞线程池执行，避免拖住其余请求
  let bundle = state.bundle.clone();
  let started = Instant::now();
  let result = tokio::task::spawn_blocking(move || pipeline::run_inference(&image, &bundle))
    .await
    .map_err(|err| {
      error!("推理任务中止: {err}");
      ApiError::Inference
    })?
    .map_err(|err| {
      error!("推理失败: {err}");
      ApiError::Inference
    })?;
  let inference_time_ms = started.elapsed().as_secs_f64() * 1000.0;

  Ok(Json(PredictionResponse {
    food: result.food,
    freshness: result.freshness,
    confidence: result.confidence,
    detected: result.detected,
    inference_time_ms: round_to(inference_time_ms as f32, 2) as f64,
  }))
}

fn unsupported_content_type(found: &str) -> ApiError {
  let mut accepted = SUPPORTED_CONTENT_TYPES;
  accepted.sort_unstable();
  ApiError::BadRequest(format!(
    "Unsupported content type '{found}'. Accepted: {}",
    accepted.join(", ")
  ))
}
