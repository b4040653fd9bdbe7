// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/pipeline.rs - 两阶段推理流水线
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

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bundle::ModelBundle;
use crate::freshness::round_to;
use crate::model::labels::{COCO_FOOD_IDS, FRESHNESS_UNKNOWN};
use crate::model::{ClassifyError, DetectError, Detection};
use crate::preprocess;

/// 检测置信度下限，低于该值视为未检出食物
pub const MIN_DETECTION_CONFIDENCE: f32 = 0.10;
/// 融合置信度中检测分量的权重
pub const DETECTION_WEIGHT: f32 = 0.4;
/// 融合置信度中新鲜度分量的权重
pub const FRESHNESS_WEIGHT: f32 = 0.6;
/// 裁剪检出区域时的扩边比例
pub const CROP_PADDING: f32 = 0.05;

/// 推理执行错误：检测器或分类器前向失败，一律向上传播
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("detector execution failed: {0}")]
  Detector(#[from] DetectError),
  #[error("freshness estimation failed: {0}")]
  Freshness(#[from] ClassifyError),
}

/// 单次推理的结构化结果，构造后立即序列化，不做任何持久化
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
  pub food: String,
  pub freshness: &'static str,
  pub confidence: f32,
  pub detected: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bbox: Option<[f32; 4]>,
}

impl PredictionResult {
  /// 未检出食物时的缺省结果
  fn not_detected() -> Self {
    Self {
      food: "unknown".to_string(),
      freshness: FRESHNESS_UNKNOWN,
      confidence: 0.0,
      detected: false,
      bbox: None,
    }
  }
}

/// 运行完整的检测 + 新鲜度分类流水线。
/// 每个阶段只做一次前向，不重试；模型执行失败原样向调用方传播。
pub fn run_inference(
  image: &RgbImage,
  bundle: &ModelBundle,
) -> Result<PredictionResult, InferenceError> {
  // 第一阶段：整图目标检测
  let detections = bundle.detector.detect(image)?;
  debug!("检测返回 {} 个候选", detections.len());

  // 仅接受 COCO 食物类别，或类别名与配置的食物标签匹配的候选；
  // 置信度相同时保留先出现者（检测器输出顺序）
  let mut best: Option<&Detection> = None;
  let mut best_confidence = 0.0f32;
  for candidate in &detections {
    let name_matches = bundle
      .food_labels
      .iter()
      .any(|label| label.eq_ignore_ascii_case(&candidate.class_name));
    if !COCO_FOOD_IDS.contains(&candidate.class_id) && !name_matches {
      continue;
    }
    if candidate.confidence > best_confidence {
      best_confidence = candidate.confidence;
      best = Some(candidate);
    }
  }

  let Some(best) = best else {
    warn!("图像中未检出食物");
    return Ok(PredictionResult::not_detected());
  };
  if best_confidence < MIN_DETECTION_CONFIDENCE {
    warn!(
      "最优检测置信度 {:.3} 低于下限 {}，按未检出处理",
      best_confidence, MIN_DETECTION_CONFIDENCE
    );
    return Ok(PredictionResult::not_detected());
  }

  // 第二阶段：裁剪检出区域并估计新鲜度
  let crop = preprocess::crop_with_padding(image, best.bbox, CROP_PADDING);
  let (freshness, freshness_confidence) = bundle.estimator.estimate(&crop)?;

  // 融合两阶段置信度
  let combined = round_to(
    best_confidence * DETECTION_WEIGHT + freshness_confidence * FRESHNESS_WEIGHT,
    4,
  );

  info!(
    "检出 '{}' (det={:.2}) → 新鲜度 '{}' (cls={:.2})",
    best.class_name, best_confidence, freshness, freshness_confidence
  );

  Ok(PredictionResult {
    food: best.class_name.to_lowercase().replace(' ', "_"),
    freshness,
    confidence: combined,
    detected: true,
    bbox: Some(best.bbox),
  })
}
