// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/model/detector.rs - YOLO 目标检测器
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

use std::path::Path;
use std::sync::Mutex;

use image::{RgbImage, imageops};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::labels::COCO_CLASSES;
use crate::model::{Detection, Detector, Device};

/// 模型输入边长
const YOLO_INPUT_SIZE: u32 = 640;
/// 候选得分阈值
const SCORE_THRESHOLD: f32 = 0.25;
/// NMS IoU 阈值
const NMS_IOU_THRESHOLD: f32 = 0.45;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("onnx runtime error: {0}")]
  Ort(#[from] ort::Error),
  #[error("unexpected detector output shape: {0:?}")]
  OutputShape(Vec<i64>),
  #[error("detector output '{0}' missing")]
  MissingOutput(String),
  #[error("inference session poisoned")]
  Poisoned,
}

/// YOLOv8 目标检测器，基于 ONNX Runtime 会话
pub struct YoloDetector {
  /// 推理会话；运行时需要独占借用，跨请求共享时以互斥量保护
  session: Mutex<Session>,
  /// 输入张量名
  input_name: String,
  /// 输出张量名
  output_name: String,
  /// 模型输入边长
  input_size: u32,
}

impl YoloDetector {
  /// 从 ONNX 权重文件加载检测器并绑定计算设备
  pub fn load(path: &Path, device: Device) -> Result<Self, DetectError> {
    info!("加载检测器权重: {}", path.display());
    let builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(4)?;

    let builder = match device {
      #[cfg(feature = "cuda")]
      Device::Cuda => builder.with_execution_providers([
        ort::execution_providers::CUDAExecutionProvider::default().build(),
      ])?,
      _ => builder,
    };

    let session = builder.commit_from_file(path)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .unwrap_or_else(|| "images".to_string());
    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .unwrap_or_else(|| "output0".to_string());

    info!("检测器加载完成，输入 '{}', 输出 '{}'", input_name, output_name);

    Ok(Self {
      session: Mutex::new(session),
      input_name,
      output_name,
      input_size: YOLO_INPUT_SIZE,
    })
  }

  /// 预处理：缩放到模型输入尺寸并归一化为 NCHW 张量
  fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
      image,
      self.input_size,
      self.input_size,
      imageops::FilterType::Triangle,
    );

    let size = self.input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..3 {
        tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
      }
    }
    tensor
  }

  /// 后处理：解码 [1, 4 + 类别数, 候选数] 输出，还原到源图坐标并做 NMS
  fn postprocess(
    &self,
    data: &[f32],
    shape: &[i64],
    original_width: f32,
    original_height: f32,
  ) -> Result<Vec<Detection>, DetectError> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
      return Err(DetectError::OutputShape(shape.to_vec()));
    }
    let attributes = shape[1] as usize;
    let anchors = shape[2] as usize;
    let num_classes = attributes - 4;
    let at = |channel: usize, anchor: usize| data[channel * anchors + anchor];

    let scale_x = original_width / self.input_size as f32;
    let scale_y = original_height / self.input_size as f32;

    let mut detections = Vec::new();
    for anchor in 0..anchors {
      // 找到最高类别分数
      let mut best_score = 0.0f32;
      let mut best_class = 0usize;
      for class_id in 0..num_classes {
        let score = at(4 + class_id, anchor);
        if score > best_score {
          best_score = score;
          best_class = class_id;
        }
      }
      if best_score < SCORE_THRESHOLD {
        continue;
      }

      // 解码边界框并缩放到源图尺寸
      let cx = at(0, anchor);
      let cy = at(1, anchor);
      let w = at(2, anchor);
      let h = at(3, anchor);

      let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, original_width);
      let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, original_height);
      let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, original_width);
      let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, original_height);
      if x2 <= x1 || y2 <= y1 {
        continue;
      }

      detections.push(Detection {
        class_id: best_class,
        class_name: COCO_CLASSES
          .get(best_class)
          .unwrap_or(&"unknown")
          .to_string(),
        confidence: best_score,
        bbox: [x1, y1, x2, y2],
      });
    }

    debug!("检测到 {} 个候选（NMS 前）", detections.len());
    Ok(nms(detections, NMS_IOU_THRESHOLD))
  }
}

impl Detector for YoloDetector {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
    let tensor = self.preprocess(image);
    let input = tensor.as_standard_layout();

    debug!("执行检测器推理");
    let mut session = self.session.lock().map_err(|_| DetectError::Poisoned)?;
    let input_tensor = TensorRef::from_array_view(&input)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => input_tensor])?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| DetectError::MissingOutput(self.output_name.clone()))?;
    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let dims = shape.to_vec();

    self.postprocess(data, &dims, image.width() as f32, image.height() as f32)
  }
}

/// 同类别非极大值抑制
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  // 按置信度降序排序
  detections.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut result = Vec::new();
  while !detections.is_empty() {
    let best = detections.remove(0);
    detections.retain(|det| {
      if det.class_id != best.class_id {
        return true;
      }
      iou(&best.bbox, &det.bbox) < iou_threshold
    });
    result.push(best);
  }
  result
}

/// 计算两个 xyxy 边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
