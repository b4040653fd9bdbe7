// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/model.rs - 模型
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

pub mod labels;

mod classifier;
mod detector;

pub use self::classifier::{ClassifierLoadError, ClassifyError, FreshnessClassifier};
pub use self::detector::{DetectError, YoloDetector};

/// 推理计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Cuda,
}

impl std::fmt::Display for Device {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda => write!(f, "cuda"),
    }
  }
}

/// 单个检测候选
#[derive(Debug, Clone)]
pub struct Detection {
  /// 类别索引
  pub class_id: usize,
  /// 类别名称
  pub class_name: String,
  /// 置信度
  pub confidence: f32,
  /// 边界框 [x1, y1, x2, y2]，源图像素坐标
  pub bbox: [f32; 4],
}

/// 目标检测能力契约：整图输入，输出候选框集合
pub trait Detector: Send + Sync {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError>;
}
