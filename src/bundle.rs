// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/bundle.rs - 模型包与加载器
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
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::freshness::FreshnessEstimator;
use crate::model::labels::{FOOD_LABELS, FRESHNESS_LABELS};
use crate::model::{DetectError, Detector, Device, FreshnessClassifier, YoloDetector};

/// 预训练 YOLOv8n COCO 权重的下载地址，本地检测器权重缺失时的回退
const PRETRAINED_DETECTOR_URL: &str =
  "https://github.com/jahongir7174/YOLOv8-onnx/raw/refs/heads/master/weights/v8_n.onnx";

/// 下载回退权重的超时
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

static BUNDLE: OnceLock<Arc<ModelBundle>> = OnceLock::new();

/// 进程级模型包：检测器、新鲜度估计策略、设备与标签元数据。
/// 构造完成后只读，以 Arc 跨请求共享；安装后不再被替换。
pub struct ModelBundle {
  pub detector: Box<dyn Detector>,
  pub estimator: FreshnessEstimator,
  pub device: Device,
  pub food_labels: Vec<String>,
  pub freshness_labels: [&'static str; 3],
}

#[derive(Error, Debug)]
pub enum LoaderError {
  #[error("models have not been loaded yet")]
  NotInitialized,
  #[error("failed to load detector: {0}")]
  Detector(#[from] DetectError),
  #[error("failed to fetch pretrained detector weights: {0}")]
  Download(#[from] reqwest::Error),
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),
}

/// 加载模型包。首次调用执行加载并缓存；后续调用无论参数如何都返回缓存实例。
pub fn load(config: &Config) -> Result<Arc<ModelBundle>, LoaderError> {
  if let Some(bundle) = BUNDLE.get() {
    return Ok(bundle.clone());
  }

  let device = resolve_device(&config.device);
  info!("在设备 {} 上加载模型", device);

  let detector_path = Path::new(&config.detector_weights);
  ensure_detector_weights(detector_path)?;
  let detector = YoloDetector::load(detector_path, device)?;

  let estimator = match load_classifier(Path::new(&config.freshness_weights), device) {
    Some(classifier) => FreshnessEstimator::Network(classifier),
    None => FreshnessEstimator::Heuristic,
  };

  let bundle = ModelBundle {
    detector: Box::new(detector),
    estimator,
    device,
    food_labels: FOOD_LABELS.iter().map(|label| label.to_string()).collect(),
    freshness_labels: FRESHNESS_LABELS,
  };
  info!("模型加载完成");

  Ok(install(Arc::new(bundle)))
}

/// 获取已加载的模型包
pub fn get() -> Result<Arc<ModelBundle>, LoaderError> {
  BUNDLE.get().cloned().ok_or(LoaderError::NotInitialized)
}

/// 一次性安装模型包；并发首次加载时只保留先到者
fn install(bundle: Arc<ModelBundle>) -> Arc<ModelBundle> {
  BUNDLE.get_or_init(|| bundle).clone()
}

/// 解析计算设备；请求加速器但不可用时回退 CPU，绝不失败
fn resolve_device(spec: &str) -> Device {
  match spec.trim().to_ascii_lowercase().as_str() {
    "cpu" => Device::Cpu,
    "cuda" => {
      #[cfg(feature = "cuda")]
      {
        use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
        if CUDAExecutionProvider::default().is_available().unwrap_or(false) {
          Device::Cuda
        } else {
          warn!("请求 CUDA 但运行环境不可用，回退到 CPU");
          Device::Cpu
        }
      }
      #[cfg(not(feature = "cuda"))]
      {
        warn!("请求 CUDA 但构建未启用 cuda 特性，回退到 CPU");
        Device::Cpu
      }
    }
    other => {
      warn!("未知设备 '{}'，回退到 CPU", other);
      Device::Cpu
    }
  }
}

/// 确保检测器权重存在；缺失时下载预训练 COCO 权重作为回退
fn ensure_detector_weights(path: &Path) -> Result<(), LoaderError> {
  if path.exists() {
    return Ok(());
  }

  warn!(
    "检测器权重不存在: {}，下载预训练 YOLOv8n 权重作为回退",
    path.display()
  );
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }

  let client = reqwest::blocking::Client::builder()
    .timeout(DOWNLOAD_TIMEOUT)
    .build()?;
  let response = client
    .get(PRETRAINED_DETECTOR_URL)
    .send()?
    .error_for_status()?;
  let bytes = response.bytes()?;
  std::fs::write(path, &bytes)?;

  info!(
    "预训练权重下载完成: {:.2} MB",
    bytes.len() as f64 / (1024.0 * 1024.0)
  );
  Ok(())
}

/// 加载可选的新鲜度分类器。权重缺失是正常状态；损坏或形状不符的权重
/// 只记录日志，两种情况都回退到颜色启发式，绝不中断启动。
fn load_classifier(path: &Path, device: Device) -> Option<FreshnessClassifier> {
  if !path.exists() {
    warn!(
      "新鲜度分类器权重不存在: {}，使用颜色启发式回退",
      path.display()
    );
    return None;
  }

  match FreshnessClassifier::load(path, device) {
    Ok(classifier) => Some(classifier),
    Err(err) => {
      error!("新鲜度分类器加载失败: {}，使用颜色启发式回退", err);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  use crate::model::Detection;

  struct NullDetector;

  impl Detector for NullDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
      Ok(Vec::new())
    }
  }

  fn stub_bundle() -> Arc<ModelBundle> {
    Arc::new(ModelBundle {
      detector: Box::new(NullDetector),
      estimator: FreshnessEstimator::Heuristic,
      device: Device::Cpu,
      food_labels: vec!["apple".to_string()],
      freshness_labels: FRESHNESS_LABELS,
    })
  }

  #[test]
  fn repeated_install_keeps_first_bundle() {
    let first = install(stub_bundle());
    let second = install(stub_bundle());
    assert!(Arc::ptr_eq(&first, &second));
    // 安装之后访问器返回同一实例
    let fetched = get().expect("bundle installed");
    assert!(Arc::ptr_eq(&first, &fetched));
  }

  #[test]
  fn resolve_device_falls_back_for_unknown_spec() {
    assert_eq!(resolve_device("tpu"), Device::Cpu);
    assert_eq!(resolve_device(" CPU "), Device::Cpu);
  }

  #[test]
  fn missing_classifier_weights_selects_heuristic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("freshness_classifier.onnx");
    assert!(load_classifier(&path, Device::Cpu).is_none());
  }

  #[test]
  fn corrupt_classifier_weights_fall_back_without_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("freshness_classifier.onnx");
    std::fs::write(&path, b"not an onnx graph").expect("write corrupt weights");
    assert!(load_classifier(&path, Device::Cpu).is_none());
  }
}
