// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/model/classifier.rs - 新鲜度分类器
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

use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::Device;
use crate::model::labels::FRESHNESS_LABELS;

#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error("onnx runtime error: {0}")]
  Ort(#[from] ort::Error),
  #[error("classifier output '{0}' missing")]
  MissingOutput(String),
  #[error("classifier returned no logits")]
  EmptyOutput,
  #[error("inference session poisoned")]
  Poisoned,
}

#[derive(Error, Debug)]
pub enum ClassifierLoadError {
  #[error("onnx runtime error: {0}")]
  Ort(#[from] ort::Error),
  #[error("probe inference failed: {0}")]
  Probe(#[from] ClassifyError),
  #[error("unexpected classifier head: {0} logits, expected 3")]
  HeadSize(usize),
}

/// 新鲜度三分类网络的 ONNX 会话封装。
/// 接受的导出形态：输出为 [1, 3] 或 [3] 的 logits 头。
pub struct FreshnessClassifier {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
}

impl FreshnessClassifier {
  /// 加载分类器并用零张量探针校验输出头为三分类
  pub fn load(path: &Path, device: Device) -> Result<Self, ClassifierLoadError> {
    info!("加载新鲜度分类器权重: {}", path.display());
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
      .unwrap_or_else(|| "input".to_string());
    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .unwrap_or_else(|| "output".to_string());

    let classifier = Self {
      session: Mutex::new(session),
      input_name,
      output_name,
    };

    // 探针前向同时完成会话预热与分类头校验
    let probe = Array4::<f32>::zeros((1, 3, 224, 224));
    let logits = classifier.forward(&probe)?;
    if logits.len() != FRESHNESS_LABELS.len() {
      return Err(ClassifierLoadError::HeadSize(logits.len()));
    }

    info!("新鲜度分类器加载完成");
    Ok(classifier)
  }

  /// 对预处理后的裁剪张量返回 (类别下标, 置信度)
  pub fn predict(&self, tensor: &Array4<f32>) -> Result<(usize, f32), ClassifyError> {
    let logits = self.forward(tensor)?;
    debug!("分类器 logits: {:?}", logits);

    let probabilities = softmax(&logits);
    let (index, confidence) = probabilities
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
      .ok_or(ClassifyError::EmptyOutput)?;
    Ok((index, *confidence))
  }

  fn forward(&self, tensor: &Array4<f32>) -> Result<Vec<f32>, ClassifyError> {
    let input = tensor.as_standard_layout();

    let mut session = self.session.lock().map_err(|_| ClassifyError::Poisoned)?;
    let input_tensor = TensorRef::from_array_view(&input)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => input_tensor])?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| ClassifyError::MissingOutput(self.output_name.clone()))?;
    let (_, data) = output.try_extract_tensor::<f32>()?;
    if data.is_empty() {
      return Err(ClassifyError::EmptyOutput);
    }
    Ok(data.to_vec())
  }
}

/// 数值稳定的 softmax
fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::MIN, f32::max);
  let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.iter().map(|e| e / sum).collect()
}
