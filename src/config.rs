// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/config.rs - 服务配置
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

use clap::Parser;

/// Xianshi 服务配置，所有项均可由环境变量覆盖
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
  /// 检测器 ONNX 权重路径（缺失时自动下载预训练 COCO 权重）
  #[arg(
    long,
    env = "DETECTOR_WEIGHTS_PATH",
    default_value = "weights/yolov8n.onnx",
    value_name = "FILE"
  )]
  pub detector_weights: String,

  /// 新鲜度分类器 ONNX 权重路径（缺失时启用颜色启发式回退）
  #[arg(
    long,
    env = "FRESHNESS_WEIGHTS_PATH",
    default_value = "weights/freshness_classifier.onnx",
    value_name = "FILE"
  )]
  pub freshness_weights: String,

  /// 计算设备 (cpu / cuda)
  #[arg(long, env = "DEVICE", default_value = "cpu", value_name = "DEVICE")]
  pub device: String,

  /// 检测置信度阈值 (0.0 - 1.0)，保留配置项，不参与置信度融合
  #[arg(
    long,
    env = "DETECTION_CONFIDENCE",
    default_value = "0.25",
    value_name = "THRESHOLD"
  )]
  pub detection_confidence: f32,

  /// 允许的 CORS 来源，逗号分隔
  #[arg(
    long,
    env = "ALLOWED_ORIGINS",
    default_value = "http://localhost:3000",
    value_name = "ORIGINS"
  )]
  pub allowed_origins: String,

  /// 监听地址
  #[arg(long, env = "APP_HOST", default_value = "0.0.0.0", value_name = "HOST")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "APP_PORT", default_value = "8000", value_name = "PORT")]
  pub port: u16,
}

impl Config {
  /// 拆分 CORS 来源列表
  pub fn origins(&self) -> Vec<String> {
    self
      .allowed_origins
      .split(',')
      .map(|origin| origin.trim().to_string())
      .filter(|origin| !origin.is_empty())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config_with_origins(origins: &str) -> Config {
    Config {
      detector_weights: "weights/yolov8n.onnx".to_string(),
      freshness_weights: "weights/freshness_classifier.onnx".to_string(),
      device: "cpu".to_string(),
      detection_confidence: 0.25,
      allowed_origins: origins.to_string(),
      host: "0.0.0.0".to_string(),
      port: 8000,
    }
  }

  #[test]
  fn origins_are_split_and_trimmed() {
    let config = config_with_origins("http://localhost:3000, https://example.com ,");
    assert_eq!(
      config.origins(),
      vec![
        "http://localhost:3000".to_string(),
        "https://example.com".to_string()
      ]
    );
  }

  #[test]
  fn empty_origin_list_yields_nothing() {
    let config = config_with_origins("");
    assert!(config.origins().is_empty());
  }
}
