// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/freshness.rs - 新鲜度估计策略
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
use rand::Rng;
use tracing::debug;

use crate::model::labels::FRESHNESS_LABELS;
use crate::model::{ClassifyError, FreshnessClassifier};
use crate::preprocess;

/// 新鲜度估计策略：训练好的分类网络，或无权重时的颜色启发式回退。
/// 具体策略在模型包构造时一次性选定，流水线对此保持无感。
pub enum FreshnessEstimator {
  /// 训练好的三分类网络
  Network(FreshnessClassifier),
  /// 颜色统计启发式
  Heuristic,
}

impl FreshnessEstimator {
  /// 估计裁剪区域的新鲜度，返回 (标签, 置信度)
  pub fn estimate(&self, crop: &RgbImage) -> Result<(&'static str, f32), ClassifyError> {
    match self {
      FreshnessEstimator::Network(classifier) => {
        let tensor = preprocess::to_classifier_tensor(crop);
        let (index, confidence) = classifier.predict(&tensor)?;
        let label = FRESHNESS_LABELS[index.min(FRESHNESS_LABELS.len() - 1)];
        Ok((label, round_to(confidence, 4)))
      }
      FreshnessEstimator::Heuristic => Ok(heuristic_freshness(crop)),
    }
  }

  /// 当前是否使用训练好的分类网络
  pub fn is_network(&self) -> bool {
    matches!(self, FreshnessEstimator::Network(_))
  }
}

/// 颜色启发式：对比度增强后统计 HSV 均值。高饱和且明度适中判为新鲜，
/// 中等饱和判为次新鲜，其余判为变质。阈值为经验常数，置信度带随机抖动，
/// 仅作为缺省训练权重时的近似替代。
fn heuristic_freshness(crop: &RgbImage) -> (&'static str, f32) {
  let enhanced = preprocess::enhance_contrast(crop);
  let (saturation, value) = preprocess::mean_saturation_value(&enhanced);
  debug!(
    "启发式统计: 平均饱和度 {:.1}, 平均明度 {:.1}",
    saturation, value
  );

  let mut rng = rand::thread_rng();
  if saturation > 80.0 && value > 60.0 && value < 220.0 {
    ("fresh", round_to(0.75 + rng.gen_range(0.0..0.20), 2))
  } else if saturation > 40.0 {
    ("semi-fresh", round_to(0.55 + rng.gen_range(0.0..0.20), 2))
  } else {
    ("spoiled", round_to(0.60 + rng.gen_range(0.0..0.20), 2))
  }
}

/// 四舍五入到指定小数位
pub(crate) fn round_to(value: f32, digits: i32) -> f32 {
  let factor = 10f32.powi(digits);
  (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn vivid_crop_is_fresh_with_bounded_confidence() {
    // 平均饱和度约 150、明度约 140 的均匀色块
    let crop = RgbImage::from_pixel(64, 64, Rgb([140, 58, 58]));
    for _ in 0..16 {
      let (label, confidence) = heuristic_freshness(&crop);
      assert_eq!(label, "fresh");
      assert!(
        (0.75..=0.95).contains(&confidence),
        "confidence {confidence} out of range"
      );
    }
  }

  #[test]
  fn dull_crop_is_spoiled_with_bounded_confidence() {
    // 平均饱和度约 20 的灰暗色块
    let crop = RgbImage::from_pixel(64, 64, Rgb([140, 129, 129]));
    for _ in 0..16 {
      let (label, confidence) = heuristic_freshness(&crop);
      assert_eq!(label, "spoiled");
      assert!(
        (0.60..=0.80).contains(&confidence),
        "confidence {confidence} out of range"
      );
    }
  }

  #[test]
  fn mid_saturation_crop_is_semi_fresh() {
    // 平均饱和度介于 40 与 80 之间
    let crop = RgbImage::from_pixel(64, 64, Rgb([140, 107, 107]));
    for _ in 0..16 {
      let (label, confidence) = heuristic_freshness(&crop);
      assert_eq!(label, "semi-fresh");
      assert!(
        (0.55..=0.75).contains(&confidence),
        "confidence {confidence} out of range"
      );
    }
  }

  #[test]
  fn rounding_keeps_requested_digits() {
    assert_eq!(round_to(0.123_456, 4), 0.1235);
    assert_eq!(round_to(0.789_9, 2), 0.79);
  }
}
