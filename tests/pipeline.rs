// 该文件是 Xianshi （鲜食） 项目的一部分。
// tests/pipeline.rs - 流水线集成测试
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

use image::{Rgb, RgbImage};

use xianshi::bundle::{self, LoaderError, ModelBundle};
use xianshi::freshness::FreshnessEstimator;
use xianshi::model::labels::FRESHNESS_LABELS;
use xianshi::model::{DetectError, Detection, Detector, Device};
use xianshi::pipeline::run_inference;

/// 返回固定候选集的桩检测器，用于在无真实权重下驱动流水线
struct StubDetector {
  detections: Vec<Detection>,
}

impl Detector for StubDetector {
  fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
    Ok(self.detections.clone())
  }
}

fn bundle_with(detections: Vec<Detection>) -> ModelBundle {
  ModelBundle {
    detector: Box::new(StubDetector { detections }),
    estimator: FreshnessEstimator::Heuristic,
    device: Device::Cpu,
    food_labels: vec!["apple".to_string(), "banana".to_string()],
    freshness_labels: FRESHNESS_LABELS,
  }
}

fn candidate(class_id: usize, class_name: &str, confidence: f32, bbox: [f32; 4]) -> Detection {
  Detection {
    class_id,
    class_name: class_name.to_string(),
    confidence,
    bbox,
  }
}

/// 饱和度高、明度适中的均匀色块，启发式稳定判为 fresh
fn fruit_image() -> RgbImage {
  RgbImage::from_pixel(320, 240, Rgb([140, 58, 58]))
}

#[test]
fn empty_detection_set_yields_not_detected() {
  let bundle = bundle_with(Vec::new());
  let result = run_inference(&fruit_image(), &bundle).expect("pipeline");

  assert!(!result.detected);
  assert_eq!(result.food, "unknown");
  assert_eq!(result.freshness, "unknown");
  assert_eq!(result.confidence, 0.0);
  assert!(result.bbox.is_none());
}

#[test]
fn confidence_below_floor_yields_not_detected() {
  let bundle = bundle_with(vec![candidate(
    47,
    "apple",
    0.05,
    [10.0, 10.0, 100.0, 100.0],
  )]);
  let result = run_inference(&fruit_image(), &bundle).expect("pipeline");

  assert!(!result.detected);
  assert_eq!(result.confidence, 0.0);
}

#[test]
fn non_food_classes_are_filtered_out() {
  // person 类不在食物集合，即便置信度最高也要丢弃
  let bundle = bundle_with(vec![candidate(0, "person", 0.99, [0.0, 0.0, 50.0, 50.0])]);
  let result = run_inference(&fruit_image(), &bundle).expect("pipeline");

  assert!(!result.detected);
  assert_eq!(result.food, "unknown");
}

#[test]
fn configured_label_matches_outside_coco_food_ids() {
  // 类别号不在 COCO 食物区间，但名字与配置标签大小写无关匹配
  let bundle = bundle_with(vec![candidate(3, "Apple", 0.8, [20.0, 20.0, 120.0, 120.0])]);
  let result = run_inference(&fruit_image(), &bundle).expect("pipeline");

  assert!(result.detected);
  assert_eq!(result.food, "apple");
}

#[test]
fn best_candidate_wins_and_confidence_blends() {
  let winner_box = [30.0, 30.0, 200.0, 180.0];
  let bundle = bundle_with(vec![
    candidate(47, "apple", 0.62, [10.0, 10.0, 90.0, 90.0]),
    candidate(46, "banana", 0.91, winner_box),
  ]);
  let result = run_inference(&fruit_image(), &bundle).expect("pipeline");

  assert!(result.detected);
  assert_eq!(result.food, "banana");
  assert_eq!(result.bbox, Some(winner_box));
  assert_eq!(result.freshness, "fresh");
  // 启发式 fresh 置信度落在 [0.75, 0.95]，融合后为 0.91*0.4 + [0.45, 0.57]
  assert!(
    result.confidence >= 0.813 && result.confidence <= 0.935,
    "confidence {} out of range",
    result.confidence
  );
}

#[test]
fn equal_confidence_keeps_first_candidate() {
  let bundle = bundle_with(vec![
    candidate(46, "banana", 0.5, [10.0, 10.0, 90.0, 90.0]),
    candidate(47, "apple", 0.5, [100.0, 100.0, 200.0, 200.0]),
  ]);
  let result = run_inference(&fruit_image(), &bundle).expect("pipeline");

  assert_eq!(result.food, "banana");
}

#[test]
fn food_name_is_lowercased_with_underscores() {
  let bundle = bundle_with(vec![candidate(
    52,
    "hot dog",
    0.7,
    [10.0, 10.0, 150.0, 150.0],
  )]);
  let result = run_inference(&fruit_image(), &bundle).expect("pipeline");

  assert_eq!(result.food, "hot_dog");
  assert!(FRESHNESS_LABELS.contains(&result.freshness));
}

#[test]
fn bundle_accessor_fails_before_any_load() {
  // 本测试进程从未执行加载，访问器必须报告未初始化
  assert!(matches!(bundle::get(), Err(LoaderError::NotInitialized)));
}
