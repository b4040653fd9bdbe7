// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/model/labels.rs - 类别标签表
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

use std::ops::RangeInclusive;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 使用 COCO 预训练权重时接受的食物类别索引区间。
/// 该区间与 80 类预训练词表绑定，更换检测器词表时必须重新审视。
pub const COCO_FOOD_IDS: RangeInclusive<usize> = 46..=61;

/// 检测器预期识别的食物类别名，可按自有数据集扩展
pub const FOOD_LABELS: [&str; 30] = [
  "apple",
  "banana",
  "orange",
  "strawberry",
  "grape",
  "mango",
  "pineapple",
  "watermelon",
  "lemon",
  "cherry",
  "carrot",
  "broccoli",
  "tomato",
  "cucumber",
  "lettuce",
  "potato",
  "onion",
  "pepper",
  "avocado",
  "corn",
  "bread",
  "cake",
  "sandwich",
  "pizza",
  "hotdog",
  "sushi",
  "steak",
  "chicken",
  "fish",
  "egg",
];

/// 新鲜度类别标签，下标顺序与分类器输出一致
pub const FRESHNESS_LABELS: [&'static str; 3] = ["fresh", "semi-fresh", "spoiled"];

/// 未检出食物时的新鲜度标签
pub const FRESHNESS_UNKNOWN: &str = "unknown";
