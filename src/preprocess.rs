// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use image::{Rgb, RgbImage, imageops};
use ndarray::Array4;
use thiserror::Error;

/// ImageNet 均值与标准差，torchvision 预训练骨干网的标准归一化参数
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 分类器输入边长
const CLASSIFIER_INPUT_SIZE: u32 = 224;

/// CLAHE 对比度裁剪限制
const CLAHE_CLIP_LIMIT: f32 = 2.0;
/// CLAHE 分块网格边数
const CLAHE_TILE_GRID: usize = 8;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("cannot decode image: {0}")]
  Decode(#[from] image::ImageError),
}

/// 解码上传的图像字节，统一为三通道 RGB 图像
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
  let image = image::load_from_memory(bytes)?;
  Ok(image.to_rgb8())
}

/// 按边界框裁剪图像。边框先按自身宽高的比例向外扩展，再收敛到图像边界内。
/// 对任意输入框（包括越界框与退化框）都返回至少 1x1 的有效裁剪。
pub fn crop_with_padding(image: &RgbImage, bbox: [f32; 4], padding: f32) -> RgbImage {
  if image.width() == 0 || image.height() == 0 {
    return RgbImage::new(1, 1);
  }

  let (width, height) = (image.width() as f32, image.height() as f32);
  let [x1, y1, x2, y2] = bbox;
  let pad_x = (x2 - x1) * padding;
  let pad_y = (y2 - y1) * padding;

  let x1 = (x1 - pad_x).max(0.0);
  let y1 = (y1 - pad_y).max(0.0);
  let x2 = (x2 + pad_x).min(width);
  let y2 = (y2 + pad_y).min(height);

  let left = (x1 as u32).min(image.width() - 1);
  let top = (y1 as u32).min(image.height() - 1);
  let crop_w = ((x2 - left as f32).ceil().max(1.0) as u32).min(image.width() - left);
  let crop_h = ((y2 - top as f32).ceil().max(1.0) as u32).min(image.height() - top);

  imageops::crop_imm(image, left, top, crop_w.max(1), crop_h.max(1)).to_image()
}

/// 将裁剪图像转换为分类器输入张量 [1, 3, 224, 224]：
/// 缩放到 224x224，像素归一到 [0,1]，再按 ImageNet 均值方差标准化。
pub fn to_classifier_tensor(image: &RgbImage) -> Array4<f32> {
  let resized = imageops::resize(
    image,
    CLASSIFIER_INPUT_SIZE,
    CLASSIFIER_INPUT_SIZE,
    imageops::FilterType::Triangle,
  );

  let size = CLASSIFIER_INPUT_SIZE as usize;
  let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
  for (x, y, pixel) in resized.enumerate_pixels() {
    for c in 0..3 {
      let value = pixel[c] as f32 / 255.0;
      tensor[[0, c, y as usize, x as usize]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
    }
  }
  tensor
}

/// 对比度增强：仅在亮度通道上做受限自适应直方图均衡，色度保持不变。
/// 该变换只服务于启发式新鲜度估计，不进入训练分类器的输入路径。
pub fn enhance_contrast(image: &RgbImage) -> RgbImage {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return image.clone();
  }

  let pixel_count = (width * height) as usize;
  let mut luma = Vec::with_capacity(pixel_count);
  let mut chroma = Vec::with_capacity(pixel_count);
  for pixel in image.pixels() {
    let (y, cb, cr) = rgb_to_ycbcr(pixel[0], pixel[1], pixel[2]);
    luma.push(y);
    chroma.push((cb, cr));
  }

  let equalized = clahe_plane(&luma, width as usize, height as usize);

  let mut out = RgbImage::new(width, height);
  for (i, pixel) in out.pixels_mut().enumerate() {
    let (cb, cr) = chroma[i];
    let (r, g, b) = ycbcr_to_rgb(equalized[i], cb, cr);
    *pixel = Rgb([r, g, b]);
  }
  out
}

/// 像素的 HSV 饱和度与明度分量（OpenCV 值域，0-255）
pub fn pixel_saturation_value(r: u8, g: u8, b: u8) -> (f32, f32) {
  let max = r.max(g).max(b) as f32;
  let min = r.min(g).min(b) as f32;
  let saturation = if max > 0.0 { (max - min) / max * 255.0 } else { 0.0 };
  (saturation, max)
}

/// 整幅图像的平均饱和度与平均明度
pub fn mean_saturation_value(image: &RgbImage) -> (f32, f32) {
  let count = (image.width() as f64 * image.height() as f64).max(1.0);
  let mut saturation_sum = 0.0f64;
  let mut value_sum = 0.0f64;
  for pixel in image.pixels() {
    let (saturation, value) = pixel_saturation_value(pixel[0], pixel[1], pixel[2]);
    saturation_sum += saturation as f64;
    value_sum += value as f64;
  }
  ((saturation_sum / count) as f32, (value_sum / count) as f32)
}

/// RGB 转 YCbCr（BT.601 全范围）
fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
  let (r, g, b) = (r as f32, g as f32, b as f32);
  let y = 0.299 * r + 0.587 * g + 0.114 * b;
  let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
  let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
  (
    y.round().clamp(0.0, 255.0) as u8,
    cb.round().clamp(0.0, 255.0) as u8,
    cr.round().clamp(0.0, 255.0) as u8,
  )
}

/// YCbCr 转回 RGB
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
  let y = y as f32;
  let cb = cb as f32 - 128.0;
  let cr = cr as f32 - 128.0;
  let r = y + 1.402 * cr;
  let g = y - 0.344_136 * cb - 0.714_136 * cr;
  let b = y + 1.772 * cb;
  (
    r.round().clamp(0.0, 255.0) as u8,
    g.round().clamp(0.0, 255.0) as u8,
    b.round().clamp(0.0, 255.0) as u8,
  )
}

/// 对单个亮度平面执行 CLAHE：分块统计直方图，按裁剪限制截断并把超出
/// 部分均摊回各灰度级，再在相邻分块映射之间做双线性插值消除块状伪影。
fn clahe_plane(plane: &[u8], width: usize, height: usize) -> Vec<u8> {
  let tiles_x = CLAHE_TILE_GRID.min(width.max(1));
  let tiles_y = CLAHE_TILE_GRID.min(height.max(1));
  let tile_w = width as f32 / tiles_x as f32;
  let tile_h = height as f32 / tiles_y as f32;

  let mut histograms = vec![[0u32; 256]; tiles_x * tiles_y];
  for y in 0..height {
    let ty = ((y as f32 / tile_h) as usize).min(tiles_y - 1);
    for x in 0..width {
      let tx = ((x as f32 / tile_w) as usize).min(tiles_x - 1);
      histograms[ty * tiles_x + tx][plane[y * width + x] as usize] += 1;
    }
  }

  let mut lookups = vec![[0u8; 256]; tiles_x * tiles_y];
  for (histogram, lookup) in histograms.iter_mut().zip(lookups.iter_mut()) {
    equalize_tile(histogram, lookup);
  }

  let mut out = vec![0u8; plane.len()];
  for y in 0..height {
    let gy = ((y as f32 + 0.5) / tile_h - 0.5).max(0.0);
    let ty0 = (gy as usize).min(tiles_y - 1);
    let ty1 = (ty0 + 1).min(tiles_y - 1);
    let wy = (gy - ty0 as f32).clamp(0.0, 1.0);

    for x in 0..width {
      let gx = ((x as f32 + 0.5) / tile_w - 0.5).max(0.0);
      let tx0 = (gx as usize).min(tiles_x - 1);
      let tx1 = (tx0 + 1).min(tiles_x - 1);
      let wx = (gx - tx0 as f32).clamp(0.0, 1.0);

      let value = plane[y * width + x] as usize;
      let top = lookups[ty0 * tiles_x + tx0][value] as f32 * (1.0 - wx)
        + lookups[ty0 * tiles_x + tx1][value] as f32 * wx;
      let bottom = lookups[ty1 * tiles_x + tx0][value] as f32 * (1.0 - wx)
        + lookups[ty1 * tiles_x + tx1][value] as f32 * wx;
      out[y * width + x] = (top * (1.0 - wy) + bottom * wy).round() as u8;
    }
  }
  out
}

/// 单个分块的受限直方图均衡查找表
fn equalize_tile(histogram: &mut [u32; 256], lookup: &mut [u8; 256]) {
  let area: u32 = histogram.iter().sum();
  if area == 0 {
    for (value, entry) in lookup.iter_mut().enumerate() {
      *entry = value as u8;
    }
    return;
  }

  let clip = ((CLAHE_CLIP_LIMIT * area as f32 / 256.0) as u32).max(1);
  let mut excess = 0u32;
  for bin in histogram.iter_mut() {
    if *bin > clip {
      excess += *bin - clip;
      *bin = clip;
    }
  }

  // 超出量先整除均摊，余量按固定间隔补到部分灰度级
  let increment = excess / 256;
  let mut residual = (excess % 256) as usize;
  for bin in histogram.iter_mut() {
    *bin += increment;
  }
  if residual > 0 {
    let step = (256 / residual).max(1);
    let mut index = 0;
    while residual > 0 && index < 256 {
      histogram[index] += 1;
      residual -= 1;
      index += step;
    }
  }

  let mut cumulative = 0u64;
  for value in 0..256 {
    cumulative += histogram[value] as u64;
    lookup[value] = ((cumulative * 255 + area as u64 / 2) / area as u64).min(255) as u8;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image.clone())
      .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
      .expect("encode test image");
    bytes
  }

  #[test]
  fn decode_rejects_garbage_bytes() {
    let result = decode_image(b"definitely not an image");
    assert!(matches!(result, Err(PreprocessError::Decode(_))));
  }

  #[test]
  fn decode_yields_rgb_image() {
    let source = RgbImage::from_pixel(17, 11, Rgb([10, 200, 30]));
    let decoded = decode_image(&png_bytes(&source)).expect("decode png");
    assert_eq!(decoded.dimensions(), (17, 11));
    assert_eq!(decoded.get_pixel(0, 0), &Rgb([10, 200, 30]));
  }

  #[test]
  fn crop_expands_box_by_padding() {
    let image = RgbImage::new(100, 100);
    let crop = crop_with_padding(&image, [40.0, 40.0, 60.0, 60.0], 0.05);
    // 20 像素宽的框向两侧各扩 1 像素
    assert_eq!(crop.dimensions(), (22, 22));
  }

  #[test]
  fn crop_clamps_to_image_bounds() {
    let image = RgbImage::new(50, 40);
    let crop = crop_with_padding(&image, [-10.0, -10.0, 500.0, 400.0], 0.05);
    assert_eq!(crop.dimensions(), (50, 40));
  }

  #[test]
  fn degenerate_box_still_yields_a_crop() {
    let image = RgbImage::new(50, 40);
    let crop = crop_with_padding(&image, [20.0, 20.0, 20.0, 20.0], 0.05);
    assert!(crop.width() >= 1 && crop.height() >= 1);

    let outside = crop_with_padding(&image, [-30.0, -30.0, -20.0, -20.0], 0.05);
    assert!(outside.width() >= 1 && outside.height() >= 1);
  }

  #[test]
  fn classifier_tensor_shape_and_normalization() {
    let image = RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]));
    let tensor = to_classifier_tensor(&image);
    assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

    // 纯白像素在每个通道上应等于 (1 - mean) / std
    for c in 0..3 {
      let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
      let actual = tensor[[0, c, 112, 112]];
      assert!((actual - expected).abs() < 1e-5, "channel {c}: {actual}");
    }
  }

  #[test]
  fn enhance_contrast_keeps_uniform_image_stable() {
    let image = RgbImage::from_pixel(64, 64, Rgb([140, 58, 58]));
    let enhanced = enhance_contrast(&image);
    assert_eq!(enhanced.dimensions(), image.dimensions());

    let (saturation, value) = mean_saturation_value(&enhanced);
    // 均匀图像经 CLAHE 后亮度只允许小幅漂移
    assert!((value - 140.0).abs() < 16.0, "value drifted to {value}");
    assert!((saturation - 149.0).abs() < 24.0, "saturation drifted to {saturation}");
  }

  #[test]
  fn enhance_contrast_stretches_low_contrast_gradient() {
    let mut image = RgbImage::new(64, 64);
    for (x, _y, pixel) in image.enumerate_pixels_mut() {
      let value = 110 + (x % 16) as u8;
      *pixel = Rgb([value, value, value]);
    }
    let enhanced = enhance_contrast(&image);

    let spread = |img: &RgbImage| {
      let (mut lo, mut hi) = (255u8, 0u8);
      for p in img.pixels() {
        lo = lo.min(p[0]);
        hi = hi.max(p[0]);
      }
      hi as i32 - lo as i32
    };
    assert!(spread(&enhanced) > spread(&image));
  }

  #[test]
  fn saturation_and_value_match_opencv_ranges() {
    let (saturation, value) = pixel_saturation_value(140, 58, 58);
    assert!((value - 140.0).abs() < f32::EPSILON);
    assert!((saturation - 149.4).abs() < 1.0);

    let (gray_saturation, _) = pixel_saturation_value(90, 90, 90);
    assert_eq!(gray_saturation, 0.0);
  }
}
