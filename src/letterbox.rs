// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/letterbox.rs - letterbox 缩放与坐标还原
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
use thiserror::Error;
use tracing::debug;

use crate::model::{Detection, ImageSpace, InputTensor, ModelSpace};

pub const DEFAULT_MODEL_SIZE: u32 = 640;
/// 中性灰填充
pub const GREY_FILL: [u8; 3] = [114, 114, 114];
pub const BLACK_FILL: [u8; 3] = [0, 0, 0];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetterboxError {
  #[error("图像尺寸无效: {width}x{height}, 模型输入尺寸 {model_size}")]
  InvalidImageDimensions {
    width: u32,
    height: u32,
    model_size: u32,
  },
}

/// 一次 letterbox 的缩放与填充参数
///
/// 每张图像计算一次，随检测结果一起传递，用于把模型坐标映射回原图。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  scale: f32,
  pad_x: u32,
  pad_y: u32,
  image_width: u32,
  image_height: u32,
  resized_width: u32,
  resized_height: u32,
  model_size: u32,
}

impl LetterboxTransform {
  pub fn new(image_width: u32, image_height: u32, model_size: u32) -> Result<Self, LetterboxError> {
    if image_width == 0 || image_height == 0 || model_size == 0 {
      return Err(LetterboxError::InvalidImageDimensions {
        width: image_width,
        height: image_height,
        model_size,
      });
    }

    let size = model_size as f64;
    let scale = (size / image_width as f64).min(size / image_height as f64);

    // 极端长宽比时短边可能被舍入为 0
    let resized = |dim: u32| ((dim as f64 * scale).round() as u32).clamp(1, model_size);
    let resized_width = resized(image_width);
    let resized_height = resized(image_height);

    let pad_x = (model_size - resized_width) / 2;
    let pad_y = (model_size - resized_height) / 2;

    debug!(
      "letterbox: {}x{} -> {}x{}, scale={:.4}, pad=({}, {})",
      image_width, image_height, resized_width, resized_height, scale, pad_x, pad_y
    );

    Ok(Self {
      scale: scale as f32,
      pad_x,
      pad_y,
      image_width,
      image_height,
      resized_width,
      resized_height,
      model_size,
    })
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  pub fn pad(&self) -> (u32, u32) {
    (self.pad_x, self.pad_y)
  }

  pub fn image_size(&self) -> (u32, u32) {
    (self.image_width, self.image_height)
  }

  pub fn resized_size(&self) -> (u32, u32) {
    (self.resized_width, self.resized_height)
  }

  pub fn model_size(&self) -> u32 {
    self.model_size
  }

  /// 原图坐标 -> 模型坐标
  pub fn to_model(&self, (x, y): (f32, f32)) -> (f32, f32) {
    (
      x * self.scale + self.pad_x as f32,
      y * self.scale + self.pad_y as f32,
    )
  }

  /// 模型坐标 -> 原图坐标
  pub fn to_image(&self, (x, y): (f32, f32)) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale,
      (y - self.pad_y as f32) / self.scale,
    )
  }

  pub fn unletterbox(&self, det: &Detection<ModelSpace>) -> Detection<ImageSpace> {
    let (x, y) = self.to_image((det.x, det.y));
    Detection::new(x, y, det.w / self.scale, det.h / self.scale, det.conf).with_class(det.class_id)
  }

  pub fn letterbox(&self, det: &Detection<ImageSpace>) -> Detection<ModelSpace> {
    let (x, y) = self.to_model((det.x, det.y));
    Detection::new(x, y, det.w * self.scale, det.h * self.scale, det.conf).with_class(det.class_id)
  }
}

/// 缩放图像并居中放置到 `model_size` 正方形画布上，返回模型输入张量和变换参数
pub fn letterbox_image(
  image: &RgbImage,
  model_size: u32,
  fill: [u8; 3],
) -> Result<(InputTensor, LetterboxTransform), LetterboxError> {
  let transform = LetterboxTransform::new(image.width(), image.height(), model_size)?;
  let (resized_width, resized_height) = transform.resized_size();

  let resized = imageops::resize(
    image,
    resized_width,
    resized_height,
    imageops::FilterType::Triangle,
  );

  let mut canvas = RgbImage::from_pixel(model_size, model_size, Rgb(fill));
  imageops::replace(
    &mut canvas,
    &resized,
    transform.pad_x as i64,
    transform.pad_y as i64,
  );

  Ok((InputTensor::from(&canvas), transform))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn landscape_image_is_padded_vertically() {
    let t = LetterboxTransform::new(1280, 960, 640).unwrap();
    assert_eq!(t.scale(), 0.5);
    assert_eq!(t.resized_size(), (640, 480));
    assert_eq!(t.pad(), (0, 80));
  }

  #[test]
  fn small_image_is_scaled_up_to_fit() {
    let t = LetterboxTransform::new(320, 160, 640).unwrap();
    assert_eq!(t.scale(), 2.0);
    assert_eq!(t.resized_size(), (640, 320));
    assert_eq!(t.pad(), (0, 160));
  }

  #[test]
  fn zero_dimension_is_rejected() {
    assert_eq!(
      LetterboxTransform::new(0, 480, 640),
      Err(LetterboxError::InvalidImageDimensions {
        width: 0,
        height: 480,
        model_size: 640
      })
    );
    assert!(LetterboxTransform::new(640, 0, 640).is_err());
    assert!(LetterboxTransform::new(640, 480, 0).is_err());
  }

  #[test]
  fn padding_fills_model_size() {
    for &(w, h) in &[(1280, 960), (333, 777), (1, 1000), (641, 640), (1920, 1080), (17, 17)] {
      let t = LetterboxTransform::new(w, h, 640).unwrap();
      let (rw, rh) = t.resized_size();
      let (px, py) = t.pad();
      assert!((rw + 2 * px).abs_diff(640) <= 1, "{w}x{h}");
      assert!((rh + 2 * py).abs_diff(640) <= 1, "{w}x{h}");
    }
  }

  #[test]
  fn point_round_trip() {
    for &(w, h, size) in &[(1280, 960, 640), (333, 777, 640), (50, 30, 416), (4000, 3000, 320)] {
      let t = LetterboxTransform::new(w, h, size).unwrap();
      for &(x, y) in &[(0.0, 0.0), (w as f32 / 2.0, h as f32 / 3.0), (w as f32, h as f32)] {
        let (bx, by) = t.to_image(t.to_model((x, y)));
        assert!((bx - x).abs() <= 1.0 && (by - y).abs() <= 1.0, "{w}x{h}@{size}");
      }
    }
  }

  #[test]
  fn unletterbox_maps_center_and_size() {
    let t = LetterboxTransform::new(1280, 960, 640).unwrap();
    let det = Detection::<ModelSpace>::new(320.0, 320.0, 100.0, 50.0, 0.7).with_class(Some(2));
    let mapped = t.unletterbox(&det);
    assert_eq!((mapped.x, mapped.y, mapped.w, mapped.h), (640.0, 480.0, 200.0, 100.0));
    assert_eq!(mapped.conf, 0.7);
    assert_eq!(mapped.class_id, Some(2));

    let back = t.letterbox(&mapped);
    assert_eq!((back.x, back.y, back.w, back.h), (320.0, 320.0, 100.0, 50.0));
  }

  #[test]
  fn letterbox_image_fills_background() {
    let image = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
    let (tensor, t) = letterbox_image(&image, 8, GREY_FILL).unwrap();
    assert_eq!(tensor.dims(), [1, 3, 8, 8]);
    assert_eq!(t.pad(), (0, 2));

    let grey = 114.0 / 255.0;
    let data = tensor.data();
    // 第 0 行是填充
    assert!((data[0] - grey).abs() < 1e-6);
    // 第 4 行中间是图像内容
    assert!((data[4 * 8 + 4] - 1.0).abs() < 0.01);
  }
}
