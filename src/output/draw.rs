// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::model::{Detection, ImageSpace};

const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: u32 = 2;

pub struct Draw {
  color: [u8; 3],
  thickness: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: BOX_COLOR,
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  pub fn with_thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  /// 像素矩形 (x, y, w, h)，裁剪到图像范围内，完全在图像外时返回 None
  fn pixel_rect(image: &RgbImage, det: &Detection<ImageSpace>) -> Option<(i32, i32, u32, u32)> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let [x_min, y_min, x_max, y_max] = det.corners();

    let x_min = x_min.floor().clamp(0.0, w);
    let y_min = y_min.floor().clamp(0.0, h);
    let x_max = x_max.ceil().clamp(0.0, w);
    let y_max = y_max.ceil().clamp(0.0, h);

    if !(x_min < x_max && y_min < y_max) {
      return None;
    }

    Some((
      x_min as i32,
      y_min as i32,
      (x_max - x_min) as u32,
      (y_max - y_min) as u32,
    ))
  }

  fn draw_bbox(&self, image: &mut RgbImage, det: &Detection<ImageSpace>) {
    let Some((x, y, width, height)) = Self::pixel_rect(image, det) else {
      return;
    };

    // 向内逐像素加粗
    for t in 0..self.thickness {
      let inner_w = width.saturating_sub(2 * t);
      let inner_h = height.saturating_sub(2 * t);
      if inner_w == 0 || inner_h == 0 {
        break;
      }
      let rect = Rect::at(x + t as i32, y + t as i32).of_size(inner_w, inner_h);
      draw_hollow_rect_mut(image, rect, Rgb(self.color));
    }
  }

  pub fn draw_detection(&self, image: &RgbImage, detections: &[Detection<ImageSpace>]) -> RgbImage {
    let mut canvas = image.clone();
    for det in detections {
      self.draw_bbox(&mut canvas, det);
    }
    canvas
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_stroked_rectangle() {
    let image = RgbImage::new(20, 20);
    let det = Detection::<ImageSpace>::new(10.0, 10.0, 10.0, 10.0, 0.9);
    let out = Draw::default().with_thickness(1).draw_detection(&image, &[det]);

    assert_eq!(out.get_pixel(5, 5), &Rgb(BOX_COLOR));
    assert_eq!(out.get_pixel(14, 14), &Rgb(BOX_COLOR));
    // 框内不填充
    assert_eq!(out.get_pixel(10, 10), &Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_outside_the_image_are_skipped() {
    let image = RgbImage::new(10, 10);
    let det = Detection::<ImageSpace>::new(100.0, 100.0, 10.0, 10.0, 0.9);
    assert_eq!(Draw::default().draw_detection(&image, &[det]), image);
  }
}
