// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出：裁剪检测区域并记录结果
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

use std::{
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{Datelike, Utc};
use image::{RgbImage, imageops};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detection, ImageSpace},
  output::Render,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct DetectionRecord {
  x: f32,
  y: f32,
  w: f32,
  h: f32,
  conf: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  class_id: Option<u32>,
  /// 对应的裁剪图文件名，检测框完全在图像外时为空
  crop: Option<String>,
}

#[derive(Debug, Serialize)]
struct FrameRecord {
  source: String,
  image_width: u32,
  image_height: u32,
  detections: Vec<DetectionRecord>,
}

/// 把检测框对应的区域从原图中裁出，裁剪范围限制在图像内
///
/// 检测框与图像没有交集时返回 `None`。
pub fn crop_detection(image: &RgbImage, det: &Detection<ImageSpace>) -> Option<RgbImage> {
  let (w, h) = (image.width() as f32, image.height() as f32);
  let [x_min, y_min, x_max, y_max] = det.corners();

  let x_min = x_min.floor().clamp(0.0, w);
  let y_min = y_min.floor().clamp(0.0, h);
  let x_max = x_max.ceil().clamp(0.0, w);
  let y_max = y_max.ceil().clamp(0.0, h);

  if !(x_min < x_max && y_min < y_max) {
    return None;
  }

  let crop = imageops::crop_imm(
    image,
    x_min as u32,
    y_min as u32,
    (x_max - x_min) as u32,
    (y_max - y_min) as u32,
  );
  Some(crop.to_image())
}

/// `folder:///path/to/dir[?always]`
///
/// 结果按 `YYYY/MM/DD` 分目录保存，每张图像生成 `{stem}_crop_{i}.png`（从 1 开始）
/// 与 `{stem}.json`。`stem` 为来源图像名，来源名为空时用 `HH-MM-SS-计数`。
/// 默认没有检测结果时不写任何文件，带上 `always` 后总会写记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      frame_counter: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  /// 返回 (日期目录, 文件名前缀)
  fn frame_stem(&self, name: &str) -> Result<(PathBuf, String), DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    let stem = if name.is_empty() {
      format!("{}-{:04X}", now.format("%H-%M-%S"), self.frame_id())
    } else {
      name.to_string()
    };
    Ok((directory, stem))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    name: &str,
    image: &RgbImage,
    detections: &[Detection<ImageSpace>],
  ) -> Result<(), Self::Error> {
    if !self.always && detections.is_empty() {
      debug!("没有检测结果, 跳过记录");
      return Ok(());
    }

    let (directory, stem) = self.frame_stem(name)?;

    let mut records = Vec::with_capacity(detections.len());
    for (i, det) in detections.iter().enumerate() {
      let crop = match crop_detection(image, det) {
        Some(crop) => {
          let name = format!("{}_crop_{}.png", stem, i + 1);
          crop.save(directory.join(&name))?;
          Some(name)
        }
        None => None,
      };
      records.push(DetectionRecord {
        x: det.x,
        y: det.y,
        w: det.w,
        h: det.h,
        conf: det.conf,
        class_id: det.class_id,
        crop,
      });
    }

    let record = FrameRecord {
      source: name.to_string(),
      image_width: image.width(),
      image_height: image.height(),
      detections: records,
    };
    let path = directory.join(format!("{}.json", stem));
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, &record)?;

    info!(
      "记录 {} 个检测结果到: {}",
      detections.len(),
      directory.display()
    );
    Ok(())
  }
}
