// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::SourceImage};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 图像文件输入
///
/// - 单张图像: `image:///path/to/card.jpg`
/// - 整个目录: `image:///path/to/dir`，按文件名顺序读取其中的 jpg/jpeg/png，
///   读取失败的文件记录后跳过
pub struct ImageFileInput {
  path: PathBuf,
  loaded: Option<SourceImage>,
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = PathBuf::from(url.path());
    if path.is_dir() {
      let mut files = Vec::new();
      for entry in std::fs::read_dir(&path)? {
        let file = entry?.path();
        if file.is_file() && is_image_file(&file) {
          files.push(file);
        }
      }
      files.sort();
      info!("目录 {} 中找到 {} 张图像", path.display(), files.len());

      return Ok(ImageFileInput {
        path,
        loaded: None,
        pending: files.into(),
      });
    }

    // 单个文件在打开时就解码，错误直接返回
    let loaded = load(&path)?;
    Ok(ImageFileInput {
      path,
      loaded: Some(loaded),
      pending: VecDeque::new(),
    })
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn load(path: &Path) -> Result<SourceImage, ImageFileInputError> {
  let image = ImageReader::open(path)?.decode()?.to_rgb8();
  info!(
    "读取图像 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  let name = path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_default();
  Ok(SourceImage { name, image })
}

impl ImageFileInput {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Iterator for ImageFileInput {
  type Item = SourceImage;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(loaded) = self.loaded.take() {
      return Some(loaded);
    }

    while let Some(path) = self.pending.pop_front() {
      match load(&path) {
        Ok(source) => return Some(source),
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
