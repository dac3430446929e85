// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/model.rs - 检测框、张量与推理接口
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

use std::marker::PhantomData;

use image::RgbImage;
use serde::Deserialize;

const RGB_CHANNELS: usize = 3;

/// 模型输入坐标系（letterbox 之后的正方形画布）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelSpace;

/// 原始图像像素坐标系
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSpace;

/// 候选检测框，中心点 + 宽高
///
/// 坐标系由类型参数 `S` 标记，避免把模型坐标误当作图像坐标使用。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection<S = ModelSpace> {
  /// 中心点 x
  pub x: f32,
  /// 中心点 y
  pub y: f32,
  /// 宽度
  pub w: f32,
  /// 高度
  pub h: f32,
  /// 置信度（通常在 [0, 1]，但不做保证）
  pub conf: f32,
  /// 类别编号，仅 6 属性输出携带
  pub class_id: Option<u32>,
  _space: PhantomData<S>,
}

impl<S> Detection<S> {
  pub fn new(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Self {
    Self {
      x,
      y,
      w,
      h,
      conf,
      class_id: None,
      _space: PhantomData,
    }
  }

  pub fn with_class(mut self, class_id: Option<u32>) -> Self {
    self.class_id = class_id;
    self
  }

  pub fn area(&self) -> f32 {
    self.w * self.h
  }

  /// [x_min, y_min, x_max, y_max]
  pub fn corners(&self) -> [f32; 4] {
    let (hw, hh) = (self.w / 2.0, self.h / 2.0);
    [self.x - hw, self.y - hh, self.x + hw, self.y + hh]
  }
}

/// 模型输入张量，NCHW `[1, 3, S, S]`，RGB 通道，数值已归一化到 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  data: Vec<f32>,
  dims: [usize; 4],
}

impl InputTensor {
  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn dims(&self) -> [usize; 4] {
    self.dims
  }
}

impl From<&RgbImage> for InputTensor {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; RGB_CHANNELS * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = y as usize * width + x as usize;
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }

    Self {
      data,
      dims: [1, RGB_CHANNELS, height, width],
    }
  }
}

/// 推理输出的原始张量：扁平缓冲区 + 形状
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTensor {
  pub dims: Vec<usize>,
  pub data: Vec<f32>,
}

impl RawTensor {
  pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Self {
    Self { dims, data }
  }
}

/// 外部推理后端
///
/// 会话句柄初始化后只读，可以在多个处理任务之间共享。
pub trait InferenceProvider: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &InputTensor) -> Result<RawTensor, Self::Error>;
}

mod recorded;
pub use self::recorded::{RecordedOutput, RecordedOutputError};
