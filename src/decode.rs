// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/decode.rs - 检测输出解码
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

use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Detection, ModelSpace, RawTensor};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

const ATTR_X: usize = 0;
const ATTR_Y: usize = 1;
const ATTR_W: usize = 2;
const ATTR_H: usize = 3;
const ATTR_CONF: usize = 4;
const ATTR_CLASS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("检测输出格式错误: {0}")]
  MalformedDetectionOutput(String),
}

/// 命令行中布局或属性数写错
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无法解析解码参数: {0}")]
pub struct DecoderParseError(String);

/// 输出张量在内存中的排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  /// `[batch, attrs, n]`，下标 `attr * n + i`
  #[default]
  ChannelMajor,
  /// `[batch, n, attrs]`，下标 `i * attrs + attr`
  PredictionMajor,
}

impl FromStr for TensorLayout {
  type Err = DecoderParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "channel-major" => Ok(TensorLayout::ChannelMajor),
      "prediction-major" => Ok(TensorLayout::PredictionMajor),
      other => Err(DecoderParseError(format!("未知张量布局 '{}'", other))),
    }
  }
}

/// 每个预测携带的属性数：`x, y, w, h, conf` 或再加一个类别编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeCount {
  #[default]
  Five,
  Six,
}

impl AttributeCount {
  pub fn count(self) -> usize {
    match self {
      AttributeCount::Five => 5,
      AttributeCount::Six => 6,
    }
  }
}

impl FromStr for AttributeCount {
  type Err = DecoderParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "5" => Ok(AttributeCount::Five),
      "6" => Ok(AttributeCount::Six),
      other => Err(DecoderParseError(format!(
        "属性数只能是 5 或 6, 实际为 '{}'",
        other
      ))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
  pub layout: TensorLayout,
  pub attributes: AttributeCount,
  /// 置信度严格大于该值才保留
  pub confidence_threshold: f32,
  /// 作用于 x/y/w/h，用于把归一化坐标换算成像素
  pub coordinate_scale: f32,
}

impl Default for DecoderConfig {
  fn default() -> Self {
    Self {
      layout: TensorLayout::default(),
      attributes: AttributeCount::default(),
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      coordinate_scale: 1.0,
    }
  }
}

fn malformed(msg: String) -> DecodeError {
  warn!("{}", msg);
  DecodeError::MalformedDetectionOutput(msg)
}

/// 把原始输出解码为模型坐标下的候选框，并按置信度阈值过滤
///
/// 形状与缓冲区不一致时返回错误，不做部分解码。只解码第 0 个 batch。
pub fn decode(
  output: &RawTensor,
  config: &DecoderConfig,
) -> Result<Vec<Detection<ModelSpace>>, DecodeError> {
  let (batch, dim_a, dim_b) = match output.dims.as_slice() {
    &[batch, a, b] => (batch, a, b),
    &[a, b] => (1, a, b),
    dims => return Err(malformed(format!("输出形状应为三维, 实际为 {:?}", dims))),
  };

  let (attrs, num_predictions) = match config.layout {
    TensorLayout::ChannelMajor => (dim_a, dim_b),
    TensorLayout::PredictionMajor => (dim_b, dim_a),
  };

  if batch == 0 || num_predictions == 0 {
    debug!("输出中没有预测: {:?}", output.dims);
    return Ok(Vec::new());
  }

  if attrs != config.attributes.count() {
    return Err(malformed(format!(
      "每个预测应有 {} 个属性, 输出形状 {:?} 给出 {} 个",
      config.attributes.count(),
      output.dims,
      attrs
    )));
  }

  // 形状来自外部，乘法可能溢出
  let Some((needed, total)) = attrs
    .checked_mul(num_predictions)
    .and_then(|per_batch| Some((per_batch, per_batch.checked_mul(batch)?)))
  else {
    return Err(malformed(format!("输出形状过大: {:?}", output.dims)));
  };
  if output.data.len() < total {
    return Err(malformed(format!(
      "缓冲区长度不足: 形状 {:?} 需要 {}, 实际 {}",
      output.dims,
      total,
      output.data.len()
    )));
  }

  if batch > 1 {
    warn!("输出包含 {} 个 batch, 只解码第一个", batch);
  }

  let data = &output.data[..needed];
  let read = |i: usize, attr: usize| match config.layout {
    TensorLayout::ChannelMajor => data[attr * num_predictions + i],
    TensorLayout::PredictionMajor => data[i * attrs + attr],
  };

  let scale = config.coordinate_scale;
  let mut detections = Vec::new();
  for i in 0..num_predictions {
    let conf = read(i, ATTR_CONF);
    // NaN 也会在这里被过滤
    if !(conf > config.confidence_threshold) {
      continue;
    }

    let class_id = match config.attributes {
      AttributeCount::Five => None,
      AttributeCount::Six => {
        let raw = read(i, ATTR_CLASS);
        (raw.is_finite() && raw >= 0.0).then(|| raw.round() as u32)
      }
    };

    detections.push(
      Detection::new(
        read(i, ATTR_X) * scale,
        read(i, ATTR_Y) * scale,
        read(i, ATTR_W) * scale,
        read(i, ATTR_H) * scale,
        conf,
      )
      .with_class(class_id),
    );
  }

  debug!(
    "解码 {} 个预测, 置信度 > {} 的有 {} 个",
    num_predictions,
    config.confidence_threshold,
    detections.len()
  );

  Ok(detections)
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 每行是一个预测的属性，按布局展开
  fn tensor(rows: &[&[f32]], layout: TensorLayout) -> RawTensor {
    let attrs = rows.first().map(|r| r.len()).unwrap_or(5);
    let n = rows.len();
    let mut data = vec![0.0; attrs * n];
    for (i, row) in rows.iter().enumerate() {
      for (a, &v) in row.iter().enumerate() {
        match layout {
          TensorLayout::ChannelMajor => data[a * n + i] = v,
          TensorLayout::PredictionMajor => data[i * attrs + a] = v,
        }
      }
    }
    let dims = match layout {
      TensorLayout::ChannelMajor => vec![1, attrs, n],
      TensorLayout::PredictionMajor => vec![1, n, attrs],
    };
    RawTensor::new(dims, data)
  }

  fn config(layout: TensorLayout) -> DecoderConfig {
    DecoderConfig {
      layout,
      ..DecoderConfig::default()
    }
  }

  #[test]
  fn both_layouts_decode_the_same_boxes() {
    let rows: &[&[f32]] = &[
      &[10.0, 20.0, 30.0, 40.0, 0.9],
      &[50.0, 60.0, 70.0, 80.0, 0.1],
      &[1.0, 2.0, 3.0, 4.0, 0.5],
    ];
    let cm = decode(&tensor(rows, TensorLayout::ChannelMajor), &config(TensorLayout::ChannelMajor)).unwrap();
    let pm = decode(
      &tensor(rows, TensorLayout::PredictionMajor),
      &config(TensorLayout::PredictionMajor),
    )
    .unwrap();

    assert_eq!(cm, pm);
    assert_eq!(cm.len(), 2);
    assert_eq!((cm[0].x, cm[0].y, cm[0].w, cm[0].h, cm[0].conf), (10.0, 20.0, 30.0, 40.0, 0.9));
    assert_eq!(cm[1].conf, 0.5);
    assert_eq!(cm[0].class_id, None);
  }

  #[test]
  fn threshold_is_strict() {
    let threshold = DEFAULT_CONFIDENCE_THRESHOLD;
    let above = threshold + 1e-4;
    let rows: &[&[f32]] = &[&[0.0, 0.0, 1.0, 1.0, threshold], &[0.0, 0.0, 1.0, 1.0, above]];
    let out = decode(&tensor(rows, TensorLayout::ChannelMajor), &DecoderConfig::default()).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].conf, above);
  }

  #[test]
  fn nan_confidence_is_dropped() {
    let rows: &[&[f32]] = &[&[0.0, 0.0, 1.0, 1.0, f32::NAN]];
    let out = decode(&tensor(rows, TensorLayout::ChannelMajor), &DecoderConfig::default()).unwrap();
    assert!(out.is_empty());
  }

  #[test]
  fn empty_output_is_not_an_error() {
    let output = RawTensor::new(vec![1, 5, 0], Vec::new());
    assert_eq!(decode(&output, &DecoderConfig::default()), Ok(Vec::new()));
  }

  #[test]
  fn short_buffer_is_malformed() {
    let output = RawTensor::new(vec![1, 5, 10], vec![0.5; 49]);
    assert!(matches!(
      decode(&output, &DecoderConfig::default()),
      Err(DecodeError::MalformedDetectionOutput(_))
    ));
  }

  #[test]
  fn oversized_dims_are_malformed() {
    let output = RawTensor::new(vec![1, 5, usize::MAX / 2], vec![0.9; 5]);
    assert!(matches!(
      decode(&output, &DecoderConfig::default()),
      Err(DecodeError::MalformedDetectionOutput(_))
    ));

    let output = RawTensor::new(vec![usize::MAX / 4, 5, 1], vec![0.9; 5]);
    assert!(decode(&output, &DecoderConfig::default()).is_err());
  }

  #[test]
  fn every_batch_must_fit_in_the_buffer() {
    // 声明两个 batch，但只给了一个 batch 的数据
    let output = RawTensor::new(vec![2, 5, 3], vec![0.9; 15]);
    assert!(matches!(
      decode(&output, &DecoderConfig::default()),
      Err(DecodeError::MalformedDetectionOutput(_))
    ));

    // 数据完整时只解码第一个 batch
    let mut data = vec![0.9; 15];
    data.extend([0.1; 15]);
    let output = RawTensor::new(vec![2, 5, 3], data);
    assert_eq!(decode(&output, &DecoderConfig::default()).unwrap().len(), 3);
  }

  #[test]
  fn layout_options_parse() {
    assert_eq!("prediction-major".parse::<TensorLayout>(), Ok(TensorLayout::PredictionMajor));
    assert_eq!("6".parse::<AttributeCount>(), Ok(AttributeCount::Six));
    assert!("row-major".parse::<TensorLayout>().is_err());
    assert!("7".parse::<AttributeCount>().is_err());
  }

  #[test]
  fn wrong_rank_or_attribute_count_is_malformed() {
    let flat = RawTensor::new(vec![50], vec![0.5; 50]);
    assert!(decode(&flat, &DecoderConfig::default()).is_err());

    let six = RawTensor::new(vec![1, 6, 10], vec![0.5; 60]);
    assert!(decode(&six, &DecoderConfig::default()).is_err());
  }

  #[test]
  fn sixth_attribute_is_class_id() {
    let rows: &[&[f32]] = &[&[5.0, 5.0, 2.0, 2.0, 0.8, 3.0], &[5.0, 5.0, 2.0, 2.0, 0.8, -1.0]];
    let cfg = DecoderConfig {
      attributes: AttributeCount::Six,
      ..DecoderConfig::default()
    };
    let out = decode(&tensor(rows, TensorLayout::ChannelMajor), &cfg).unwrap();
    assert_eq!(out[0].class_id, Some(3));
    assert_eq!(out[1].class_id, None);
  }

  #[test]
  fn coordinate_scale_applies_to_geometry_only() {
    let rows: &[&[f32]] = &[&[0.5, 0.25, 0.1, 0.2, 0.9]];
    let cfg = DecoderConfig {
      coordinate_scale: 640.0,
      ..DecoderConfig::default()
    };
    let out = decode(&tensor(rows, TensorLayout::ChannelMajor), &cfg).unwrap();
    assert_eq!((out[0].x, out[0].y), (320.0, 160.0));
    assert!((out[0].w - 64.0).abs() < 1e-3 && (out[0].h - 128.0).abs() < 1e-3);
    assert_eq!(out[0].conf, 0.9);
  }

  #[test]
  fn two_dimensional_dims_mean_single_batch() {
    let output = RawTensor::new(vec![5, 1], vec![1.0, 2.0, 3.0, 4.0, 0.9]);
    assert_eq!(decode(&output, &DecoderConfig::default()).unwrap().len(), 1);
  }
}
