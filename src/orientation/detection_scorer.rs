// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/orientation/detection_scorer.rs - 基于检测结果的方向评分
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

use crate::{
  detector::{DetectionPass, Detector},
  model::{Detection, InferenceProvider},
  orientation::OrientationScorer,
  pipeline::{CancelToken, PipelineError},
};

/// 如何把一次检测的结果折算成分数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionScoreMode {
  /// 保留下来的框数量
  Count,
  /// 置信度之和
  ConfidenceSum,
  /// 最高置信度，不受多个误检框影响
  #[default]
  Top1,
}

impl DetectionScoreMode {
  pub fn score<S>(self, detections: &[Detection<S>]) -> f64 {
    match self {
      DetectionScoreMode::Count => detections.len() as f64,
      DetectionScoreMode::ConfidenceSum => detections.iter().map(|d| d.conf as f64).sum(),
      // 置信度可能为负，没有框时记 0
      DetectionScoreMode::Top1 if detections.is_empty() => 0.0,
      DetectionScoreMode::Top1 => detections
        .iter()
        .map(|d| d.conf as f64)
        .fold(f64::NEG_INFINITY, f64::max),
    }
  }
}

/// 在旋转后的图像上完整跑一次检测来评分，检测结果作为 payload 供复用
pub struct DetectionScorer<'a, M> {
  detector: &'a Detector<M>,
  mode: DetectionScoreMode,
  cancel: &'a CancelToken,
}

impl<'a, M> DetectionScorer<'a, M> {
  pub fn new(detector: &'a Detector<M>, mode: DetectionScoreMode, cancel: &'a CancelToken) -> Self {
    Self {
      detector,
      mode,
      cancel,
    }
  }
}

impl<M: InferenceProvider> OrientationScorer for DetectionScorer<'_, M> {
  type Payload = DetectionPass;
  type Error = PipelineError;

  fn score(&self, image: &RgbImage) -> Result<(f64, Option<DetectionPass>), PipelineError> {
    let pass = self.detector.detect(image, self.cancel, &mut |_| {})?;
    Ok((self.mode.score(&pass.detections), Some(pass)))
  }
}
