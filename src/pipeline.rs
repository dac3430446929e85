// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/pipeline.rs - 单张图像的处理流程
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

use std::{sync::Arc, time::Duration};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};

use crate::{
  decode::{DecodeError, DecoderConfig},
  detector::{DetectionPass, Detector},
  letterbox::{DEFAULT_MODEL_SIZE, GREY_FILL, LetterboxError, LetterboxTransform},
  model::{Detection, ImageSpace, InferenceProvider},
  nms::NmsConfig,
  orientation::{
    AngleSet, DetectionScoreMode, DetectionScorer, KeywordScorer, OrientationSelector, Rotation,
  },
};

pub(crate) mod guard;
pub use self::guard::{CancelToken, RunSequencer, RunTicket};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error(transparent)]
  InvalidImageDimensions(#[from] LetterboxError),
  #[error(transparent)]
  MalformedDetectionOutput(#[from] DecodeError),
  #[error("推理不可用: {0}")]
  InferenceUnavailable(String),
  #[error("推理超时: {0:?}")]
  InferenceTimeout(Duration),
  #[error("任务已取消")]
  Cancelled,
}

/// 单张图像的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  OrientationResolving,
  Letterboxing,
  AwaitingInference,
  Decoding,
  Suppressing,
  Done,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
  pub model_size: u32,
  /// letterbox 填充颜色
  pub fill: [u8; 3],
  pub decoder: DecoderConfig,
  pub nms: NmsConfig,
  pub inference_timeout: Option<Duration>,
  pub angles: AngleSet,
  /// 方向最高分低于该值时退回 0°
  pub orientation_floor: Option<f64>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      model_size: DEFAULT_MODEL_SIZE,
      fill: GREY_FILL,
      decoder: DecoderConfig::default(),
      nms: NmsConfig::default(),
      inference_timeout: None,
      angles: AngleSet::default(),
      orientation_floor: None,
    }
  }
}

/// 方向纠正策略
#[derive(Clone, Default)]
pub enum Orientation {
  #[default]
  Disabled,
  /// 每个角度跑一次检测，复用胜出角度的检测结果
  Detection(DetectionScoreMode),
  /// 每个角度跑一次 OCR，选定后再检测一次
  Keyword(KeywordScorer),
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
  pub rotation: Rotation,
  pub orientation_score: Option<f64>,
  /// 按选定方向旋转后的图像，检测框坐标基于该图像
  pub image: RgbImage,
  pub transform: LetterboxTransform,
  pub detections: Vec<Detection<ImageSpace>>,
  /// 顶层阶段序列。按检测结果选方向时只记录胜出角度那一轮检测的阶段，
  /// 其余角度的检测不计入
  pub trace: Vec<PipelineState>,
}

pub struct Pipeline<M> {
  detector: Detector<M>,
  selector: OrientationSelector,
  orientation: Orientation,
}

impl<M: InferenceProvider> Pipeline<M> {
  pub fn new(model: Arc<M>, config: PipelineConfig) -> Self {
    Self {
      selector: OrientationSelector::new(config.angles, config.orientation_floor),
      detector: Detector::new(model, config),
      orientation: Orientation::Disabled,
    }
  }

  pub fn with_orientation(mut self, orientation: Orientation) -> Self {
    self.orientation = orientation;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    self.detector.config()
  }

  /// 处理一张图像，返回结果及经过的阶段
  pub fn run(&self, image: RgbImage, cancel: &CancelToken) -> Result<PipelineOutput, PipelineError> {
    let mut trace = Vec::new();
    let result = self.run_observed(image, cancel, &mut |state| trace.push(state));
    result.map(|mut output| {
      output.trace = trace;
      output
    })
  }

  /// 处理一张图像，每次状态变化都通知 `observer`（包括 `Failed`）
  pub fn run_observed(
    &self,
    image: RgbImage,
    cancel: &CancelToken,
    observer: &mut dyn FnMut(PipelineState),
  ) -> Result<PipelineOutput, PipelineError> {
    observer(PipelineState::Idle);

    match self.resolve(image, cancel, observer) {
      Ok((rotation, orientation_score, image, pass)) => {
        observer(PipelineState::Done);
        info!(
          "处理完成: 方向 {}, 检测到 {} 个对象",
          rotation,
          pass.detections.len()
        );
        Ok(PipelineOutput {
          rotation,
          orientation_score,
          image,
          transform: pass.transform,
          detections: pass.detections,
          trace: Vec::new(),
        })
      }
      Err(e) => {
        error!("处理失败: {}", e);
        observer(PipelineState::Failed);
        Err(e)
      }
    }
  }

  fn resolve(
    &self,
    image: RgbImage,
    cancel: &CancelToken,
    observer: &mut dyn FnMut(PipelineState),
  ) -> Result<(Rotation, Option<f64>, RgbImage, DetectionPass), PipelineError> {
    // 尺寸无效时在任何推理之前失败
    LetterboxTransform::new(image.width(), image.height(), self.config().model_size)?;

    let selection = match &self.orientation {
      Orientation::Disabled => {
        let pass = self.detector.detect(&image, cancel, observer)?;
        return Ok((Rotation::Deg0, None, image, pass));
      }
      Orientation::Detection(mode) => {
        Self::enter(PipelineState::OrientationResolving, cancel, observer)?;
        let scorer = DetectionScorer::new(&self.detector, *mode, cancel);
        self.selector.select(&image, &scorer)
      }
      Orientation::Keyword(scorer) => {
        Self::enter(PipelineState::OrientationResolving, cancel, observer)?;
        self.selector.select(&image, scorer).map_payload(|_| None)
      }
    };

    if cancel.is_cancelled() {
      return Err(PipelineError::Cancelled);
    }

    let pass = match selection.payload {
      Some(pass) => {
        // 复用胜出角度的检测，补报它经过的阶段
        for &state in &pass.states {
          observer(state);
        }
        pass
      }
      None => self.detector.detect(&selection.image, cancel, observer)?,
    };
    Ok((selection.rotation, Some(selection.score), selection.image, pass))
  }

  fn enter(
    state: PipelineState,
    cancel: &CancelToken,
    observer: &mut dyn FnMut(PipelineState),
  ) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
      return Err(PipelineError::Cancelled);
    }
    observer(state);
    Ok(())
  }
}
