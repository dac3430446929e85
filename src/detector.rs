// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/detector.rs - 单次检测：letterbox -> 推理 -> 解码 -> NMS -> 坐标还原
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

use std::{sync::Arc, time::Instant};

use image::RgbImage;
use tracing::{debug, error};

use crate::{
  decode::decode,
  letterbox::{LetterboxTransform, letterbox_image},
  model::{Detection, ImageSpace, InferenceProvider, InputTensor, RawTensor},
  nms::non_max_suppression,
  pipeline::{
    CancelToken, PipelineConfig, PipelineError, PipelineState,
    guard::{CallError, run_with_timeout},
  },
};

/// 一次检测的结果，坐标已映射回原图
#[derive(Debug, Clone)]
pub struct DetectionPass {
  pub transform: LetterboxTransform,
  pub detections: Vec<Detection<ImageSpace>>,
  /// 本次检测依次进入的阶段
  pub states: Vec<PipelineState>,
}

/// 目标检测器
///
/// 持有共享的推理会话和检测参数，本身不保存任何单次运行的状态。
pub struct Detector<M> {
  model: Arc<M>,
  config: PipelineConfig,
}

impl<M> Detector<M> {
  pub fn new(model: Arc<M>, config: PipelineConfig) -> Self {
    Self { model, config }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }
}

impl<M: InferenceProvider> Detector<M> {
  /// 运行检测，每进入一个阶段调用一次 `on_state`
  pub fn detect(
    &self,
    image: &RgbImage,
    cancel: &CancelToken,
    on_state: &mut dyn FnMut(PipelineState),
  ) -> Result<DetectionPass, PipelineError> {
    let mut states = Vec::with_capacity(4);
    let mut enter = |state: PipelineState| {
      if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
      }
      debug!("进入阶段: {:?}", state);
      states.push(state);
      on_state(state);
      Ok(())
    };

    enter(PipelineState::Letterboxing)?;
    let (tensor, transform) = letterbox_image(image, self.config.model_size, self.config.fill)?;

    enter(PipelineState::AwaitingInference)?;
    let output = self.infer(tensor)?;

    enter(PipelineState::Decoding)?;
    let candidates = decode(&output, &self.config.decoder)?;

    enter(PipelineState::Suppressing)?;
    let kept = non_max_suppression(candidates, &self.config.nms);

    let detections = kept.iter().map(|det| transform.unletterbox(det)).collect();
    Ok(DetectionPass {
      transform,
      detections,
      states,
    })
  }

  fn infer(&self, tensor: InputTensor) -> Result<RawTensor, PipelineError> {
    let model = Arc::clone(&self.model);
    let now = Instant::now();
    let result = run_with_timeout(self.config.inference_timeout, move || {
      model.infer(&tensor).map_err(|e| e.to_string())
    });

    match result {
      Ok(Ok(output)) => {
        debug!("推理完成，耗时: {:.2?}", now.elapsed());
        Ok(output)
      }
      Ok(Err(msg)) => {
        error!("推理失败: {}", msg);
        Err(PipelineError::InferenceUnavailable(msg))
      }
      Err(CallError::Elapsed(limit)) => Err(PipelineError::InferenceTimeout(limit)),
      Err(CallError::Panicked) => Err(PipelineError::InferenceUnavailable(
        "推理线程异常退出".to_string(),
      )),
    }
  }
}
