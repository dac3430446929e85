// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/ocr.rs - OCR 接口
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
  sync::{Mutex, PoisonError},
  time::Duration,
};

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcrError {
  #[error("OCR 不可用: {0}")]
  OcrUnavailable(String),
  #[error("OCR 超时: {0:?}")]
  OcrTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrWord {
  pub text: String,
  pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrOutput {
  pub text: String,
  pub words: Vec<OcrWord>,
}

impl OcrOutput {
  /// 整段文本，引擎没有给出时由单词拼接
  pub fn full_text(&self) -> String {
    if self.text.is_empty() {
      self
        .words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
    } else {
      self.text.clone()
    }
  }
}

/// 外部 OCR 能力，可在多个线程间共享
pub trait OcrProvider: Send + Sync + 'static {
  fn recognize(&self, image: &RgbImage) -> Result<OcrOutput, OcrError>;
}

/// 没有 OCR 引擎时的占位，每次识别都返回 `OcrUnavailable`
///
/// 按关键词选方向时所有角度都得 -inf，最终退回 0°。
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableOcr;

impl OcrProvider for UnavailableOcr {
  fn recognize(&self, _image: &RgbImage) -> Result<OcrOutput, OcrError> {
    Err(OcrError::OcrUnavailable("没有可用的 OCR 引擎".to_string()))
  }
}

/// 不可重入的 OCR 引擎
pub trait OcrEngine: Send + 'static {
  fn recognize(&mut self, image: &RgbImage) -> Result<OcrOutput, OcrError>;
}

/// 用互斥锁串行化对单个 OCR 引擎的访问
pub struct SerializedOcr<E> {
  engine: Mutex<E>,
}

impl<E: OcrEngine> SerializedOcr<E> {
  pub fn new(engine: E) -> Self {
    Self {
      engine: Mutex::new(engine),
    }
  }
}

impl<E: OcrEngine> OcrProvider for SerializedOcr<E> {
  fn recognize(&self, image: &RgbImage) -> Result<OcrOutput, OcrError> {
    debug!("等待 OCR 引擎");
    let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
    engine.recognize(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct CountingEngine {
    calls: usize,
  }

  impl OcrEngine for CountingEngine {
    fn recognize(&mut self, _image: &RgbImage) -> Result<OcrOutput, OcrError> {
      self.calls += 1;
      Ok(OcrOutput {
        text: format!("call {}", self.calls),
        words: Vec::new(),
      })
    }
  }

  #[test]
  fn serialized_engine_sees_every_call() {
    let ocr = std::sync::Arc::new(SerializedOcr::new(CountingEngine { calls: 0 }));
    let image = RgbImage::new(1, 1);

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let ocr = ocr.clone();
        let image = image.clone();
        std::thread::spawn(move || ocr.recognize(&image).unwrap())
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }

    assert_eq!(ocr.recognize(&image).unwrap().text, "call 5");
  }

  #[test]
  fn unavailable_ocr_always_fails() {
    assert!(matches!(
      UnavailableOcr.recognize(&RgbImage::new(2, 2)),
      Err(OcrError::OcrUnavailable(_))
    ));
  }

  #[test]
  fn full_text_falls_back_to_words() {
    let output = OcrOutput {
      text: String::new(),
      words: vec![
        OcrWord {
          text: "Government".into(),
          confidence: Some(0.9),
        },
        OcrWord {
          text: "of".into(),
          confidence: None,
        },
      ],
    };
    assert_eq!(output.full_text(), "Government of");
  }
}
