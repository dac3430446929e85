// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/orientation/keyword_scorer.rs - 基于 OCR 关键词的方向评分
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
use tracing::debug;

use crate::{
  ocr::{OcrError, OcrOutput, OcrProvider},
  orientation::OrientationScorer,
  pipeline::guard::{CallError, run_with_timeout},
};

/// 一个关键词命中的权重，远大于整页 OCR 置信度之和
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 100.0;
pub const DEFAULT_KEYWORDS: &[&str] = &["aadhaar", "government of india"];

/// `score = sum(单词置信度) + 命中关键词数 * keyword_weight`
///
/// 关键词不区分大小写，按子串匹配，每个关键词最多计一次。
#[derive(Clone)]
pub struct KeywordScorer {
  ocr: Arc<dyn OcrProvider>,
  keywords: Vec<String>,
  keyword_weight: f64,
  timeout: Option<Duration>,
}

impl KeywordScorer {
  pub fn new(ocr: Arc<dyn OcrProvider>) -> Self {
    Self {
      ocr,
      keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
      keyword_weight: DEFAULT_KEYWORD_WEIGHT,
      timeout: None,
    }
  }

  pub fn keywords<I, K>(mut self, keywords: I) -> Self
  where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
  {
    self.keywords = keywords
      .into_iter()
      .map(|k| k.as_ref().to_lowercase())
      .collect();
    self
  }

  pub fn keyword_weight(mut self, weight: f64) -> Self {
    self.keyword_weight = weight;
    self
  }

  pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn score_output(&self, output: &OcrOutput) -> f64 {
    let confidence: f64 = output
      .words
      .iter()
      .filter_map(|w| w.confidence)
      .map(|c| c as f64)
      .sum();

    let text = output.full_text().to_lowercase();
    let matches = self
      .keywords
      .iter()
      .filter(|k| !k.is_empty() && text.contains(k.as_str()))
      .count();

    debug!(
      "OCR 置信度之和 {:.3}, 命中关键词 {} 个",
      confidence, matches
    );
    confidence + matches as f64 * self.keyword_weight
  }
}

impl OrientationScorer for KeywordScorer {
  type Payload = ();
  type Error = OcrError;

  fn score(&self, image: &RgbImage) -> Result<(f64, Option<()>), OcrError> {
    let ocr = Arc::clone(&self.ocr);
    let image = image.clone();
    let output = match run_with_timeout(self.timeout, move || ocr.recognize(&image)) {
      Ok(result) => result?,
      Err(CallError::Elapsed(limit)) => return Err(OcrError::OcrTimeout(limit)),
      Err(CallError::Panicked) => {
        return Err(OcrError::OcrUnavailable("OCR 线程异常退出".to_string()));
      }
    };
    Ok((self.score_output(&output), None))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ocr::OcrWord;

  struct Fixed(OcrOutput);

  impl OcrProvider for Fixed {
    fn recognize(&self, _image: &RgbImage) -> Result<OcrOutput, OcrError> {
      Ok(self.0.clone())
    }
  }

  struct Broken;

  impl OcrProvider for Broken {
    fn recognize(&self, _image: &RgbImage) -> Result<OcrOutput, OcrError> {
      Err(OcrError::OcrUnavailable("no engine".into()))
    }
  }

  fn word(text: &str, confidence: Option<f32>) -> OcrWord {
    OcrWord {
      text: text.into(),
      confidence,
    }
  }

  #[test]
  fn keyword_dominates_confidence() {
    let scorer = KeywordScorer::new(Arc::new(Broken));
    let noisy = OcrOutput {
      text: "lorem ipsum dolor".into(),
      words: vec![word("lorem", Some(0.9)), word("ipsum", Some(0.9)), word("dolor", Some(0.9))],
    };
    let matched = OcrOutput {
      text: "Government of India".into(),
      words: vec![word("Government", Some(0.1)), word("of", None), word("India", Some(0.1))],
    };
    let noisy_score = scorer.score_output(&noisy);
    let matched_score = scorer.score_output(&matched);
    assert!((noisy_score - 2.7).abs() < 1e-6);
    assert!((matched_score - 100.2).abs() < 1e-6);
  }

  #[test]
  fn each_keyword_counts_once() {
    let scorer = KeywordScorer::new(Arc::new(Broken))
      .keywords(["AADHAAR"])
      .keyword_weight(150.0);
    let output = OcrOutput {
      text: "aadhaar aadhaar Aadhaar".into(),
      words: Vec::new(),
    };
    assert_eq!(scorer.score_output(&output), 150.0);
  }

  #[test]
  fn provider_errors_propagate() {
    let scorer = KeywordScorer::new(Arc::new(Broken));
    assert!(scorer.score(&RgbImage::new(2, 2)).is_err());

    let scorer = KeywordScorer::new(Arc::new(Fixed(OcrOutput {
      text: "aadhaar".into(),
      words: vec![word("aadhaar", Some(0.5))],
    })))
    .timeout(Some(Duration::from_secs(5)));
    let (score, payload) = scorer.score(&RgbImage::new(2, 2)).unwrap();
    assert_eq!(score, 100.5);
    assert_eq!(payload, None);
  }
}
