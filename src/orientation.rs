// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/orientation.rs - 图像方向选择
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

use std::{fmt, str::FromStr};

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info, warn};

/// 顺时针旋转角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub const ALL: [Rotation; 4] = [
    Rotation::Deg0,
    Rotation::Deg90,
    Rotation::Deg180,
    Rotation::Deg270,
  ];

  pub fn degrees(self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  pub fn from_degrees(degrees: u32) -> Option<Self> {
    match degrees % 360 {
      0 => Some(Rotation::Deg0),
      90 => Some(Rotation::Deg90),
      180 => Some(Rotation::Deg180),
      270 => Some(Rotation::Deg270),
      _ => None,
    }
  }

  /// 绕图像中心顺时针旋转，90° 与 270° 会交换宽高
  pub fn rotate(self, image: &RgbImage) -> RgbImage {
    match self {
      Rotation::Deg0 => image.clone(),
      Rotation::Deg90 => imageops::rotate90(image),
      Rotation::Deg180 => imageops::rotate180(image),
      Rotation::Deg270 => imageops::rotate270(image),
    }
  }

  pub fn rotated_size(self, width: u32, height: u32) -> (u32, u32) {
    match self {
      Rotation::Deg0 | Rotation::Deg180 => (width, height),
      Rotation::Deg90 | Rotation::Deg270 => (height, width),
    }
  }
}

impl fmt::Display for Rotation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}°", self.degrees())
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无法解析方向参数: {0}")]
pub struct OrientationParseError(String);

/// 需要尝试的候选角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AngleSet {
  /// 0, 90, 180, 270
  All,
  /// 0, 180
  Flip,
  /// 横向图像只尝试 0 与 180，其余尝试全部角度
  #[default]
  Auto,
}

impl AngleSet {
  pub fn rotations(self, width: u32, height: u32) -> Vec<Rotation> {
    match self {
      AngleSet::All => Rotation::ALL.to_vec(),
      AngleSet::Flip => vec![Rotation::Deg0, Rotation::Deg180],
      AngleSet::Auto if width > height => vec![Rotation::Deg0, Rotation::Deg180],
      AngleSet::Auto => Rotation::ALL.to_vec(),
    }
  }
}

impl FromStr for AngleSet {
  type Err = OrientationParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "all" => Ok(AngleSet::All),
      "flip" => Ok(AngleSet::Flip),
      "auto" => Ok(AngleSet::Auto),
      other => Err(OrientationParseError(format!("未知角度集合 '{}'", other))),
    }
  }
}

/// 方向评分方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrientationMode {
  #[default]
  None,
  DetectionConfidenceSum,
  DetectionTop1,
  DetectionCount,
  OcrKeyword,
}

impl OrientationMode {
  pub fn detection_mode(self) -> Option<DetectionScoreMode> {
    match self {
      OrientationMode::DetectionConfidenceSum => Some(DetectionScoreMode::ConfidenceSum),
      OrientationMode::DetectionTop1 => Some(DetectionScoreMode::Top1),
      OrientationMode::DetectionCount => Some(DetectionScoreMode::Count),
      OrientationMode::None | OrientationMode::OcrKeyword => None,
    }
  }
}

impl FromStr for OrientationMode {
  type Err = OrientationParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "none" => Ok(OrientationMode::None),
      "detection-sum" | "detection-confidence-sum" => Ok(OrientationMode::DetectionConfidenceSum),
      "detection-top1" => Ok(OrientationMode::DetectionTop1),
      "detection-count" => Ok(OrientationMode::DetectionCount),
      "ocr-keyword" | "ocr-keyword-weighted" => Ok(OrientationMode::OcrKeyword),
      other => Err(OrientationParseError(format!("未知评分方式 '{}'", other))),
    }
  }
}

/// 对一张（已旋转的）图像打分，分数越高越可能是正确方向
///
/// 评分时算出的中间结果可以作为 payload 返回，供选中后复用。
pub trait OrientationScorer {
  type Payload;
  type Error: std::error::Error;

  fn score(&self, image: &RgbImage) -> Result<(f64, Option<Self::Payload>), Self::Error>;
}

#[derive(Debug, Clone)]
pub struct OrientationCandidate<P> {
  pub rotation: Rotation,
  pub image: RgbImage,
  pub score: f64,
  pub payload: Option<P>,
}

#[derive(Debug, Clone)]
pub struct OrientationSelection<P> {
  pub rotation: Rotation,
  pub score: f64,
  /// 已旋转好的图像，无需再次旋转
  pub image: RgbImage,
  pub payload: Option<P>,
  /// 没有足够证据，退回 0°
  pub fell_back: bool,
}

impl<P> OrientationSelection<P> {
  pub fn map_payload<Q>(self, f: impl FnOnce(Option<P>) -> Option<Q>) -> OrientationSelection<Q> {
    OrientationSelection {
      rotation: self.rotation,
      score: self.score,
      image: self.image,
      payload: f(self.payload),
      fell_back: self.fell_back,
    }
  }
}

fn effective_score<P>(candidate: &OrientationCandidate<P>) -> f64 {
  if candidate.score.is_nan() {
    f64::NEG_INFINITY
  } else {
    candidate.score
  }
}

/// 选出分数严格最高的候选，同分保留先评估的
///
/// 最高分低于 `floor`（或所有候选都失败）时退回 0°。
pub fn select_best<P>(
  candidates: Vec<OrientationCandidate<P>>,
  floor: Option<f64>,
) -> Option<OrientationSelection<P>> {
  let mut best: Option<(usize, f64)> = None;
  for (index, candidate) in candidates.iter().enumerate() {
    let score = effective_score(candidate);
    match best {
      Some((_, best_score)) if score <= best_score => {}
      _ => best = Some((index, score)),
    }
  }
  let (best_index, best_score) = best?;

  let confident = best_score > f64::NEG_INFINITY && floor.is_none_or(|floor| best_score >= floor);
  let index = if confident {
    best_index
  } else {
    debug!("最高分 {} 不足以确定方向, 退回 0°", best_score);
    candidates
      .iter()
      .position(|c| c.rotation == Rotation::Deg0)
      .unwrap_or(best_index)
  };

  let chosen = candidates.into_iter().nth(index)?;
  Some(OrientationSelection {
    rotation: chosen.rotation,
    score: chosen.score,
    image: chosen.image,
    payload: chosen.payload,
    fell_back: !confident,
  })
}

/// 旋转、评分并选择方向的驱动循环，与具体评分方式无关
#[derive(Debug, Clone, Copy, Default)]
pub struct OrientationSelector {
  angles: AngleSet,
  floor: Option<f64>,
}

impl OrientationSelector {
  pub fn new(angles: AngleSet, floor: Option<f64>) -> Self {
    Self { angles, floor }
  }

  pub fn select<S: OrientationScorer>(
    &self,
    image: &RgbImage,
    scorer: &S,
  ) -> OrientationSelection<S::Payload> {
    let rotations = self.angles.rotations(image.width(), image.height());

    let candidates: Vec<_> = rotations
      .into_iter()
      .map(|rotation| {
        let rotated = rotation.rotate(image);
        let (score, payload) = match scorer.score(&rotated) {
          Ok((score, payload)) => (score, payload),
          Err(e) => {
            warn!("方向 {} 评分失败: {}", rotation, e);
            (f64::NEG_INFINITY, None)
          }
        };
        debug!("方向 {} 得分 {:.4}", rotation, score);
        OrientationCandidate {
          rotation,
          image: rotated,
          score,
          payload,
        }
      })
      .collect();

    let selection = select_best(candidates, self.floor).unwrap_or_else(|| OrientationSelection {
      rotation: Rotation::Deg0,
      score: f64::NEG_INFINITY,
      image: image.clone(),
      payload: None,
      fell_back: true,
    });

    info!(
      "选定方向 {} (得分 {:.4}{})",
      selection.rotation,
      selection.score,
      if selection.fell_back { ", 退回默认" } else { "" }
    );
    selection
  }
}

mod detection_scorer;
mod keyword_scorer;

pub use self::detection_scorer::{DetectionScoreMode, DetectionScorer};
pub use self::keyword_scorer::{DEFAULT_KEYWORD_WEIGHT, DEFAULT_KEYWORDS, KeywordScorer};

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn candidates(scores: &[(Rotation, f64)]) -> Vec<OrientationCandidate<u32>> {
    scores
      .iter()
      .map(|&(rotation, score)| OrientationCandidate {
        rotation,
        image: RgbImage::new(1, 1),
        score,
        payload: Some(rotation.degrees()),
      })
      .collect()
  }

  #[test]
  fn highest_score_wins() {
    let c = candidates(&[
      (Rotation::Deg0, 12.0),
      (Rotation::Deg90, 5.0),
      (Rotation::Deg180, 30.0),
      (Rotation::Deg270, 8.0),
    ]);
    let selection = select_best(c, None).unwrap();
    assert_eq!(selection.rotation, Rotation::Deg180);
    assert_eq!(selection.payload, Some(180));
    assert!(!selection.fell_back);
  }

  #[test]
  fn ties_keep_first_evaluated() {
    let c = candidates(&[
      (Rotation::Deg0, 1.0),
      (Rotation::Deg90, 3.0),
      (Rotation::Deg180, 3.0),
      (Rotation::Deg270, 2.0),
    ]);
    assert_eq!(select_best(c, None).unwrap().rotation, Rotation::Deg90);
  }

  #[test]
  fn weak_evidence_falls_back_to_zero() {
    let c = candidates(&[
      (Rotation::Deg0, 0.1),
      (Rotation::Deg90, 0.4),
      (Rotation::Deg180, 0.2),
      (Rotation::Deg270, 0.3),
    ]);
    let selection = select_best(c, Some(0.5)).unwrap();
    assert_eq!(selection.rotation, Rotation::Deg0);
    assert_eq!(selection.payload, Some(0));
    assert!(selection.fell_back);
  }

  #[test]
  fn failed_candidates_never_win() {
    let c = candidates(&[
      (Rotation::Deg0, f64::NEG_INFINITY),
      (Rotation::Deg90, f64::NAN),
      (Rotation::Deg180, 0.01),
      (Rotation::Deg270, f64::NEG_INFINITY),
    ]);
    assert_eq!(select_best(c, None).unwrap().rotation, Rotation::Deg180);

    let all_failed = candidates(&[(Rotation::Deg90, f64::NEG_INFINITY), (Rotation::Deg0, f64::NEG_INFINITY)]);
    let selection = select_best(all_failed, None).unwrap();
    assert_eq!(selection.rotation, Rotation::Deg0);
    assert!(selection.fell_back);
  }

  #[test]
  fn no_candidates_gives_nothing() {
    assert!(select_best::<u32>(Vec::new(), None).is_none());
  }

  #[test]
  fn rotation_is_clockwise_and_swaps_size() {
    let mut image = RgbImage::new(4, 2);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));

    let r90 = Rotation::Deg90.rotate(&image);
    assert_eq!(r90.dimensions(), (2, 4));
    assert_eq!(r90.get_pixel(1, 0), &Rgb([255, 0, 0]));

    let r180 = Rotation::Deg180.rotate(&image);
    assert_eq!(r180.dimensions(), (4, 2));
    assert_eq!(r180.get_pixel(3, 1), &Rgb([255, 0, 0]));

    let r270 = Rotation::Deg270.rotate(&image);
    assert_eq!(r270.dimensions(), Rotation::Deg270.rotated_size(4, 2));
    assert_eq!(r270.get_pixel(0, 3), &Rgb([255, 0, 0]));
  }

  #[test]
  fn angle_sets() {
    assert_eq!(AngleSet::Auto.rotations(1280, 960), vec![Rotation::Deg0, Rotation::Deg180]);
    assert_eq!(AngleSet::Auto.rotations(960, 1280), Rotation::ALL.to_vec());
    assert_eq!(AngleSet::All.rotations(1280, 960).len(), 4);
    assert_eq!(AngleSet::Flip.rotations(10, 20), vec![Rotation::Deg0, Rotation::Deg180]);
  }

  #[test]
  fn parse_options() {
    assert_eq!("detection-top1".parse::<OrientationMode>(), Ok(OrientationMode::DetectionTop1));
    assert_eq!("ocr-keyword".parse::<OrientationMode>(), Ok(OrientationMode::OcrKeyword));
    assert!("sideways".parse::<OrientationMode>().is_err());
    assert_eq!("flip".parse::<AngleSet>(), Ok(AngleSet::Flip));
    assert_eq!(Rotation::from_degrees(450), Some(Rotation::Deg90));
    assert_eq!(Rotation::from_degrees(45), None);
  }

  struct FailingOnRotated;

  #[derive(Error, Debug)]
  #[error("scorer failed")]
  struct ScorerFailed;

  impl OrientationScorer for FailingOnRotated {
    type Payload = ();
    type Error = ScorerFailed;

    fn score(&self, image: &RgbImage) -> Result<(f64, Option<()>), ScorerFailed> {
      // 只有原方向 (4x2) 能评分
      if image.width() == 4 {
        Ok((1.0, None))
      } else {
        Err(ScorerFailed)
      }
    }
  }

  #[test]
  fn selector_survives_scorer_errors() {
    let image = RgbImage::new(4, 2);
    let selection = OrientationSelector::new(AngleSet::All, None).select(&image, &FailingOnRotated);
    // 0° 与 180° 都是 4x2，同分取先评估的 0°
    assert_eq!(selection.rotation, Rotation::Deg0);
    assert_eq!(selection.image.dimensions(), (4, 2));
  }
}
