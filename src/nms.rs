// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use tracing::debug;

use crate::model::Detection;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsConfig {
  /// IoU 严格大于该值的低置信度框被抑制
  pub iou_threshold: f32,
  /// 为真时不同类别的框互不抑制
  pub class_aware: bool,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self {
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      class_aware: false,
    }
  }
}

/// 计算两个边界框的 IoU
///
/// 面积为零的退化框（并集不为正）返回 0，两个框都保持可选。
pub fn iou<S>(a: &Detection<S>, b: &Detection<S>) -> f32 {
  let [ax1, ay1, ax2, ay2] = a.corners();
  let [bx1, by1, bx2, by2] = b.corners();

  let overlap_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
  let overlap_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
  let intersection = overlap_w * overlap_h;
  let union = a.area() + b.area() - intersection;

  if union > 0.0 && union.is_finite() {
    intersection / union
  } else {
    0.0
  }
}

/// 置信度降序，NaN 排在最后
fn by_confidence_desc<S>(a: &Detection<S>, b: &Detection<S>) -> Ordering {
  match (a.conf.is_nan(), b.conf.is_nan()) {
    (true, true) => Ordering::Equal,
    (true, false) => Ordering::Greater,
    (false, true) => Ordering::Less,
    (false, false) => b.conf.partial_cmp(&a.conf).unwrap_or(Ordering::Equal),
  }
}

/// 贪心非极大值抑制
///
/// 先按置信度稳定排序（同分保持输入顺序），再依次与已保留的框比较 IoU。
/// 输出按置信度降序排列，相同输入总得到相同输出。
pub fn non_max_suppression<S: Copy>(
  mut detections: Vec<Detection<S>>,
  config: &NmsConfig,
) -> Vec<Detection<S>> {
  let total = detections.len();
  detections.sort_by(by_confidence_desc);

  let mut selected: Vec<Detection<S>> = Vec::with_capacity(detections.len());
  for candidate in detections {
    let suppressed = selected.iter().any(|kept| {
      if config.class_aware && kept.class_id != candidate.class_id {
        return false;
      }
      iou(kept, &candidate) > config.iou_threshold
    });

    if !suppressed {
      selected.push(candidate);
    }
  }

  debug!("NMS 前 {} 个框, NMS 后 {} 个框", total, selected.len());
  selected
}
