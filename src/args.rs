// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

use kapian::{
  decode::{AttributeCount, DEFAULT_CONFIDENCE_THRESHOLD, TensorLayout},
  letterbox::DEFAULT_MODEL_SIZE,
  nms::DEFAULT_IOU_THRESHOLD,
  orientation::{AngleSet, DEFAULT_KEYWORD_WEIGHT, OrientationMode},
};

/// Kapian 卡片检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型输出来源，例如 tensor:///path/to/output.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入图像
  /// 支持格式:
  /// - 单张图片: image:///path/to/card.jpg
  /// - 图片目录: image:///path/to/dir（读取其中的 jpg/jpeg/png）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 画框后的图片: image:///path/to/out.png 或 image:///path/to/dir/
  /// - 裁剪与记录: folder:///path/to/dir[?always]
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值，严格大于该值才保留
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IoU 阈值
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 不同类别的框互不抑制
  #[arg(long)]
  pub class_aware: bool,

  /// 模型输入边长
  #[arg(long, default_value_t = DEFAULT_MODEL_SIZE, value_name = "PIXELS")]
  pub model_size: u32,

  /// 输出张量布局: channel-major 或 prediction-major
  #[arg(long, default_value = "channel-major", value_name = "LAYOUT")]
  pub layout: TensorLayout,

  /// 每个预测的属性数: 5 或 6
  #[arg(long, default_value = "5", value_name = "COUNT")]
  pub attributes: AttributeCount,

  /// 坐标缩放系数，模型输出归一化坐标时设为模型输入边长
  #[arg(long, default_value_t = 1.0, value_name = "SCALE")]
  pub coordinate_scale: f32,

  /// letterbox 使用黑色填充（默认灰色 114）
  #[arg(long)]
  pub black_fill: bool,

  /// 单次推理超时（毫秒），不设置则不限时
  #[arg(long, value_name = "MILLIS")]
  pub timeout_ms: Option<u64>,

  /// 方向纠正方式: none, detection-sum, detection-top1, detection-count, ocr-keyword
  #[arg(long, default_value = "none", value_name = "MODE")]
  pub orientation: OrientationMode,

  /// 候选角度: all, flip, auto
  #[arg(long, default_value = "auto", value_name = "ANGLES")]
  pub angles: AngleSet,

  /// 方向最高分低于该值时保持原方向
  #[arg(long, value_name = "SCORE")]
  pub orientation_floor: Option<f64>,

  /// ocr-keyword 使用的关键词，可重复指定，默认 aadhaar 与 government of india
  #[arg(long, value_name = "TEXT")]
  pub keyword: Vec<String>,

  /// 每命中一个关键词增加的分数
  #[arg(long, default_value_t = DEFAULT_KEYWORD_WEIGHT, value_name = "WEIGHT")]
  pub keyword_weight: f64,

  /// 单次 OCR 超时（毫秒），不设置则不限时
  #[arg(long, value_name = "MILLIS")]
  pub ocr_timeout_ms: Option<u64>,
}
