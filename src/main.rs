// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use kapian::{
  FromUrl,
  decode::DecoderConfig,
  input::ImageFileInput,
  letterbox::{BLACK_FILL, GREY_FILL},
  model::RecordedOutput,
  nms::NmsConfig,
  ocr::UnavailableOcr,
  orientation::{KeywordScorer, OrientationMode},
  output::{OutputWrapper, Render},
  pipeline::{CancelToken, Orientation, Pipeline, PipelineConfig, PipelineError},
};

fn pipeline_config(args: &args::Args) -> PipelineConfig {
  PipelineConfig {
    model_size: args.model_size,
    fill: if args.black_fill { BLACK_FILL } else { GREY_FILL },
    decoder: DecoderConfig {
      layout: args.layout,
      attributes: args.attributes,
      confidence_threshold: args.confidence,
      coordinate_scale: args.coordinate_scale,
    },
    nms: NmsConfig {
      iou_threshold: args.nms_threshold,
      class_aware: args.class_aware,
    },
    inference_timeout: args.timeout_ms.map(Duration::from_millis),
    angles: args.angles,
    orientation_floor: args.orientation_floor,
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型输出: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!(
    "置信度阈值: {}, NMS 阈值: {}",
    args.confidence, args.nms_threshold
  );

  let orientation = match args.orientation {
    OrientationMode::OcrKeyword => {
      warn!("当前构建没有可用的 OCR 引擎, 各角度评分失败后将保持原方向");
      let scorer = KeywordScorer::new(Arc::new(UnavailableOcr))
        .keyword_weight(args.keyword_weight)
        .timeout(args.ocr_timeout_ms.map(Duration::from_millis));
      let scorer = if args.keyword.is_empty() {
        scorer
      } else {
        scorer.keywords(&args.keyword)
      };
      Orientation::Keyword(scorer)
    }
    mode => match mode.detection_mode() {
      Some(mode) => Orientation::Detection(mode),
      None => Orientation::Disabled,
    },
  };

  let input = ImageFileInput::from_url(&args.input)
    .with_context(|| format!("无法打开输入: {}", args.input))?;
  let model = RecordedOutput::from_url(&args.model)
    .with_context(|| format!("无法加载模型输出: {}", args.model))?;
  let output = OutputWrapper::from_url(&args.output)
    .with_context(|| format!("无法创建输出: {}", args.output))?;

  let pipeline = Pipeline::new(Arc::new(model), pipeline_config(&args)).with_orientation(orientation);

  let cancel = CancelToken::new();
  let handler_cancel = cancel.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler_cancel.cancel();
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  info!("开始处理...");
  let mut processed = 0usize;
  for source in input {
    if cancel.is_cancelled() {
      warn!("处理被中断");
      break;
    }

    let now = std::time::Instant::now();
    let result = match pipeline.run(source.image, &cancel) {
      Ok(result) => result,
      Err(PipelineError::Cancelled) => {
        warn!("处理被中断");
        break;
      }
      Err(e) => return Err(e).with_context(|| format!("处理 {} 失败", source.name)),
    };
    processed += 1;
    info!(
      "{} 处理完成，耗时: {:.2?}, 检测到 {} 个对象",
      source.name,
      now.elapsed(),
      result.detections.len()
    );
    for det in &result.detections {
      info!(
        "  - {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
        det.conf * 100.0,
        det.x,
        det.y,
        det.w,
        det.h
      );
    }
    output.render_result(&source.name, &result.image, &result.detections)?;
  }

  info!("共处理 {} 张图像", processed);
  Ok(())
}
