// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chepai::{
  FromUrl,
  input::InputWrapper,
  model::{DetectionModelSpec, Detector, ModelBuilder},
  output::{OutputWrapper, draw::Draw},
  recognize::RecognizerWrapper,
  task::{ContinuousTask, Pipeline, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("模型: {} ({})", args.model, args.spec);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("车牌识别: {}", args.recognizer);

  let spec = DetectionModelSpec::resolve(&args.spec)?;
  let model = ModelBuilder::from_url(&args.model)?.spec(spec).build()?;
  let detector = Detector::new(model, args.detector_config())?;
  let recognizer = RecognizerWrapper::from_url(&args.recognizer)?;

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };
  let output = OutputWrapper::from_url(&args.output)?.with_draw(draw);
  let input = InputWrapper::from_url(&args.input)?;

  let summary = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_ctrlc_handler()?
    .run_task(input, Pipeline::new(detector, recognizer), output)?;

  info!(
    "处理完成: {} 帧, {} 个检测结果, {} 个识别文本",
    summary.frames, summary.detections, summary.recognized
  );

  Ok(())
}
