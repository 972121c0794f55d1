// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/bin/oneshot.rs - 单帧推理，以 JSON 行输出检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use chepai::{
  FromUrl,
  geometry,
  input::InputWrapper,
  model::{DetectionModelSpec, Detector, DetectorConfig, ModelBuilder},
  output::OutputWrapper,
  recognize::RecognizerWrapper,
  task::{OneShotTask, Pipeline, Task},
};

/// Chepai 单帧推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型 URI
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 模型描述：预设名称或 JSON 文件路径
  #[arg(long, default_value = "tiny-yolo-v2", value_name = "SPEC")]
  pub spec: String,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 车牌识别
  #[arg(long, default_value = "none:", value_name = "RECOGNIZER")]
  pub recognizer: Url,
  /// 检测配置 JSON 文件，缺省字段使用默认值
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config: DetectorConfig = match &args.config {
    Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
    None => DetectorConfig::default(),
  };
  info!("检测配置: {:?}", config);

  let spec = DetectionModelSpec::resolve(&args.spec)?;
  let model = ModelBuilder::from_url(&args.model)?.spec(spec).build()?;
  let pipeline = Pipeline::new(
    Detector::new(model, config)?,
    RecognizerWrapper::from_url(&args.recognizer)?,
  );
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let analysis = OneShotTask.run_task(input, pipeline, output)?;

  let source = analysis.frame.extent();
  for ((_, detection), text) in analysis.detections.iter().zip(&analysis.texts) {
    let rect = geometry::map(detection, analysis.network, source);
    let line = json!({
      "frame": analysis.frame.name,
      "detection": detection,
      "source_rect": rect,
      "text": text,
    });
    println!("{}", line);
  }

  Ok(())
}
