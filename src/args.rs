// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use chepai::model::DetectorConfig;
use clap::Parser;
use url::Url;

/// Chepai 车牌识读参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型 URI
  /// 支持格式:
  /// - 张量回放: tensor:///path/to/tensor.bin 或 tensor:///path/to/dir
  /// - ONNX: onnx:///path/to/model.onnx（需要 onnx 特性）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 模型描述：预设名称或 JSON 文件路径
  #[arg(long, default_value = "tiny-yolo-v2", value_name = "SPEC")]
  pub spec: String,

  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/to/image.png
  /// - 图片目录: folder:///path/to/dir
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 图片: image:///path/to/out.png?width=W&height=H
  /// - 目录: folder:///path/to/dir?record=name|id&always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 车牌识别
  /// 支持格式:
  /// - 不识别: none:
  /// - OpenALPR 命令行: alpr:///usr/bin/alpr?country=us&top_n=10
  /// - OpenALPR 云端: openalpr://api.openalpr.com/v3/recognize_bytes?secret_key=KEY（需要 alpr_cloud 特性）
  #[arg(long, default_value = "none:", value_name = "RECOGNIZER")]
  pub recognizer: Url,

  /// 标签字体（TTF/OTF），不指定时只绘制边框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.3", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 每帧最多保留的检测结果数
  #[arg(long, default_value = "5", value_name = "COUNT")]
  pub max_results: usize,

  /// 最大处理帧数，不指定时处理全部帧
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

impl Args {
  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      confidence_threshold: self.confidence,
      overlap_threshold: self.nms_threshold,
      max_results: self.max_results,
    }
  }
}
