// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/model/spec.rs - 检测模型输出约定
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

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::geometry::Extent;

/// 每个锚框的几何通道数：tx, ty, tw, th
pub const GEOMETRY_CHANNELS: usize = 4;
/// 几何通道之后紧跟一个目标置信度通道
pub const OBJECTNESS_CHANNEL: usize = GEOMETRY_CHANNELS;
/// 类别分数从这里开始
pub const CLASS_CHANNEL_OFFSET: usize = GEOMETRY_CHANNELS + 1;

pub const TINY_YOLO_V2: &str = "tiny-yolo-v2";

const TINY_YOLO_V2_INPUT: u32 = 416;
const TINY_YOLO_V2_GRID: usize = 13;
const TINY_YOLO_V2_ANCHORS: [(f32, f32); 5] = [
  (1.08, 1.19),
  (3.42, 4.41),
  (6.63, 11.38),
  (9.42, 5.11),
  (16.62, 10.52),
];
const VOC_LABELS: [&str; 20] = [
  "aeroplane",
  "bicycle",
  "bird",
  "boat",
  "bottle",
  "bus",
  "car",
  "cat",
  "chair",
  "cow",
  "diningtable",
  "dog",
  "horse",
  "motorbike",
  "person",
  "pottedplant",
  "sheep",
  "sofa",
  "train",
  "tvmonitor",
];

#[derive(Error, Debug)]
pub enum SpecError {
  #[error("模型输入尺寸无效: {0}")]
  InvalidExtent(Extent),
  #[error("网格尺寸无效: {rows}x{cols}")]
  InvalidGrid { rows: usize, cols: usize },
  #[error("至少需要一个锚框")]
  NoAnchors,
  #[error("第 {index} 个锚框无效: ({width}, {height})")]
  InvalidAnchor { index: usize, width: f32, height: f32 },
  #[error("至少需要一个类别标签")]
  NoLabels,
  #[error("输出张量过大: 网格 {rows}x{cols}, {anchors} 个锚框, {classes} 个类别")]
  TooLarge {
    rows: usize,
    cols: usize,
    anchors: usize,
    classes: usize,
  },
  #[error("未知的模型预设: {0}")]
  UnknownPreset(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型描述解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 检测网络的输出约定
///
/// 张量在逻辑上是 `[row][col][anchor][channel]`，
/// 每个锚框有 `4 + 1 + labels.len()` 个通道。
/// 构造时完成校验，之后不可修改。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionModelSpec {
  input: Extent,
  rows: usize,
  cols: usize,
  anchors: Box<[(f32, f32)]>,
  labels: Box<[String]>,
}

#[derive(Debug, Deserialize)]
struct SpecFile {
  input_height: u32,
  input_width: u32,
  rows: usize,
  cols: usize,
  anchors: Vec<(f32, f32)>,
  labels: Vec<String>,
}

impl DetectionModelSpec {
  pub fn new(
    input: Extent,
    rows: usize,
    cols: usize,
    anchors: Vec<(f32, f32)>,
    labels: Vec<String>,
  ) -> Result<Self, SpecError> {
    if input.width == 0 || input.height == 0 {
      return Err(SpecError::InvalidExtent(input));
    }
    if rows == 0 || cols == 0 {
      return Err(SpecError::InvalidGrid { rows, cols });
    }
    if anchors.is_empty() {
      return Err(SpecError::NoAnchors);
    }
    if let Some((index, &(width, height))) = anchors
      .iter()
      .enumerate()
      .find(|(_, (w, h))| !(w.is_finite() && h.is_finite() && *w > 0.0 && *h > 0.0))
    {
      return Err(SpecError::InvalidAnchor {
        index,
        width,
        height,
      });
    }
    if labels.is_empty() {
      return Err(SpecError::NoLabels);
    }
    let tensor_len = CLASS_CHANNEL_OFFSET
      .checked_add(labels.len())
      .and_then(|channels| channels.checked_mul(anchors.len()))
      .and_then(|n| n.checked_mul(rows))
      .and_then(|n| n.checked_mul(cols));
    if tensor_len.is_none() {
      return Err(SpecError::TooLarge {
        rows,
        cols,
        anchors: anchors.len(),
        classes: labels.len(),
      });
    }

    Ok(Self {
      input,
      rows,
      cols,
      anchors: anchors.into_boxed_slice(),
      labels: labels.into_boxed_slice(),
    })
  }

  /// Tiny YOLOv2 (Pascal VOC)
  pub fn tiny_yolo_v2() -> Self {
    Self {
      input: Extent::new(TINY_YOLO_V2_INPUT, TINY_YOLO_V2_INPUT),
      rows: TINY_YOLO_V2_GRID,
      cols: TINY_YOLO_V2_GRID,
      anchors: TINY_YOLO_V2_ANCHORS.to_vec().into_boxed_slice(),
      labels: VOC_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn from_json_str(text: &str) -> Result<Self, SpecError> {
    let file: SpecFile = serde_json::from_str(text)?;
    Self::new(
      Extent::new(file.input_height, file.input_width),
      file.rows,
      file.cols,
      file.anchors,
      file.labels,
    )
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
    let path = path.as_ref();
    info!("读取模型描述文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let spec = Self::from_json_str(&text)?;
    debug!(
      "模型描述: 输入 {}, 网格 {}x{}, {} 个锚框, {} 个类别",
      spec.input,
      spec.rows,
      spec.cols,
      spec.anchor_count(),
      spec.class_count()
    );
    Ok(spec)
  }

  /// 预设名称或 JSON 文件路径
  pub fn resolve(name_or_path: &str) -> Result<Self, SpecError> {
    match name_or_path {
      TINY_YOLO_V2 => Ok(Self::tiny_yolo_v2()),
      other if other.ends_with(".json") => Self::from_json_file(other),
      other => Err(SpecError::UnknownPreset(other.to_string())),
    }
  }

  pub fn input_extent(&self) -> Extent {
    self.input
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn anchors(&self) -> &[(f32, f32)] {
    &self.anchors
  }

  pub fn anchor_count(&self) -> usize {
    self.anchors.len()
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn class_count(&self) -> usize {
    self.labels.len()
  }

  pub fn label(&self, class_id: usize) -> &str {
    self.labels.get(class_id).map(String::as_str).unwrap_or("unknown")
  }

  pub fn channels_per_anchor(&self) -> usize {
    CLASS_CHANNEL_OFFSET + self.class_count()
  }

  pub fn candidate_count(&self) -> usize {
    self.rows * self.cols * self.anchor_count()
  }

  pub fn tensor_len(&self) -> usize {
    self.candidate_count() * self.channels_per_anchor()
  }

  /// 网格单元在输入像素空间中的 (宽, 高)
  pub fn cell_size(&self) -> (f32, f32) {
    (
      self.input.width as f32 / self.cols as f32,
      self.input.height as f32 / self.rows as f32,
    )
  }
}
