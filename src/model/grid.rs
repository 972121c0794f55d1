// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/model/grid.rs - 锚框网格解码
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

use thiserror::Error;
use tracing::{debug, error};

use super::spec::{CLASS_CHANNEL_OFFSET, DetectionModelSpec, OBJECTNESS_CHANNEL};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  TensorLength { expected: usize, actual: usize },
}

/// 单个 (行, 列, 锚框) 的候选框，坐标为输入像素空间的中心点与宽高
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
  pub row: usize,
  pub col: usize,
  pub anchor: usize,
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
  pub objectness: f32,
  pub class_scores: Box<[f32]>,
}

/// 按 `[row][col][anchor][channel]` 顺序解码整个张量
///
/// 不做任何阈值过滤，输出数量恒为 `rows * cols * anchors`，
/// 顺序与张量中的存储顺序一致。
pub fn decode(tensor: &[f32], spec: &DetectionModelSpec) -> Result<Vec<RawCandidate>, DecodeError> {
  let expected = spec.tensor_len();
  if tensor.len() != expected {
    error!(
      "张量长度与模型描述不符: 期望 {}, 实际 {}",
      expected,
      tensor.len()
    );
    return Err(DecodeError::TensorLength {
      expected,
      actual: tensor.len(),
    });
  }

  let channels = spec.channels_per_anchor();
  let (cell_w, cell_h) = spec.cell_size();
  let mut candidates = Vec::with_capacity(spec.candidate_count());

  // chunks_exact 的顺序即 row -> col -> anchor
  for (index, slice) in tensor.chunks_exact(channels).enumerate() {
    let anchor = index % spec.anchor_count();
    let cell = index / spec.anchor_count();
    let (row, col) = (cell / spec.cols(), cell % spec.cols());
    let (anchor_w, anchor_h) = spec.anchors()[anchor];

    candidates.push(RawCandidate {
      row,
      col,
      anchor,
      center_x: (col as f32 + sigmoid(slice[0])) * cell_w,
      center_y: (row as f32 + sigmoid(slice[1])) * cell_h,
      width: slice[2].exp() * anchor_w * cell_w,
      height: slice[3].exp() * anchor_h * cell_h,
      objectness: sigmoid(slice[OBJECTNESS_CHANNEL]),
      class_scores: slice[CLASS_CHANNEL_OFFSET..].into(),
    });
  }

  debug!("解码得到 {} 个候选框", candidates.len());
  Ok(candidates)
}

/// 把 `[anchor * channel][row][col]` 排列（NCHW 输出常见的形式）转换为解码所需的
/// `[row][col][anchor][channel]` 排列
pub fn from_channel_major(tensor: &[f32], spec: &DetectionModelSpec) -> Result<Vec<f32>, DecodeError> {
  let expected = spec.tensor_len();
  if tensor.len() != expected {
    return Err(DecodeError::TensorLength {
      expected,
      actual: tensor.len(),
    });
  }

  let plane = spec.rows() * spec.cols();
  let depth = spec.anchor_count() * spec.channels_per_anchor();
  let mut out = vec![0f32; expected];
  for (channel, values) in tensor.chunks_exact(plane).enumerate() {
    for (cell, &value) in values.iter().enumerate() {
      out[cell * depth + channel] = value;
    }
  }
  Ok(out)
}

pub(crate) fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
