// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理
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

use std::{path::Path, sync::Mutex};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Value,
};
use thiserror::Error;
use tracing::{debug, info};

use super::{DetectionModelSpec, Model, grid};
use crate::frame::Frame;

const INTRA_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("推理会话锁已失效")]
  Poisoned,
  #[error("输出形状 {shape:?} 与模型描述不符")]
  OutputShape { shape: Vec<usize> },
}

fn runtime_error(e: impl std::fmt::Display) -> OnnxModelError {
  OnnxModelError::Runtime(e.to_string())
}

/// 基于 ONNX Runtime 的检测网络
///
/// 输入为 NCHW、0-255 的 `f32`，输出按通道优先排列，
/// 前向计算结束后转换为网格优先的排列。
pub struct OnnxModel {
  spec: DetectionModelSpec,
  session: Mutex<Session>,
}

impl OnnxModel {
  pub const SCHEME: &'static str = "onnx";

  pub fn open(path: impl AsRef<Path>, spec: DetectionModelSpec) -> Result<Self, OnnxModelError> {
    let path = path.as_ref();
    info!("创建 ONNX 推理会话: {}", path.display());
    let session = Session::builder()
      .map_err(runtime_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(runtime_error)?
      .with_intra_threads(INTRA_THREADS)
      .map_err(runtime_error)?
      .commit_from_file(path)
      .map_err(runtime_error)?;
    info!("模型加载完成");

    Ok(Self {
      spec,
      session: Mutex::new(session),
    })
  }
}

impl Model for OnnxModel {
  type Input = Frame;
  type Error = OnnxModelError;

  fn spec(&self) -> &DetectionModelSpec {
    &self.spec
  }

  fn forward(&self, input: &Frame) -> Result<Box<[f32]>, Self::Error> {
    let extent = self.spec.input_extent();
    let shape = vec![1i64, 3, extent.height as i64, extent.width as i64];
    let tensor = Value::from_array((shape, input.to_nchw_f32(extent))).map_err(runtime_error)?;

    let mut session = self.session.lock().map_err(|_| OnnxModelError::Poisoned)?;
    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![tensor]).map_err(runtime_error)?;
    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(runtime_error)?;
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    debug!("模型输出形状: {:?}", dims);

    let depth = self.spec.anchor_count() * self.spec.channels_per_anchor();
    match dims.as_slice() {
      [1, c, r, w] if *c == depth && *r == self.spec.rows() && *w == self.spec.cols() => {
        grid::from_channel_major(data, &self.spec)
          .map(Vec::into_boxed_slice)
          .map_err(|_| OnnxModelError::OutputShape { shape: dims.clone() })
      }
      [1, r, w, c] if *c == depth && *r == self.spec.rows() && *w == self.spec.cols() => {
        Ok(data.into())
      }
      _ => Err(OnnxModelError::OutputShape {
        shape: dims.clone(),
      }),
    }
  }
}
