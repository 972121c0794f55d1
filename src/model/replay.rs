// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/model/replay.rs - 张量回放模型
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tracing::{debug, info};

use super::{DetectionModelSpec, Model};
use crate::frame::Frame;

#[derive(Error, Debug)]
pub enum TensorReplayError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有张量文件: {0}")]
  EmptyDirectory(PathBuf),
  #[error("张量文件长度 {len} 不是 4 的倍数: {path}")]
  Misaligned { path: PathBuf, len: usize },
}

/// 从磁盘回放预先计算好的小端 `f32` 张量
///
/// 路径是文件时每一帧都使用同一个张量；
/// 路径是目录时按文件名顺序每帧取一个，帧数多于文件数时循环。
pub struct TensorReplayModel {
  spec: DetectionModelSpec,
  files: Box<[PathBuf]>,
  cursor: AtomicUsize,
}

impl TensorReplayModel {
  pub const SCHEME: &'static str = "tensor";

  pub fn open(path: impl AsRef<Path>, spec: DetectionModelSpec) -> Result<Self, TensorReplayError> {
    let path = path.as_ref();
    let files = if path.is_dir() {
      let mut files = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
      files.sort();
      if files.is_empty() {
        return Err(TensorReplayError::EmptyDirectory(path.to_path_buf()));
      }
      files
    } else {
      // 提前暴露路径错误
      std::fs::metadata(path)?;
      vec![path.to_path_buf()]
    };

    info!("张量回放: {} 个文件", files.len());
    Ok(Self {
      spec,
      files: files.into_boxed_slice(),
      cursor: AtomicUsize::new(0),
    })
  }
}

pub fn read_tensor(path: &Path) -> Result<Box<[f32]>, TensorReplayError> {
  let bytes = std::fs::read(path)?;
  if bytes.len() % 4 != 0 {
    return Err(TensorReplayError::Misaligned {
      path: path.to_path_buf(),
      len: bytes.len(),
    });
  }
  Ok(
    bytes
      .chunks_exact(4)
      .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
      .collect(),
  )
}

pub fn write_tensor(path: &Path, tensor: &[f32]) -> Result<(), TensorReplayError> {
  let bytes: Vec<u8> = tensor.iter().flat_map(|v| v.to_le_bytes()).collect();
  std::fs::write(path, bytes)?;
  Ok(())
}

impl Model for TensorReplayModel {
  type Input = Frame;
  type Error = TensorReplayError;

  fn spec(&self) -> &DetectionModelSpec {
    &self.spec
  }

  fn forward(&self, input: &Frame) -> Result<Box<[f32]>, Self::Error> {
    let n = self.cursor.fetch_add(1, Ordering::Relaxed);
    let path = &self.files[n % self.files.len()];
    debug!("帧 {} 使用张量文件 {}", input.index, path.display());
    read_tensor(path)
  }
}
