// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/input/image_folder.rs - 图像目录输入
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

use std::{collections::VecDeque, path::PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::read_image_file::load_rgb;
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ImageFolderInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 目录中的所有图片，按文件名排序，每次 `next` 时才解码
///
/// 无法解码的文件会被跳过，帧序号只计入成功解码的图片。
pub struct ImageFolderInput {
  pending: VecDeque<PathBuf>,
  index: usize,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = ImageFolderInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageFolderInputError::SchemeMismatch(
        url.scheme().to_string(),
      ));
    }

    let directory = url_file_path(url);
    let mut files: Vec<PathBuf> = std::fs::read_dir(&directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image(path))
      .collect();
    files.sort();
    info!("图像目录 {}: {} 个文件", directory.display(), files.len());

    Ok(ImageFolderInput {
      pending: files.into(),
      index: 0,
    })
  }
}

fn is_image(path: &std::path::Path) -> bool {
  path
    .extension()
    .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl Iterator for ImageFolderInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match load_rgb(&path) {
        Ok(image) => {
          let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
          let frame = Frame::new(image, self.index, name);
          self.index += 1;
          return Some(frame);
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
