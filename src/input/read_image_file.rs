// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

pub(crate) fn load_rgb(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  Ok(image.into_rgb8())
}

/// 单张图片，只产生一帧
pub struct ImageFileInput {
  frame: Option<Frame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url_file_path(url);
    let image = load_rgb(&path)?;
    info!(
      "读取图像 {}: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    Ok(ImageFileInput {
      frame: Some(Frame::new(image, 0, name)),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_exactly_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("car.png");
    RgbImage::new(6, 3).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    let frame = input.next().unwrap();
    assert_eq!(frame.image.dimensions(), (6, 3));
    assert_eq!(frame.name, "car.png");
    assert!(input.next().is_none());
  }

  #[test]
  fn missing_file_is_an_error() {
    let url = Url::parse("image:///nonexistent/chepai.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
