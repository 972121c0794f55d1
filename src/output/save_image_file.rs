// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  geometry::Extent,
  output::{
    Render,
    draw::{CanvasSize, Draw},
  },
  overlay::Canvas,
  url_file_path,
};

/// 绘制叠加层后保存为一张图片，每帧覆盖同一个文件
///
/// `image:///out.png?width=W&height=H`
pub struct SaveImageFileOutput {
  path: PathBuf,
  size: CanvasSize,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的画布尺寸: {0}")]
  InvalidSize(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: url_file_path(uri),
      size: CanvasSize::from_query(uri).map_err(SaveImageFileError::InvalidSize)?,
      draw: Draw::default(),
    })
  }
}

impl SaveImageFileOutput {
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn save_image(&self, image: RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn canvas_extent(&self, frame: Extent) -> Extent {
    self.size.resolve(frame)
  }

  fn render_result(&self, frame: &Frame, canvas: &Canvas) -> Result<(), Self::Error> {
    let image = self.draw.draw_canvas(&frame.image, canvas);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn saves_canvas_sized_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let url = Url::parse(&format!("image://{}?width=40&height=30", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let frame = Frame::new(RgbImage::new(80, 60), 0, "f");
    let extent = output.canvas_extent(frame.extent());
    assert_eq!(extent, Extent::new(30, 40));

    output.render_result(&frame, &Canvas::new(extent)).unwrap();
    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (40, 30));
  }

  #[test]
  fn saves_to_decoded_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plate out.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let frame = Frame::new(RgbImage::new(4, 4), 0, "f");
    output
      .render_result(&frame, &Canvas::new(frame.extent()))
      .unwrap();
    assert!(path.is_file());
  }

  #[test]
  fn rejects_other_schemes_and_bad_sizes() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
    let url = Url::parse("image:///tmp/out.png?width=-1").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::InvalidSize(_))
    ));
  }
}
