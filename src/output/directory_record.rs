// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  geometry::Extent,
  output::{
    Render,
    draw::{CanvasSize, Draw, Record, fit_to_canvas},
  },
  overlay::Canvas,
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的画布尺寸: {0}")]
  InvalidSize(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &Frame,
    canvas: &Canvas,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_canvas(&frame.image, canvas).save(path)?;
      }
      DrawWrapper::Record(record) => {
        fit_to_canvas(&frame.image, canvas.extent()).save(path)?;
        record.record(canvas, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: Option<&str>) -> Self {
    match kind {
      Some("id") => DrawWrapper::Record(Record {
        label_with_name: false,
      }),
      Some(_) => DrawWrapper::Record(Record {
        label_with_name: true,
      }),
      None => DrawWrapper::Draw(Box::default()),
    }
  }
}

/// 每帧保存到 `目录/年/月/日/` 下的一个文件
///
/// `folder:///dir?record=name|id&always&width=W&height=H`。
/// 没有叠加层的帧默认不保存，除非指定了 `always`。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  size: CanvasSize,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch(
        uri.scheme().to_string(),
      ));
    }

    let kind = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned());
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: url_file_path(uri),
      draw: DrawWrapper::with(kind.as_deref()),
      size: CanvasSize::from_query(uri).map_err(DirectoryRecordOutputError::InvalidSize)?,
      frame_counter: AtomicU32::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  /// 录制模式下保存的是未绘制的帧，字体不起作用
  pub fn with_draw(mut self, draw: Draw) -> Self {
    if let DrawWrapper::Draw(_) = self.draw {
      self.draw = DrawWrapper::Draw(Box::new(draw));
    }
    self
  }

  fn frame_id(&self) -> u32 {
    (self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1) & 0xFFFF
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn canvas_extent(&self, frame: Extent) -> Extent {
    self.size.resolve(frame)
  }

  fn render_result(&self, frame: &Frame, canvas: &Canvas) -> Result<(), Self::Error> {
    if !self.always && canvas.is_empty() {
      debug!("帧 {} 没有叠加层，跳过", frame.index);
      return Ok(());
    }
    let path = self.frame_path(Utc::now())?;
    debug!("保存帧 {} 到 {}", frame.index, path.display());
    self.draw.save_result(&path, frame, canvas)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::model::{DetectResult, Detection};

  fn files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
      for entry in std::fs::read_dir(&d).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found.sort();
    found
  }

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = url::Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn busy_canvas() -> Canvas {
    let detections = DetectResult::new(vec![Detection {
      x: 1.0,
      y: 1.0,
      width: 4.0,
      height: 4.0,
      class_id: 0,
      label: "plate".to_string(),
      confidence: 0.5,
    }]);
    let extent = Extent::new(8, 8);
    let mut canvas = Canvas::new(extent);
    canvas.rebuild(extent, extent, &detections, &[]);
    canvas
  }

  #[test]
  fn empty_frames_are_skipped_unless_always() {
    let frame = Frame::new(RgbImage::new(8, 8), 0, "f");
    let empty = Canvas::new(Extent::new(8, 8));

    let dir = tempfile::tempdir().unwrap();
    output(dir.path(), "").render_result(&frame, &empty).unwrap();
    assert!(files(dir.path()).is_empty());

    output(dir.path(), "?always").render_result(&frame, &empty).unwrap();
    assert_eq!(files(dir.path()).len(), 1);
  }

  #[test]
  fn record_mode_writes_image_and_text() {
    let dir = tempfile::tempdir().unwrap();
    let frame = Frame::new(RgbImage::new(8, 8), 0, "f");
    output(dir.path(), "?record=name")
      .render_result(&frame, &busy_canvas())
      .unwrap();

    let found = files(dir.path());
    assert_eq!(found.len(), 2);
    let txt = found
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "txt"))
      .unwrap();
    assert_eq!(
      std::fs::read_to_string(txt).unwrap(),
      "plate, 0.5000, 1, 1, 4, 4, "
    );
    // 年/月/日 三层目录
    let relative = txt.strip_prefix(dir.path()).unwrap();
    assert_eq!(relative.components().count(), 4);
  }

  #[test]
  fn record_kind_selection() {
    assert!(matches!(
      DrawWrapper::with(Some("id")),
      DrawWrapper::Record(Record {
        label_with_name: false
      })
    ));
    assert!(matches!(
      DrawWrapper::with(Some("name")),
      DrawWrapper::Record(Record {
        label_with_name: true
      })
    ));
    assert!(matches!(DrawWrapper::with(None), DrawWrapper::Draw(_)));
  }
}
