// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use url::Url;

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrlWithScheme;
use crate::{FromUrl, frame::Frame, geometry::Extent, overlay::Canvas};

/// 显示表面：决定画布尺寸，并把一帧和它的叠加层呈现出去
pub trait Render {
  type Error;

  /// 给定帧尺寸时的画布尺寸
  fn canvas_extent(&self, frame: Extent) -> Extent {
    frame
  }

  fn render_result(&self, frame: &Frame, canvas: &Canvas) -> Result<(), Self::Error>;
}

pub mod draw;
use self::draw::Draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl OutputWrapper {
  /// 替换绘制器，例如加载了字体之后
  pub fn with_draw(self, draw: Draw) -> Self {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => {
        OutputWrapper::SaveImageFileOutput(output.with_draw(draw))
      }
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        OutputWrapper::DirectoryRecordOutput(output.with_draw(draw))
      }
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn canvas_extent(&self, frame: Extent) -> Extent {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.canvas_extent(frame),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.canvas_extent(frame),
    }
  }

  fn render_result(&self, frame: &Frame, canvas: &Canvas) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, canvas)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, canvas)
        .map_err(OutputError::from),
    }
  }
}
