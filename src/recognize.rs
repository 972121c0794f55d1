// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/recognize.rs - 车牌文本识别
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

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod alpr_command;
pub use self::alpr_command::{AlprCommand, AlprCommandError};

#[cfg(feature = "alpr_cloud")]
mod alpr_cloud;
#[cfg(feature = "alpr_cloud")]
pub use self::alpr_cloud::{AlprCloud, AlprCloudError};

/// 对裁剪出的区域做文本识别
///
/// `Ok(None)` 表示没有识别出文本。
pub trait Recognizer {
  type Error;
  fn recognize(&self, image: &RgbImage) -> Result<Option<String>, Self::Error>;
}

/// 识别失败时记录日志并视为没有文本
pub fn recognize_or_none<R>(recognizer: &R, image: &RgbImage) -> Option<String>
where
  R: Recognizer,
  R::Error: std::fmt::Display,
{
  if image.width() == 0 || image.height() == 0 {
    return None;
  }
  match recognizer.recognize(image) {
    Ok(text) => text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
    Err(e) => {
      warn!("文本识别失败: {}", e);
      None
    }
  }
}

/// 不做识别
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecognizer;

impl FromUrlWithScheme for NoRecognizer {
  const SCHEME: &'static str = "none";
}

impl FromUrl for NoRecognizer {
  type Error = RecognizeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecognizeError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(NoRecognizer)
  }
}

impl Recognizer for NoRecognizer {
  type Error = std::convert::Infallible;

  fn recognize(&self, _image: &RgbImage) -> Result<Option<String>, Self::Error> {
    Ok(None)
  }
}

// OpenALPR 命令行与云端接口共用的 JSON 结果
#[derive(Debug, Deserialize)]
struct AlprResponse {
  #[serde(default)]
  results: Vec<AlprPlate>,
}

#[derive(Debug, Deserialize)]
struct AlprPlate {
  plate: String,
  #[serde(default)]
  confidence: f32,
}

/// 取第一个结果的最佳车牌
pub(crate) fn best_plate(json: &str) -> Result<Option<String>, serde_json::Error> {
  let response: AlprResponse = serde_json::from_str(json)?;
  let best = response.results.into_iter().next();
  if let Some(plate) = &best {
    debug!("识别结果: {} ({:.1})", plate.plate, plate.confidence);
  }
  Ok(best.map(|p| p.plate))
}

#[derive(Error, Debug)]
pub enum RecognizeError {
  #[error("OpenALPR 命令行错误: {0}")]
  AlprCommand(#[from] AlprCommandError),
  #[cfg(feature = "alpr_cloud")]
  #[error("OpenALPR 云端接口错误: {0}")]
  AlprCloud(#[from] AlprCloudError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum RecognizerWrapper {
  None(NoRecognizer),
  AlprCommand(AlprCommand),
  #[cfg(feature = "alpr_cloud")]
  AlprCloud(AlprCloud),
}

impl FromUrl for RecognizerWrapper {
  type Error = RecognizeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      NoRecognizer::SCHEME => Ok(RecognizerWrapper::None(NoRecognizer::from_url(url)?)),
      AlprCommand::SCHEME => Ok(RecognizerWrapper::AlprCommand(AlprCommand::from_url(url)?)),
      #[cfg(feature = "alpr_cloud")]
      AlprCloud::SCHEME => Ok(RecognizerWrapper::AlprCloud(AlprCloud::from_url(url)?)),
      other => Err(RecognizeError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Recognizer for RecognizerWrapper {
  type Error = RecognizeError;

  fn recognize(&self, image: &RgbImage) -> Result<Option<String>, Self::Error> {
    match self {
      RecognizerWrapper::None(r) => match r.recognize(image) {
        Ok(text) => Ok(text),
        Err(never) => match never {},
      },
      RecognizerWrapper::AlprCommand(r) => r.recognize(image).map_err(RecognizeError::from),
      #[cfg(feature = "alpr_cloud")]
      RecognizerWrapper::AlprCloud(r) => r.recognize(image).map_err(RecognizeError::from),
    }
  }
}
