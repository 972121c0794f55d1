// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/recognize/alpr_cloud.rs - OpenALPR 云端识别
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

use std::{io::Cursor, time::Duration};

use base64::{Engine, prelude::BASE64_STANDARD};
use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::{Recognizer, best_plate};
use crate::{FromUrl, FromUrlWithScheme};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum AlprCloudError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("缺少 secret_key 参数")]
  MissingSecretKey,
  #[error("无效的接口地址: {0}")]
  InvalidEndpoint(#[from] url::ParseError),
  #[error("HTTP 错误: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("无法解析接口响应: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// OpenALPR 云端接口
///
/// `openalpr://api.openalpr.com/v3/recognize_bytes?secret_key=KEY&country=us`
/// 会被转换为 HTTPS 请求，图像以 base64 编码的 PNG 作为请求体发送。
pub struct AlprCloud {
  endpoint: Url,
  client: reqwest::blocking::Client,
}

impl FromUrlWithScheme for AlprCloud {
  const SCHEME: &'static str = "openalpr";
}

impl FromUrl for AlprCloud {
  type Error = AlprCloudError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(AlprCloudError::SchemeMismatch(url.scheme().to_string()));
    }
    let endpoint = endpoint(url)?;
    let client = reqwest::blocking::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()?;
    Ok(AlprCloud { endpoint, client })
  }
}

fn endpoint(url: &Url) -> Result<Url, AlprCloudError> {
  if !url.query_pairs().any(|(k, v)| k == "secret_key" && !v.is_empty()) {
    return Err(AlprCloudError::MissingSecretKey);
  }
  let host = url.host_str().unwrap_or("api.openalpr.com");
  let mut endpoint = Url::parse(&format!("https://{}{}", host, url.path()))?;
  {
    let mut query = endpoint.query_pairs_mut();
    query.extend_pairs(url.query_pairs());
    if !url.query_pairs().any(|(k, _)| k == "country") {
      query.append_pair("country", "us");
    }
    query.append_pair("recognize_vehicle", "0");
  }
  Ok(endpoint)
}

impl Recognizer for AlprCloud {
  type Error = AlprCloudError;

  fn recognize(&self, image: &RgbImage) -> Result<Option<String>, Self::Error> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    let body = BASE64_STANDARD.encode(&png);

    debug!("请求 OpenALPR 云端接口: {} 字节", body.len());
    let text = self
      .client
      .post(self.endpoint.clone())
      .body(body)
      .send()?
      .error_for_status()?
      .text()?;

    Ok(best_plate(&text)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn endpoint_is_https_with_defaults() {
    let url =
      Url::parse("openalpr://api.openalpr.com/v3/recognize_bytes?secret_key=sk_123").unwrap();
    let endpoint = endpoint(&url).unwrap();
    assert_eq!(endpoint.scheme(), "https");
    assert_eq!(endpoint.host_str(), Some("api.openalpr.com"));
    assert_eq!(endpoint.path(), "/v3/recognize_bytes");
    let pairs: Vec<(String, String)> = endpoint.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("secret_key".into(), "sk_123".into())));
    assert!(pairs.contains(&("country".into(), "us".into())));
  }

  #[test]
  fn secret_key_is_required() {
    let url = Url::parse("openalpr://api.openalpr.com/v3/recognize_bytes?country=eu").unwrap();
    assert!(matches!(
      AlprCloud::from_url(&url),
      Err(AlprCloudError::MissingSecretKey)
    ));
  }
}
