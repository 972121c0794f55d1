// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/recognize/alpr_command.rs - OpenALPR 命令行识别
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

use std::{path::PathBuf, process::Command};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::{Recognizer, best_plate};
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

const DEFAULT_PROGRAM: &str = "/usr/bin/alpr";
const DEFAULT_COUNTRY: &str = "us";
const DEFAULT_TOP_N: u32 = 10;

#[derive(Error, Debug)]
pub enum AlprCommandError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的参数 {key}: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("alpr 退出状态 {status}: {stderr}")]
  Failed { status: i32, stderr: String },
  #[error("无法解析 alpr 输出: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 调用本地 `alpr` 程序识别车牌
///
/// `alpr:///usr/bin/alpr?country=us&top_n=10`
#[derive(Debug, Clone)]
pub struct AlprCommand {
  program: PathBuf,
  country: String,
  top_n: u32,
}

impl FromUrlWithScheme for AlprCommand {
  const SCHEME: &'static str = "alpr";
}

impl FromUrl for AlprCommand {
  type Error = AlprCommandError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(AlprCommandError::SchemeMismatch(url.scheme().to_string()));
    }

    let program = match url.path() {
      "" | "/" => PathBuf::from(DEFAULT_PROGRAM),
      _ => url_file_path(url),
    };

    let mut country = DEFAULT_COUNTRY.to_string();
    let mut top_n = DEFAULT_TOP_N;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "country" => country = value.to_string(),
        "top_n" => {
          top_n = value
            .parse()
            .map_err(|_| AlprCommandError::InvalidParameter {
              key: key.to_string(),
              value: value.to_string(),
            })?
        }
        _ => warn!("忽略未知参数: {}", key),
      }
    }

    if !program.exists() {
      warn!("找不到 alpr 程序: {}", program.display());
    }

    Ok(AlprCommand {
      program,
      country,
      top_n,
    })
  }
}

impl AlprCommand {
  fn command(&self, image: &std::path::Path) -> Command {
    let mut command = Command::new(&self.program);
    command
      .arg("-c")
      .arg(&self.country)
      .arg("-n")
      .arg(self.top_n.to_string())
      .arg("-j")
      .arg(image);
    command
  }
}

impl Recognizer for AlprCommand {
  type Error = AlprCommandError;

  fn recognize(&self, image: &RgbImage) -> Result<Option<String>, Self::Error> {
    let file = tempfile::Builder::new()
      .prefix("chepai-")
      .suffix(".png")
      .tempfile()?;
    image.save(file.path())?;

    debug!("调用 alpr: {}", file.path().display());
    let output = self.command(file.path()).output()?;
    if !output.status.success() {
      return Err(AlprCommandError::Failed {
        status: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    Ok(best_plate(&String::from_utf8_lossy(&output.stdout))?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_query_parameters() {
    let url = Url::parse("alpr:///opt/alpr/bin/alpr?country=eu&top_n=3").unwrap();
    let alpr = AlprCommand::from_url(&url).unwrap();
    assert_eq!(alpr.program, PathBuf::from("/opt/alpr/bin/alpr"));
    assert_eq!(alpr.country, "eu");
    assert_eq!(alpr.top_n, 3);

    let args: Vec<_> = alpr
      .command(std::path::Path::new("/tmp/p.png"))
      .get_args()
      .map(|a| a.to_string_lossy().into_owned())
      .collect();
    assert_eq!(args, vec!["-c", "eu", "-n", "3", "-j", "/tmp/p.png"]);
  }

  #[test]
  fn defaults_when_path_is_empty() {
    let alpr = AlprCommand::from_url(&Url::parse("alpr:///").unwrap()).unwrap();
    assert_eq!(alpr.program, PathBuf::from(DEFAULT_PROGRAM));
    assert_eq!(alpr.country, "us");
    assert_eq!(alpr.top_n, 10);
  }

  #[test]
  fn rejects_bad_top_n() {
    let url = Url::parse("alpr:///usr/bin/alpr?top_n=many").unwrap();
    assert!(matches!(
      AlprCommand::from_url(&url),
      Err(AlprCommandError::InvalidParameter { .. })
    ));
  }

  #[test]
  fn missing_program_is_an_error_not_a_panic() {
    let url = Url::parse("alpr:///nonexistent/chepai-alpr").unwrap();
    let alpr = AlprCommand::from_url(&url).unwrap();
    assert!(matches!(
      alpr.recognize(&RgbImage::new(4, 4)),
      Err(AlprCommandError::IoError(_))
    ));
  }
}
