// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/output/draw.rs - 叠加层绘制与记录
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  geometry::{Extent, PixelRect},
  overlay::{Canvas, Overlay},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
const BORDER_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 把画布上的叠加层画到图像上
///
/// 没有字体时只画边框和背景块。
#[derive(Default)]
pub struct Draw {
  font: Option<FontVec>,
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let font = FontVec::try_from_vec(std::fs::read(path)?)?;
    info!("加载字体: {}", path.display());
    Ok(Self { font: Some(font) })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 把帧缩放到画布尺寸后绘制所有叠加层
  pub fn draw_canvas(&self, image: &RgbImage, canvas: &Canvas) -> RgbImage {
    let mut image = fit_to_canvas(image, canvas.extent());
    for overlay in canvas.overlays() {
      self.draw_overlay(&mut image, overlay);
    }
    image
  }

  fn draw_overlay(&self, image: &mut RgbImage, overlay: &Overlay) {
    let color = Rgb(overlay.color);

    // 边框向内加粗
    let mut border = overlay.rectangle();
    for _ in 0..BORDER_THICKNESS {
      if let Some(rect) = to_rect(border) {
        draw_hollow_rect_mut(image, rect, color);
      }
      border = shrink(border);
    }

    if let Some(rect) = to_rect(overlay.background) {
      draw_filled_rect_mut(image, rect, color);
    }

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(LABEL_TEXT_COLOR),
        overlay.label.rect.x as i32,
        overlay.label.rect.y as i32,
        PxScale::from(LABEL_FONT_SIZE),
        font,
        &overlay.label.text,
      );
    }
  }
}

pub(crate) fn fit_to_canvas(image: &RgbImage, extent: Extent) -> RgbImage {
  if Extent::of_image(image) == extent {
    image.clone()
  } else {
    image::imageops::resize(image, extent.width, extent.height, FilterType::Triangle)
  }
}

fn to_rect(rect: PixelRect) -> Option<Rect> {
  if rect.is_empty() {
    None
  } else {
    Some(Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height))
  }
}

fn shrink(rect: PixelRect) -> PixelRect {
  PixelRect::new(
    rect.x + 1,
    rect.y + 1,
    rect.width.saturating_sub(2),
    rect.height.saturating_sub(2),
  )
}

/// 画布尺寸，来自输出 URI 的 `width`/`height` 参数
///
/// 只给出一边时另一边按帧的宽高比缩放，都不给时与帧一致。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanvasSize {
  width: Option<u32>,
  height: Option<u32>,
}

impl CanvasSize {
  pub fn from_query(url: &Url) -> Result<Self, String> {
    let mut size = CanvasSize::default();
    for (key, value) in url.query_pairs() {
      let slot = match key.as_ref() {
        "width" => &mut size.width,
        "height" => &mut size.height,
        _ => continue,
      };
      match value.parse::<u32>() {
        Ok(v) if v > 0 => *slot = Some(v),
        _ => return Err(format!("{}={}", key, value)),
      }
    }
    Ok(size)
  }

  pub fn resolve(&self, frame: Extent) -> Extent {
    let scaled = |v: u32, num: u32, den: u32| {
      if den == 0 {
        v
      } else {
        ((v as u64 * num as u64) / den as u64).max(1) as u32
      }
    };
    match (self.width, self.height) {
      (Some(width), Some(height)) => Extent::new(height, width),
      (Some(width), None) => Extent::new(scaled(frame.height, width, frame.width), width),
      (None, Some(height)) => Extent::new(height, scaled(frame.width, height, frame.height)),
      (None, None) => frame,
    }
  }
}

/// 文本记录：每个叠加层一行 `label, confidence, x, y, w, h, text`
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines(&self, canvas: &Canvas) -> Vec<String> {
    canvas
      .overlays()
      .iter()
      .map(|overlay| {
        let name = if self.label_with_name {
          overlay.class_name.clone()
        } else {
          overlay.class_id.to_string()
        };
        let rect = overlay.rectangle();
        format!(
          "{}, {:.4}, {}, {}, {}, {}, {}",
          name,
          overlay.confidence,
          rect.x,
          rect.y,
          rect.width,
          rect.height,
          overlay.mapped.text().unwrap_or_default()
        )
      })
      .collect()
  }

  pub fn record(&self, canvas: &Canvas, path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.lines(canvas).join("\n"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectResult, Detection};

  fn canvas(text: Option<&str>) -> Canvas {
    let detections = DetectResult::new(vec![Detection {
      x: 10.0,
      y: 20.0,
      width: 30.0,
      height: 40.0,
      class_id: 6,
      label: "car".to_string(),
      confidence: 0.75,
    }]);
    let extent = Extent::new(100, 100);
    let mut canvas = Canvas::new(extent);
    canvas.rebuild(extent, extent, &detections, &[text.map(String::from)]);
    canvas
  }

  #[test]
  fn draws_border_and_background_without_font() {
    let canvas = canvas(None);
    let image = RgbImage::new(100, 100);
    let drawn = Draw::default().draw_canvas(&image, &canvas);
    let color = Rgb(canvas.overlays()[0].color);

    // 左边框
    assert_eq!(*drawn.get_pixel(10, 50), color);
    assert_eq!(*drawn.get_pixel(11, 50), color);
    // 背景块覆盖框的左上角
    assert_eq!(*drawn.get_pixel(20, 25), color);
    // 框内部不受影响
    assert_eq!(*drawn.get_pixel(25, 55), Rgb([0, 0, 0]));
  }

  #[test]
  fn resizes_to_canvas_extent() {
    let canvas = Canvas::new(Extent::new(50, 80));
    let drawn = Draw::default().draw_canvas(&RgbImage::new(160, 100), &canvas);
    assert_eq!(drawn.dimensions(), (80, 50));
  }

  #[test]
  fn canvas_size_from_query() {
    let frame = Extent::new(480, 640);
    let size = |q: &str| CanvasSize::from_query(&Url::parse(&format!("image:///o.png{}", q)).unwrap());

    assert_eq!(size("").unwrap().resolve(frame), frame);
    assert_eq!(
      size("?width=320&height=200").unwrap().resolve(frame),
      Extent::new(200, 320)
    );
    assert_eq!(size("?width=320").unwrap().resolve(frame), Extent::new(240, 320));
    assert_eq!(size("?height=960").unwrap().resolve(frame), Extent::new(960, 1280));
    assert!(size("?width=0").is_err());
    assert!(size("?height=tall").is_err());
  }

  #[test]
  fn record_lines() {
    let with_name = Record {
      label_with_name: true,
    };
    assert_eq!(
      with_name.lines(&canvas(Some("ABC123"))),
      vec!["car, 0.7500, 10, 20, 30, 40, ABC123"]
    );
    let with_id = Record {
      label_with_name: false,
    };
    assert_eq!(with_id.lines(&canvas(None)), vec!["6, 0.7500, 10, 20, 30, 40, "]);
  }
}
