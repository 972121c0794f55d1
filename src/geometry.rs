// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/geometry.rs - 坐标空间与坐标映射
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

use serde::Serialize;

use crate::model::Detection;

/// 图像/画布尺寸，顺序为 (高, 宽)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Extent {
  pub height: u32,
  pub width: u32,
}

impl Extent {
  pub const fn new(height: u32, width: u32) -> Self {
    Self { height, width }
  }

  pub fn of_image(image: &image::RgbImage) -> Self {
    Self::new(image.height(), image.width())
  }
}

impl std::fmt::Display for Extent {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

/// 整数像素矩形，左上角为原点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PixelRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl PixelRect {
  pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn right(&self) -> u32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> u32 {
    self.y + self.height
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  /// 两个矩形是否有正面积的重叠，仅共享边不算相交
  pub fn intersects(&self, other: &PixelRect) -> bool {
    other.x < self.right()
      && self.x < other.right()
      && other.y < self.bottom()
      && self.y < other.bottom()
  }
}

/// 把网络输入空间中的检测框映射到目标空间
///
/// 宽度相关的量按宽度比例缩放，高度相关的量按高度比例缩放。
/// 缩放后左上角被限制在 `[0, to)` 内，宽高被限制为不越过目标边界。
/// 全程使用浮点数，只在最后一步截断为整数像素。
pub fn map(detection: &Detection, from: Extent, to: Extent) -> PixelRect {
  let to_w = to.width as f32;
  let to_h = to.height as f32;

  let x = scale(detection.x, to.width, from.width).clamp(0.0, (to_w - 1.0).max(0.0));
  let y = scale(detection.y, to.height, from.height).clamp(0.0, (to_h - 1.0).max(0.0));
  let width = scale(detection.width, to.width, from.width).clamp(0.0, (to_w - x).max(0.0));
  let height = scale(detection.height, to.height, from.height).clamp(0.0, (to_h - y).max(0.0));

  PixelRect {
    x: x as u32,
    y: y as u32,
    width: width as u32,
    height: height as u32,
  }
}

// 先乘后除，整数坐标在同比例缩放时不会引入舍入误差
fn scale(v: f32, to: u32, from: u32) -> f32 {
  if from == 0 {
    return 0.0;
  }
  let scaled = v * to as f32 / from as f32;
  if scaled.is_finite() { scaled } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(x: f32, y: f32, width: f32, height: f32) -> Detection {
    Detection {
      x,
      y,
      width,
      height,
      class_id: 0,
      label: "car".to_string(),
      confidence: 0.9,
    }
  }

  const NET: Extent = Extent::new(416, 416);

  #[test]
  fn identity_mapping_truncates_only() {
    let d = det(10.7, 20.2, 100.9, 50.5);
    let r = map(&d, NET, NET);
    assert_eq!(r, PixelRect::new(10, 20, 100, 50));
  }

  #[test]
  fn doubling_target_doubles_output() {
    let d = det(10.0, 20.0, 30.0, 40.0);
    let single = map(&d, NET, Extent::new(416, 416));
    let double = map(&d, NET, Extent::new(832, 832));
    assert_eq!(double.x, single.x * 2);
    assert_eq!(double.y, single.y * 2);
    assert_eq!(double.width, single.width * 2);
    assert_eq!(double.height, single.height * 2);
  }

  #[test]
  fn axes_scale_independently() {
    let d = det(208.0, 104.0, 104.0, 52.0);
    let r = map(&d, NET, Extent::new(480, 640));
    assert_eq!(r, PixelRect::new(320, 120, 160, 60));
  }

  #[test]
  fn output_stays_inside_target() {
    let to = Extent::new(300, 400);
    for d in [
      det(400.0, 400.0, 100.0, 100.0),
      det(0.0, 0.0, 1000.0, 1000.0),
      det(-20.0, -5.0, 50.0, 50.0),
      det(415.9, 0.0, 0.0, 0.0),
    ] {
      let r = map(&d, NET, to);
      assert!(r.x < to.width);
      assert!(r.y < to.height);
      assert!(r.right() <= to.width, "{:?}", r);
      assert!(r.bottom() <= to.height, "{:?}", r);
    }
  }

  #[test]
  fn degenerate_input_is_clamped() {
    let r = map(&det(f32::NAN, 5.0, f32::INFINITY, -3.0), NET, NET);
    assert_eq!(r.x, 0);
    assert_eq!(r.width, 0);
    assert_eq!(r.height, 0);

    let r = map(&det(5.0, 5.0, 5.0, 5.0), NET, Extent::new(0, 0));
    assert!(r.is_empty());
  }

  #[test]
  fn intersection_requires_positive_area() {
    let a = PixelRect::new(0, 0, 10, 10);
    assert!(a.intersects(&PixelRect::new(5, 5, 10, 10)));
    assert!(!a.intersects(&PixelRect::new(10, 0, 10, 10)));
    assert!(!a.intersects(&PixelRect::new(3, 3, 0, 4)));
  }
}
