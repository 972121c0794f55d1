// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/overlay.rs - 叠加层与重叠处理
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

use tracing::debug;

use crate::{
  geometry::{self, Extent, PixelRect},
  model::{DetectResult, DetectionRef},
};

// 标签背景与文字块的尺寸
const BACKGROUND_WIDTH: u32 = 134;
const BACKGROUND_HEIGHT: u32 = 29;
const LABEL_MARGIN: u32 = 4;
const LABEL_WIDTH: u32 = 126;
const LABEL_HEIGHT: u32 = 21;

/// 类别颜色表，按类别编号循环使用
pub const PALETTE: [[u8; 3]; 21] = [
  [240, 230, 140], // khaki
  [255, 0, 255],   // fuchsia
  [192, 192, 192], // silver
  [65, 105, 225],  // royal blue
  [0, 128, 0],     // green
  [255, 140, 0],   // dark orange
  [128, 0, 128],   // purple
  [255, 215, 0],   // gold
  [255, 0, 0],     // red
  [127, 255, 212], // aquamarine
  [0, 255, 0],     // lime
  [240, 248, 255], // alice blue
  [160, 82, 45],   // sienna
  [218, 112, 214], // orchid
  [210, 180, 140], // tan
  [255, 182, 193], // light pink
  [255, 255, 0],   // yellow
  [255, 105, 180], // hot pink
  [107, 142, 35],  // olive drab
  [244, 164, 96],  // sandy brown
  [0, 206, 209],   // dark turquoise
];

/// 某个目标空间中的检测框，通过 [`DetectionRef`] 引用本帧的检测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedBox {
  pub detection: DetectionRef,
  pub rect: PixelRect,
  text: Option<String>,
}

impl MappedBox {
  /// 空白文本视为未识别
  pub fn new(detection: DetectionRef, rect: PixelRect, text: Option<String>) -> Self {
    let text = text
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty());
    Self {
      detection,
      rect,
      text,
    }
  }

  /// 把一个检测结果映射到目标空间
  pub fn map(
    detections: &DetectResult,
    detection: DetectionRef,
    from: Extent,
    to: Extent,
    text: Option<String>,
  ) -> Self {
    let rect = geometry::map(detections.get(detection), from, to);
    Self::new(detection, rect, text)
  }

  pub fn text(&self) -> Option<&str> {
    self.text.as_deref()
  }

  pub fn has_text(&self) -> bool {
    self.text.is_some()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelBlock {
  pub rect: PixelRect,
  pub text: String,
}

/// 画布上一个检测结果的可视化元素，生命周期为一帧
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
  pub id: OverlayId,
  pub mapped: MappedBox,
  pub label: LabelBlock,
  pub background: PixelRect,
  pub color: [u8; 3],
  pub class_id: usize,
  pub class_name: String,
  pub confidence: f32,
}

impl Overlay {
  pub fn rectangle(&self) -> PixelRect {
    self.mapped.rect
  }
}

/// 一次 [`OverlayResolver::resolve`] 的结果
#[derive(Debug, Clone)]
pub struct Resolution {
  pub add: Overlay,
  pub remove: Vec<OverlayId>,
}

/// 单帧内的重叠处理
///
/// 新框与已绘制的叠加层相交时，若新框置信度严格更高，
/// 或新框带识别文本而旧框没有，则旧框被移除。新框总是被加入。
/// 这条规则是不对称的：后加入的框不会因为先前的框而被移除。
pub struct OverlayResolver<'a> {
  detections: &'a DetectResult,
  next_id: usize,
}

impl<'a> OverlayResolver<'a> {
  pub fn new(detections: &'a DetectResult) -> Self {
    Self {
      detections,
      next_id: 0,
    }
  }

  pub fn resolve(&mut self, new_box: MappedBox, existing: &[Overlay]) -> Resolution {
    let incoming = self.detections.get(new_box.detection);

    let remove: Vec<OverlayId> = existing
      .iter()
      .filter(|overlay| overlay.rectangle().intersects(&new_box.rect))
      .filter(|overlay| {
        let current = self.detections.get(overlay.mapped.detection);
        incoming.confidence > current.confidence
          || (new_box.has_text() && !overlay.mapped.has_text())
      })
      .map(|overlay| overlay.id)
      .collect();

    let add = self.overlay(new_box);
    if !remove.is_empty() {
      debug!("叠加层 {:?} 替换 {:?}", add.id, remove);
    }
    Resolution { add, remove }
  }

  fn overlay(&mut self, mapped: MappedBox) -> Overlay {
    let detection = self.detections.get(mapped.detection);
    let id = OverlayId(self.next_id);
    self.next_id += 1;

    let text = match mapped.text() {
      Some(plate) => format!("{} - {}", detection.description(), plate),
      None => detection.description(),
    };
    let rect = mapped.rect;

    Overlay {
      id,
      label: LabelBlock {
        rect: PixelRect::new(
          rect.x + LABEL_MARGIN,
          rect.y + LABEL_MARGIN,
          LABEL_WIDTH,
          LABEL_HEIGHT,
        ),
        text,
      },
      background: PixelRect::new(rect.x, rect.y, BACKGROUND_WIDTH, BACKGROUND_HEIGHT),
      color: class_color(detection.class_id),
      class_id: detection.class_id,
      class_name: detection.label.clone(),
      confidence: detection.confidence,
      mapped,
    }
  }
}

/// 显示画布上当前的叠加层，按加入顺序排列，每帧重建
#[derive(Debug, Clone)]
pub struct Canvas {
  extent: Extent,
  overlays: Vec<Overlay>,
}

impl Canvas {
  pub fn new(extent: Extent) -> Self {
    Self {
      extent,
      overlays: Vec::new(),
    }
  }

  pub fn extent(&self) -> Extent {
    self.extent
  }

  pub fn overlays(&self) -> &[Overlay] {
    &self.overlays
  }

  pub fn is_empty(&self) -> bool {
    self.overlays.is_empty()
  }

  pub fn clear(&mut self) {
    self.overlays.clear();
  }

  pub fn apply(&mut self, resolution: Resolution) {
    self
      .overlays
      .retain(|overlay| !resolution.remove.contains(&overlay.id));
    self.overlays.push(resolution.add);
  }

  /// 丢弃上一帧的叠加层，并按检测顺序逐个加入本帧的检测结果
  ///
  /// `texts[i]` 是第 i 个检测结果的识别文本，缺失时视为未识别。
  pub fn rebuild(
    &mut self,
    extent: Extent,
    network: Extent,
    detections: &DetectResult,
    texts: &[Option<String>],
  ) {
    self.extent = extent;
    self.clear();

    let mut resolver = OverlayResolver::new(detections);
    for (detection, _) in detections.iter() {
      let text = texts.get(detection.index()).cloned().flatten();
      let mapped = MappedBox::map(detections, detection, network, extent, text);
      let resolution = resolver.resolve(mapped, &self.overlays);
      self.apply(resolution);
    }
    debug!(
      "画布 {}: {} 个检测结果, {} 个叠加层",
      extent,
      detections.len(),
      self.overlays.len()
    );
  }
}

/// 按类别取颜色
pub fn class_color(class_id: usize) -> [u8; 3] {
  PALETTE[class_id % PALETTE.len()]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Detection;

  fn detection(confidence: f32) -> Detection {
    Detection {
      x: 0.0,
      y: 0.0,
      width: 10.0,
      height: 10.0,
      class_id: 6,
      label: "car".to_string(),
      confidence,
    }
  }

  fn frame(confidences: &[f32]) -> DetectResult {
    DetectResult::new(confidences.iter().map(|&c| detection(c)).collect())
  }

  fn refs(detections: &DetectResult) -> Vec<DetectionRef> {
    detections.iter().map(|(r, _)| r).collect()
  }

  const A: PixelRect = PixelRect::new(10, 10, 100, 50);
  const B: PixelRect = PixelRect::new(60, 30, 100, 50);
  const FAR: PixelRect = PixelRect::new(400, 400, 20, 20);

  #[test]
  fn higher_confidence_replaces_overlapping_overlay() {
    let detections = frame(&[0.4, 0.9]);
    let r = refs(&detections);
    let mut resolver = OverlayResolver::new(&detections);

    let first = resolver.resolve(MappedBox::new(r[0], A, None), &[]);
    assert!(first.remove.is_empty());
    let existing = vec![first.add];

    let second = resolver.resolve(MappedBox::new(r[1], B, None), &existing);
    assert_eq!(second.remove, vec![existing[0].id]);
    assert_ne!(second.add.id, existing[0].id);
  }

  #[test]
  fn recognized_text_outranks_confidence() {
    let detections = frame(&[0.8, 0.3]);
    let r = refs(&detections);
    let mut resolver = OverlayResolver::new(&detections);

    let existing = vec![resolver.resolve(MappedBox::new(r[0], A, None), &[]).add];
    let with_text = resolver.resolve(
      MappedBox::new(r[1], B, Some("ABC123".to_string())),
      &existing,
    );
    assert_eq!(with_text.remove, vec![existing[0].id]);
    assert_eq!(with_text.add.label.text, "car (30%) - ABC123");
  }

  #[test]
  fn lower_confidence_without_text_keeps_existing() {
    let detections = frame(&[0.8, 0.3]);
    let r = refs(&detections);
    let mut resolver = OverlayResolver::new(&detections);

    let existing = vec![resolver.resolve(MappedBox::new(r[0], A, None), &[]).add];
    let resolution = resolver.resolve(MappedBox::new(r[1], B, None), &existing);
    assert!(resolution.remove.is_empty());

    // 双方都有文本时只比较置信度
    let existing = vec![
      resolver
        .resolve(MappedBox::new(r[0], A, Some("XYZ".into())), &[])
        .add,
    ];
    let resolution = resolver.resolve(MappedBox::new(r[1], B, Some("ABC".into())), &existing);
    assert!(resolution.remove.is_empty());
  }

  #[test]
  fn disjoint_overlays_are_kept() {
    let detections = frame(&[0.9, 0.95]);
    let r = refs(&detections);
    let mut resolver = OverlayResolver::new(&detections);

    let existing = vec![resolver.resolve(MappedBox::new(r[0], A, None), &[]).add];
    let resolution = resolver.resolve(MappedBox::new(r[1], FAR, None), &existing);
    assert!(resolution.remove.is_empty());
  }

  #[test]
  fn blank_text_is_not_recognized() {
    let detections = frame(&[0.5]);
    let r = refs(&detections);
    let mapped = MappedBox::new(r[0], A, Some("   ".to_string()));
    assert!(!mapped.has_text());
    let mapped = MappedBox::new(r[0], A, Some(" 7ABC123\n".to_string()));
    assert_eq!(mapped.text(), Some("7ABC123"));
  }

  #[test]
  fn overlay_blocks_follow_rectangle() {
    let detections = frame(&[0.5]);
    let r = refs(&detections);
    let overlay = OverlayResolver::new(&detections)
      .resolve(MappedBox::new(r[0], A, None), &[])
      .add;
    assert_eq!(overlay.rectangle(), A);
    assert_eq!(overlay.background, PixelRect::new(10, 10, 134, 29));
    assert_eq!(overlay.label.rect, PixelRect::new(14, 14, 126, 21));
    assert_eq!(overlay.label.text, "car (50%)");
    assert_eq!(overlay.color, class_color(6));
  }

  #[test]
  fn canvas_rebuild_replaces_previous_frame() {
    let network = Extent::new(416, 416);
    let display = Extent::new(832, 832);
    let mut canvas = Canvas::new(display);

    let mut detections = vec![detection(0.9), detection(0.2)];
    detections[1].x = 5.0;
    let detections = DetectResult::new(detections);
    canvas.rebuild(display, network, &detections, &[None, Some("PLATE1".into())]);

    // 第二个框带文本，替换了第一个
    assert_eq!(canvas.overlays().len(), 1);
    assert_eq!(canvas.overlays()[0].mapped.text(), Some("PLATE1"));
    assert_eq!(canvas.overlays()[0].rectangle(), PixelRect::new(10, 0, 20, 20));

    canvas.rebuild(display, network, &DetectResult::default(), &[]);
    assert!(canvas.is_empty());
  }

  #[test]
  fn palette_wraps_around() {
    assert_eq!(class_color(0), [240, 230, 140]);
    assert_eq!(class_color(6), [128, 0, 128]);
    assert_eq!(class_color(20), [0, 206, 209]);
    assert_eq!(class_color(21), class_color(0));
    assert_eq!(class_color(27), class_color(6));
  }
}
