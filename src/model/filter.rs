// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/model/filter.rs - 非极大值抑制
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

use super::Detection;

/// 计算两个边界框的 IoU，任一框面积为零时返回 0
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let area_a = a.width * a.height;
  let area_b = b.width * b.height;
  if area_a <= 0.0 || area_b <= 0.0 {
    return 0.0;
  }

  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = (a.x + a.width).min(b.x + b.width);
  let y2 = (a.y + a.height).min(b.y + b.height);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心非极大值抑制
///
/// 按置信度降序（稳定排序，相同置信度保持解码顺序）依次选取，
/// 与已选框 IoU 超过 `overlap_threshold` 的框被丢弃，不区分类别。
/// 结果数量达到 `max_results` 时停止。
pub fn filter(
  mut detections: Vec<Detection>,
  max_results: usize,
  overlap_threshold: f32,
) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut active = vec![true; detections.len()];
  let mut kept = Vec::with_capacity(max_results.min(detections.len()));

  for i in 0..detections.len() {
    if kept.len() >= max_results {
      break;
    }
    if !active[i] {
      continue;
    }

    kept.push(i);
    for j in (i + 1)..detections.len() {
      if active[j] && iou(&detections[i], &detections[j]) > overlap_threshold {
        active[j] = false;
      }
    }
  }

  debug!("非极大值抑制: {} -> {}", detections.len(), kept.len());

  let mut kept = kept.into_iter().peekable();
  detections
    .into_iter()
    .enumerate()
    .filter_map(|(i, d)| {
      if kept.peek() == Some(&i) {
        kept.next();
        Some(d)
      } else {
        None
      }
    })
    .collect()
}

/// 丢弃置信度低于阈值的检测结果，保持原有顺序
pub fn retain_confident(detections: &mut Vec<Detection>, confidence_threshold: f32) {
  detections.retain(|d| d.confidence >= confidence_threshold);
}
