// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/model/score.rs - 类别评分
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

use super::{Detection, grid::RawCandidate, spec::DetectionModelSpec};

/// 数值稳定的 softmax，先减去最大值再取指数
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  if sum > 0.0 && sum.is_finite() {
    exps.into_iter().map(|v| v / sum).collect()
  } else {
    vec![0.0; logits.len()]
  }
}

/// 最大值的下标，相等时取最小下标
fn argmax(values: &[f32]) -> (usize, f32) {
  values
    .iter()
    .copied()
    .enumerate()
    .fold((0, f32::NEG_INFINITY), |best, (i, v)| {
      if v > best.1 { (i, v) } else { best }
    })
}

pub fn score(candidate: &RawCandidate, spec: &DetectionModelSpec) -> Detection {
  let probabilities = softmax(&candidate.class_scores);
  let (class_id, p_class) = argmax(&probabilities);
  let confidence = finite_or_zero(candidate.objectness * p_class.max(0.0)).clamp(0.0, 1.0);

  // 先求出左上角与右下角，再裁剪到输入范围内
  let extent = spec.input_extent();
  let (max_x, max_y) = (extent.width as f32, extent.height as f32);
  // 宽高溢出为 +inf 时裁剪到整个输入
  let half_w = nan_to_zero(candidate.width).max(0.0) / 2.0;
  let half_h = nan_to_zero(candidate.height).max(0.0) / 2.0;
  let cx = finite_or_zero(candidate.center_x);
  let cy = finite_or_zero(candidate.center_y);

  let x = (cx - half_w).clamp(0.0, max_x);
  let y = (cy - half_h).clamp(0.0, max_y);
  let right = (cx + half_w).clamp(x, max_x);
  let bottom = (cy + half_h).clamp(y, max_y);

  Detection {
    x,
    y,
    width: right - x,
    height: bottom - y,
    class_id,
    label: spec.label(class_id).to_string(),
    confidence,
  }
}

fn finite_or_zero(v: f32) -> f32 {
  if v.is_finite() { v } else { 0.0 }
}

fn nan_to_zero(v: f32) -> f32 {
  if v.is_nan() { 0.0 } else { v }
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;

  use super::*;
  use crate::geometry::Extent;

  fn spec() -> DetectionModelSpec {
    DetectionModelSpec::new(
      Extent::new(100, 200),
      1,
      1,
      vec![(1.0, 1.0)],
      vec!["car".into(), "plate".into(), "bus".into()],
    )
    .unwrap()
  }

  fn candidate(cx: f32, cy: f32, w: f32, h: f32, objectness: f32, scores: &[f32]) -> RawCandidate {
    RawCandidate {
      row: 0,
      col: 0,
      anchor: 0,
      center_x: cx,
      center_y: cy,
      width: w,
      height: h,
      objectness,
      class_scores: scores.into(),
    }
  }

  #[test]
  fn softmax_is_stable_for_large_logits() {
    let p = softmax(&[1000.0, 1000.0, 999.0]);
    assert_relative_eq!(p.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    assert!(p.iter().all(|v| v.is_finite()));
    assert_relative_eq!(p[0], p[1]);
  }

  #[test]
  fn picks_best_class_and_combines_confidence() {
    let d = score(&candidate(100.0, 50.0, 20.0, 10.0, 0.8, &[0.0, 5.0, 1.0]), &spec());
    assert_eq!(d.class_id, 1);
    assert_eq!(d.label, "plate");
    let p = softmax(&[0.0, 5.0, 1.0])[1];
    assert_relative_eq!(d.confidence, 0.8 * p);
    assert_relative_eq!(d.x, 90.0);
    assert_relative_eq!(d.y, 45.0);
    assert_relative_eq!(d.width, 20.0);
    assert_relative_eq!(d.height, 10.0);
  }

  #[test]
  fn ties_resolve_to_lowest_index() {
    let d = score(&candidate(10.0, 10.0, 2.0, 2.0, 1.0, &[3.0, 3.0, 3.0]), &spec());
    assert_eq!(d.class_id, 0);
    let again = score(&candidate(10.0, 10.0, 2.0, 2.0, 1.0, &[3.0, 3.0, 3.0]), &spec());
    assert_eq!(again, d);
  }

  #[test]
  fn confidence_stays_in_unit_range() {
    for (objectness, scores) in [
      (1.0, vec![50.0, -50.0, 0.0]),
      (0.0, vec![1.0, 2.0, 3.0]),
      (f32::NAN, vec![1.0, 2.0, 3.0]),
      (0.5, vec![f32::NEG_INFINITY, 0.0, 0.0]),
    ] {
      let d = score(&candidate(10.0, 10.0, 2.0, 2.0, objectness, &scores), &spec());
      assert!((0.0..=1.0).contains(&d.confidence), "{}", d.confidence);
    }
  }

  #[test]
  fn clips_geometry_to_input_extent() {
    // 左上越界
    let d = score(&candidate(5.0, 5.0, 20.0, 30.0, 1.0, &[1.0, 0.0, 0.0]), &spec());
    assert_eq!((d.x, d.y), (0.0, 0.0));
    assert_relative_eq!(d.width, 15.0);
    assert_relative_eq!(d.height, 20.0);

    // 右下越界
    let d = score(&candidate(195.0, 95.0, 20.0, 20.0, 1.0, &[1.0, 0.0, 0.0]), &spec());
    assert_relative_eq!(d.x, 185.0);
    assert_relative_eq!(d.width, 15.0);
    assert_relative_eq!(d.height, 15.0);

    // 完全在范围之外
    let d = score(&candidate(500.0, 500.0, 10.0, 10.0, 1.0, &[1.0, 0.0, 0.0]), &spec());
    assert_eq!((d.width, d.height), (0.0, 0.0));
    assert_eq!((d.x, d.y), (200.0, 100.0));
  }

  #[test]
  fn overflowing_size_covers_whole_input() {
    let d = score(
      &candidate(100.0, 50.0, f32::INFINITY, f32::INFINITY, 1.0, &[1.0, 0.0, 0.0]),
      &spec(),
    );
    assert_eq!((d.x, d.y), (0.0, 0.0));
    assert_eq!((d.width, d.height), (200.0, 100.0));

    let d = score(&candidate(100.0, 50.0, f32::NAN, 10.0, 1.0, &[1.0, 0.0, 0.0]), &spec());
    assert_eq!((d.x, d.width), (100.0, 0.0));
    assert_relative_eq!(d.height, 10.0);
  }
}
