// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/model.rs - 模型与检测后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, frame::Frame, url_file_path};

pub mod filter;
pub mod grid;
pub mod score;
pub mod spec;

mod replay;
pub use self::replay::{TensorReplayError, TensorReplayModel, read_tensor, write_tensor};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModel, OnnxModelError};

pub use self::grid::{DecodeError, RawCandidate};
pub use self::spec::{DetectionModelSpec, SpecError};

/// 检测网络的前向计算，对后处理而言是一个黑盒
pub trait Model {
  type Input;
  type Error;

  fn spec(&self) -> &DetectionModelSpec;
  fn forward(&self, input: &Self::Input) -> Result<Box<[f32]>, Self::Error>;
}

/// 输入像素空间中带类别和置信度的检测框，左上角为原点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
}

impl Detection {
  /// 形如 `car (87%)` 的描述文本
  pub fn description(&self) -> String {
    format!("{} ({:.0}%)", self.label, self.confidence * 100.0)
  }
}

/// 指向本帧 [`DetectResult`] 中某个检测结果的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetectionRef(usize);

impl DetectionRef {
  pub fn index(&self) -> usize {
    self.0
  }
}

/// 一帧的最终检测结果，顺序即非极大值抑制的输出顺序
#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn new(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn get(&self, detection: DetectionRef) -> &Detection {
    &self.items[detection.0]
  }

  pub fn iter(&self) -> impl Iterator<Item = (DetectionRef, &Detection)> {
    self
      .items
      .iter()
      .enumerate()
      .map(|(i, d)| (DetectionRef(i), d))
  }
}

fn default_confidence_threshold() -> f32 {
  0.3
}

fn default_overlap_threshold() -> f32 {
  0.5
}

fn default_max_results() -> usize {
  5
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
  /// 低于该值的检测结果在非极大值抑制之前被丢弃
  #[serde(default = "default_confidence_threshold")]
  pub confidence_threshold: f32,
  /// IoU 超过该值视为同一目标
  #[serde(default = "default_overlap_threshold")]
  pub overlap_threshold: f32,
  /// 每帧最多保留的检测结果数
  #[serde(default = "default_max_results")]
  pub max_results: usize,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: default_confidence_threshold(),
      overlap_threshold: default_overlap_threshold(),
      max_results: default_max_results(),
    }
  }
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), DetectError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(DetectError::InvalidConfig(format!(
        "置信度阈值必须在 [0, 1] 内: {}",
        self.confidence_threshold
      )));
    }
    if !(self.overlap_threshold > 0.0 && self.overlap_threshold < 1.0) {
      return Err(DetectError::InvalidConfig(format!(
        "IoU 阈值必须在 (0, 1) 内: {}",
        self.overlap_threshold
      )));
    }
    if self.max_results == 0 {
      return Err(DetectError::InvalidConfig(
        "每帧最大检测数必须至少为 1".to_string(),
      ));
    }
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("模型推理错误: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("张量解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("检测配置无效: {0}")]
  InvalidConfig(String),
}

/// 把张量解码为最终检测结果：解码、评分、置信度过滤、非极大值抑制
pub fn postprocess(
  tensor: &[f32],
  spec: &DetectionModelSpec,
  config: &DetectorConfig,
) -> Result<DetectResult, DecodeError> {
  let mut detections: Vec<Detection> = grid::decode(tensor, spec)?
    .iter()
    .map(|candidate| score::score(candidate, spec))
    .collect();
  filter::retain_confident(&mut detections, config.confidence_threshold);
  debug!("置信度过滤后剩余 {} 个检测框", detections.len());
  let detections = filter::filter(detections, config.max_results, config.overlap_threshold);
  Ok(DetectResult::new(detections))
}

/// 模型加后处理
pub struct Detector<M> {
  model: M,
  config: DetectorConfig,
}

impl<M> Detector<M>
where
  M: Model<Input = Frame>,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: M, config: DetectorConfig) -> Result<Self, DetectError> {
    config.validate()?;
    Ok(Self { model, config })
  }

  pub fn spec(&self) -> &DetectionModelSpec {
    self.model.spec()
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectError> {
    let tensor = self
      .model
      .forward(frame)
      .map_err(|e| DetectError::Model(Box::new(e)))?;
    Ok(postprocess(&tensor, self.model.spec(), &self.config)?)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("张量回放错误: {0}")]
  TensorReplay(#[from] TensorReplayError),
  #[cfg(feature = "onnx")]
  #[error("ONNX 模型错误: {0}")]
  Onnx(#[from] OnnxModelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("未指定模型描述")]
  MissingSpec,
}

pub struct ModelBuilder {
  url: Url,
  spec: Option<DetectionModelSpec>,
}

impl FromUrl for ModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      TensorReplayModel::SCHEME => {}
      #[cfg(feature = "onnx")]
      OnnxModel::SCHEME => {}
      other => return Err(ModelError::SchemeMismatch(other.to_string())),
    }

    Ok(ModelBuilder {
      url: url.clone(),
      spec: None,
    })
  }
}

impl ModelBuilder {
  pub fn spec(mut self, spec: DetectionModelSpec) -> Self {
    self.spec = Some(spec);
    self
  }

  pub fn build(self) -> Result<ModelWrapper, ModelError> {
    let spec = self.spec.ok_or(ModelError::MissingSpec)?;
    info!("加载模型: {}", self.url);
    match self.url.scheme() {
      #[cfg(feature = "onnx")]
      OnnxModel::SCHEME => Ok(ModelWrapper::Onnx(OnnxModel::open(
        url_file_path(&self.url),
        spec,
      )?)),
      _ => Ok(ModelWrapper::TensorReplay(TensorReplayModel::open(
        url_file_path(&self.url),
        spec,
      )?)),
    }
  }
}

pub enum ModelWrapper {
  TensorReplay(TensorReplayModel),
  #[cfg(feature = "onnx")]
  Onnx(OnnxModel),
}

impl Model for ModelWrapper {
  type Input = Frame;
  type Error = ModelError;

  fn spec(&self) -> &DetectionModelSpec {
    match self {
      ModelWrapper::TensorReplay(model) => model.spec(),
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(model) => model.spec(),
    }
  }

  fn forward(&self, input: &Frame) -> Result<Box<[f32]>, Self::Error> {
    match self {
      ModelWrapper::TensorReplay(model) => model.forward(input).map_err(ModelError::from),
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(model) => model.forward(input).map_err(ModelError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_defaults() {
    let config = DetectorConfig::default();
    assert_eq!(config.confidence_threshold, 0.3);
    assert_eq!(config.overlap_threshold, 0.5);
    assert_eq!(config.max_results, 5);
    assert!(config.validate().is_ok());

    let parsed: DetectorConfig = serde_json::from_str(r#"{"max_results": 8}"#).unwrap();
    assert_eq!(parsed.max_results, 8);
    assert_eq!(parsed.overlap_threshold, 0.5);
  }

  #[test]
  fn config_validation() {
    let bad = [
      DetectorConfig {
        confidence_threshold: 1.5,
        ..Default::default()
      },
      DetectorConfig {
        overlap_threshold: 1.0,
        ..Default::default()
      },
      DetectorConfig {
        max_results: 0,
        ..Default::default()
      },
    ];
    for config in bad {
      assert!(matches!(
        config.validate(),
        Err(DetectError::InvalidConfig(_))
      ));
    }
  }

  #[test]
  fn description_rounds_percentage() {
    let d = Detection {
      x: 0.0,
      y: 0.0,
      width: 1.0,
      height: 1.0,
      class_id: 6,
      label: "car".to_string(),
      confidence: 0.876,
    };
    assert_eq!(d.description(), "car (88%)");
  }

  #[test]
  fn builder_rejects_unknown_scheme() {
    let url = Url::parse("rknn:///model.rknn").unwrap();
    assert!(matches!(
      ModelBuilder::from_url(&url),
      Err(ModelError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn builder_requires_spec() {
    let url = Url::parse("tensor:///tmp/none.bin").unwrap();
    let builder = ModelBuilder::from_url(&url).unwrap();
    assert!(matches!(builder.build(), Err(ModelError::MissingSpec)));
  }
}
