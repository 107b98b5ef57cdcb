// 该文件是 Liuguang （流光） 项目的一部分。
// src/model.rs - 检测模型
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

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme};

pub mod classifier;
pub mod features;
pub mod hog;
pub mod matcher;
pub mod sliding_window;

pub use self::classifier::{Classifier, ClassifierModel, LinearSvm, ModelLoadError};
pub use self::features::{Keypoint, OrbExtractor};
pub use self::matcher::{
  DescriptorMatchDetector, DescriptorMatchDetectorBuilder, DescriptorMatcher, ReferenceSet,
  ReferenceStore,
};
pub use self::sliding_window::{SlidingWindowDetector, SlidingWindowDetectorBuilder};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidParameter { key: &'static str, value: String },
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] ModelLoadError),
}

impl ModelError {
  pub fn invalid(key: &'static str, value: &str) -> Self {
    ModelError::InvalidParameter {
      key,
      value: value.to_string(),
    }
  }
}

/// 单帧检测失败，只影响这一帧
#[derive(Error, Debug)]
pub enum DetectError {
  #[error("第 {index} 帧为空")]
  EmptyFrame { index: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: i64,
  pub label: String,
  pub score: Option<f32>,
  pub bbox: [u32; 4], // [x, y, width, height]
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

/// 一对匹配的关键点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
  pub reference_keypoint: usize,
  pub frame_keypoint: usize,
  pub distance: u32,
}

#[derive(Debug, Clone)]
pub struct ReferenceMatches {
  pub reference: Arc<ReferenceSet>,
  pub matches: Vec<Match>,
}

/// 只包含至少有一个匹配的参考图
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
  pub frame_keypoints: Vec<Keypoint>,
  pub references: Vec<ReferenceMatches>,
}

#[derive(Debug, Clone)]
pub enum Detections {
  Matches(MatchResult),
  Boxes(DetectResult),
}

impl Detections {
  pub fn is_empty(&self) -> bool {
    match self {
      Detections::Matches(result) => result.references.is_empty(),
      Detections::Boxes(result) => result.items.is_empty(),
    }
  }
}

pub enum DetectorWrapper {
  Match(DescriptorMatchDetector),
  Svm(SlidingWindowDetector),
}

impl FromUrl for DetectorWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DescriptorMatchDetectorBuilder::SCHEME => {
        let detector = DescriptorMatchDetectorBuilder::from_url(url)?.build();
        Ok(DetectorWrapper::Match(detector))
      }
      SlidingWindowDetectorBuilder::SCHEME => {
        let detector = SlidingWindowDetectorBuilder::from_url(url)?.build()?;
        Ok(DetectorWrapper::Svm(detector))
      }
      _ => Err(ModelError::SchemeMismatch),
    }
  }
}

impl Model for DetectorWrapper {
  type Input = Frame;
  type Output = Detections;
  type Error = DetectError;

  fn infer(&self, frame: &Frame) -> Result<Detections, DetectError> {
    match self {
      DetectorWrapper::Match(detector) => detector.infer(frame).map(Detections::Matches),
      DetectorWrapper::Svm(detector) => detector.infer(frame).map(Detections::Boxes),
    }
  }
}
