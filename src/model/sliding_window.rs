// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/sliding_window.rs - 滑动窗口分类检测
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

use std::path::PathBuf;

use image::GrayImage;
use tracing::{debug, info, warn};
use url::Url;

use super::classifier::{ClassifierModel, ModelLoadError};
use super::hog::HogConfig;
use super::matcher::parse_size;
use super::{DetectError, DetectItem, DetectResult, Model, ModelError};
use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme};

pub const DEFAULT_STEP: u32 = 146;
pub const DEFAULT_WINDOW: (u32, u32) = (710, 710);
pub const FEATURE_SIZE: [u32; 2] = [64, 64];

/// 窗口左上角坐标，行在外层、列在内层
///
/// 上界不含 `H - wh` 与 `W - ww`，图像在某一方向上不大于窗口时没有窗口。
pub fn window_origins(width: u32, height: u32, window: (u32, u32), step: u32) -> Vec<(u32, u32)> {
  let (ww, wh) = window;
  let step = step.max(1) as usize;
  let mut origins = Vec::new();
  for y in (0..height.saturating_sub(wh)).step_by(step) {
    for x in (0..width.saturating_sub(ww)).step_by(step) {
      origins.push((x, y));
    }
  }
  origins
}

pub struct SlidingWindowDetector {
  model: ClassifierModel,
  windows: Vec<(u32, u32)>,
  step: u32,
}

impl SlidingWindowDetector {
  pub fn new(model: ClassifierModel, windows: Vec<(u32, u32)>, step: u32) -> Self {
    Self {
      model,
      windows,
      step: step.max(1),
    }
  }

  pub fn detect_gray(&self, gray: &GrayImage) -> Vec<DetectItem> {
    let mut items = Vec::new();
    for &(ww, wh) in &self.windows {
      for (x, y) in window_origins(gray.width(), gray.height(), (ww, wh), self.step) {
        let patch = image::imageops::crop_imm(gray, x, y, ww, wh).to_image();
        if let Some((class_id, label)) = self.model.classify(&patch) {
          items.push(DetectItem {
            class_id,
            label: label.to_string(),
            score: None,
            bbox: [x, y, ww, wh],
          });
        }
      }
    }
    items
  }
}

impl Model for SlidingWindowDetector {
  type Input = Frame;
  type Output = DetectResult;
  type Error = DetectError;

  fn infer(&self, frame: &Frame) -> Result<DetectResult, DetectError> {
    if frame.is_empty() {
      return Err(DetectError::EmptyFrame { index: frame.index });
    }

    let items = self.detect_gray(&frame.to_gray());
    debug!("帧 {}: {} 个窗口命中", frame.index, items.len());
    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

/// `svm:<模型文件>?step=146&window=710x710&window=...`
#[derive(Debug, Clone)]
pub struct SlidingWindowDetectorBuilder {
  model_path: PathBuf,
  step: u32,
  windows: Vec<(u32, u32)>,
}

impl FromUrlWithScheme for SlidingWindowDetectorBuilder {
  const SCHEME: &'static str = "svm";
}

impl FromUrl for SlidingWindowDetectorBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch);
    }
    if url.path().is_empty() {
      return Err(ModelError::MissingParameter("model path"));
    }

    let mut step = DEFAULT_STEP;
    let mut windows = Vec::new();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "step" => {
          step = value
            .parse::<u32>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| ModelError::invalid("step", &value))?
        }
        "window" => windows.push(parse_size(&value).ok_or_else(|| ModelError::invalid("window", &value))?),
        _ => warn!("忽略未知参数 {}={}", key, value),
      }
    }
    if windows.is_empty() {
      windows.push(DEFAULT_WINDOW);
    }

    Ok(SlidingWindowDetectorBuilder {
      model_path: PathBuf::from(url.path()),
      step,
      windows,
    })
  }
}

impl SlidingWindowDetectorBuilder {
  pub fn build(self) -> Result<SlidingWindowDetector, ModelLoadError> {
    let model = ClassifierModel::load(&self.model_path, &HogConfig::default(), FEATURE_SIZE)?;
    info!(
      "滑动窗口检测器就绪: 窗口 {:?}，步长 {}",
      self.windows, self.step
    );
    Ok(SlidingWindowDetector::new(model, self.windows, self.step))
  }
}
