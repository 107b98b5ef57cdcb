// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/classifier.rs - 窗口分类器与模型文件
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

use std::collections::BTreeMap;
use std::path::Path;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use super::hog::{HogConfig, hog};
use crate::frame::resize_linear;

/// 当前支持的模型文件版本
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("不支持的模型文件版本: {0}")]
  UnsupportedVersion(u32),
  #[error("HOG 配置不一致: 期望 {expected:?}, 模型文件为 {found:?}")]
  ConfigMismatch { expected: HogConfig, found: HogConfig },
  #[error("特征尺寸不一致: 期望 {expected:?}, 模型文件为 {found:?}")]
  FeatureSizeMismatch { expected: [u32; 2], found: [u32; 2] },
  #[error("分类器输入维度 {actual} 与特征长度 {expected} 不一致")]
  DimensionMismatch { expected: usize, actual: usize },
  #[error("模型无效: {0}")]
  InvalidModel(String),
}

/// 对一个特征向量给出类别标签
pub trait Classifier: Send + Sync {
  /// 期望的特征向量长度
  fn input_len(&self) -> usize;
  fn predict(&self, features: &[f64]) -> i64;
}

/// 线性 SVM（一对多）
///
/// 只有一行系数时为二分类：决策值大于 0 取 `classes[1]`，否则取 `classes[0]`。
/// 多行时每行对应一个类别，取决策值最大的类别。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvm {
  pub classes: Vec<i64>,
  pub coef: Vec<Vec<f64>>,
  pub intercept: Vec<f64>,
}

impl LinearSvm {
  pub fn validate(&self) -> Result<(), ModelLoadError> {
    let rows = self.coef.len();
    if rows == 0 {
      return Err(ModelLoadError::InvalidModel("coef 为空".to_string()));
    }
    if self.intercept.len() != rows {
      return Err(ModelLoadError::InvalidModel(format!(
        "intercept 长度 {} 与 coef 行数 {} 不一致",
        self.intercept.len(),
        rows
      )));
    }
    let expected_classes = if rows == 1 { 2 } else { rows };
    if self.classes.len() != expected_classes {
      return Err(ModelLoadError::InvalidModel(format!(
        "classes 数量 {} 与 coef 行数 {} 不匹配",
        self.classes.len(),
        rows
      )));
    }
    let width = self.coef[0].len();
    if self.coef.iter().any(|row| row.len() != width) {
      return Err(ModelLoadError::InvalidModel("coef 各行长度不一致".to_string()));
    }
    Ok(())
  }

  fn decision(&self, row: usize, features: &[f64]) -> f64 {
    self.coef[row]
      .iter()
      .zip(features)
      .map(|(w, x)| w * x)
      .sum::<f64>()
      + self.intercept[row]
  }
}

impl Classifier for LinearSvm {
  fn input_len(&self) -> usize {
    self.coef.first().map(Vec::len).unwrap_or(0)
  }

  fn predict(&self, features: &[f64]) -> i64 {
    if self.coef.len() == 1 {
      let index = usize::from(self.decision(0, features) > 0.0);
      return self.classes[index];
    }

    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for row in 0..self.coef.len() {
      let score = self.decision(row, features);
      if score > best_score {
        best = row;
        best_score = score;
      }
    }
    self.classes[best]
  }
}

fn default_labels() -> BTreeMap<i64, String> {
  BTreeMap::from([(0, "Ganado".to_string()), (1, "Radiacion".to_string())])
}

/// 训练流程导出的模型文件（JSON）
///
/// ```json
/// {
///   "format_version": 1,
///   "hog": { "orientations": 12, "pixels_per_cell": [8, 8],
///            "cells_per_block": [2, 2], "block_norm": "L2-Hys" },
///   "feature_size": [64, 64],
///   "labels": { "0": "Ganado", "1": "Radiacion" },
///   "svm": { "classes": [0, 1, 2], "coef": [[...], [...], [...]], "intercept": [...] }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
  pub format_version: u32,
  pub hog: HogConfig,
  /// [宽, 高]
  pub feature_size: [u32; 2],
  /// 可接受的类别及其显示名称，其余类别视为背景
  #[serde(default = "default_labels")]
  pub labels: BTreeMap<i64, String>,
  pub svm: LinearSvm,
}

/// 分类器及其训练时的特征提取配置
pub struct ClassifierModel {
  classifier: Box<dyn Classifier>,
  hog: HogConfig,
  feature_size: [u32; 2],
  labels: BTreeMap<i64, String>,
}

impl std::fmt::Debug for ClassifierModel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClassifierModel")
      .field("hog", &self.hog)
      .field("feature_size", &self.feature_size)
      .field("labels", &self.labels)
      .finish_non_exhaustive()
  }
}

impl ClassifierModel {
  /// 读取模型文件，并检查其中的特征配置与运行时配置一致
  pub fn load(
    path: impl AsRef<Path>,
    expected_hog: &HogConfig,
    expected_size: [u32; 2],
  ) -> Result<Self, ModelLoadError> {
    let path = path.as_ref();
    info!("加载分类器模型: {}", path.display());
    let data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} KB",
      data.len() as f64 / 1024.0
    );
    let artifact: ClassifierArtifact = serde_json::from_slice(&data)?;

    if artifact.format_version != ARTIFACT_FORMAT_VERSION {
      error!("不支持的模型文件版本 {}", artifact.format_version);
      return Err(ModelLoadError::UnsupportedVersion(artifact.format_version));
    }
    if &artifact.hog != expected_hog {
      error!("模型文件的 HOG 配置与运行配置不一致");
      return Err(ModelLoadError::ConfigMismatch {
        expected: expected_hog.clone(),
        found: artifact.hog,
      });
    }
    if artifact.feature_size != expected_size {
      return Err(ModelLoadError::FeatureSizeMismatch {
        expected: expected_size,
        found: artifact.feature_size,
      });
    }

    artifact.svm.validate()?;
    let model = Self::new(
      Box::new(artifact.svm),
      artifact.hog,
      artifact.feature_size,
      artifact.labels,
    )?;
    info!(
      "分类器加载完成，特征长度 {}，可接受类别 {:?}",
      model.feature_len(),
      model.labels
    );
    Ok(model)
  }

  pub fn new(
    classifier: Box<dyn Classifier>,
    hog: HogConfig,
    feature_size: [u32; 2],
    labels: BTreeMap<i64, String>,
  ) -> Result<Self, ModelLoadError> {
    let expected = hog.feature_len(feature_size[0], feature_size[1]);
    if expected == 0 {
      return Err(ModelLoadError::InvalidModel(format!(
        "特征尺寸 {:?} 放不下一个 block",
        feature_size
      )));
    }
    if classifier.input_len() != expected {
      return Err(ModelLoadError::DimensionMismatch {
        expected,
        actual: classifier.input_len(),
      });
    }
    Ok(Self {
      classifier,
      hog,
      feature_size,
      labels,
    })
  }

  pub fn feature_len(&self) -> usize {
    self.hog.feature_len(self.feature_size[0], self.feature_size[1])
  }

  pub fn label_name(&self, label: i64) -> Option<&str> {
    self.labels.get(&label).map(String::as_str)
  }

  /// 对一个窗口分类，返回可接受的类别及其名称
  pub fn classify(&self, patch: &GrayImage) -> Option<(i64, &str)> {
    let [width, height] = self.feature_size;
    let resized;
    let patch = if patch.dimensions() == (width, height) {
      patch
    } else {
      resized = resize_linear(patch, width, height);
      &resized
    };

    let features = hog(patch, &self.hog);
    let label = self.classifier.predict(&features);
    self.label_name(label).map(|name| (label, name))
  }
}
