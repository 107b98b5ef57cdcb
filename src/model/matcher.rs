// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/matcher.rs - 参考图特征匹配检测
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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::GrayImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::features::{Descriptor, FeatureSet, OrbConfig, OrbExtractor, hamming_distance};
use super::{DetectError, Match, MatchResult, Model, ModelError, ReferenceMatches};
use crate::frame::{Frame, resize_linear, rgb_to_gray};
use crate::{FromUrl, FromUrlWithScheme};

pub const DEFAULT_RATIO: f32 = 0.6;
pub const DEFAULT_REFERENCE_SIZE: (u32, u32) = (300, 300);

#[derive(Error, Debug)]
pub enum ReferenceLoadError {
  #[error("参考图读取失败 {0}: {1}")]
  ImageError(PathBuf, image::ImageError),
}

/// 一张参考图：统一尺寸的灰度图及其特征
#[derive(Debug)]
pub struct ReferenceSet {
  pub name: String,
  pub image: GrayImage,
  pub features: FeatureSet,
}

impl ReferenceSet {
  pub fn from_gray(
    name: impl Into<String>,
    gray: &GrayImage,
    extractor: &OrbExtractor,
    size: (u32, u32),
  ) -> Self {
    let image = resize_linear(gray, size.0, size.1);
    let features = extractor.detect_and_compute(&image);
    Self {
      name: name.into(),
      image,
      features,
    }
  }

  pub fn open(
    name: impl Into<String>,
    path: &Path,
    extractor: &OrbExtractor,
    size: (u32, u32),
  ) -> Result<Self, ReferenceLoadError> {
    let rgb = image::open(path)
      .map_err(|e| ReferenceLoadError::ImageError(path.to_path_buf(), e))?
      .to_rgb8();
    Ok(Self::from_gray(name, &rgb_to_gray(&rgb), extractor, size))
  }
}

/// 启动时加载的全部参考图，之后只读
#[derive(Debug, Default)]
pub struct ReferenceStore {
  references: Vec<Arc<ReferenceSet>>,
}

impl ReferenceStore {
  /// 逐个加载参考图，失败的跳过并记录警告
  pub fn load(refs: &[(String, PathBuf)], extractor: &OrbExtractor, size: (u32, u32)) -> Self {
    let mut references = Vec::with_capacity(refs.len());
    for (name, path) in refs {
      match ReferenceSet::open(name.clone(), path, extractor, size) {
        Ok(reference) => {
          info!(
            "参考图 {} ({}) 检测到 {} 个关键点",
            name,
            path.display(),
            reference.features.len()
          );
          references.push(Arc::new(reference));
        }
        Err(e) => warn!("跳过参考图 {}: {}", name, e),
      }
    }
    Self { references }
  }

  pub fn from_references(references: Vec<ReferenceSet>) -> Self {
    Self {
      references: references.into_iter().map(Arc::new).collect(),
    }
  }

  pub fn references(&self) -> &[Arc<ReferenceSet>] {
    &self.references
  }

  pub fn is_empty(&self) -> bool {
    self.references.is_empty()
  }
}

/// 暴力 k=2 近邻匹配加比值检验
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMatcher {
  ratio: f32,
}

impl Default for DescriptorMatcher {
  fn default() -> Self {
    Self::new(DEFAULT_RATIO)
  }
}

impl DescriptorMatcher {
  pub fn new(ratio: f32) -> Self {
    Self { ratio }
  }

  /// 对每个查询描述子找训练集中最近的两个，最近距离严格小于
  /// `ratio * 次近距离` 时保留。近邻不足两个的查询跳过。
  pub fn match_descriptors(&self, query: &[Descriptor], train: &[Descriptor]) -> Vec<Match> {
    if train.len() < 2 {
      return Vec::new();
    }

    let mut matches = Vec::new();
    for (qi, q) in query.iter().enumerate() {
      let mut best = (u32::MAX, 0usize);
      let mut second = u32::MAX;
      for (ti, t) in train.iter().enumerate() {
        let distance = hamming_distance(q, t);
        if distance < best.0 {
          second = best.0;
          best = (distance, ti);
        } else if distance < second {
          second = distance;
        }
      }

      if (best.0 as f32) < self.ratio * second as f32 {
        matches.push(Match {
          reference_keypoint: qi,
          frame_keypoint: best.1,
          distance: best.0,
        });
      }
    }
    matches
  }
}

/// 以参考图特征匹配视频帧的检测器
pub struct DescriptorMatchDetector {
  store: ReferenceStore,
  extractor: OrbExtractor,
  matcher: DescriptorMatcher,
}

impl DescriptorMatchDetector {
  pub fn new(store: ReferenceStore, extractor: OrbExtractor, matcher: DescriptorMatcher) -> Self {
    Self {
      store,
      extractor,
      matcher,
    }
  }
}

impl Model for DescriptorMatchDetector {
  type Input = Frame;
  type Output = MatchResult;
  type Error = DetectError;

  fn infer(&self, frame: &Frame) -> Result<MatchResult, DetectError> {
    if frame.is_empty() {
      return Err(DetectError::EmptyFrame { index: frame.index });
    }

    let features = self.extractor.detect_and_compute(&frame.to_gray());
    let mut references = Vec::new();
    for reference in self.store.references() {
      if reference.features.is_empty() {
        continue;
      }
      let matches = self
        .matcher
        .match_descriptors(&reference.features.descriptors, &features.descriptors);
      if !matches.is_empty() {
        references.push(ReferenceMatches {
          reference: Arc::clone(reference),
          matches,
        });
      }
    }

    debug!(
      "帧 {}: {} 个关键点，{} 张参考图命中",
      frame.index,
      features.len(),
      references.len()
    );
    Ok(MatchResult {
      frame_keypoints: features.keypoints,
      references,
    })
  }
}

/// `match:?ref=<名称>:<路径>&ratio=0.6&size=300x300&features=500`
#[derive(Debug, Clone)]
pub struct DescriptorMatchDetectorBuilder {
  references: Vec<(String, PathBuf)>,
  ratio: f32,
  size: (u32, u32),
  max_features: usize,
}

impl FromUrlWithScheme for DescriptorMatchDetectorBuilder {
  const SCHEME: &'static str = "match";
}

impl FromUrl for DescriptorMatchDetectorBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch);
    }

    let mut builder = DescriptorMatchDetectorBuilder {
      references: Vec::new(),
      ratio: DEFAULT_RATIO,
      size: DEFAULT_REFERENCE_SIZE,
      max_features: OrbConfig::default().max_features,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "ref" => builder.references.push(parse_reference(&value)),
        "ratio" => {
          builder.ratio = value
            .parse::<f32>()
            .ok()
            .filter(|r| *r > 0.0 && *r <= 1.0)
            .ok_or_else(|| ModelError::invalid("ratio", &value))?
        }
        "size" => builder.size = parse_size(&value).ok_or_else(|| ModelError::invalid("size", &value))?,
        "features" => {
          builder.max_features = value
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ModelError::invalid("features", &value))?
        }
        _ => warn!("忽略未知参数 {}={}", key, value),
      }
    }

    if builder.references.is_empty() {
      return Err(ModelError::MissingParameter("ref"));
    }
    Ok(builder)
  }
}

impl DescriptorMatchDetectorBuilder {
  pub fn build(self) -> DescriptorMatchDetector {
    let extractor = OrbExtractor::new(OrbConfig {
      max_features: self.max_features,
      ..OrbConfig::default()
    });
    let store = ReferenceStore::load(&self.references, &extractor, self.size);
    if store.is_empty() {
      warn!("没有可用的参考图，所有帧都不会有匹配");
    }
    info!(
      "特征匹配检测器就绪: {} 张参考图，比值 {}，参考尺寸 {}x{}",
      store.references().len(),
      self.ratio,
      self.size.0,
      self.size.1
    );
    DescriptorMatchDetector::new(store, extractor, DescriptorMatcher::new(self.ratio))
  }
}

/// `名称:路径`，省略名称时取文件名
fn parse_reference(value: &str) -> (String, PathBuf) {
  match value.split_once(':') {
    Some((name, path)) if !name.is_empty() && !path.is_empty() => {
      (name.to_string(), PathBuf::from(path))
    }
    _ => {
      let path = PathBuf::from(value);
      let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| value.to_string());
      (name, path)
    }
  }
}

/// `宽x高`
pub(crate) fn parse_size(value: &str) -> Option<(u32, u32)> {
  let (w, h) = value.split_once(['x', 'X'])?;
  let w = w.trim().parse::<u32>().ok()?;
  let h = h.trim().parse::<u32>().ok()?;
  (w > 0 && h > 0).then_some((w, h))
}
