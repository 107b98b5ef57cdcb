// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/features.rs - 尺度与旋转不变的局部特征
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

//! ORB 风格的关键点与描述子：
//!
//! - 图像金字塔上做 FAST-9 角点检测，3x3 非极大值抑制，按响应保留前 N 个；
//! - 灰度质心法估计主方向；
//! - 在高斯平滑后的图像上按主方向旋转 BRIEF 采样对，得到 256 位描述子。
//!
//! 参考图与视频帧使用同一个 [`OrbExtractor`]，描述子之间用汉明距离比较。

use image::{GrayImage, ImageBuffer, Luma, imageops::FilterType};
use imageproc::{
  corners::{Corner, corners_fast9},
  filter::gaussian_blur_f32,
};

/// 256 位二进制描述子
pub type Descriptor = [u8; 32];

const DESCRIPTOR_BITS: usize = 256;
/// 采样点坐标范围 [-12, 12]，旋转后最远 17 像素
const PATTERN_EXTENT: i32 = 12;
/// 角点到图像边缘的最小距离
const BORDER: u32 = 18;
const PATTERN_SEED: u64 = 0x0b1e_f5a3_9c27_d641;

/// 关键点，坐标为原图（金字塔第 0 层）坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
  pub x: f32,
  pub y: f32,
  /// 主方向（弧度）
  pub angle: f32,
  /// 所在金字塔层
  pub octave: u8,
  /// 特征邻域直径（原图像素）
  pub size: f32,
  pub response: f32,
}

/// 一幅图像的关键点与描述子，`descriptors[i]` 对应 `keypoints[i]`
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
  pub keypoints: Vec<Keypoint>,
  pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
  pub fn len(&self) -> usize {
    self.keypoints.len()
  }

  pub fn is_empty(&self) -> bool {
    self.descriptors.is_empty()
  }
}

#[derive(Debug, Clone)]
pub struct OrbConfig {
  /// 所有金字塔层合计的最大关键点数
  pub max_features: usize,
  pub levels: usize,
  pub scale_factor: f32,
  pub fast_threshold: u8,
  /// 灰度质心的圆形邻域半径
  pub patch_radius: i32,
  pub blur_sigma: f32,
}

impl Default for OrbConfig {
  fn default() -> Self {
    Self {
      max_features: 500,
      levels: 4,
      scale_factor: 1.2,
      fast_threshold: 20,
      patch_radius: 15,
      blur_sigma: 2.0,
    }
  }
}

pub struct OrbExtractor {
  config: OrbConfig,
  pattern: Vec<[(i32, i32); 2]>,
}

impl Default for OrbExtractor {
  fn default() -> Self {
    Self::new(OrbConfig::default())
  }
}

impl OrbExtractor {
  pub fn new(config: OrbConfig) -> Self {
    Self {
      config,
      pattern: sampling_pattern(),
    }
  }

  pub fn config(&self) -> &OrbConfig {
    &self.config
  }

  /// 检测关键点并计算描述子
  pub fn detect_and_compute(&self, gray: &GrayImage) -> FeatureSet {
    let mut features = FeatureSet::default();
    let levels = self.config.levels.max(1);
    let inverse = 1.0 / self.config.scale_factor;
    let mut budget = self.config.max_features as f32 * (1.0 - inverse)
      / (1.0 - inverse.powi(levels as i32));

    for level in 0..levels {
      let scale = self.config.scale_factor.powi(level as i32);
      let width = (gray.width() as f32 / scale).round() as u32;
      let height = (gray.height() as f32 / scale).round() as u32;
      if width <= 2 * BORDER || height <= 2 * BORDER {
        break;
      }

      let resized;
      let level_image = if level == 0 {
        gray
      } else {
        resized = image::imageops::resize(gray, width, height, FilterType::Triangle);
        &resized
      };

      let limit = if level + 1 == levels {
        self.config.max_features.saturating_sub(features.len())
      } else {
        budget.round() as usize
      };
      budget *= inverse;

      let corners = self.detect_corners(level_image, limit);
      if corners.is_empty() {
        continue;
      }

      let blurred = gaussian_blur_f32(level_image, self.config.blur_sigma);
      for corner in corners {
        let (cx, cy) = (corner.x as i32, corner.y as i32);
        let angle = intensity_angle(level_image, cx, cy, self.config.patch_radius);
        features.descriptors.push(self.describe(&blurred, cx, cy, angle));
        features.keypoints.push(Keypoint {
          x: corner.x as f32 * scale,
          y: corner.y as f32 * scale,
          angle,
          octave: level as u8,
          size: (2 * self.config.patch_radius + 1) as f32 * scale,
          response: corner.score,
        });
      }
    }

    features
  }

  fn detect_corners(&self, image: &GrayImage, limit: usize) -> Vec<Corner> {
    if limit == 0 {
      return Vec::new();
    }

    let (width, height) = image.dimensions();
    let corners = corners_fast9(image, self.config.fast_threshold);

    let mut scores: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::new(width, height);
    for corner in &corners {
      scores.put_pixel(corner.x, corner.y, Luma([corner.score.max(f32::MIN_POSITIVE)]));
    }

    let mut kept: Vec<Corner> = corners
      .into_iter()
      .filter(|c| {
        c.x >= BORDER && c.y >= BORDER && c.x < width - BORDER && c.y < height - BORDER
      })
      .filter(|c| is_local_maximum(&scores, c))
      .collect();

    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(limit);
    kept
  }

  fn describe(&self, blurred: &GrayImage, cx: i32, cy: i32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let rotate = |(x, y): (i32, i32)| {
      let (x, y) = (x as f32, y as f32);
      (
        cx + (cos * x - sin * y).round() as i32,
        cy + (sin * x + cos * y).round() as i32,
      )
    };
    let sample = |(x, y): (i32, i32)| blurred.get_pixel(x as u32, y as u32)[0];

    let mut descriptor = [0u8; 32];
    for (bit, [a, b]) in self.pattern.iter().enumerate() {
      if sample(rotate(*a)) < sample(rotate(*b)) {
        descriptor[bit / 8] |= 1 << (bit % 8);
      }
    }
    descriptor
  }
}

/// 两个描述子之间的汉明距离
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
  a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn is_local_maximum(scores: &ImageBuffer<Luma<f32>, Vec<f32>>, corner: &Corner) -> bool {
  let score = scores.get_pixel(corner.x, corner.y)[0];
  for dy in -1i32..=1 {
    for dx in -1i32..=1 {
      if dx == 0 && dy == 0 {
        continue;
      }
      let x = corner.x as i32 + dx;
      let y = corner.y as i32 + dy;
      if x < 0 || y < 0 || x >= scores.width() as i32 || y >= scores.height() as i32 {
        continue;
      }
      if scores.get_pixel(x as u32, y as u32)[0] > score {
        return false;
      }
    }
  }
  true
}

/// 灰度质心方向
fn intensity_angle(image: &GrayImage, cx: i32, cy: i32, radius: i32) -> f32 {
  let (mut m01, mut m10) = (0.0f32, 0.0f32);
  for dy in -radius..=radius {
    let half_width = ((radius * radius - dy * dy) as f32).sqrt() as i32;
    for dx in -half_width..=half_width {
      let value = image.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0] as f32;
      m10 += dx as f32 * value;
      m01 += dy as f32 * value;
    }
  }
  m01.atan2(m10)
}

fn splitmix64(state: &mut u64) -> u64 {
  *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
  let mut z = *state;
  z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
  z ^ (z >> 31)
}

/// 固定种子生成的采样对，保证每次启动描述子一致
fn sampling_pattern() -> Vec<[(i32, i32); 2]> {
  let mut state = PATTERN_SEED;
  let span = (2 * PATTERN_EXTENT + 1) as u64;
  let mut next = || (splitmix64(&mut state) % span) as i32 - PATTERN_EXTENT;

  let mut pattern = Vec::with_capacity(DESCRIPTOR_BITS);
  while pattern.len() < DESCRIPTOR_BITS {
    let a = (next(), next());
    let b = (next(), next());
    if a != b {
      pattern.push([a, b]);
    }
  }
  pattern
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Luma;
  use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

  fn blocks_image(width: u32, height: u32) -> GrayImage {
    let mut image = GrayImage::from_pixel(width, height, Luma([20]));
    for (i, (x, y, w, h)) in [
      (30, 30, 40, 25),
      (110, 40, 30, 60),
      (50, 120, 70, 30),
      (150, 140, 25, 25),
    ]
    .into_iter()
    .enumerate()
    {
      let shade = 160 + 30 * i as u8;
      draw_filled_rect_mut(&mut image, Rect::at(x, y).of_size(w, h), Luma([shade]));
    }
    image
  }

  #[test]
  fn pattern_is_deterministic_and_in_range() {
    let a = sampling_pattern();
    let b = sampling_pattern();
    assert_eq!(a.len(), DESCRIPTOR_BITS);
    assert_eq!(a, b);
    for [p, q] in a {
      assert_ne!(p, q);
      for (x, y) in [p, q] {
        assert!(x.abs() <= PATTERN_EXTENT && y.abs() <= PATTERN_EXTENT);
      }
    }
  }

  #[test]
  fn hamming_counts_differing_bits() {
    let a = [0u8; 32];
    let mut b = [0u8; 32];
    assert_eq!(hamming_distance(&a, &b), 0);
    b[0] = 0b1011_0000;
    b[31] = 0xff;
    assert_eq!(hamming_distance(&a, &b), 11);
  }

  #[test]
  fn tiny_image_has_no_features() {
    let extractor = OrbExtractor::default();
    let features = extractor.detect_and_compute(&GrayImage::new(20, 20));
    assert!(features.is_empty());
    assert_eq!(features.len(), 0);
  }

  #[test]
  fn corners_of_blocks_are_detected() {
    let extractor = OrbExtractor::default();
    let image = blocks_image(200, 200);
    let features = extractor.detect_and_compute(&image);

    assert!(!features.is_empty());
    assert_eq!(features.keypoints.len(), features.descriptors.len());
    assert!(features.len() <= extractor.config().max_features);
    for kp in &features.keypoints {
      assert!(kp.x >= 0.0 && kp.x < 200.0);
      assert!(kp.y >= 0.0 && kp.y < 200.0);
    }
  }

  #[test]
  fn extraction_is_reproducible() {
    let extractor = OrbExtractor::default();
    let image = blocks_image(200, 200);
    let first = extractor.detect_and_compute(&image);
    let second = extractor.detect_and_compute(&image);
    assert_eq!(first.keypoints, second.keypoints);
    assert_eq!(first.descriptors, second.descriptors);
  }
}
