// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/hog.rs - 方向梯度直方图 (HOG)
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

//! HOG 特征
//!
//! 计算过程与训练分类器时使用的实现逐项一致，任何偏差都会让分类器失效：
//!
//! 1. 中心差分梯度，边界行列的梯度为 0；
//! 2. 无符号方向，取值 [0, 180)；
//! 3. 每个 cell 内按方向硬分箱累加梯度幅值，再除以 cell 面积；
//! 4. block 以一个 cell 为步长滑动，逐块归一化；
//! 5. 输出顺序为 (block 行, block 列, cell 行, cell 列, 方向)。

use image::GrayImage;
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-5;
const HYS_CLIP: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockNorm {
  #[serde(rename = "L1")]
  L1,
  #[serde(rename = "L1-sqrt")]
  L1Sqrt,
  #[serde(rename = "L2")]
  L2,
  #[serde(rename = "L2-Hys")]
  L2Hys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HogConfig {
  pub orientations: usize,
  /// [行, 列]
  pub pixels_per_cell: [usize; 2],
  /// [行, 列]
  pub cells_per_block: [usize; 2],
  pub block_norm: BlockNorm,
}

impl Default for HogConfig {
  fn default() -> Self {
    Self {
      orientations: 12,
      pixels_per_cell: [8, 8],
      cells_per_block: [2, 2],
      block_norm: BlockNorm::L2Hys,
    }
  }
}

impl HogConfig {
  fn layout(&self, width: usize, height: usize) -> Option<Layout> {
    let [cell_rows, cell_cols] = self.pixels_per_cell;
    let [block_rows, block_cols] = self.cells_per_block;
    if self.orientations == 0 || cell_rows == 0 || cell_cols == 0 || block_rows == 0 || block_cols == 0
    {
      return None;
    }

    let n_cells_row = height / cell_rows;
    let n_cells_col = width / cell_cols;
    if n_cells_row < block_rows || n_cells_col < block_cols {
      return None;
    }

    Some(Layout {
      n_cells_row,
      n_cells_col,
      n_blocks_row: n_cells_row - block_rows + 1,
      n_blocks_col: n_cells_col - block_cols + 1,
    })
  }

  /// 给定图像尺寸下的特征长度，图像放不下一个 block 时为 0
  pub fn feature_len(&self, width: u32, height: u32) -> usize {
    self
      .layout(width as usize, height as usize)
      .map(|l| {
        l.n_blocks_row
          * l.n_blocks_col
          * self.cells_per_block[0]
          * self.cells_per_block[1]
          * self.orientations
      })
      .unwrap_or(0)
  }
}

struct Layout {
  n_cells_row: usize,
  n_cells_col: usize,
  n_blocks_row: usize,
  n_blocks_col: usize,
}

/// 计算灰度图的 HOG 特征向量
pub fn hog(image: &GrayImage, config: &HogConfig) -> Vec<f64> {
  let (width, height) = (image.width() as usize, image.height() as usize);
  let Some(layout) = config.layout(width, height) else {
    return Vec::new();
  };

  let pixel = |x: usize, y: usize| image.get_pixel(x as u32, y as u32)[0] as f64;

  let mut magnitude = vec![0.0f64; width * height];
  let mut orientation = vec![0.0f64; width * height];
  for y in 0..height {
    for x in 0..width {
      let g_row = if y == 0 || y + 1 == height {
        0.0
      } else {
        pixel(x, y + 1) - pixel(x, y - 1)
      };
      let g_col = if x == 0 || x + 1 == width {
        0.0
      } else {
        pixel(x + 1, y) - pixel(x - 1, y)
      };
      let idx = y * width + x;
      magnitude[idx] = g_col.hypot(g_row);
      orientation[idx] = g_row.atan2(g_col).to_degrees().rem_euclid(180.0);
    }
  }

  let bins = config.orientations;
  let [cell_rows, cell_cols] = config.pixels_per_cell;
  let bin_width = 180.0 / bins as f64;
  let cell_area = (cell_rows * cell_cols) as f64;

  // [cell 行][cell 列][方向]
  let mut histogram = vec![0.0f64; layout.n_cells_row * layout.n_cells_col * bins];
  for cr in 0..layout.n_cells_row {
    for cc in 0..layout.n_cells_col {
      let base = (cr * layout.n_cells_col + cc) * bins;
      for y in cr * cell_rows..(cr + 1) * cell_rows {
        for x in cc * cell_cols..(cc + 1) * cell_cols {
          let idx = y * width + x;
          let bin = ((orientation[idx] / bin_width) as usize).min(bins - 1);
          histogram[base + bin] += magnitude[idx];
        }
      }
      for value in &mut histogram[base..base + bins] {
        *value /= cell_area;
      }
    }
  }

  let [block_rows, block_cols] = config.cells_per_block;
  let block_len = block_rows * block_cols * bins;
  let mut features = Vec::with_capacity(layout.n_blocks_row * layout.n_blocks_col * block_len);
  let mut block = Vec::with_capacity(block_len);
  for br in 0..layout.n_blocks_row {
    for bc in 0..layout.n_blocks_col {
      block.clear();
      for cr in br..br + block_rows {
        for cc in bc..bc + block_cols {
          let base = (cr * layout.n_cells_col + cc) * bins;
          block.extend_from_slice(&histogram[base..base + bins]);
        }
      }
      normalize_block(&mut block, config.block_norm);
      features.extend_from_slice(&block);
    }
  }

  features
}

fn l2_normalize(block: &mut [f64]) {
  let norm = (block.iter().map(|v| v * v).sum::<f64>() + EPS * EPS).sqrt();
  block.iter_mut().for_each(|v| *v /= norm);
}

fn normalize_block(block: &mut [f64], norm: BlockNorm) {
  match norm {
    BlockNorm::L1 => {
      let sum = block.iter().map(|v| v.abs()).sum::<f64>() + EPS;
      block.iter_mut().for_each(|v| *v /= sum);
    }
    BlockNorm::L1Sqrt => {
      let sum = block.iter().map(|v| v.abs()).sum::<f64>() + EPS;
      block.iter_mut().for_each(|v| *v = (*v / sum).sqrt());
    }
    BlockNorm::L2 => l2_normalize(block),
    BlockNorm::L2Hys => {
      l2_normalize(block);
      block.iter_mut().for_each(|v| *v = v.min(HYS_CLIP));
      l2_normalize(block);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Luma;

  fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
      assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
    }
  }

  #[test]
  fn default_layout_on_64x64() {
    let config = HogConfig::default();
    assert_eq!(config.feature_len(64, 64), 7 * 7 * 2 * 2 * 12);
    assert_eq!(hog(&GrayImage::new(64, 64), &config).len(), 2352);
  }

  #[test]
  fn too_small_image_has_no_features() {
    let config = HogConfig::default();
    assert_eq!(config.feature_len(15, 64), 0);
    assert!(hog(&GrayImage::new(15, 64), &config).is_empty());
  }

  #[test]
  fn flat_image_is_all_zero() {
    let image = GrayImage::from_pixel(64, 64, Luma([128]));
    let features = hog(&image, &HogConfig::default());
    assert!(features.iter().all(|v| *v == 0.0));
  }

  #[test]
  fn vertical_edge_goes_to_first_bin() {
    let image = GrayImage::from_fn(64, 64, |x, _| Luma([if x < 30 { 0 } else { 255 }]));
    let features = hog(&image, &HogConfig::default());

    let mut energy = [0.0f64; 12];
    for (i, v) in features.iter().enumerate() {
      energy[i % 12] += v;
    }
    assert!(energy[0] > 0.0);
    assert!(energy[1..].iter().all(|v| *v == 0.0));
  }

  #[test]
  fn horizontal_edge_goes_to_ninety_degrees() {
    let image = GrayImage::from_fn(64, 64, |_, y| Luma([if y < 30 { 0 } else { 255 }]));
    let features = hog(&image, &HogConfig::default());

    let mut energy = [0.0f64; 12];
    for (i, v) in features.iter().enumerate() {
      energy[i % 12] += v;
    }
    for (bin, value) in energy.iter().enumerate() {
      if bin == 6 {
        assert!(*value > 0.0);
      } else {
        assert_eq!(*value, 0.0);
      }
    }
  }

  #[test]
  fn block_normalizations() {
    let mut block = [1.0, 3.0];
    normalize_block(&mut block, BlockNorm::L1);
    assert_close(&block, &[0.25, 0.75]);

    let mut block = [1.0, 3.0];
    normalize_block(&mut block, BlockNorm::L1Sqrt);
    assert_close(&block, &[0.5, 0.75f64.sqrt()]);

    let mut block = [3.0, 4.0];
    normalize_block(&mut block, BlockNorm::L2);
    assert_close(&block, &[0.6, 0.8]);

    let mut block = [3.0, 4.0];
    normalize_block(&mut block, BlockNorm::L2Hys);
    let half = 0.5f64.sqrt();
    assert_close(&block, &[half, half]);
  }

  #[test]
  fn config_reads_training_names() {
    let json = r#"{
      "orientations": 12,
      "pixels_per_cell": [8, 8],
      "cells_per_block": [2, 2],
      "block_norm": "L2-Hys"
    }"#;
    let config: HogConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config, HogConfig::default());
  }
}
