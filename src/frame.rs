// 该文件是 Liuguang （流光） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::{GrayImage, Luma, RgbImage};

/// 解码后的一帧图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧在视频中的序号（从 0 开始）
  pub index: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64) -> Self {
    Self { image, index }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn is_empty(&self) -> bool {
    self.image.width() == 0 || self.image.height() == 0
  }

  /// 转为灰度图
  pub fn to_gray(&self) -> GrayImage {
    rgb_to_gray(&self.image)
  }
}

/// BT.601 加权灰度化 (0.299 R + 0.587 G + 0.114 B)
///
/// 分类器的训练样本使用同样的系数生成，`image::imageops::grayscale`
/// 使用的是 BT.709 系数，二者结果不同。
pub fn rgb_to_gray(image: &RgbImage) -> GrayImage {
  GrayImage::from_fn(image.width(), image.height(), |x, y| {
    let [r, g, b] = image.get_pixel(x, y).0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    Luma([luma.round().clamp(0.0, 255.0) as u8])
  })
}

/// 双线性插值定点系数的位数
const RESIZE_COEF_BITS: u32 = 11;
const RESIZE_COEF_SCALE: i32 = 1 << RESIZE_COEF_BITS;

/// 灰度图缩放，与训练时的 `cv2.resize` 默认插值 (INTER_LINEAR) 逐像素一致
///
/// 目标像素中心映射到 `(d + 0.5) * scale - 0.5`，取相邻 2x2 像素按 11 位定点系数
/// 加权，越界的一侧系数为 0。宽高恰好缩小一半时退化为 2x2 均值 (INTER_AREA)。
/// `image::imageops::resize` 的 Triangle 滤波在缩小时会按面积加权，结果不同。
pub fn resize_linear(src: &GrayImage, width: u32, height: u32) -> GrayImage {
  let (src_w, src_h) = src.dimensions();
  if (src_w, src_h) == (width, height) {
    return src.clone();
  }
  if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
    return GrayImage::new(width, height);
  }

  if src_w == width * 2 && src_h == height * 2 {
    return GrayImage::from_fn(width, height, |x, y| {
      let sum: u32 = [(0, 0), (1, 0), (0, 1), (1, 1)]
        .iter()
        .map(|&(dx, dy)| src.get_pixel(x * 2 + dx, y * 2 + dy)[0] as u32)
        .sum();
      Luma([((sum + 2) >> 2) as u8])
    });
  }

  let xs = linear_taps(src_w, width);
  let ys = linear_taps(src_h, height);

  // 先水平插值，保留定点精度
  let rows: Vec<Vec<i32>> = (0..src_h)
    .map(|y| {
      xs.iter()
        .map(|&(x0, x1, a0, a1)| {
          src.get_pixel(x0, y)[0] as i32 * a0 + src.get_pixel(x1, y)[0] as i32 * a1
        })
        .collect()
    })
    .collect();

  let shift = RESIZE_COEF_BITS * 2;
  GrayImage::from_fn(width, height, |x, y| {
    let (y0, y1, b0, b1) = ys[y as usize];
    let top = rows[y0 as usize][x as usize] as i64;
    let bottom = rows[y1 as usize][x as usize] as i64;
    let value = (top * b0 as i64 + bottom * b1 as i64 + (1 << (shift - 1))) >> shift;
    Luma([value.clamp(0, 255) as u8])
  })
}

/// 每个目标坐标对应的两个源坐标及其定点系数
fn linear_taps(src_len: u32, dst_len: u32) -> Vec<(u32, u32, i32, i32)> {
  let scale = src_len as f64 / dst_len as f64;
  let last = src_len - 1;
  (0..dst_len)
    .map(|d| {
      let f = (d as f64 + 0.5) * scale - 0.5;
      let mut s = f.floor();
      let mut frac = f - s;
      if s < 0.0 {
        s = 0.0;
        frac = 0.0;
      }
      if s >= last as f64 {
        s = last as f64;
        frac = 0.0;
      }
      let s = s as u32;
      let a0 = ((1.0 - frac) * RESIZE_COEF_SCALE as f64).round() as i32;
      (s, (s + 1).min(last), a0, RESIZE_COEF_SCALE - a0)
    })
    .collect()
}
