// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{GenericImage, Rgb, RgbImage};
use imageproc::drawing::{
  draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use super::{Annotate, glyph};
use crate::frame::Frame;
use crate::model::{DetectResult, Detections, MatchResult};

const LABEL_FONT_SIZE: f32 = 20.0;
/// 点阵字体放大倍数
const GLYPH_SCALE: u32 = 2;
/// 文本底边与框上沿的距离
const LABEL_OFFSET: i32 = 5;
const KEYPOINT_RADIUS: i32 = 4;
const CLASS_COLORS: [Rgb<u8>; 2] = [Rgb([0, 255, 0]), Rgb([255, 0, 0])];
const PALETTE_SIZE: usize = 24;

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONTS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/Library/Fonts/DejaVuSans.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 检测结果绘制
///
/// 没有 TTF 字体时用内置点阵字体写标签。
pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  palette: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    let palette = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();
    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      palette,
    }
  }

  /// 从字体文件创建，读取失败时返回错误
  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    info!("已加载标签字体: {}", path.display());
    Ok(Self::new(Some(font)))
  }

  /// 加载指定字体，未指定时查找系统 DejaVuSans，都不可用时使用点阵字体
  pub fn with_optional_font(path: Option<&Path>) -> Self {
    let Some(path) = path.map(Path::to_path_buf).or_else(system_font) else {
      info!("未找到 TTF 字体，标签使用内置点阵字体");
      return Self::default();
    };
    match Self::with_font_file(&path) {
      Ok(draw) => draw,
      Err(e) => {
        warn!("无法加载字体 {}，标签使用内置点阵字体: {}", path.display(), e);
        Self::default()
      }
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 类别 0 绿色，类别 1 红色，其余类别取色板
  pub fn class_color(&self, class_id: i64) -> Rgb<u8> {
    match usize::try_from(class_id) {
      Ok(i) if i < CLASS_COLORS.len() => CLASS_COLORS[i],
      _ => self.palette[class_id.unsigned_abs() as usize % self.palette.len()],
    }
  }

  pub fn draw_boxes(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.items.iter() {
      let [x, y, width, height] = item.bbox;
      if width == 0 || height == 0 {
        continue;
      }
      let color = self.class_color(item.class_id);
      let (x, y) = (x as i32, y as i32);

      draw_hollow_rect_mut(image, Rect::at(x, y).of_size(width, height), color);
      // 第二道边框，线宽 2 像素
      if width > 2 && height > 2 {
        let inner = Rect::at(x + 1, y + 1).of_size(width - 2, height - 2);
        draw_hollow_rect_mut(image, inner, color);
      }

      let label = match item.score {
        Some(score) => format!("{} {:.2}", item.label, score),
        None => item.label.clone(),
      };
      match &self.font {
        Some(font) => {
          let (_, text_height) = text_size(self.font_scale, font, &label);
          let text_y = (y - LABEL_OFFSET - text_height as i32).max(0);
          draw_text_mut(image, color, x, text_y, self.font_scale, font, &label);
        }
        None => {
          let (_, text_height) = glyph::text_size(&label, GLYPH_SCALE);
          let text_y = (y - LABEL_OFFSET - text_height as i32).max(0);
          glyph::draw_text(image, color, x, text_y, GLYPH_SCALE, &label);
        }
      }
    }
  }

  /// 并排拼图：左列自上而下放有匹配的参考图，右侧放视频帧，
  /// 每对匹配的关键点画圆并连线
  pub fn draw_matches(&self, frame: &RgbImage, result: &MatchResult) -> RgbImage {
    if result.references.is_empty() {
      return frame.clone();
    }

    let column_width = result
      .references
      .iter()
      .map(|r| r.reference.image.width())
      .max()
      .unwrap_or(0);
    let column_height: u32 = result.references.iter().map(|r| r.reference.image.height()).sum();
    let width = column_width + frame.width();
    let height = column_height.max(frame.height());

    let mut canvas = RgbImage::new(width, height);
    if let Err(e) = canvas.copy_from(frame, column_width, 0) {
      warn!("拼接视频帧失败: {}", e);
      return frame.clone();
    }

    let mut offset_y = 0u32;
    let mut color_index = 0usize;
    for entry in &result.references {
      let reference = &entry.reference;
      let gray = &reference.image;
      for (x, y, pixel) in gray.enumerate_pixels() {
        let v = pixel[0];
        canvas.put_pixel(x, offset_y + y, Rgb([v, v, v]));
      }

      for m in &entry.matches {
        let (Some(from), Some(to)) = (
          reference.features.keypoints.get(m.reference_keypoint),
          result.frame_keypoints.get(m.frame_keypoint),
        ) else {
          continue;
        };
        let color = self.palette[color_index % self.palette.len()];
        color_index += 1;

        let from = (from.x, from.y + offset_y as f32);
        let to = (to.x + column_width as f32, to.y);
        draw_hollow_circle_mut(
          &mut canvas,
          (from.0.round() as i32, from.1.round() as i32),
          KEYPOINT_RADIUS,
          color,
        );
        draw_hollow_circle_mut(
          &mut canvas,
          (to.0.round() as i32, to.1.round() as i32),
          KEYPOINT_RADIUS,
          color,
        );
        draw_line_segment_mut(&mut canvas, from, to, color);
      }

      offset_y += gray.height();
    }

    canvas
  }
}

impl Annotate for Draw {
  fn annotate(&self, frame: &Frame, detections: &Detections) -> RgbImage {
    match detections {
      Detections::Matches(result) => self.draw_matches(&frame.image, result),
      Detections::Boxes(result) => {
        let mut image = frame.image.clone();
        self.draw_boxes(&mut image, result);
        image
      }
    }
  }
}

fn system_font() -> Option<PathBuf> {
  SYSTEM_FONTS
    .iter()
    .map(PathBuf::from)
    .find(|path| path.is_file())
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::features::{FeatureSet, Keypoint};
  use crate::model::{DetectItem, Match, ReferenceMatches, ReferenceSet};
  use image::{GrayImage, Luma};
  use std::sync::Arc;

  fn item(class_id: i64, bbox: [u32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      label: "x".to_string(),
      score: None,
      bbox,
    }
  }

  #[test]
  fn class_colors() {
    let draw = Draw::default();
    assert_eq!(draw.class_color(0), Rgb([0, 255, 0]));
    assert_eq!(draw.class_color(1), Rgb([255, 0, 0]));
    assert_eq!(draw.class_color(2), draw.class_color(2 + PALETTE_SIZE as i64));
  }

  #[test]
  fn boxes_are_two_pixels_wide() {
    let draw = Draw::default();
    assert!(!draw.has_font());

    let frame = Frame::new(RgbImage::new(40, 40), 0);
    let result = DetectResult {
      items: vec![item(1, [10, 10, 20, 20])].into_boxed_slice(),
    };
    let image = draw.annotate(&frame, &Detections::Boxes(result));

    let red = Rgb([255, 0, 0]);
    assert_eq!(*image.get_pixel(10, 15), red);
    assert_eq!(*image.get_pixel(11, 15), red);
    assert_eq!(*image.get_pixel(12, 15), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(29, 20), red);
    assert_eq!(*image.get_pixel(20, 28), red);
    assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn default_draw_labels_boxes() {
    let draw = Draw::default();
    let frame = Frame::new(RgbImage::new(80, 60), 0);
    let mut boxed = item(0, [10, 30, 30, 20]);
    boxed.label = "Ganado".to_string();
    let result = DetectResult {
      items: vec![boxed].into_boxed_slice(),
    };
    let image = draw.annotate(&frame, &Detections::Boxes(result));

    // 标签在框上沿之上 5 像素处结束
    let green = Rgb([0, 255, 0]);
    let label_pixels = (0..80)
      .flat_map(|x| (0..30 - LABEL_OFFSET as u32).map(move |y| (x, y)))
      .filter(|&(x, y)| *image.get_pixel(x, y) == green)
      .count();
    assert!(label_pixels > 20, "only {label_pixels} label pixels");
    for x in 0..80 {
      for y in 30 - LABEL_OFFSET as u32..30 {
        assert_eq!(*image.get_pixel(x, y), Rgb([0, 0, 0]));
      }
    }
  }

  #[test]
  fn missing_font_file_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    assert!(Draw::with_font_file(&path).is_err());
    assert!(!Draw::with_optional_font(Some(path.as_path())).has_font());

    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      Draw::with_font_file(&path),
      Err(DrawError::InvalidFont(_))
    ));
  }

  #[test]
  fn match_composite_layout() {
    let keypoint = |x: f32, y: f32| Keypoint {
      x,
      y,
      angle: 0.0,
      octave: 0,
      size: 31.0,
      response: 1.0,
    };
    let reference = |name: &str, w: u32, h: u32| {
      Arc::new(ReferenceSet {
        name: name.to_string(),
        image: GrayImage::from_pixel(w, h, Luma([200])),
        features: FeatureSet {
          keypoints: vec![keypoint(5.0, 5.0)],
          descriptors: vec![[0u8; 32]],
        },
      })
    };
    let matched = |r| ReferenceMatches {
      reference: r,
      matches: vec![Match {
        reference_keypoint: 0,
        frame_keypoint: 0,
        distance: 0,
      }],
    };

    let result = MatchResult {
      frame_keypoints: vec![keypoint(20.0, 20.0)],
      references: vec![matched(reference("a", 30, 30)), matched(reference("b", 50, 40))],
    };
    let frame = Frame::new(RgbImage::from_pixel(60, 50, Rgb([1, 2, 3])), 0);
    let canvas = Draw::default().annotate(&frame, &Detections::Matches(result));

    assert_eq!(canvas.dimensions(), (50 + 60, 70));
    // 第二张参考图从 y=30 开始
    assert_eq!(*canvas.get_pixel(45, 60), Rgb([200, 200, 200]));
    // 帧位于右侧
    assert_eq!(*canvas.get_pixel(50 + 59, 0), Rgb([1, 2, 3]));
    // 第一张参考图右侧、帧下方为空白
    assert_eq!(*canvas.get_pixel(45, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn no_matches_returns_frame() {
    let frame = Frame::new(RgbImage::from_pixel(8, 8, Rgb([7, 7, 7])), 0);
    let canvas = Draw::default().annotate(&frame, &Detections::Matches(MatchResult::default()));
    assert_eq!(canvas, frame.image);
  }
}
