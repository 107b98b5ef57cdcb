// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/encode.rs - 帧编码
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

use std::io::Cursor;

use clap::ValueEnum;
use image::{ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("空图像无法编码")]
  EmptyImage,
}

/// 推流使用的图像格式，质量取编码库默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FrameFormat {
  #[default]
  Jpeg,
  Png,
}

impl FrameFormat {
  pub fn content_type(&self) -> &'static str {
    match self {
      FrameFormat::Jpeg => "image/jpeg",
      FrameFormat::Png => "image/png",
    }
  }

  fn image_format(&self) -> ImageFormat {
    match self {
      FrameFormat::Jpeg => ImageFormat::Jpeg,
      FrameFormat::Png => ImageFormat::Png,
    }
  }

  pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, EncodeError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(EncodeError::EmptyImage);
    }
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, self.image_format())?;
    Ok(buffer.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn jpeg_has_soi_marker() {
    let image = RgbImage::from_pixel(16, 16, Rgb([10, 200, 30]));
    let bytes = FrameFormat::Jpeg.encode(&image).unwrap();
    assert_eq!(&bytes[..2], &[0xff, 0xd8]);
    assert_eq!(FrameFormat::default().content_type(), "image/jpeg");
  }

  #[test]
  fn png_decodes_back() {
    let image = RgbImage::from_pixel(5, 3, Rgb([1, 2, 3]));
    let bytes = FrameFormat::Png.encode(&image).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(decoded, image);
  }

  #[test]
  fn empty_image_is_rejected() {
    assert!(matches!(
      FrameFormat::Jpeg.encode(&RgbImage::new(0, 0)),
      Err(EncodeError::EmptyImage)
    ));
  }
}
