// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件解码
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

//! # GStreamer 视频文件解码
//!
//! 管道结构：
//!
//! ```text
//! filesrc ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink
//! ```
//!
//! appsink 关闭时钟同步并且只缓存一帧，不丢帧：解码速度由下游
//! 拉取速度决定，帧按源顺序逐个输出。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::frame::Frame;

const PIPELINE_DESCRIPTION: &str = "filesrc name=src ! decodebin ! videoconvert ! \
   video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=1 drop=false";

/// 预卷等待时间
const PREROLL_TIMEOUT_SECS: u64 = 10;
/// 拉取样本的轮询间隔，期间检查总线上的错误
const PULL_POLL_MILLIS: u64 = 100;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取管道元素
  #[error("Failed to get element {0}")]
  ElementNotFound(&'static str),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 文件无法解析为视频
  #[error("Unreadable video: {0}")]
  Unreadable(String),
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 基于 GStreamer 的单次解码会话
pub struct GStreamerSession {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
  finished: bool,
}

impl GStreamerSession {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    debug!("GStreamer pipeline description: {}", PIPELINE_DESCRIPTION);

    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    // 路径单独设置，避免在管道描述里处理空格和引号
    let src = pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::ElementNotFound("filesrc"))?;
    src.set_property("location", path.to_string_lossy().into_owned());

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::ElementNotFound("appsink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::PipelineError("Element sink is not an appsink".into()))?;

    let session = GStreamerSession {
      pipeline,
      appsink,
      frame_index: 0,
      finished: false,
    };

    // 先预卷，文件无法解析时在这里就失败
    let result = session.pipeline.set_state(gst::State::Paused).and_then(|_| {
      let (result, _, _) = session
        .pipeline
        .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
      result
    });
    if let Err(e) = result {
      let reason = session
        .pop_bus_error()
        .unwrap_or_else(|| format!("preroll failed: {}", e));
      return Err(GStreamerInputError::Unreadable(reason));
    }
    session.pipeline.set_state(gst::State::Playing)?;

    info!("视频会话已打开: {}", path.display());
    Ok(session)
  }

  fn pop_bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      )),
      _ => None,
    }
  }

  fn pull_sample(&self) -> Option<gst::Sample> {
    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_POLL_MILLIS))
      {
        return Some(sample);
      }
      if self.appsink.is_eos() {
        debug!("视频流结束");
        return None;
      }
      if let Some(reason) = self.pop_bus_error() {
        error!("解码失败: {}", reason);
        return None;
      }
    }
  }
}

impl Drop for GStreamerSession {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
    debug!("视频会话已释放，共输出 {} 帧", self.frame_index);
  }
}

impl Iterator for GStreamerSession {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let image = self
      .pull_sample()
      .map(|sample| convert_sample_to_rgb(&sample))
      .and_then(|converted| {
        converted
          .map_err(|e| {
            error!("Failed to convert sample: {}", e);
            e
          })
          .ok()
      });

    match image {
      Some(image) => {
        let frame = Frame::new(image, self.frame_index);
        self.frame_index += 1;
        Some(frame)
      }
      None => {
        self.finished = true;
        None
      }
    }
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  // RGB 行按 4 字节对齐，不能假设 stride == width * 3
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * height.saturating_sub(1) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width * height * 3);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + width * 3]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in 0..height {
        let start = row * stride;
        for px in data[start..start + width * 3].chunks_exact(3) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: 0,
    },
  )
}
