// 该文件是 Liuguang （流光） 项目的一部分。
// src/input.rs - 视频输入
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

use thiserror::Error;

use crate::frame::Frame;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerSession};

mod video_store;
pub use self::video_store::{StagedVideo, StoreError, VideoStore};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Video source unavailable: {}: {reason}", path.display())]
  SourceUnavailable { path: PathBuf, reason: String },
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("No video decoder compiled in")]
  Unsupported,
}

/// 一次视频解码会话
///
/// 每个 `/video_feed` 请求各自打开一个会话，按顺序逐帧读取，
/// 直到视频结束。会话之间互不共享解码位置。
pub enum VideoSession {
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerSession),
}

impl VideoSession {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    if !path.is_file() {
      return Err(InputError::SourceUnavailable {
        path: path.to_path_buf(),
        reason: "no such file".to_string(),
      });
    }

    #[cfg(feature = "gstreamer_input")]
    {
      match GStreamerSession::open(path) {
        Ok(session) => Ok(VideoSession::GStreamer(session)),
        Err(GStreamerInputError::Unreadable(reason)) => Err(InputError::SourceUnavailable {
          path: path.to_path_buf(),
          reason,
        }),
        Err(e) => Err(e.into()),
      }
    }
    #[cfg(not(feature = "gstreamer_input"))]
    {
      Err(InputError::Unsupported)
    }
  }
}

impl Iterator for VideoSession {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      VideoSession::GStreamer(session) => session.next(),
      #[cfg(not(feature = "gstreamer_input"))]
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_is_source_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uploaded_video.mp4");
    match VideoSession::open(&path) {
      Err(InputError::SourceUnavailable { path: p, .. }) => assert_eq!(p, path),
      Err(e) => panic!("unexpected error: {e}"),
      Ok(_) => panic!("opened a file that does not exist"),
    }
  }

  #[cfg(feature = "gstreamer_input")]
  #[test]
  #[ignore = "需要 GStreamer 插件"]
  fn undecodable_file_is_source_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uploaded_video.mp4");
    std::fs::write(&path, b"definitely not a video").unwrap();
    match VideoSession::open(&path) {
      Err(InputError::SourceUnavailable { path: p, reason }) => {
        assert_eq!(p, path);
        assert!(!reason.is_empty());
      }
      Err(e) => panic!("unexpected error: {e}"),
      Ok(_) => panic!("opened a file that is not a video"),
    }
  }
}
