// 该文件是 Liuguang （流光） 项目的一部分。
// src/server.rs - HTTP 服务
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

//! # HTTP 接口
//!
//! | 路径            | 方法 | 说明                                   |
//! |-----------------|------|----------------------------------------|
//! | `/`             | GET  | 状态页，嵌入视频流并每秒刷新统计       |
//! | `/upload_video` | POST | multipart 上传，字段名 `video`         |
//! | `/video_feed`   | GET  | `multipart/x-mixed-replace` 标注视频流 |
//! | `/stats`        | GET  | JSON 统计                              |
//!
//! 每个 `/video_feed` 请求在阻塞线程上独立解码当前视频，经容量为 1 的
//! 通道把片段交给响应体。客户端断开后通道关闭，解码线程在下一次发送时退出。

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
  Json, Router,
  body::Body,
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
  http::{StatusCode, header},
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use bytes::Bytes;
use thiserror::Error;
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{error, info, warn};

use crate::input::{StoreError, VideoStore};
use crate::model::DetectorWrapper;
use crate::output::{Draw, FrameFormat, mjpeg};
use crate::stats::{MemoryProbe, StatsSnapshot, StreamStats};
use crate::task::StreamTask;

/// 上传字段名
pub const VIDEO_FIELD: &str = "video";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 100;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = DEFAULT_MAX_UPLOAD_MB * 1024 * 1024;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>流光 实时检测</title>
    <script>
      function refreshStats() {
        fetch('/stats')
          .then(response => response.json())
          .then(data => {
            document.getElementById('ram').innerText = '内存: ' + data.ram + ' MB';
            document.getElementById('fps').innerText = 'FPS: ' + data.fps;
            document.getElementById('bandwidth').innerText = '带宽: ' + data.bandwidth + ' KB/s';
            document.getElementById('latency').innerText = '每帧耗时: ' + data.latency + ' ms';
          });
      }
      setInterval(refreshStats, 1000);
    </script>
  </head>
  <body onload="refreshStats()">
    <h1>实时检测</h1>
    <p id="ram">内存: 加载中...</p>
    <p id="fps">FPS: 加载中...</p>
    <p id="bandwidth">带宽: 加载中...</p>
    <p id="latency">每帧耗时: 加载中...</p>
    <img src="/video_feed" width="840" height="680">
  </body>
</html>
"#;

/// 所有请求共享的状态
#[derive(Clone)]
pub struct AppState {
  pub detector: Arc<DetectorWrapper>,
  pub draw: Arc<Draw>,
  pub stats: Arc<StreamStats>,
  pub store: Arc<VideoStore>,
  pub memory: Arc<dyn MemoryProbe>,
  pub format: FrameFormat,
}

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("No video received")]
  NoUploadProvided,
  #[error("Upload rejected: {0}")]
  Multipart(#[from] MultipartError),
  #[error("Failed to store video: {0}")]
  Store(#[from] StoreError),
}

impl IntoResponse for UploadError {
  fn into_response(self) -> Response {
    // 超过上限时 axum 给出 413，其余解析错误为 400
    let status = match &self {
      UploadError::NoUploadProvided => StatusCode::BAD_REQUEST,
      UploadError::Multipart(e) => e.status(),
      UploadError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("上传失败: {}", self);
    (status, self.to_string()).into_response()
  }
}

/// MiB 换算为字节，溢出时返回 `None`
pub fn upload_limit_bytes(mb: usize) -> Option<usize> {
  mb.checked_mul(1024 * 1024)
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
  Router::new()
    .route("/", get(index))
    .route("/upload_video", post(upload_video))
    .route("/video_feed", get(video_feed))
    .route("/stats", get(stats))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .with_state(state)
}

/// 在给定监听器上运行服务，`shutdown` 完成后优雅退出
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
  F: Future<Output = ()> + Send + 'static,
{
  if let Ok(addr) = listener.local_addr() {
    info!("HTTP 服务监听于 http://{}", addr);
  }
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown)
    .await
}

async fn index() -> Html<&'static str> {
  Html(INDEX_HTML)
}

async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
  Json(state.stats.snapshot(state.memory.as_ref()))
}

async fn upload_video(
  State(state): State<AppState>,
  mut multipart: Multipart,
) -> Result<&'static str, UploadError> {
  while let Some(mut field) = multipart.next_field().await? {
    if field.name() != Some(VIDEO_FIELD) {
      continue;
    }

    info!(
      "开始接收上传视频 {}",
      field.file_name().unwrap_or("<unnamed>")
    );
    let mut staged = state.store.stage().await?;
    while let Some(chunk) = field.chunk().await? {
      staged.write_chunk(&chunk).await?;
    }
    staged.commit().await?;
    return Ok("Video uploaded successfully");
  }

  Err(UploadError::NoUploadProvided)
}

async fn video_feed(State(state): State<AppState>) -> Response {
  let (tx, mut rx) = mpsc::channel::<Bytes>(1);

  tokio::task::spawn_blocking(move || {
    let mut tx = tx;
    let session = match state.store.open_session() {
      Ok(session) => session,
      Err(e) => {
        warn!("无法打开视频: {}", e);
        return;
      }
    };
    StreamTask::new(
      state.detector.as_ref(),
      state.draw.as_ref(),
      state.stats.as_ref(),
      state.format,
    )
    .run_task(session, &mut tx);
  });

  let body = async_stream::stream! {
    while let Some(part) = rx.recv().await {
      yield Ok::<Bytes, Infallible>(part);
    }
  };

  (
    [(header::CONTENT_TYPE, mjpeg::CONTENT_TYPE)],
    Body::from_stream(body),
  )
    .into_response()
}

/// 等待 Ctrl-C
pub async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("收到中断信号，准备退出..."),
    Err(e) => error!("无法监听中断信号: {}", e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn upload_limit_conversion() {
    assert_eq!(upload_limit_bytes(DEFAULT_MAX_UPLOAD_MB), Some(DEFAULT_MAX_UPLOAD_BYTES));
    assert_eq!(upload_limit_bytes(0), Some(0));
    assert_eq!(upload_limit_bytes(usize::MAX), None);
    assert_eq!(upload_limit_bytes(usize::MAX / (1024 * 1024) + 1), None);
  }
}
