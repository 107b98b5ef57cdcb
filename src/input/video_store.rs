// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/video_store.rs - 上传视频的固定路径存储
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
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{info, warn};

use super::{InputError, VideoSession};

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 当前视频
///
/// 进程内只有一个视频文件，每次上传整体替换。上传内容先写入同目录下的
/// 临时文件，写完后重命名覆盖，正在解码旧文件的会话不受影响。
#[derive(Debug)]
pub struct VideoStore {
  path: PathBuf,
  staging_counter: AtomicU64,
}

impl VideoStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      staging_counter: AtomicU64::new(0),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 创建存储目录
  pub fn prepare(&self) -> Result<(), StoreError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    Ok(())
  }

  pub fn has_video(&self) -> bool {
    self.path.is_file()
  }

  /// 打开当前视频的一个新解码会话
  pub fn open_session(&self) -> Result<VideoSession, InputError> {
    VideoSession::open(&self.path)
  }

  /// 开始一次上传
  pub async fn stage(&self) -> Result<StagedVideo<'_>, StoreError> {
    let serial = self.staging_counter.fetch_add(1, Ordering::Relaxed);
    let file_name = self
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "video".to_string());
    let staging_path = self
      .path
      .with_file_name(format!(".{}.{}.{}.part", file_name, std::process::id(), serial));

    let file = File::create(&staging_path).await?;
    Ok(StagedVideo {
      store: self,
      staging_path,
      file: Some(file),
      written: 0,
      committed: false,
    })
  }
}

/// 正在写入的上传文件
///
/// 未调用 [`StagedVideo::commit`] 就被丢弃时删除临时文件，当前视频保持不变。
pub struct StagedVideo<'a> {
  store: &'a VideoStore,
  staging_path: PathBuf,
  file: Option<File>,
  written: u64,
  committed: bool,
}

impl StagedVideo<'_> {
  pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
    if let Some(file) = self.file.as_mut() {
      file.write_all(chunk).await?;
      self.written += chunk.len() as u64;
    }
    Ok(())
  }

  /// 写完后替换当前视频，返回写入的字节数
  pub async fn commit(mut self) -> Result<u64, StoreError> {
    if let Some(mut file) = self.file.take() {
      file.flush().await?;
      file.sync_all().await?;
    }
    tokio::fs::rename(&self.staging_path, &self.store.path).await?;
    self.committed = true;
    info!(
      "视频已保存到 {} ({} 字节)",
      self.store.path.display(),
      self.written
    );
    Ok(self.written)
  }
}

impl Drop for StagedVideo<'_> {
  fn drop(&mut self) {
    if self.committed {
      return;
    }
    self.file.take();
    if let Err(e) = std::fs::remove_file(&self.staging_path)
      && e.kind() != std::io::ErrorKind::NotFound
    {
      warn!(
        "无法删除临时文件 {}: {}",
        self.staging_path.display(),
        e
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn commit_replaces_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = VideoStore::new(dir.path().join("uploads").join("uploaded_video.mp4"));
    store.prepare().unwrap();
    assert!(!store.has_video());

    let mut staged = store.stage().await.unwrap();
    staged.write_chunk(b"video A, rather long").await.unwrap();
    assert_eq!(staged.commit().await.unwrap(), 20);

    let mut staged = store.stage().await.unwrap();
    staged.write_chunk(b"video ").await.unwrap();
    staged.write_chunk(b"B").await.unwrap();
    staged.commit().await.unwrap();

    assert_eq!(std::fs::read(store.path()).unwrap(), b"video B");
  }

  #[tokio::test]
  async fn dropped_upload_leaves_current_video() {
    let dir = tempfile::tempdir().unwrap();
    let store = VideoStore::new(dir.path().join("uploaded_video.mp4"));

    let mut staged = store.stage().await.unwrap();
    staged.write_chunk(b"A").await.unwrap();
    staged.commit().await.unwrap();

    {
      let mut staged = store.stage().await.unwrap();
      staged.write_chunk(b"half of B").await.unwrap();
    }

    assert_eq!(std::fs::read(store.path()).unwrap(), b"A");
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
  }
}
