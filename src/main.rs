// 该文件是 Liuguang （流光） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use liuguang::FromUrl;
use liuguang::input::VideoStore;
use liuguang::model::DetectorWrapper;
use liuguang::output::Draw;
use liuguang::server::{AppState, router, serve, shutdown_signal, upload_limit_bytes};
use liuguang::stats::{ProcMeminfo, StreamStats};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = args::Args::parse();

  info!("Liuguang 标注视频推流服务");
  info!("监听地址: {}", args.bind);
  info!("视频路径: {}", args.video_path.display());
  info!("检测器: {}", args.detector);
  info!("编码格式: {:?}", args.format);
  info!("上传上限: {} MiB", args.max_upload_mb);

  // 统计从进程启动开始计时
  let stats = Arc::new(StreamStats::new());

  let url = Url::parse(&args.detector).context("检测器 URL 无效")?;
  let detector = DetectorWrapper::from_url(&url).context("检测器加载失败")?;
  let draw = Draw::with_optional_font(args.font.as_deref());

  let store = VideoStore::new(&args.video_path);
  store.prepare().context("无法创建视频目录")?;

  let state = AppState {
    detector: Arc::new(detector),
    draw: Arc::new(draw),
    stats,
    store: Arc::new(store),
    memory: Arc::new(ProcMeminfo::default()),
    format: args.format,
  };
  let max_upload_bytes = upload_limit_bytes(args.max_upload_mb)
    .with_context(|| format!("上传上限过大: {} MiB", args.max_upload_mb))?;
  let app = router(state, max_upload_bytes);

  let listener = tokio::net::TcpListener::bind(&args.bind)
    .await
    .with_context(|| format!("无法监听 {}", args.bind))?;
  serve(listener, app, shutdown_signal()).await?;

  info!("服务已退出");
  Ok(())
}
