// 该文件是 Liuguang （流光） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use liuguang::output::FrameFormat;
use liuguang::server::DEFAULT_MAX_UPLOAD_MB;

/// Liuguang 标注视频推流服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:5000", value_name = "ADDR")]
  pub bind: String,

  /// 上传视频的保存路径，每次上传整体替换
  #[arg(long, default_value = "uploads/uploaded_video.mp4", value_name = "FILE")]
  pub video_path: PathBuf,

  /// 检测器 URL
  /// 支持格式:
  /// - 特征匹配: match:?ref=maiz:maiz.jpg&ref=mascara:mascara.png&ratio=0.6
  /// - 滑动窗口分类: svm:modelo_svm_hog5.json?step=146&window=710x710
  #[arg(long, value_name = "URL")]
  pub detector: String,

  /// 标签字体文件 (TTF/OTF)，不指定时查找系统 DejaVuSans，找不到则用内置点阵字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 推流帧编码格式
  #[arg(long, value_enum, default_value_t = FrameFormat::Jpeg)]
  pub format: FrameFormat,

  /// 上传大小上限 (MiB)
  #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB, value_name = "MB")]
  pub max_upload_mb: usize,
}
