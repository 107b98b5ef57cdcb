// 该文件是 Liuguang （流光） 项目的一部分。
// src/task.rs - 单个推流会话的处理循环
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

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::model::{Detections, Model};
use crate::output::{Annotate, FrameFormat, mjpeg};
use crate::stats::StreamStats;

/// 接收编码好的 multipart 片段
pub trait FrameSink {
  /// 返回 `false` 表示对端已断开
  fn send(&mut self, part: Bytes) -> bool;
}

impl FrameSink for tokio::sync::mpsc::Sender<Bytes> {
  fn send(&mut self, part: Bytes) -> bool {
    self.blocking_send(part).is_ok()
  }
}

impl FrameSink for Vec<Bytes> {
  fn send(&mut self, part: Bytes) -> bool {
    self.push(part);
    true
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
  pub frames: u64,
  pub bytes: u64,
  /// 客户端在视频结束前断开
  pub disconnected: bool,
}

/// 解码 → 检测 → 绘制 → 编码 → 发送，逐帧同步执行
pub struct StreamTask<'a, M, A> {
  model: &'a M,
  annotator: &'a A,
  stats: &'a StreamStats,
  format: FrameFormat,
}

impl<'a, M, A, E> StreamTask<'a, M, A>
where
  M: Model<Input = Frame, Output = Detections, Error = E>,
  E: std::error::Error,
  A: Annotate,
{
  pub fn new(model: &'a M, annotator: &'a A, stats: &'a StreamStats, format: FrameFormat) -> Self {
    Self {
      model,
      annotator,
      stats,
      format,
    }
  }

  pub fn run_task<I, S>(self, input: I, sink: &mut S) -> StreamSummary
  where
    I: Iterator<Item = Frame>,
    S: FrameSink,
  {
    info!("开始推流会话");
    let mut summary = StreamSummary::default();

    for frame in input {
      let now = Instant::now();
      let annotated = match self.model.infer(&frame) {
        Ok(detections) => self.annotator.annotate(&frame, &detections),
        Err(e) => {
          warn!("第 {} 帧检测失败: {}", frame.index, e);
          frame.image
        }
      };

      let payload = match self.format.encode(&annotated) {
        Ok(payload) => payload,
        Err(e) => {
          warn!("第 {} 帧编码失败，跳过: {}", frame.index, e);
          continue;
        }
      };
      let part = mjpeg::frame_part(self.format.content_type(), &payload);
      let elapsed = now.elapsed();

      self.stats.record_frame(payload.len(), elapsed);
      summary.frames += 1;
      summary.bytes += payload.len() as u64;
      debug!("第 {} 帧处理完成，耗时: {:.2?}", frame.index, elapsed);

      if !sink.send(part) {
        info!("客户端已断开，停止解码");
        summary.disconnected = true;
        break;
      }
    }

    info!(
      "推流会话结束，共发送 {} 帧 ({} 字节)",
      summary.frames, summary.bytes
    );
    summary
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectError, DetectItem, DetectResult};
  use crate::output::Draw;
  use image::RgbImage;

  /// 每帧在左上角报告一个框，奇数帧为空
  struct CornerModel;

  impl Model for CornerModel {
    type Input = Frame;
    type Output = Detections;
    type Error = DetectError;

    fn infer(&self, frame: &Frame) -> Result<Detections, DetectError> {
      if frame.index % 2 == 1 {
        return Err(DetectError::EmptyFrame { index: frame.index });
      }
      Ok(Detections::Boxes(DetectResult {
        items: vec![DetectItem {
          class_id: 0,
          label: "Ganado".to_string(),
          score: None,
          bbox: [0, 0, 4, 4],
        }]
        .into_boxed_slice(),
      }))
    }
  }

  fn frames(n: u64) -> impl Iterator<Item = Frame> {
    (0..n).map(|i| Frame::new(RgbImage::new(16, 16), i))
  }

  #[test]
  fn every_frame_is_sent_in_order() {
    let stats = StreamStats::new();
    let draw = Draw::default();
    let mut sink: Vec<Bytes> = Vec::new();

    let summary =
      StreamTask::new(&CornerModel, &draw, &stats, FrameFormat::Png).run_task(frames(4), &mut sink);

    assert_eq!(summary.frames, 4);
    assert!(!summary.disconnected);
    assert_eq!(sink.len(), 4);
    assert_eq!(stats.frames(), 4);
    for part in &sink {
      assert!(part.starts_with(b"--frame\r\nContent-Type: image/png\r\n\r\n"));
      assert!(part.ends_with(b"\r\n"));
    }

    // 偶数帧画了绿框，奇数帧检测失败，原样输出
    let decode = |part: &Bytes| {
      let header = b"--frame\r\nContent-Type: image/png\r\n\r\n".len();
      image::load_from_memory(&part[header..part.len() - 2])
        .unwrap()
        .to_rgb8()
    };
    assert_eq!(decode(&sink[0]).get_pixel(0, 0).0, [0, 255, 0]);
    assert_eq!(decode(&sink[1]).get_pixel(0, 0).0, [0, 0, 0]);
  }

  struct HangUpAfter(usize, Vec<Bytes>);

  impl FrameSink for HangUpAfter {
    fn send(&mut self, part: Bytes) -> bool {
      if self.1.len() >= self.0 {
        return false;
      }
      self.1.push(part);
      true
    }
  }

  #[test]
  fn disconnect_stops_decoding() {
    let stats = StreamStats::new();
    let draw = Draw::default();
    let mut sink = HangUpAfter(2, Vec::new());
    let mut pulled = 0;
    let input = frames(100).inspect(|_| pulled += 1);

    let summary =
      StreamTask::new(&CornerModel, &draw, &stats, FrameFormat::Jpeg).run_task(input, &mut sink);

    assert!(summary.disconnected);
    assert_eq!(sink.1.len(), 2);
    assert_eq!(pulled, 3);
  }

  #[test]
  fn empty_source_sends_nothing() {
    let stats = StreamStats::new();
    let draw = Draw::default();
    let mut sink: Vec<Bytes> = Vec::new();
    let summary =
      StreamTask::new(&CornerModel, &draw, &stats, FrameFormat::Jpeg).run_task(frames(0), &mut sink);
    assert_eq!(summary, StreamSummary::default());
    assert!(sink.is_empty());
  }
}
