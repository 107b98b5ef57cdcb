// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/mjpeg.rs - multipart 推流封装
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

use bytes::{BufMut, Bytes, BytesMut};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 一帧对应的 multipart 片段：
///
/// ```text
/// --frame\r\nContent-Type: image/jpeg\r\n\r\n<数据>\r\n
/// ```
pub fn frame_part(content_type: &str, payload: &[u8]) -> Bytes {
  let header = format!("--{}\r\nContent-Type: {}\r\n\r\n", BOUNDARY, content_type);
  let mut part = BytesMut::with_capacity(header.len() + payload.len() + 2);
  part.put_slice(header.as_bytes());
  part.put_slice(payload);
  part.put_slice(b"\r\n");
  part.freeze()
}
