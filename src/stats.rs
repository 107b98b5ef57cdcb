// 该文件是 Liuguang （流光） 项目的一部分。
// src/stats.rs - 推流统计
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
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

/// 进程启动到现在的时间为 0 时使用的替代值（秒）
const MIN_ELAPSED_SECS: f64 = 1e-4;

/// 主机内存占用
pub trait MemoryProbe: Send + Sync {
  /// 已使用的内存字节数，无法获取时为 `None`
  fn used_bytes(&self) -> Option<u64>;
}

/// 读取 `/proc/meminfo`
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
  path: PathBuf,
}

impl Default for ProcMeminfo {
  fn default() -> Self {
    Self {
      path: PathBuf::from("/proc/meminfo"),
    }
  }
}

impl ProcMeminfo {
  pub fn with_path(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl MemoryProbe for ProcMeminfo {
  fn used_bytes(&self) -> Option<u64> {
    match std::fs::read_to_string(&self.path) {
      Ok(text) => parse_meminfo(&text),
      Err(e) => {
        debug!("无法读取 {}: {}", self.path.display(), e);
        None
      }
    }
  }
}

/// MemTotal - MemFree - Buffers - Cached - SReclaimable，单位字节
pub fn parse_meminfo(text: &str) -> Option<u64> {
  let field = |name: &str| -> Option<u64> {
    text.lines().find_map(|line| {
      let rest = line.strip_prefix(name)?.strip_prefix(':')?;
      let kib = rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok()?;
      Some(kib * 1024)
    })
  };

  let total = field("MemTotal")?;
  let free = field("MemFree")?;
  let buffers = field("Buffers").unwrap_or(0);
  let cached = field("Cached").unwrap_or(0);
  let reclaimable = field("SReclaimable").unwrap_or(0);
  Some(
    total
      .saturating_sub(free)
      .saturating_sub(buffers)
      .saturating_sub(cached)
      .saturating_sub(reclaimable),
  )
}

/// `/stats` 的返回内容
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
  /// 已用内存 (MiB)
  pub ram: f64,
  pub fps: f64,
  /// KiB/s
  pub bandwidth: f64,
  /// 平均每帧处理耗时 (ms)
  pub latency: f64,
}

#[derive(Debug, Default)]
struct Counters {
  frames: u64,
  bytes: u64,
  processing: Duration,
}

/// 全进程共享的推流计数
///
/// 所有推流会话共用一份计数，一把锁保护全部字段，快照总是一致的。
#[derive(Debug)]
pub struct StreamStats {
  started: Instant,
  counters: Mutex<Counters>,
}

impl Default for StreamStats {
  fn default() -> Self {
    Self::new()
  }
}

impl StreamStats {
  pub fn new() -> Self {
    Self {
      started: Instant::now(),
      counters: Mutex::new(Counters::default()),
    }
  }

  /// 记录一帧已发出
  pub fn record_frame(&self, bytes: usize, latency: Duration) {
    let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
    counters.frames += 1;
    counters.bytes += bytes as u64;
    counters.processing += latency;
  }

  pub fn frames(&self) -> u64 {
    self.counters.lock().unwrap_or_else(PoisonError::into_inner).frames
  }

  pub fn snapshot(&self, probe: &dyn MemoryProbe) -> StatsSnapshot {
    let elapsed = self.started.elapsed().as_secs_f64();
    let ram = probe.used_bytes();
    let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
    compute_snapshot(&counters, elapsed, ram)
  }
}

fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

fn compute_snapshot(counters: &Counters, elapsed: f64, ram_bytes: Option<u64>) -> StatsSnapshot {
  let elapsed = if elapsed <= 0.0 {
    MIN_ELAPSED_SECS
  } else {
    elapsed
  };
  let latency = if counters.frames == 0 {
    0.0
  } else {
    counters.processing.as_secs_f64() * 1000.0 / counters.frames as f64
  };

  StatsSnapshot {
    ram: round2(ram_bytes.unwrap_or(0) as f64 / (1024.0 * 1024.0)),
    fps: round2(counters.frames as f64 / elapsed),
    bandwidth: round2(counters.bytes as f64 / 1024.0 / elapsed),
    latency: round2(latency),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FixedMemory(Option<u64>);

  impl MemoryProbe for FixedMemory {
    fn used_bytes(&self) -> Option<u64> {
      self.0
    }
  }

  #[test]
  fn rates_are_rounded() {
    let counters = Counters {
      frames: 30,
      bytes: 300_000,
      processing: Duration::from_millis(450),
    };
    let snapshot = compute_snapshot(&counters, 2.0, Some(512 * 1024 * 1024 + 5000));
    assert_eq!(snapshot.fps, 15.0);
    assert_eq!(snapshot.bandwidth, 146.48);
    assert_eq!(snapshot.latency, 15.0);
    assert_eq!(snapshot.ram, 512.0);
  }

  #[test]
  fn zero_elapsed_is_replaced() {
    let counters = Counters {
      frames: 1,
      bytes: 0,
      processing: Duration::ZERO,
    };
    let snapshot = compute_snapshot(&counters, 0.0, None);
    assert_eq!(snapshot.fps, 10000.0);
    assert_eq!(snapshot.ram, 0.0);
  }

  #[test]
  fn no_frames_means_zero_latency() {
    let stats = StreamStats::new();
    let snapshot = stats.snapshot(&FixedMemory(None));
    assert_eq!(snapshot.latency, 0.0);
    assert_eq!(snapshot.fps, 0.0);
    assert_eq!(snapshot.bandwidth, 0.0);
  }

  #[test]
  fn concurrent_recording_is_consistent() {
    let stats = std::sync::Arc::new(StreamStats::new());
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let stats = stats.clone();
        std::thread::spawn(move || {
          for _ in 0..250 {
            stats.record_frame(10, Duration::from_millis(2));
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(stats.frames(), 1000);
    let snapshot = stats.snapshot(&FixedMemory(Some(0)));
    assert_eq!(snapshot.latency, 2.0);
  }

  #[test]
  fn meminfo_parsing() {
    let text = "MemTotal:       16000000 kB\n\
                MemFree:         4000000 kB\n\
                MemAvailable:   10000000 kB\n\
                Buffers:          500000 kB\n\
                Cached:          3000000 kB\n\
                SwapCached:            0 kB\n\
                SReclaimable:     500000 kB\n";
    assert_eq!(parse_meminfo(text), Some(8_000_000 * 1024));
    assert_eq!(parse_meminfo("MemFree: 1 kB"), None);
  }

  #[test]
  fn missing_meminfo_reports_none() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ProcMeminfo::with_path(dir.path().join("meminfo"));
    assert_eq!(probe.used_bytes(), None);
  }
}
