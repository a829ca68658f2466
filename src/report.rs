// 该文件是 Tanzhen （探针） 项目的一部分。
// src/report.rs - 检测记录与汇总
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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 像素坐标下的矩形 [x, y, w, h]，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    BoundingBox {
      x,
      y,
      width,
      height,
    }
  }

  pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    BoundingBox::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
  }

  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    BoundingBox::new(cx - width / 2.0, cy - height / 2.0, width, height)
  }

  /// 包含所有点的最小矩形
  pub fn enclosing(points: &[(f32, f32)]) -> Option<Self> {
    let (first, rest) = points.split_first()?;
    let (mut x1, mut y1, mut x2, mut y2) = (first.0, first.1, first.0, first.1);
    for &(x, y) in rest {
      x1 = x1.min(x);
      y1 = y1.min(y);
      x2 = x2.max(x);
      y2 = y2.max(y);
    }
    Some(BoundingBox::from_corners(x1, y1, x2, y2))
  }

  pub fn scaled(&self, sx: f32, sy: f32) -> Self {
    BoundingBox::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
  }
}

/// 一条检测记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  /// 模板名、类别名或关键词
  pub found: String,
  /// 时间（秒）
  pub time: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bbox: Option<BoundingBox>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub class_id: Option<u32>,
}

impl DetectionRecord {
  pub fn new(found: impl Into<String>, time: f64) -> Self {
    DetectionRecord {
      found: found.into(),
      time,
      bbox: None,
      confidence: None,
      class_id: None,
    }
  }

  pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
    self.bbox = Some(bbox);
    self
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = Some(confidence);
    self
  }

  pub fn with_class_id(mut self, class_id: u32) -> Self {
    self.class_id = Some(class_id);
    self
  }
}

/// 被跳过的帧，处理过程中出现了可恢复的错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerFrameProcessingError {
  pub index: usize,
  pub time: f64,
  pub reason: String,
}

impl std::fmt::Display for PerFrameProcessingError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "第 {} 帧 ({:.3}s) 处理失败: {}",
      self.index, self.time, self.reason
    )
  }
}

impl std::error::Error for PerFrameProcessingError {}

/// 一次分析的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
  pub records: Vec<DetectionRecord>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub skipped_frames: Vec<PerFrameProcessingError>,
}

impl Report {
  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectionRecord> {
    self.records.iter()
  }
}

/// 按帧序号汇总记录
///
/// 允许帧乱序提交，追加到报告时按帧序号排列。
#[derive(Debug, Default)]
pub struct ResultAggregator {
  report: Report,
  pending: BTreeMap<usize, Vec<DetectionRecord>>,
  next_index: usize,
}

impl ResultAggregator {
  pub fn new() -> Self {
    ResultAggregator::default()
  }

  /// 提交某一帧的记录，帧内顺序保持不变
  pub fn submit(&mut self, frame_index: usize, records: Vec<DetectionRecord>) {
    if frame_index < self.next_index {
      warn!("第 {} 帧已提交过，忽略重复提交", frame_index);
      return;
    }
    self.pending.entry(frame_index).or_default().extend(records);
    self.flush_ready();
  }

  /// 记录一个被跳过的帧，它不会再提交记录
  pub fn skip(&mut self, error: PerFrameProcessingError) {
    warn!("{}", error);
    let index = error.index;
    self.report.skipped_frames.push(error);
    if index >= self.next_index {
      self.pending.entry(index).or_default();
      self.flush_ready();
    }
  }

  fn flush_ready(&mut self) {
    while let Some(records) = self.pending.remove(&self.next_index) {
      if !records.is_empty() {
        debug!("第 {} 帧: {} 条记录", self.next_index, records.len());
      }
      self.report.records.extend(records);
      self.next_index += 1;
    }
  }

  /// 结束汇总，尚未连续的帧按序号追加
  pub fn finish(mut self) -> Report {
    let pending = std::mem::take(&mut self.pending);
    for (_, records) in pending {
      self.report.records.extend(records);
    }
    self
      .report
      .skipped_frames
      .sort_by_key(|skipped| skipped.index);
    debug_assert!(
      self
        .report
        .records
        .windows(2)
        .all(|pair| pair[0].time <= pair[1].time),
      "report time must be non-decreasing"
    );
    self.report
  }
}

/// 每个类别只保留置信度最高的一条记录，按类别首次出现的顺序排列
pub fn keep_most_confident_per_class(records: Vec<DetectionRecord>) -> Vec<DetectionRecord> {
  let mut kept: Vec<DetectionRecord> = Vec::new();
  for record in records {
    match kept
      .iter_mut()
      .find(|r| r.class_id == record.class_id && r.found == record.found)
    {
      Some(existing) => {
        let current = existing.confidence.unwrap_or(f32::NEG_INFINITY);
        if record.confidence.unwrap_or(f32::NEG_INFINITY) > current {
          *existing = record;
        }
      }
      None => kept.push(record),
    }
  }
  kept
}
