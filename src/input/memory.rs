// 该文件是 Tanzhen （探针） 项目的一部分。
// src/input/memory.rs - 内存媒体
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

use image::RgbImage;
use tracing::debug;

use crate::input::{Media, MediaError};

// 浮点时间比较容差
const TIME_EPSILON: f64 = 1e-9;

/// 保存在内存中的一段画面序列
///
/// 每一帧带有起始时间，`capture` 返回起始时间不晚于当前位置的最后一帧。
#[derive(Debug, Clone)]
pub struct MemoryMedia {
  frames: Vec<(f64, RgbImage)>,
  duration: Option<f64>,
  frame_rate: Option<f64>,
  position: f64,
  seeks: Vec<f64>,
}

impl MemoryMedia {
  pub fn new(duration: Option<f64>) -> Self {
    MemoryMedia {
      frames: Vec::new(),
      duration,
      frame_rate: None,
      position: 0.0,
      seeks: Vec::new(),
    }
  }

  /// 按固定帧率排列的画面，时长为 `帧数 / fps`
  pub fn from_frames(fps: f64, images: Vec<RgbImage>) -> Self {
    let duration = images.len() as f64 / fps;
    let frames = images
      .into_iter()
      .enumerate()
      .map(|(i, image)| (i as f64 / fps, image))
      .collect();
    MemoryMedia {
      frames,
      duration: Some(duration),
      frame_rate: Some(fps),
      position: 0.0,
      seeks: Vec::new(),
    }
  }

  pub fn with_frame(mut self, start: f64, image: RgbImage) -> Self {
    let index = self.frames.partition_point(|(t, _)| *t <= start);
    self.frames.insert(index, (start, image));
    self
  }

  pub fn with_frame_rate(mut self, fps: f64) -> Self {
    self.frame_rate = Some(fps);
    self
  }

  /// 历次跳转的目标时间
  pub fn seek_history(&self) -> &[f64] {
    &self.seeks
  }
}

impl Media for MemoryMedia {
  fn duration(&self) -> Option<f64> {
    self.duration
  }

  fn dimensions(&self) -> (u32, u32) {
    self
      .frames
      .first()
      .map(|(_, image)| image.dimensions())
      .unwrap_or((0, 0))
  }

  fn frame_rate(&self) -> Option<f64> {
    self.frame_rate
  }

  fn seek(&mut self, time: f64) -> Result<(), MediaError> {
    if !time.is_finite() || time < 0.0 {
      return Err(MediaError::Seek {
        time,
        reason: "目标时间无效".to_string(),
      });
    }
    debug!("内存媒体跳转到 {:.3}s", time);
    self.position = time;
    self.seeks.push(time);
    Ok(())
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    let position = self.position;
    self
      .frames
      .iter()
      .rev()
      .find(|(start, _)| *start <= position + TIME_EPSILON)
      .map(|(_, image)| image.clone())
      .ok_or_else(|| MediaError::Capture(format!("{:.3}s 处没有画面", position)))
  }
}
