// 该文件是 Tanzhen （探针） 项目的一部分。
// src/frame.rs - 帧与采样
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
use tracing::{debug, info};

use crate::input::{Media, MediaError};

// 避免 0.3 * 10 这类乘积落到 2.9999 被向下取整
const COUNT_EPSILON: f64 = 1e-9;

pub const DEFAULT_SAMPLE_FPS: f64 = 1.0;
pub const DEFAULT_NATIVE_FPS: f64 = 30.0;

/// 一帧采样画面
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  /// 采样序号，从 0 开始
  pub index: usize,
  /// 时间戳（秒）
  pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingPlan {
  /// 固定采样率，共 floor(D * fps) 帧，第 i 帧位于 i / fps
  Rate { fps: f64 },
  /// 每次前进 skip 个原生帧，直到时长为止
  FrameSkip { skip: u32, fallback_native_fps: f64 },
}

/// 帧源
///
/// 每次调用 [`FrameSource::frames`] 都会得到一个新的惰性序列，
/// 帧数在序列创建时计算一次。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSource {
  plan: SamplingPlan,
}

impl Default for FrameSource {
  fn default() -> Self {
    FrameSource::at_rate(DEFAULT_SAMPLE_FPS)
  }
}

impl FrameSource {
  pub fn at_rate(fps: f64) -> Self {
    FrameSource {
      plan: SamplingPlan::Rate { fps },
    }
  }

  pub fn frame_skip(skip: u32, fallback_native_fps: f64) -> Self {
    FrameSource {
      plan: SamplingPlan::FrameSkip {
        skip,
        fallback_native_fps,
      },
    }
  }

  pub fn plan(&self) -> SamplingPlan {
    self.plan
  }

  /// 返回 (帧数, 帧间隔秒数)
  pub fn schedule<M: Media + ?Sized>(&self, media: &M) -> (usize, f64) {
    let duration = match media.duration() {
      Some(d) if d.is_finite() && d > 0.0 => d,
      _ => return (0, 0.0),
    };

    match self.plan {
      SamplingPlan::Rate { fps } => {
        if !(fps.is_finite() && fps > 0.0) {
          return (0, 0.0);
        }
        let total = (duration * fps + COUNT_EPSILON).floor() as usize;
        (total, 1.0 / fps)
      }
      SamplingPlan::FrameSkip {
        skip,
        fallback_native_fps,
      } => {
        let native = media
          .frame_rate()
          .filter(|r| r.is_finite() && *r > 0.0)
          .unwrap_or(fallback_native_fps);
        if skip == 0 || !(native.is_finite() && native > 0.0) {
          return (0, 0.0);
        }
        let step = skip as f64 / native;
        let total = (duration / step - COUNT_EPSILON).ceil().max(0.0) as usize;
        (total, step)
      }
    }
  }

  pub fn frames<'m, M: Media + ?Sized>(&self, media: &'m mut M) -> Frames<'m, M> {
    let (total, step) = self.schedule(media);
    info!("采样计划: 共 {} 帧, 间隔 {:.3}s", total, step);
    Frames {
      media,
      total,
      step,
      next: 0,
    }
  }
}

/// 惰性帧序列
pub struct Frames<'m, M: Media + ?Sized> {
  media: &'m mut M,
  total: usize,
  step: f64,
  next: usize,
}

impl<M: Media + ?Sized> Frames<'_, M> {
  pub fn total(&self) -> usize {
    self.total
  }

  pub fn step(&self) -> f64 {
    self.step
  }

  fn fetch(&mut self, index: usize) -> Result<Frame, MediaError> {
    // 用序号乘间隔，避免逐帧累加误差
    let time = index as f64 * self.step;
    self.media.seek(time)?;
    let image = self.media.capture()?;
    debug!("采样第 {} 帧, 时间 {:.3}s", index, time);
    Ok(Frame { image, index, time })
  }
}

impl<M: Media + ?Sized> Iterator for Frames<'_, M> {
  type Item = Result<Frame, MediaError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.next >= self.total {
      return None;
    }
    let index = self.next;
    self.next += 1;
    let result = self.fetch(index);
    if result.is_err() {
      self.next = self.total;
    }
    Some(result)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.total - self.next;
    (remaining, Some(remaining))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::MemoryMedia;
  use image::Rgb;

  fn clip(duration: Option<f64>) -> MemoryMedia {
    MemoryMedia::new(duration).with_frame(0.0, RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])))
  }

  #[test]
  fn frame_count_is_floor_of_duration_times_rate() {
    for (duration, fps, expected) in [
      (5.0, 1.0, 5),
      (5.5, 1.0, 5),
      (0.3, 10.0, 3),
      (2.0, 2.5, 5),
      (0.9, 1.0, 0),
    ] {
      let mut media = clip(Some(duration));
      let frames: Vec<_> = FrameSource::at_rate(fps)
        .frames(&mut media)
        .collect::<Result<_, _>>()
        .unwrap();
      assert_eq!(frames.len(), expected, "D={duration} fps={fps}");
      for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.index, i);
        assert!((frame.time - i as f64 / fps).abs() < 1e-12);
      }
    }
  }

  #[test]
  fn missing_duration_yields_empty_sequence() {
    for duration in [None, Some(f64::NAN), Some(f64::INFINITY), Some(0.0)] {
      let mut media = clip(duration);
      assert_eq!(FrameSource::default().frames(&mut media).count(), 0);
    }
  }

  #[test]
  fn sequence_is_restartable() {
    let mut media = clip(Some(3.0));
    let source = FrameSource::at_rate(1.0);
    assert_eq!(source.frames(&mut media).count(), 3);
    assert_eq!(source.frames(&mut media).count(), 3);
    assert_eq!(media.seek_history(), &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
  }

  #[test]
  fn frame_skip_steps_until_duration() {
    let mut media = clip(Some(2.5));
    let times: Vec<f64> = FrameSource::frame_skip(30, DEFAULT_NATIVE_FPS)
      .frames(&mut media)
      .map(|f| f.unwrap().time)
      .collect();
    assert_eq!(times, vec![0.0, 1.0, 2.0]);

    let mut media = clip(Some(2.0)).with_frame_rate(60.0);
    let times: Vec<f64> = FrameSource::frame_skip(30, DEFAULT_NATIVE_FPS)
      .frames(&mut media)
      .map(|f| f.unwrap().time)
      .collect();
    assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5]);
  }

  #[test]
  fn media_error_ends_sequence() {
    let mut media = MemoryMedia::new(Some(3.0))
      .with_frame(1.0, RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])));
    let mut frames = FrameSource::at_rate(1.0).frames(&mut media);
    assert!(frames.next().unwrap().is_err());
    assert!(frames.next().is_none());
  }
}
