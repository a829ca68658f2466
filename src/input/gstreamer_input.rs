// 该文件是 Tanzhen （探针） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 提供两种媒体源：
//! - [`GStreamerInput`]：可跳转的视频文件，`gst:///path/to/video.mp4`
//! - [`ScreenCaptureInput`]：实时屏幕采集，`screen://?duration=10`
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## Cargo 特性
//!
//! ```toml
//! [dependencies]
//! tanzhen = { version = "0.1", features = ["gstreamer_input"] }
//! ```
//!
//! ## 跳转
//!
//! 文件源处于 PAUSED 状态，每次 `seek` 发出 FLUSH | ACCURATE 跳转并在总线上等待
//! `ASYNC_DONE`，之后 appsink 的预卷样本就是目标时刻的画面。
//! 屏幕源无法跳转，`seek` 只会等待到对应的运行时间。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{Media, MediaError},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 参数错误
  #[error("Invalid parameter {0}: {1}")]
  InvalidParameter(&'static str, String),
}

impl From<GStreamerInputError> for MediaError {
  fn from(err: GStreamerInputError) -> Self {
    MediaError::Capture(err.to_string())
  }
}

const GSTREAMER_INPUT_SCHEME: &str = "gst";
const SCREEN_CAPTURE_SCHEME: &str = "screen";
const DEFAULT_SCREEN_SOURCE: &str = "ximagesrc use-damage=false";
const DEFAULT_SCREEN_DURATION: f64 = 10.0;
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const APPSINK_DESCRIPTION: &str = "videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false";

fn query_map(url: &Url) -> HashMap<String, String> {
  url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect()
}

fn parse_positive(
  query: &HashMap<String, String>,
  key: &'static str,
) -> Result<Option<f64>, GStreamerInputError> {
  match query.get(key) {
    None => Ok(None),
    Some(v) => match v.parse::<f64>() {
      Ok(value) if value.is_finite() && value > 0.0 => Ok(Some(value)),
      _ => Err(GStreamerInputError::InvalidParameter(key, v.clone())),
    },
  }
}

fn launch(description: &str) -> Result<(gst::Pipeline, gst_app::AppSink), GStreamerInputError> {
  gst::init()?;
  info!("GStreamer pipeline description: {}", description);

  let pipeline = gst::parse::launch(description)?
    .downcast::<gst::Pipeline>()
    .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

  let appsink = pipeline
    .by_name("sink")
    .ok_or(GStreamerInputError::AppSinkNotFound)?
    .downcast::<gst_app::AppSink>()
    .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

  Ok((pipeline, appsink))
}

fn stop_pipeline(pipeline: &gst::Pipeline) {
  if let Err(e) = pipeline.set_state(gst::State::Null) {
    warn!("Failed to stop GStreamer pipeline: {}", e);
  }
}

/// 可跳转的视频文件输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  duration: Option<f64>,
  dimensions: (u32, u32),
  frame_rate: Option<f64>,
  timeout: gst::ClockTime,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = GSTREAMER_INPUT_SCHEME;
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != GSTREAMER_INPUT_SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }
    let query = query_map(url);
    let timeout = parse_positive(&query, "timeout")?
      .map(|t| t as u64)
      .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    Self::open(url.path(), gst::ClockTime::from_seconds(timeout))
  }
}

impl GStreamerInput {
  pub fn open(path: &str, timeout: gst::ClockTime) -> Result<Self, GStreamerInputError> {
    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! {} max-buffers=1",
      path, APPSINK_DESCRIPTION
    );
    let (pipeline, appsink) = launch(&description)?;

    pipeline.set_state(gst::State::Paused)?;
    let (result, _, _) = pipeline.state(Some(timeout));
    if let Err(e) = result {
      stop_pipeline(&pipeline);
      return Err(e.into());
    }

    let preroll = match appsink.pull_preroll() {
      Ok(sample) => sample,
      Err(e) => {
        stop_pipeline(&pipeline);
        return Err(e.into());
      }
    };
    let info = match sample_video_info(&preroll) {
      Ok(info) => info,
      Err(e) => {
        stop_pipeline(&pipeline);
        return Err(e);
      }
    };
    let fps = info.fps();
    let frame_rate = (fps.numer() > 0 && fps.denom() > 0)
      .then(|| fps.numer() as f64 / fps.denom() as f64);
    let duration = pipeline
      .query_duration::<gst::ClockTime>()
      .map(|d| d.nseconds() as f64 / 1_000_000_000.0);

    info!(
      "视频已打开: {}x{}, 时长 {:?}s, 帧率 {:?}",
      info.width(),
      info.height(),
      duration,
      frame_rate
    );

    Ok(GStreamerInput {
      pipeline,
      appsink,
      duration,
      dimensions: (info.width(), info.height()),
      frame_rate,
      timeout,
    })
  }

  fn wait_async_done(&self, time: f64) -> Result<(), MediaError> {
    let bus = self.pipeline.bus().ok_or_else(|| MediaError::Seek {
      time,
      reason: "管道没有总线".to_string(),
    })?;
    let message = bus
      .timed_pop_filtered(
        Some(self.timeout),
        &[gst::MessageType::AsyncDone, gst::MessageType::Error],
      )
      .ok_or_else(|| MediaError::Seek {
        time,
        reason: "等待跳转完成超时".to_string(),
      })?;
    match message.view() {
      gst::MessageView::Error(err) => Err(MediaError::Seek {
        time,
        reason: err.error().to_string(),
      }),
      _ => Ok(()),
    }
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    stop_pipeline(&self.pipeline);
  }
}

impl Media for GStreamerInput {
  fn duration(&self) -> Option<f64> {
    self.duration
  }

  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
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
    let position = gst::ClockTime::from_nseconds((time * 1_000_000_000.0) as u64);
    self
      .pipeline
      .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE, position)
      .map_err(|e| MediaError::Seek {
        time,
        reason: e.to_string(),
      })?;
    self.wait_async_done(time)?;
    debug!("跳转完成: {:.3}s", time);
    Ok(())
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    let sample = self
      .appsink
      .pull_preroll()
      .map_err(|e| MediaError::Capture(e.to_string()))?;
    Ok(convert_sample_to_rgb(&sample)?)
  }
}

/// 实时屏幕采集
///
/// 时间从管道启动时起算，`seek(t)` 会阻塞到启动后 t 秒。
pub struct ScreenCaptureInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  duration: f64,
  dimensions: (u32, u32),
  started: Instant,
  timeout: gst::ClockTime,
}

impl FromUrlWithScheme for ScreenCaptureInput {
  const SCHEME: &'static str = SCREEN_CAPTURE_SCHEME;
}

impl FromUrl for ScreenCaptureInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != SCREEN_CAPTURE_SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }
    let query = query_map(url);
    let duration = parse_positive(&query, "duration")?.unwrap_or(DEFAULT_SCREEN_DURATION);
    let source = query
      .get("source")
      .map(String::as_str)
      .unwrap_or(DEFAULT_SCREEN_SOURCE);
    let timeout = gst::ClockTime::from_seconds(DEFAULT_TIMEOUT_SECONDS);

    let description = format!(
      "{} ! {} max-buffers=1 drop=true",
      source, APPSINK_DESCRIPTION
    );
    let (pipeline, appsink) = launch(&description)?;
    pipeline.set_state(gst::State::Playing)?;

    let first = match appsink.try_pull_sample(Some(timeout)) {
      Some(sample) => sample,
      None => {
        stop_pipeline(&pipeline);
        return Err(GStreamerInputError::PipelineError(
          "屏幕采集没有输出画面".to_string(),
        ));
      }
    };
    let info = match sample_video_info(&first) {
      Ok(info) => info,
      Err(e) => {
        stop_pipeline(&pipeline);
        return Err(e);
      }
    };
    info!(
      "屏幕采集已启动: {}x{}, 采集 {:.1}s",
      info.width(),
      info.height(),
      duration
    );

    Ok(ScreenCaptureInput {
      pipeline,
      appsink,
      duration,
      dimensions: (info.width(), info.height()),
      started: Instant::now(),
      timeout,
    })
  }
}

impl Drop for ScreenCaptureInput {
  fn drop(&mut self) {
    stop_pipeline(&self.pipeline);
  }
}

impl Media for ScreenCaptureInput {
  fn duration(&self) -> Option<f64> {
    Some(self.duration)
  }

  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
  }

  fn seek(&mut self, time: f64) -> Result<(), MediaError> {
    if !time.is_finite() || time < 0.0 {
      return Err(MediaError::Seek {
        time,
        reason: "目标时间无效".to_string(),
      });
    }
    let target = self.started + Duration::from_secs_f64(time);
    let now = Instant::now();
    if target > now {
      std::thread::sleep(target - now);
    }
    Ok(())
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    let sample = self
      .appsink
      .try_pull_sample(Some(self.timeout))
      .ok_or_else(|| MediaError::Capture("屏幕采集超时".to_string()))?;
    Ok(convert_sample_to_rgb(&sample)?)
  }
}

fn sample_video_info(sample: &gst::Sample) -> Result<gst_video::VideoInfo, GStreamerInputError> {
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
  gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let video_info = sample_video_info(sample)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // 行之间可能有填充字节
  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  let actual_size = data.len();
  if actual_size < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: actual_size,
    });
  }

  let mut pixels = vec![0u8; width * height * 3];
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for h in 0..height {
        let row = &data[h * stride..h * stride + width * 3];
        pixels[h * width * 3..(h + 1) * width * 3].copy_from_slice(row);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for h in 0..height {
        for w in 0..width {
          for c in 0..3 {
            let src_idx = h * stride + w * 3 + (2 - c);
            let dst_idx = (h * width + w) * 3 + c;
            pixels[dst_idx] = data[src_idx];
          }
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or(GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: actual_size,
    })
}
