// 该文件是 Tanzhen （探针） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{Media, MediaError},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Invalid parameter {0}: {1}")]
  InvalidParameter(&'static str, String),
  #[error("No image found in {0}")]
  EmptyDirectory(String),
}

const READ_IMAGE_FILE_SCHEME: &str = "image";
const IMAGE_SEQUENCE_SCHEME: &str = "frames";
const DEFAULT_STILL_DURATION: f64 = 1.0;
const DEFAULT_SEQUENCE_FPS: f64 = 30.0;
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

fn query_f64(url: &Url, key: &'static str) -> Result<Option<f64>, ImageFileInputError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    None => Ok(None),
    Some((_, v)) => match v.parse::<f64>() {
      Ok(value) if value.is_finite() && value > 0.0 => Ok(Some(value)),
      _ => Err(ImageFileInputError::InvalidParameter(key, v.into_owned())),
    },
  }
}

fn check_scheme(url: &Url, expected: &str) -> Result<(), ImageFileInputError> {
  if url.scheme() != expected {
    error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      expected,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemaMismatch);
  }
  Ok(())
}

fn clamp_seek(time: f64, duration: f64) -> Result<f64, MediaError> {
  if !time.is_finite() || time < 0.0 {
    return Err(MediaError::Seek {
      time,
      reason: "目标时间无效".to_string(),
    });
  }
  Ok(time.min(duration))
}

/// 单张图片，作为一段固定时长的静止画面播放
///
/// `image:///path/to/frame.png?duration=5`
pub struct ImageFileInput {
  image: RgbImage,
  duration: f64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, READ_IMAGE_FILE_SCHEME)?;

    let path = url.path();
    info!("读取图像文件: {}", path);
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    let duration = query_f64(url, "duration")?.unwrap_or(DEFAULT_STILL_DURATION);

    Ok(ImageFileInput { image, duration })
  }
}

impl Media for ImageFileInput {
  fn duration(&self) -> Option<f64> {
    Some(self.duration)
  }

  fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  fn seek(&mut self, time: f64) -> Result<(), MediaError> {
    clamp_seek(time, self.duration)?;
    Ok(())
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    Ok(self.image.clone())
  }
}

/// 目录中按文件名排序的图片序列，按给定帧率当作视频
///
/// `frames:///path/to/dir?fps=30`
pub struct ImageSequenceInput {
  paths: Vec<PathBuf>,
  fps: f64,
  dimensions: (u32, u32),
  position: f64,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = IMAGE_SEQUENCE_SCHEME;
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, IMAGE_SEQUENCE_SCHEME)?;
    let fps = query_f64(url, "fps")?.unwrap_or(DEFAULT_SEQUENCE_FPS);
    Self::open(Path::new(url.path()), fps)
  }
}

impl ImageSequenceInput {
  pub fn open(directory: &Path, fps: f64) -> Result<Self, ImageFileInputError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if is_image {
        paths.push(path);
      }
    }
    paths.sort();

    let first = paths
      .first()
      .ok_or_else(|| ImageFileInputError::EmptyDirectory(directory.display().to_string()))?;
    let dimensions = image::image_dimensions(first)?;
    info!(
      "图片序列 {}: {} 帧, {:.2} fps",
      directory.display(),
      paths.len(),
      fps
    );

    Ok(ImageSequenceInput {
      paths,
      fps,
      dimensions,
      position: 0.0,
    })
  }
}

impl Media for ImageSequenceInput {
  fn duration(&self) -> Option<f64> {
    Some(self.paths.len() as f64 / self.fps)
  }

  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
  }

  fn frame_rate(&self) -> Option<f64> {
    Some(self.fps)
  }

  fn seek(&mut self, time: f64) -> Result<(), MediaError> {
    self.position = clamp_seek(time, self.paths.len() as f64 / self.fps)?;
    Ok(())
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    let index = ((self.position * self.fps + 1e-6).floor() as usize).min(self.paths.len() - 1);
    let image = ImageReader::open(&self.paths[index])?.decode()?.to_rgb8();
    Ok(image)
  }
}
