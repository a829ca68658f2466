// 该文件是 Tanzhen （探针） 项目的一部分。
// src/input.rs - 视频/图像输入
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
use thiserror::Error;

use crate::FromUrl;

/// 可跳转的媒体源
///
/// `seek` 会阻塞到跳转完成为止，之后 `capture` 返回该时刻的画面。
pub trait Media {
  /// 媒体总时长（秒），无法解析时为 `None`
  fn duration(&self) -> Option<f64>;
  /// 画面尺寸 (宽, 高)
  fn dimensions(&self) -> (u32, u32);
  /// 原生帧率，未知时为 `None`
  fn frame_rate(&self) -> Option<f64> {
    None
  }
  fn seek(&mut self, time: f64) -> Result<(), MediaError>;
  fn capture(&mut self) -> Result<RgbImage, MediaError>;
}

impl<M: Media + ?Sized> Media for Box<M> {
  fn duration(&self) -> Option<f64> {
    (**self).duration()
  }

  fn dimensions(&self) -> (u32, u32) {
    (**self).dimensions()
  }

  fn frame_rate(&self) -> Option<f64> {
    (**self).frame_rate()
  }

  fn seek(&mut self, time: f64) -> Result<(), MediaError> {
    (**self).seek(time)
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    (**self).capture()
  }
}

#[derive(Error, Debug)]
pub enum MediaError {
  #[error("跳转到 {time:.3}s 失败: {reason}")]
  Seek { time: f64, reason: String },
  #[error("帧捕获失败: {0}")]
  Capture(String),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

mod memory;
pub use self::memory::MemoryMedia;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, ImageSequenceInput};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, ScreenCaptureInput};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "gstreamer_input")]
  ScreenCapture(ScreenCaptureInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  ImageSequence(ImageSequenceInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInput::SCHEME {
        let input = GStreamerInput::from_url(url)?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
      if url.scheme() == ScreenCaptureInput::SCHEME {
        let input = ScreenCaptureInput::from_url(url)?;
        return Ok(InputWrapper::ScreenCapture(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
      if url.scheme() == ImageSequenceInput::SCHEME {
        let input = ImageSequenceInput::from_url(url)?;
        return Ok(InputWrapper::ImageSequence(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl InputWrapper {
  fn as_media(&self) -> &dyn Media {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::ScreenCapture(input) => input,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input,
    }
  }

  fn as_media_mut(&mut self) -> &mut dyn Media {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::ScreenCapture(input) => input,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input,
    }
  }
}

impl Media for InputWrapper {
  fn duration(&self) -> Option<f64> {
    self.as_media().duration()
  }

  fn dimensions(&self) -> (u32, u32) {
    self.as_media().dimensions()
  }

  fn frame_rate(&self) -> Option<f64> {
    self.as_media().frame_rate()
  }

  fn seek(&mut self, time: f64) -> Result<(), MediaError> {
    self.as_media_mut().seek(time)
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    self.as_media_mut().capture()
  }
}
