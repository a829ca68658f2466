// 该文件是 Tanzhen （探针） 项目的一部分。
// src/output.rs - 标注图像导出与报告输出
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

use std::{io::Write, sync::Mutex};

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[cfg(feature = "directory_record")]
use crate::FromUrlWithScheme;
use crate::{FromUrl, report::Report};

/// 标注图像的旁路输出
pub trait Export: Send + Sync {
  fn export(&self, name: &str, image: &RgbImage) -> Result<(), ExportError>;
}

#[derive(Error, Debug)]
pub enum ExportError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("无法加载字体: {0}")]
  Font(String),
  #[error("报告序列化失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 导出失败只记录日志
pub fn export_or_warn(export: &dyn Export, name: &str, image: &RgbImage) {
  match export.export(name, image) {
    Ok(()) => debug!("已导出 {}", name),
    Err(e) => warn!("导出 {} 失败: {}", name, e),
  }
}

pub mod draw;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryExport;

/// 丢弃所有导出
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardExport;

impl DiscardExport {
  pub const SCHEME: &'static str = "null";
}

impl Export for DiscardExport {
  fn export(&self, _name: &str, _image: &RgbImage) -> Result<(), ExportError> {
    Ok(())
  }
}

/// 把导出保存在内存中
#[derive(Debug, Default)]
pub struct RecordingExport {
  exported: Mutex<Vec<(String, RgbImage)>>,
}

impl RecordingExport {
  pub fn new() -> Self {
    RecordingExport::default()
  }

  pub fn names(&self) -> Vec<String> {
    self
      .exported
      .lock()
      .map(|items| items.iter().map(|(name, _)| name.clone()).collect())
      .unwrap_or_default()
  }

  pub fn take(&self) -> Vec<(String, RgbImage)> {
    self
      .exported
      .lock()
      .map(|mut items| std::mem::take(&mut *items))
      .unwrap_or_default()
  }
}

impl Export for RecordingExport {
  fn export(&self, name: &str, image: &RgbImage) -> Result<(), ExportError> {
    let mut items = self
      .exported
      .lock()
      .map_err(|_| ExportError::Io(std::io::Error::other("导出记录锁已损坏")))?;
    items.push((name.to_string(), image.clone()));
    Ok(())
  }
}

pub enum OutputWrapper {
  Discard(DiscardExport),
  #[cfg(feature = "directory_record")]
  Directory(DirectoryExport),
}

impl FromUrl for OutputWrapper {
  type Error = ExportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DiscardExport::SCHEME => Ok(OutputWrapper::Discard(DiscardExport)),
      #[cfg(feature = "directory_record")]
      DirectoryExport::SCHEME => Ok(OutputWrapper::Directory(DirectoryExport::from_url(url)?)),
      _ => Err(ExportError::SchemeMismatch),
    }
  }
}

impl Export for OutputWrapper {
  fn export(&self, name: &str, image: &RgbImage) -> Result<(), ExportError> {
    match self {
      OutputWrapper::Discard(export) => export.export(name, image),
      #[cfg(feature = "directory_record")]
      OutputWrapper::Directory(export) => export.export(name, image),
    }
  }
}

/// 写出的报告文件内容
#[derive(Debug, Serialize)]
pub struct ReportDocument<'a> {
  pub strategy: &'a str,
  pub generated_at: DateTime<Utc>,
  #[serde(flatten)]
  pub report: &'a Report,
}

impl<'a> ReportDocument<'a> {
  pub fn new(strategy: &'a str, report: &'a Report) -> Self {
    ReportDocument {
      strategy,
      generated_at: Utc::now(),
      report,
    }
  }

  pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, self)?;
    writeln!(writer)?;
    Ok(())
  }
}
