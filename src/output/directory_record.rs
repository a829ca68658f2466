// 该文件是 Tanzhen （探针） 项目的一部分。
// src/output/directory_record.rs - 导出到目录
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

use chrono::{Datelike, Utc};
use image::RgbImage;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Export, ExportError},
};

/// `folder:///out/dir` 把标注图像写成 PNG 文件
///
/// 带 `?dated` 参数时按 年/月/日 建子目录。
#[derive(Debug, Clone)]
pub struct DirectoryExport {
  directory: PathBuf,
  dated: bool,
}

impl FromUrlWithScheme for DirectoryExport {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryExport {
  type Error = ExportError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(ExportError::SchemeMismatch);
    }
    let dated = uri.query_pairs().any(|(k, _)| k == "dated");
    Ok(DirectoryExport::new(uri.path()).with_dated(dated))
  }
}

impl DirectoryExport {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    DirectoryExport {
      directory: directory.into(),
      dated: false,
    }
  }

  pub fn with_dated(mut self, dated: bool) -> Self {
    self.dated = dated;
    self
  }

  fn target_directory(&self) -> PathBuf {
    if !self.dated {
      return self.directory.clone();
    }
    let now = Utc::now();
    self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
  }
}

impl Export for DirectoryExport {
  fn export(&self, name: &str, image: &RgbImage) -> Result<(), ExportError> {
    let directory = self.target_directory();
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    let path = directory.join(name);
    image.save(&path)?;
    info!("保存标注图像: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_png_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested");
    let url = url::Url::from_directory_path(&target).unwrap();
    let url = url::Url::parse(&url.as_str().replacen("file:", "folder:", 1)).unwrap();
    let export = DirectoryExport::from_url(&url).unwrap();
    export
      .export("template_detected_whatsapp_frame2_scale0.1.png", &RgbImage::new(3, 3))
      .unwrap();
    assert!(target.join("template_detected_whatsapp_frame2_scale0.1.png").is_file());
  }

  #[test]
  fn dated_layout_uses_year_month_day() {
    let export = DirectoryExport::new("/tmp/out").with_dated(true);
    let now = Utc::now();
    let expected = PathBuf::from("/tmp/out")
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    assert_eq!(export.target_directory(), expected);
  }
}
