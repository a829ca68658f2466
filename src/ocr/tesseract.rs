// 该文件是 Tanzhen （探针） 项目的一部分。
// src/ocr/tesseract.rs - 调用 tesseract 命令行识别文字
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

use std::{path::PathBuf, process::Command};

use image::{ImageFormat, RgbImage};
use tracing::debug;

use crate::ocr::{OcrError, RecognizerFactory, TextRecognizer};

pub const DEFAULT_TESSERACT: &str = "tesseract";
pub const DEFAULT_LANGUAGE: &str = "eng";

/// 每次识别把图像写入临时 PNG，再读取 tesseract 的标准输出
#[derive(Debug, Clone)]
pub struct TesseractCli {
  binary: PathBuf,
  language: String,
}

impl TextRecognizer for TesseractCli {
  fn recognize(&mut self, image: &RgbImage) -> Result<String, OcrError> {
    let file = tempfile::Builder::new()
      .prefix("tanzhen-ocr-")
      .suffix(".png")
      .tempfile()?;
    image.save_with_format(file.path(), ImageFormat::Png)?;

    let output = Command::new(&self.binary)
      .arg(file.path())
      .arg("stdout")
      .arg("-l")
      .arg(&self.language)
      .output()?;
    if !output.status.success() {
      return Err(OcrError::Recognition(
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
      ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

#[derive(Debug, Clone)]
pub struct TesseractFactory {
  binary: PathBuf,
  language: String,
}

impl Default for TesseractFactory {
  fn default() -> Self {
    TesseractFactory::new(DEFAULT_TESSERACT, DEFAULT_LANGUAGE)
  }
}

impl TesseractFactory {
  pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
    TesseractFactory {
      binary: binary.into(),
      language: language.into(),
    }
  }
}

impl RecognizerFactory for TesseractFactory {
  fn create(&self) -> Result<Box<dyn TextRecognizer>, OcrError> {
    let probe = Command::new(&self.binary)
      .arg("--version")
      .output()
      .map_err(|e| OcrError::Spawn(format!("{}: {}", self.binary.display(), e)))?;
    if !probe.status.success() {
      return Err(OcrError::Spawn(format!(
        "{} --version 返回 {}",
        self.binary.display(),
        probe.status
      )));
    }
    debug!("tesseract 可用: {}", self.binary.display());
    Ok(Box::new(TesseractCli {
      binary: self.binary.clone(),
      language: self.language.clone(),
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_binary_fails_to_spawn() {
    let factory = TesseractFactory::new("/nonexistent/tesseract-binary", "eng");
    assert!(matches!(factory.create(), Err(OcrError::Spawn(_))));
  }
}
