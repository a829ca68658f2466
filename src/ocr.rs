// 该文件是 Tanzhen （探针） 项目的一部分。
// src/ocr.rs - 文字识别工作池
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

use std::sync::Mutex;

use image::RgbImage;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::vision::region::PixelRect;

#[derive(Error, Debug)]
pub enum OcrError {
  #[error("无法创建 OCR 工作者: {0}")]
  Spawn(String),
  #[error("文字识别失败: {0}")]
  Recognition(String),
  #[error("OCR 工作者锁已损坏")]
  Poisoned,
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
}

pub trait TextRecognizer: Send {
  fn recognize(&mut self, image: &RgbImage) -> Result<String, OcrError>;
}

pub trait RecognizerFactory: Send + Sync {
  fn create(&self) -> Result<Box<dyn TextRecognizer>, OcrError>;
}

/// 固定数量的识别工作者
///
/// 在一次分析开始时创建，离开作用域时全部终止。
pub struct OcrWorkerPool {
  workers: Vec<Mutex<Box<dyn TextRecognizer>>>,
}

impl OcrWorkerPool {
  pub fn spawn(factory: &dyn RecognizerFactory, size: usize) -> Result<Self, OcrError> {
    let size = size.max(1);
    let workers = (0..size)
      .map(|_| factory.create().map(Mutex::new))
      .collect::<Result<Vec<_>, _>>()?;
    info!("已创建 {} 个 OCR 工作者", workers.len());
    Ok(OcrWorkerPool { workers })
  }

  pub fn size(&self) -> usize {
    self.workers.len()
  }

  /// 并行识别所有图像，第 i 个任务交给第 i mod n 个工作者，结果保持任务顺序
  pub fn recognize_all(&self, jobs: &[RgbImage]) -> Vec<Result<String, OcrError>> {
    let n = self.workers.len();
    jobs
      .par_iter()
      .enumerate()
      .map(|(i, image)| -> Result<String, OcrError> {
        let mut worker = self.workers[i % n].lock().map_err(|_| OcrError::Poisoned)?;
        let text = worker.recognize(image)?;
        debug!("任务 {} 识别结果: {:?}", i, text);
        Ok(text)
      })
      .collect()
  }
}

impl Drop for OcrWorkerPool {
  fn drop(&mut self) {
    info!("终止 {} 个 OCR 工作者", self.workers.len());
  }
}

/// 帧的四个象限：左上、右上、右下、左下
///
/// 宽或高只有 1 像素时部分象限为空，空象限不返回。
pub fn quadrants(width: u32, height: u32) -> Vec<PixelRect> {
  let (hw, hh) = (width / 2, height / 2);
  let (rw, rh) = (width - hw, height - hh);
  [
    PixelRect { x: 0, y: 0, width: hw, height: hh },
    PixelRect { x: hw, y: 0, width: rw, height: hh },
    PixelRect { x: hw, y: hh, width: rw, height: rh },
    PixelRect { x: 0, y: hh, width: hw, height: rh },
  ]
  .into_iter()
  .filter(|r| r.width > 0 && r.height > 0)
  .collect()
}

/// 不区分大小写的子串匹配，按词表顺序返回命中的词
pub fn find_critical_words<'a, S: AsRef<str>>(text: &str, words: &'a [S]) -> Vec<&'a str> {
  let lowered = text.to_lowercase();
  words
    .iter()
    .map(|w| w.as_ref())
    .filter(|w| !w.is_empty() && lowered.contains(&w.to_lowercase()))
    .collect()
}

mod tesseract;
pub use self::tesseract::{DEFAULT_LANGUAGE, DEFAULT_TESSERACT, TesseractCli, TesseractFactory};
