// 该文件是 Tanzhen （探针） 项目的一部分。
// src/strategy/ocr.rs - 分象限文字识别与关键词扫描
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

use std::{collections::HashSet, sync::Arc};

use image::{RgbImage, imageops};
use tracing::{info, warn};

use crate::{
  config::OcrConfig,
  frame::{Frame, FrameSource},
  input::Media,
  ocr::{OcrWorkerPool, RecognizerFactory, find_critical_words, quadrants},
  output::{draw::YELLOW, export_or_warn},
  report::{BoundingBox, DetectionRecord, Report},
  strategy::{AnalysisContext, AnalysisError, Strategy, scan_frames},
};

pub struct OcrStrategy {
  config: OcrConfig,
  context: AnalysisContext,
  recognizers: Arc<dyn RecognizerFactory>,
}

impl OcrStrategy {
  pub const NAME: &'static str = "OCR Analyzer";

  pub fn new(
    config: OcrConfig,
    context: AnalysisContext,
    recognizers: Arc<dyn RecognizerFactory>,
  ) -> Self {
    OcrStrategy {
      config,
      context,
      recognizers,
    }
  }

  fn detect(&self, frame: &Frame, pool: &OcrWorkerPool) -> Result<Vec<DetectionRecord>, String> {
    let (width, height) = frame.image.dimensions();
    let regions = quadrants(width, height);
    let crops: Vec<RgbImage> = regions
      .iter()
      .map(|r| imageops::crop_imm(&frame.image, r.x, r.y, r.width, r.height).to_image())
      .collect();

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for (region, text) in regions.iter().zip(pool.recognize_all(&crops)) {
      let text = text.map_err(|e| {
        warn!("第 {} 帧象限 ({}, {}) 识别失败: {}", frame.index, region.x, region.y, e);
        e.to_string()
      })?;
      for word in find_critical_words(&text, &self.config.words) {
        if self.config.dedupe_words && !seen.insert(word) {
          continue;
        }
        info!("第 {} 帧发现关键词 {}，时间 {:.3}s", frame.index, word, frame.time);
        let bbox = BoundingBox::new(
          region.x as f32,
          region.y as f32,
          region.width as f32,
          region.height as f32,
        );
        records.push(DetectionRecord::new(word, frame.time).with_bbox(bbox));
      }
    }

    if !records.is_empty() {
      let mut annotated = frame.image.clone();
      for record in &records {
        if let Some(bbox) = &record.bbox {
          self.context.draw.labeled_box(&mut annotated, bbox, &record.found, YELLOW);
        }
      }
      export_or_warn(
        self.context.export.as_ref(),
        &format!("ocr_detected_frame{}.png", frame.index),
        &annotated,
      );
    }
    Ok(records)
  }
}

impl Strategy for OcrStrategy {
  fn name(&self) -> &'static str {
    Self::NAME
  }

  fn analyze(&mut self, media: &mut dyn Media) -> Result<Report, AnalysisError> {
    info!("{}: 开始分析", Self::NAME);
    // 离开本函数时工作者随 pool 一起终止
    let pool = OcrWorkerPool::spawn(self.recognizers.as_ref(), self.config.workers)?;
    let source = FrameSource::frame_skip(self.config.frame_skip, self.config.native_fps);
    let frames = source.frames(media);
    scan_frames(frames, |frame| self.detect(frame, &pool))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    input::MemoryMedia,
    ocr::{OcrError, TextRecognizer},
    template::TemplateLibrary,
  };
  use image::Rgb;

  /// 按象限左上角像素的红色分量返回预设文本
  struct ByColour;

  impl TextRecognizer for ByColour {
    fn recognize(&mut self, image: &RgbImage) -> Result<String, OcrError> {
      match image.get_pixel(0, 0)[0] {
        1 => Ok("Open WhatsApp now".to_string()),
        2 => Ok("WHATSAPP and Telegram".to_string()),
        9 => Err(OcrError::Recognition("garbled".to_string())),
        _ => Ok(String::new()),
      }
    }
  }

  struct ByColourFactory;

  impl RecognizerFactory for ByColourFactory {
    fn create(&self) -> Result<Box<dyn TextRecognizer>, OcrError> {
      Ok(Box::new(ByColour))
    }
  }

  fn frame(top_left: u8, top_right: u8) -> RgbImage {
    RgbImage::from_fn(8, 8, |x, y| {
      if y < 4 && x < 4 {
        Rgb([top_left, 0, 0])
      } else if y < 4 {
        Rgb([top_right, 0, 0])
      } else {
        Rgb([0, 0, 0])
      }
    })
  }

  fn strategy(dedupe: bool) -> OcrStrategy {
    let config = OcrConfig {
      frame_skip: 30,
      native_fps: 30.0,
      dedupe_words: dedupe,
      ..OcrConfig::default()
    };
    OcrStrategy::new(
      config,
      AnalysisContext::new(TemplateLibrary::in_memory(Vec::new())),
      Arc::new(ByColourFactory),
    )
  }

  #[test]
  fn every_quadrant_hit_is_recorded() {
    let mut media = MemoryMedia::from_frames(1.0, vec![frame(0, 0), frame(1, 2)]).with_frame_rate(30.0);
    let report = strategy(false).analyze(&mut media).unwrap();
    let found: Vec<(&str, f64)> = report.iter().map(|r| (r.found.as_str(), r.time)).collect();
    assert_eq!(
      found,
      vec![("whatsapp", 1.0), ("whatsapp", 1.0), ("telegram", 1.0)]
    );
    assert_eq!(report.records[0].bbox, Some(BoundingBox::new(0.0, 0.0, 4.0, 4.0)));
    assert_eq!(report.records[1].bbox, Some(BoundingBox::new(4.0, 0.0, 4.0, 4.0)));
  }

  #[test]
  fn dedupe_keeps_first_quadrant() {
    let mut media = MemoryMedia::from_frames(1.0, vec![frame(1, 2)]).with_frame_rate(30.0);
    let report = strategy(true).analyze(&mut media).unwrap();
    let found: Vec<&str> = report.iter().map(|r| r.found.as_str()).collect();
    assert_eq!(found, vec!["whatsapp", "telegram"]);
  }

  #[test]
  fn failed_quadrant_skips_the_frame() {
    let mut media = MemoryMedia::from_frames(1.0, vec![frame(9, 0), frame(1, 0)]).with_frame_rate(30.0);
    let report = strategy(false).analyze(&mut media).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.records[0].time, 1.0);
    assert_eq!(report.skipped_frames.len(), 1);
    assert_eq!(report.skipped_frames[0].index, 0);
  }

  #[test]
  fn one_pixel_wide_frame_is_scanned() {
    let thin = RgbImage::from_fn(1, 4, |_, y| if y < 2 { Rgb([1, 0, 0]) } else { Rgb([0, 0, 0]) });
    let mut media = MemoryMedia::from_frames(1.0, vec![thin]).with_frame_rate(30.0);
    let report = strategy(false).analyze(&mut media).unwrap();
    assert!(report.skipped_frames.is_empty());
    let found: Vec<&str> = report.iter().map(|r| r.found.as_str()).collect();
    assert_eq!(found, vec!["whatsapp"]);
    assert_eq!(report.records[0].bbox, Some(BoundingBox::new(0.0, 0.0, 1.0, 2.0)));
  }
}
