// 该文件是 Tanzhen （探针） 项目的一部分。
// src/strategy/histogram.rs - 颜色直方图相似度检测
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

use tracing::{debug, info};

use crate::{
  config::HistogramConfig,
  frame::Frame,
  input::Media,
  output::{draw::GREEN, export_or_warn},
  report::{BoundingBox, DetectionRecord, Report},
  strategy::{AnalysisContext, AnalysisError, Strategy, export_name, scan_frames},
  template::Template,
  vision::histogram::{BinnedFrame, ColorHistogram, WindowMatch},
};

pub struct HistogramStrategy {
  config: HistogramConfig,
  context: AnalysisContext,
}

impl HistogramStrategy {
  pub const NAME: &'static str = "Histogram Analyzer";
  const EXPORT_PREFIX: &'static str = "histogram";

  pub fn new(config: HistogramConfig, context: AnalysisContext) -> Self {
    HistogramStrategy { config, context }
  }

  fn detect(
    &self,
    frame: &Frame,
    targets: &[(Template, ColorHistogram)],
  ) -> Vec<DetectionRecord> {
    let binned = BinnedFrame::new(&frame.image, self.config.bins_per_channel);
    let mut hits: Vec<(&str, WindowMatch)> = Vec::new();
    for (template, histogram) in targets {
      let (w, h) = template.dimensions();
      let Some(best) = binned.best_window(histogram, w, h) else {
        debug!("模板 {} 大于画面，跳过", template.name);
        continue;
      };
      debug!(
        "第 {} 帧 {}: 最佳窗口 ({}, {}) 相关系数 {:.4}",
        frame.index, template.name, best.x, best.y, best.score
      );
      if best.score > self.config.threshold {
        hits.push((template.name.as_str(), best));
      }
    }
    hits.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));

    hits
      .into_iter()
      .map(|(name, window)| {
        let bbox = BoundingBox::new(
          window.x as f32,
          window.y as f32,
          window.width as f32,
          window.height as f32,
        );
        info!(
          "检测到 {}，相关系数 {:.4}，时间 {:.3}s",
          name, window.score, frame.time
        );
        let mut annotated = frame.image.clone();
        self.context.draw.rectangle(&mut annotated, &bbox, GREEN);
        export_or_warn(
          self.context.export.as_ref(),
          &export_name(Self::EXPORT_PREFIX, name, frame.index, 1.0),
          &annotated,
        );
        DetectionRecord::new(name, frame.time).with_bbox(bbox)
      })
      .collect()
  }
}

impl Strategy for HistogramStrategy {
  fn name(&self) -> &'static str {
    Self::NAME
  }

  fn analyze(&mut self, media: &mut dyn Media) -> Result<Report, AnalysisError> {
    info!("{}: 开始分析", Self::NAME);
    let templates = self.context.templates.load(&self.config.templates)?;
    let targets: Vec<(Template, ColorHistogram)> = templates
      .into_iter()
      .map(|t| {
        let histogram = ColorHistogram::of_image(&t.image, self.config.bins_per_channel);
        (t, histogram)
      })
      .collect();

    let frames = self.context.frames.frames(media);
    scan_frames(frames, |frame| Ok(self.detect(frame, &targets)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{input::MemoryMedia, template::TemplateLibrary};
  use image::{Rgb, RgbImage};

  fn logo() -> RgbImage {
    RgbImage::from_fn(16, 16, |x, y| match (x / 4 + y / 4) % 3 {
      0 => Rgb([240, 30, 30]),
      1 => Rgb([30, 200, 30]),
      _ => Rgb([250, 250, 250]),
    })
  }

  fn strategy() -> HistogramStrategy {
    let library = TemplateLibrary::in_memory(vec![Template::new("whatsapp", logo())]);
    let config = HistogramConfig {
      templates: vec!["whatsapp".to_string()],
      ..HistogramConfig::default()
    };
    HistogramStrategy::new(config, AnalysisContext::new(library))
  }

  #[test]
  fn exact_copy_clears_threshold_and_noise_does_not() {
    let mut with_logo = RgbImage::from_pixel(64, 48, Rgb([20, 20, 120]));
    image::imageops::replace(&mut with_logo, &logo(), 16, 8);
    let plain = RgbImage::from_pixel(64, 48, Rgb([20, 20, 120]));
    let mut media = MemoryMedia::from_frames(1.0, vec![plain.clone(), with_logo, plain]);

    let report = strategy().analyze(&mut media).unwrap();
    assert_eq!(report.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.found, "whatsapp");
    assert_eq!(record.time, 1.0);
    assert_eq!(record.bbox, Some(BoundingBox::new(16.0, 8.0, 16.0, 16.0)));
  }

  #[test]
  fn repeated_scans_are_identical() {
    let mut frame = RgbImage::from_pixel(40, 40, Rgb([5, 5, 5]));
    image::imageops::replace(&mut frame, &logo(), 8, 16);
    let target = ColorHistogram::of_image(&logo(), 8);
    let a = BinnedFrame::new(&frame, 8).best_window(&target, 16, 16);
    let b = BinnedFrame::new(&frame, 8).best_window(&target, 16, 16);
    assert_eq!(a, b);
  }

  #[test]
  fn missing_template_fails_the_run() {
    let mut s = HistogramStrategy::new(
      HistogramConfig::default(),
      AnalysisContext::new(TemplateLibrary::in_memory(Vec::new())),
    );
    let mut media = MemoryMedia::from_frames(1.0, vec![RgbImage::new(8, 8)]);
    assert!(matches!(s.analyze(&mut media), Err(AnalysisError::AssetLoad(_))));
  }
}
