// 该文件是 Tanzhen （探针） 项目的一部分。
// src/strategy/template_matching.rs - 多尺度模板匹配
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

use image::GrayImage;
use tracing::{debug, info};

use crate::{
  config::TemplateMatchingConfig,
  frame::Frame,
  input::Media,
  output::{draw::GREEN, export_or_warn},
  report::{BoundingBox, DetectionRecord, Report},
  strategy::{AnalysisContext, AnalysisError, Strategy, export_name, scan_frames},
  vision::{
    correlation::{MatchMethod, correlation_surface, peak},
    resize_by, to_gray,
  },
};

/// 灰度方差下限，约为 2 个灰度级的标准差
const MIN_TEMPLATE_VARIANCE: f64 = 4.0;

struct ScaledTemplate {
  scale: f32,
  image: GrayImage,
}

struct PreparedTemplate {
  name: String,
  scales: Vec<ScaledTemplate>,
}

pub struct TemplateMatchingStrategy {
  config: TemplateMatchingConfig,
  context: AnalysisContext,
}

impl TemplateMatchingStrategy {
  pub const NAME: &'static str = "Template Matching Analyzer";
  const EXPORT_PREFIX: &'static str = "template";

  pub fn new(config: TemplateMatchingConfig, context: AnalysisContext) -> Self {
    TemplateMatchingStrategy { config, context }
  }

  fn detect(&self, frame: &Frame, templates: &[PreparedTemplate]) -> Vec<DetectionRecord> {
    let gray = to_gray(&frame.image);
    let mut hits: Vec<(f32, DetectionRecord)> = Vec::new();

    for template in templates {
      let mut best: Option<(f32, BoundingBox)> = None;
      for scaled in &template.scales {
        // 去均值曲面，互相关的峰值也要在这里过阈值
        let Some(coefficients) =
          correlation_surface(&gray, &scaled.image, MatchMethod::CoefficientNormed)
        else {
          continue;
        };
        for method in &self.config.methods {
          let surface = match method {
            MatchMethod::CoefficientNormed => None,
            _ => correlation_surface(&gray, &scaled.image, *method),
          };
          let Some(top) = peak(surface.as_ref().unwrap_or(&coefficients)) else {
            continue;
          };
          let confirmed = coefficients.get_pixel(top.x, top.y)[0];
          debug!(
            "第 {} 帧 {} 尺度 {} {}: 峰值 {:.4} 位于 ({}, {})，去均值 {:.4}",
            frame.index,
            template.name,
            scaled.scale,
            method.label(),
            top.score,
            top.x,
            top.y,
            confirmed
          );
          if top.score <= self.config.threshold || confirmed <= self.config.threshold {
            continue;
          }

          let (w, h) = scaled.image.dimensions();
          let bbox = BoundingBox::new(top.x as f32, top.y as f32, w as f32, h as f32);
          let mut annotated = frame.image.clone();
          self.context.draw.rectangle(&mut annotated, &bbox, GREEN);
          let name = export_name(Self::EXPORT_PREFIX, &template.name, frame.index, scaled.scale)
            .replace(".png", &format!("_{}.png", method.label()));
          export_or_warn(self.context.export.as_ref(), &name, &annotated);

          if best.map(|(score, _)| top.score > score).unwrap_or(true) {
            best = Some((top.score, bbox));
          }
        }
      }

      if let Some((score, bbox)) = best {
        info!(
          "检测到 {}，最高分 {:.4}，时间 {:.3}s",
          template.name, score, frame.time
        );
        hits.push((score, DetectionRecord::new(&template.name, frame.time).with_bbox(bbox)));
      }
    }

    hits.sort_by(|a, b| b.0.total_cmp(&a.0));
    hits.into_iter().map(|(_, record)| record).collect()
  }

  /// 缩放后过小或近乎纯色的模板没有可区分的结构
  fn usable(&self, image: &GrayImage) -> bool {
    let (w, h) = image.dimensions();
    if w.min(h) < self.config.min_template_side {
      return false;
    }
    let n = (w * h) as f64;
    let mean = image.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let variance = image
      .pixels()
      .map(|p| (p[0] as f64 - mean).powi(2))
      .sum::<f64>()
      / n;
    variance >= MIN_TEMPLATE_VARIANCE
  }
}

impl Strategy for TemplateMatchingStrategy {
  fn name(&self) -> &'static str {
    Self::NAME
  }

  fn analyze(&mut self, media: &mut dyn Media) -> Result<Report, AnalysisError> {
    info!("{}: 开始分析", Self::NAME);
    let templates: Vec<PreparedTemplate> = self
      .context
      .templates
      .load(&self.config.templates)?
      .into_iter()
      .map(|t| {
        let gray = to_gray(&t.image);
        let scales = self
          .config
          .scales
          .iter()
          .map(|&scale| ScaledTemplate {
            scale,
            image: resize_by(&gray, scale),
          })
          .filter(|scaled| {
            let usable = self.usable(&scaled.image);
            if !usable {
              debug!("{} 尺度 {} 的模板过小或无纹理，跳过", t.name, scaled.scale);
            }
            usable
          })
          .collect();
        PreparedTemplate {
          name: t.name,
          scales,
        }
      })
      .collect();

    let frames = self.context.frames.frames(media);
    scan_frames(frames, |frame| Ok(self.detect(frame, &templates)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    input::MemoryMedia,
    output::RecordingExport,
    template::{Template, TemplateLibrary},
  };
  use image::{Rgb, RgbImage};
  use rand::{Rng, SeedableRng, rngs::StdRng};
  use std::sync::Arc;

  fn checker(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
      if (x / 2 + y / 3) % 2 == 0 {
        Rgb([250, 250, 250])
      } else {
        Rgb([10, 10, 10])
      }
    })
  }

  #[test]
  fn records_are_ranked_by_best_score() {
    // 两个模板都在画面中，缩放 1.0 下完全一致
    let a = checker(12);
    let b = RgbImage::from_fn(12, 12, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 90]));
    let mut frame = RgbImage::from_pixel(60, 40, Rgb([128, 128, 128]));
    image::imageops::replace(&mut frame, &a, 4, 4);
    let mut partial_b = b.clone();
    partial_b.put_pixel(0, 0, Rgb([255, 0, 0]));
    image::imageops::replace(&mut frame, &partial_b, 30, 20);

    let library = TemplateLibrary::in_memory(vec![Template::new("a", a), Template::new("b", b)]);
    let export = Arc::new(RecordingExport::new());
    let context = AnalysisContext::new(library).with_export(export.clone());
    let config = TemplateMatchingConfig {
      templates: vec!["b".to_string(), "a".to_string()],
      scales: vec![1.0],
      ..TemplateMatchingConfig::default()
    };
    let mut strategy = TemplateMatchingStrategy::new(config, context);
    let report = strategy.analyze(&mut MemoryMedia::from_frames(1.0, vec![frame])).unwrap();

    let found: Vec<&str> = report.iter().map(|r| r.found.as_str()).collect();
    assert_eq!(found, vec!["a", "b"]);
    assert_eq!(report.records[0].bbox, Some(BoundingBox::new(4.0, 4.0, 12.0, 12.0)));
    assert!(
      export
        .names()
        .contains(&"template_detected_a_frame0_scale1_ccoeff.png".to_string())
    );
  }

  #[test]
  fn oversized_templates_are_skipped() {
    let library = TemplateLibrary::in_memory(vec![Template::new("big", checker(40))]);
    let config = TemplateMatchingConfig {
      templates: vec!["big".to_string()],
      scales: vec![1.0],
      ..TemplateMatchingConfig::default()
    };
    let mut strategy = TemplateMatchingStrategy::new(config, AnalysisContext::new(library));
    let frame = RgbImage::from_pixel(20, 20, Rgb([1, 2, 3]));
    let report = strategy.analyze(&mut MemoryMedia::from_frames(1.0, vec![frame])).unwrap();
    assert!(report.is_empty());
    assert!(report.skipped_frames.is_empty());
  }

  fn disc_tile() -> RgbImage {
    RgbImage::from_fn(200, 200, |x, y| {
      let (dx, dy) = (x as f32 - 99.5, y as f32 - 99.5);
      if dx * dx + dy * dy <= 60.0 * 60.0 {
        Rgb([40, 200, 60])
      } else {
        Rgb([230, 230, 230])
      }
    })
  }

  fn noise(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(320, 240, |_, _| Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]))
  }

  fn whatsapp_strategy(export: Arc<RecordingExport>) -> TemplateMatchingStrategy {
    let library = TemplateLibrary::in_memory(vec![Template::new("whatsapp", disc_tile())]);
    let config = TemplateMatchingConfig {
      templates: vec!["whatsapp".to_string()],
      ..TemplateMatchingConfig::default()
    };
    TemplateMatchingStrategy::new(config, AnalysisContext::new(library).with_export(export))
  }

  #[test]
  fn noise_frame_has_no_detection() {
    let export = Arc::new(RecordingExport::new());
    let mut strategy = whatsapp_strategy(export.clone());
    let frames = vec![noise(7), noise(8), noise(9)];
    let report = strategy.analyze(&mut MemoryMedia::from_frames(1.0, frames)).unwrap();
    assert!(report.is_empty(), "{:?}", report.records);
    assert!(export.names().is_empty());
  }

  #[test]
  fn logo_pasted_into_noise_is_found() {
    let mut frame = noise(7);
    image::imageops::replace(&mut frame, &resize_by(&disc_tile(), 0.1), 100, 80);
    let export = Arc::new(RecordingExport::new());
    let mut strategy = whatsapp_strategy(export);
    let report = strategy.analyze(&mut MemoryMedia::from_frames(1.0, vec![frame])).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.records[0].found, "whatsapp");
    assert_eq!(report.records[0].bbox, Some(BoundingBox::new(100.0, 80.0, 20.0, 20.0)));
  }

  #[test]
  fn tiny_and_flat_scales_are_dropped() {
    let strategy = whatsapp_strategy(Arc::new(RecordingExport::new()));
    let gray = to_gray(&disc_tile());
    assert!(!strategy.usable(&resize_by(&gray, 0.02)));
    assert!(strategy.usable(&resize_by(&gray, 0.1)));
    assert!(!strategy.usable(&GrayImage::from_pixel(32, 32, image::Luma([90]))));
  }
}
