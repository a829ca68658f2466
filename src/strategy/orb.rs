// 该文件是 Tanzhen （探针） 项目的一部分。
// src/strategy/orb.rs - ORB 特征匹配与单应性校验
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
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
  config::OrbConfig,
  frame::Frame,
  input::Media,
  output::{draw::GREEN, export_or_warn},
  report::{BoundingBox, DetectionRecord, Report},
  strategy::{AnalysisContext, AnalysisError, Strategy, export_name, scan_frames},
  vision::{
    homography::{Point, verify_geometry},
    matcher::{DMatch, knn_match, ratio_test, symmetric_matches},
    orb::{Features, Orb},
    resize_by, to_gray,
  },
};

struct ScaledTemplate {
  scale: f32,
  image: RgbImage,
  features: Features,
}

struct PreparedTemplate {
  name: String,
  scales: Vec<ScaledTemplate>,
}

pub struct OrbStrategy {
  config: OrbConfig,
  context: AnalysisContext,
}

impl OrbStrategy {
  pub const NAME: &'static str = "ORB Analyzer";
  const EXPORT_PREFIX: &'static str = "orb";

  pub fn new(config: OrbConfig, context: AnalysisContext) -> Self {
    OrbStrategy { config, context }
  }

  fn prepare(&self, orb: &Orb) -> Result<Vec<PreparedTemplate>, AnalysisError> {
    let templates = self.context.templates.load(&self.config.templates)?;
    let prepared = templates
      .into_par_iter()
      .map(|t| {
        let scales = self
          .config
          .scales
          .iter()
          .map(|&scale| {
            let image = resize_by(&t.image, scale);
            let features = orb.detect_and_compute(&to_gray(&image));
            debug!("模板 {} 尺度 {}: {} 个特征点", t.name, scale, features.len());
            ScaledTemplate {
              scale,
              image,
              features,
            }
          })
          .collect();
        PreparedTemplate {
          name: t.name,
          scales,
        }
      })
      .collect();
    Ok(prepared)
  }

  /// 对称的比率测试匹配
  fn good_matches(&self, template: &Features, frame: &Features) -> Vec<DMatch> {
    let forward = knn_match(&template.descriptors, &frame.descriptors, 2);
    let filtered = ratio_test(&forward, self.config.ratio, Some(self.config.max_distance));
    let reverse = knn_match(&frame.descriptors, &template.descriptors, 2);
    symmetric_matches(&filtered, &reverse)
  }

  /// 依次尝试各尺度，第一次通过几何校验即停止
  fn locate(
    &self,
    frame: &Frame,
    frame_features: &Features,
    template: &PreparedTemplate,
  ) -> Option<DetectionRecord> {
    for scaled in &template.scales {
      if scaled.features.len() < 2 || frame_features.len() < 2 {
        debug!("{} 尺度 {}: 描述子不足，跳过", template.name, scaled.scale);
        continue;
      }

      let matches = self.good_matches(&scaled.features, frame_features);
      debug!(
        "第 {} 帧 {} 尺度 {}: {} 个对称匹配",
        frame.index,
        template.name,
        scaled.scale,
        matches.len()
      );
      if matches.len() < self.config.min_matches {
        continue;
      }

      let src: Vec<Point> = matches
        .iter()
        .map(|m| {
          let k = &scaled.features.keypoints[m.query];
          (k.x as f64, k.y as f64)
        })
        .collect();
      let dst: Vec<Point> = matches
        .iter()
        .map(|m| {
          let k = &frame_features.keypoints[m.train];
          (k.x as f64, k.y as f64)
        })
        .collect();
      let Some(estimate) = verify_geometry(&src, &dst, &self.config.ransac, &self.config.geometry)
      else {
        continue;
      };

      let (w, h) = scaled.image.dimensions();
      let (w, h) = (w as f64, h as f64);
      let Some(corners) = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
        .into_iter()
        .map(|p| estimate.homography.project(p).map(|(x, y)| (x as f32, y as f32)))
        .collect::<Option<Vec<(f32, f32)>>>()
      else {
        continue;
      };
      let Some(bbox) = BoundingBox::enclosing(&corners) else {
        continue;
      };

      info!(
        "检测到 {}，尺度 {}，内点 {}/{}，时间 {:.3}s",
        template.name,
        scaled.scale,
        estimate.inlier_count(),
        matches.len(),
        frame.time
      );
      self.export_hit(frame, template, scaled, &corners, &src, &dst, &estimate.inliers);
      return Some(DetectionRecord::new(&template.name, frame.time).with_bbox(bbox));
    }
    None
  }

  #[allow(clippy::too_many_arguments)]
  fn export_hit(
    &self,
    frame: &Frame,
    template: &PreparedTemplate,
    scaled: &ScaledTemplate,
    corners: &[(f32, f32)],
    src: &[Point],
    dst: &[Point],
    inliers: &[bool],
  ) {
    let export = self.context.export.as_ref();
    let mut annotated = frame.image.clone();
    self.context.draw.polygon(&mut annotated, corners, GREEN);
    export_or_warn(
      export,
      &export_name(Self::EXPORT_PREFIX, &template.name, frame.index, scaled.scale),
      &annotated,
    );

    let pairs: Vec<((f32, f32), (f32, f32))> = src
      .iter()
      .zip(dst)
      .zip(inliers)
      .filter(|(_, inlier)| **inlier)
      .map(|((a, b), _)| ((a.0 as f32, a.1 as f32), (b.0 as f32, b.1 as f32)))
      .collect();
    let matches = self
      .context
      .draw
      .side_by_side(&scaled.image, &frame.image, &pairs, GREEN);
    let name = format!(
      "{}_matches_{}_frame{}_scale{}.png",
      Self::EXPORT_PREFIX,
      template.name,
      frame.index,
      scaled.scale
    );
    export_or_warn(export, &name, &matches);
  }

  fn detect(&self, frame: &Frame, orb: &Orb, templates: &[PreparedTemplate]) -> Vec<DetectionRecord> {
    let frame_features = orb.detect_and_compute(&to_gray(&frame.image));
    templates
      .par_iter()
      .map(|template| self.locate(frame, &frame_features, template))
      .collect::<Vec<_>>()
      .into_iter()
      .flatten()
      .collect()
  }
}

impl Strategy for OrbStrategy {
  fn name(&self) -> &'static str {
    Self::NAME
  }

  fn analyze(&mut self, media: &mut dyn Media) -> Result<Report, AnalysisError> {
    info!("{}: 开始分析", Self::NAME);
    let orb = Orb::new(self.config.features);
    let templates = self.prepare(&orb)?;
    let frames = self.context.frames.frames(media);
    scan_frames(frames, |frame| Ok(self.detect(frame, &orb, &templates)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    input::MemoryMedia,
    output::RecordingExport,
    template::{Template, TemplateLibrary},
    vision::orb::OrbParams,
  };
  use image::Rgb;
  use rand::{Rng, SeedableRng, rngs::StdRng};
  use std::sync::Arc;

  fn blocks(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cells_x = width.div_ceil(8);
    let cells_y = height.div_ceil(8);
    let cells: Vec<u8> = (0..cells_x * cells_y).map(|_| rng.r#gen()).collect();
    RgbImage::from_fn(width, height, |x, y| {
      let v = cells[((y / 8) * cells_x + x / 8) as usize];
      Rgb([v, v, v])
    })
  }

  fn config() -> OrbConfig {
    OrbConfig {
      templates: vec!["icon".to_string()],
      scales: vec![1.0],
      features: OrbParams {
        n_features: 10000,
        scale_factor: 1.2,
        n_levels: 1,
        edge_threshold: 15,
        ..OrbParams::default()
      },
      ..OrbConfig::default()
    }
  }

  #[test]
  fn finds_translated_copy_and_exports_both_images() {
    let icon = blocks(128, 128, 11);
    let mut frame = blocks(320, 240, 99);
    image::imageops::replace(&mut frame, &icon, 96, 56);

    let export = Arc::new(RecordingExport::new());
    let context = AnalysisContext::new(TemplateLibrary::in_memory(vec![Template::new("icon", icon)]))
      .with_export(export.clone());
    let mut strategy = OrbStrategy::new(config(), context);
    let report = strategy
      .analyze(&mut MemoryMedia::from_frames(1.0, vec![frame]))
      .unwrap();

    assert_eq!(report.len(), 1);
    let bbox = report.records[0].bbox.unwrap();
    assert!((bbox.x - 96.0).abs() < 2.0, "{bbox:?}");
    assert!((bbox.y - 56.0).abs() < 2.0, "{bbox:?}");
    assert!((bbox.width - 128.0).abs() < 3.0, "{bbox:?}");
    let names = export.names();
    assert!(names.contains(&"orb_detected_icon_frame0_scale1.png".to_string()));
    assert!(names.contains(&"orb_matches_icon_frame0_scale1.png".to_string()));
  }

  #[test]
  fn unrelated_texture_is_not_reported() {
    let icon = blocks(128, 128, 11);
    let frame = blocks(320, 240, 42);
    let context = AnalysisContext::new(TemplateLibrary::in_memory(vec![Template::new("icon", icon)]));
    let mut strategy = OrbStrategy::new(config(), context);
    let report = strategy
      .analyze(&mut MemoryMedia::from_frames(1.0, vec![frame]))
      .unwrap();
    assert!(report.is_empty());
  }

  #[test]
  fn featureless_templates_are_skipped() {
    let flat = RgbImage::from_pixel(64, 64, Rgb([200, 200, 200]));
    let context = AnalysisContext::new(TemplateLibrary::in_memory(vec![Template::new("icon", flat)]));
    let mut strategy = OrbStrategy::new(config(), context);
    let report = strategy
      .analyze(&mut MemoryMedia::from_frames(1.0, vec![blocks(96, 96, 3)]))
      .unwrap();
    assert!(report.is_empty());
    assert!(report.skipped_frames.is_empty());
  }
}
