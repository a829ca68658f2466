// 该文件是 Tanzhen （探针） 项目的一部分。
// src/strategy/roi_orb.rs - 先用相关曲面定位候选区域，再做 ORB 匹配
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

use std::collections::HashSet;

use image::{DynamicImage, GrayImage, RgbImage, imageops};
use tracing::{debug, info};

use crate::{
  config::RoiOrbConfig,
  frame::Frame,
  input::Media,
  output::{
    draw::{BLUE, GREEN},
    export_or_warn,
  },
  report::{BoundingBox, DetectionRecord, Report},
  strategy::{AnalysisContext, AnalysisError, Strategy, export_name, scan_frames},
  vision::{
    correlation::{MatchMethod, correlation_surface},
    matcher::{DMatch, cross_check_match, knn_match, ratio_test},
    orb::{Features, Orb},
    region::{PixelRect, candidate_regions},
    resize_by, to_gray,
  },
};

struct ScaledTemplate {
  scale: f32,
  gray: GrayImage,
  features: Features,
}

struct PreparedTemplate {
  name: String,
  scales: Vec<ScaledTemplate>,
}

pub struct RoiOrbStrategy {
  config: RoiOrbConfig,
  context: AnalysisContext,
}

impl RoiOrbStrategy {
  pub const NAME: &'static str = "ROI ORB Analyzer";
  const EXPORT_PREFIX: &'static str = "roi_orb";

  pub fn new(config: RoiOrbConfig, context: AnalysisContext) -> Self {
    RoiOrbStrategy { config, context }
  }

  fn prepare(&self, orb: &Orb) -> Result<Vec<PreparedTemplate>, AnalysisError> {
    let templates = self.context.templates.load(&self.config.templates)?;
    Ok(
      templates
        .into_iter()
        .map(|t| {
          let gray = to_gray(&t.image);
          let scales = self
            .config
            .scales
            .iter()
            .map(|&scale| {
              let gray = resize_by(&gray, scale);
              let features = orb.detect_and_compute(&gray);
              ScaledTemplate {
                scale,
                gray,
                features,
              }
            })
            .collect();
          PreparedTemplate {
            name: t.name,
            scales,
          }
        })
        .collect(),
    )
  }

  /// 比率检验与交叉验证同时通过的匹配
  fn good_matches(&self, template: &Features, region: &Features) -> Vec<DMatch> {
    let knn = knn_match(&template.descriptors, &region.descriptors, 2);
    let ratio = ratio_test(&knn, self.config.ratio, None);
    let crossed: HashSet<(usize, usize)> = cross_check_match(&template.descriptors, &region.descriptors)
      .into_iter()
      .map(|m| (m.query, m.train))
      .collect();
    ratio
      .into_iter()
      .filter(|m| crossed.contains(&(m.query, m.train)))
      .collect()
  }

  fn locate(
    &self,
    frame: &Frame,
    gray: &GrayImage,
    orb: &Orb,
    template: &PreparedTemplate,
  ) -> Option<DetectionRecord> {
    let bounds = gray.dimensions();
    for scaled in &template.scales {
      let Some(surface) = correlation_surface(gray, &scaled.gray, MatchMethod::CoefficientNormed)
      else {
        continue;
      };
      let regions = candidate_regions(
        &surface,
        self.config.surface_threshold,
        scaled.gray.dimensions(),
        self.config.padding,
        bounds,
      );
      debug!(
        "第 {} 帧 {} 尺度 {}: {} 个候选区域",
        frame.index,
        template.name,
        scaled.scale,
        regions.len()
      );

      for region in regions {
        let crop = imageops::crop_imm(gray, region.x, region.y, region.width, region.height).to_image();
        let features = orb.detect_and_compute(&crop);
        if scaled.features.len() < 2 || features.len() < 2 {
          continue;
        }
        let matches = self.good_matches(&scaled.features, &features);
        if matches.len() < self.config.min_matches {
          debug!(
            "{} 区域 ({}, {}) 仅有 {} 个匹配",
            template.name,
            region.x,
            region.y,
            matches.len()
          );
          continue;
        }

        info!(
          "检测到 {}，尺度 {}，{} 个匹配，时间 {:.3}s",
          template.name,
          scaled.scale,
          matches.len(),
          frame.time
        );
        self.export_hit(frame, template, scaled, region, &crop, &features, &matches);
        return Some(DetectionRecord::new(&template.name, frame.time).with_bbox(rect_box(region)));
      }
    }
    None
  }

  #[allow(clippy::too_many_arguments)]
  fn export_hit(
    &self,
    frame: &Frame,
    template: &PreparedTemplate,
    scaled: &ScaledTemplate,
    region: PixelRect,
    crop: &GrayImage,
    features: &Features,
    matches: &[DMatch],
  ) {
    let export = self.context.export.as_ref();
    let mut annotated = frame.image.clone();
    self.context.draw.rectangle(&mut annotated, &rect_box(region), GREEN);
    export_or_warn(
      export,
      &export_name(Self::EXPORT_PREFIX, &template.name, frame.index, scaled.scale),
      &annotated,
    );

    let pairs: Vec<((f32, f32), (f32, f32))> = matches
      .iter()
      .map(|m| {
        let a = &scaled.features.keypoints[m.query];
        let b = &features.keypoints[m.train];
        ((a.x, a.y), (b.x, b.y))
      })
      .collect();
    let visual = self
      .context
      .draw
      .side_by_side(&to_rgb(&scaled.gray), &to_rgb(crop), &pairs, BLUE);
    let name = format!(
      "{}_matches_{}_frame{}_scale{}.png",
      Self::EXPORT_PREFIX,
      template.name,
      frame.index,
      scaled.scale
    );
    export_or_warn(export, &name, &visual);
  }

  fn detect(&self, frame: &Frame, orb: &Orb, templates: &[PreparedTemplate]) -> Vec<DetectionRecord> {
    let gray = to_gray(&frame.image);
    templates
      .iter()
      .filter_map(|template| self.locate(frame, &gray, orb, template))
      .collect()
  }
}

fn rect_box(rect: PixelRect) -> BoundingBox {
  BoundingBox::new(
    rect.x as f32,
    rect.y as f32,
    rect.width as f32,
    rect.height as f32,
  )
}

fn to_rgb(gray: &GrayImage) -> RgbImage {
  DynamicImage::ImageLuma8(gray.clone()).to_rgb8()
}

impl Strategy for RoiOrbStrategy {
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
