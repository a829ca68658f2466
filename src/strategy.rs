// 该文件是 Tanzhen （探针） 项目的一部分。
// src/strategy.rs - 检测策略接口与注册表
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

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::{
  config::AnalysisConfig,
  frame::{Frame, FrameSource, Frames},
  input::{Media, MediaError},
  model::ModelLoader,
  ocr::{OcrError, RecognizerFactory},
  output::{DiscardExport, Export, draw::Draw},
  report::{DetectionRecord, PerFrameProcessingError, Report, ResultAggregator},
  template::{AssetLoadError, TemplateLibrary},
};

#[derive(Error, Debug)]
pub enum AnalysisError {
  #[error("资源加载失败: {0}")]
  AssetLoad(#[from] AssetLoadError),
  #[error("模型尚未加载，请先调用 initialize()")]
  ModelNotLoaded,
  #[error("帧捕获失败: {0}")]
  FrameCapture(#[from] MediaError),
  #[error("资源初始化失败: {0}")]
  ResourceInit(#[from] OcrError),
}

/// 一种检测策略
///
/// 同一个实例同一时刻只允许一次 `analyze`，由 `&mut self` 保证。
pub trait Strategy: Send {
  fn name(&self) -> &'static str;

  /// 为真时必须先调用 [`Strategy::initialize`]
  fn requires_initialization(&self) -> bool {
    false
  }

  fn initialize(&mut self) -> Result<(), AnalysisError> {
    Ok(())
  }

  fn analyze(&mut self, media: &mut dyn Media) -> Result<Report, AnalysisError>;
}

/// 各策略共用的协作者
#[derive(Clone)]
pub struct AnalysisContext {
  pub templates: TemplateLibrary,
  pub export: Arc<dyn Export>,
  pub draw: Arc<Draw>,
  pub frames: FrameSource,
}

impl AnalysisContext {
  pub fn new(templates: TemplateLibrary) -> Self {
    AnalysisContext {
      templates,
      export: Arc::new(DiscardExport),
      draw: Arc::new(Draw::default()),
      frames: FrameSource::default(),
    }
  }

  pub fn with_export(mut self, export: Arc<dyn Export>) -> Self {
    self.export = export;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = Arc::new(draw);
    self
  }

  pub fn with_frames(mut self, frames: FrameSource) -> Self {
    self.frames = frames;
    self
  }
}

/// 标注图像文件名: `<strategy>_detected_<template>_frame<index>_scale<scale>.png`
pub fn export_name(strategy: &str, template: &str, frame_index: usize, scale: f32) -> String {
  format!(
    "{}_detected_{}_frame{}_scale{}.png",
    strategy, template, frame_index, scale
  )
}

/// 逐帧处理
///
/// 媒体错误中止分析，单帧处理错误记录后跳过该帧。
pub(crate) fn scan_frames<M, F>(frames: Frames<'_, M>, mut per_frame: F) -> Result<Report, AnalysisError>
where
  M: Media + ?Sized,
  F: FnMut(&Frame) -> Result<Vec<DetectionRecord>, String>,
{
  let mut aggregator = ResultAggregator::new();
  for frame in frames {
    let frame = frame?;
    match per_frame(&frame) {
      Ok(records) => aggregator.submit(frame.index, records),
      Err(reason) => aggregator.skip(PerFrameProcessingError {
        index: frame.index,
        time: frame.time,
        reason,
      }),
    }
  }
  Ok(aggregator.finish())
}

mod histogram;
mod neural;
mod ocr;
mod orb;
mod roi_orb;
mod template_matching;

pub use self::{
  histogram::HistogramStrategy, neural::NeuralStrategy, ocr::OcrStrategy, orb::OrbStrategy,
  roi_orb::RoiOrbStrategy, template_matching::TemplateMatchingStrategy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StrategyKind {
  Histogram,
  Template,
  Orb,
  RoiOrb,
  Ocr,
  Neural,
}

impl StrategyKind {
  pub const ALL: [StrategyKind; 6] = [
    StrategyKind::Histogram,
    StrategyKind::Template,
    StrategyKind::Orb,
    StrategyKind::RoiOrb,
    StrategyKind::Ocr,
    StrategyKind::Neural,
  ];

  pub fn display_name(&self) -> &'static str {
    match self {
      StrategyKind::Histogram => HistogramStrategy::NAME,
      StrategyKind::Template => TemplateMatchingStrategy::NAME,
      StrategyKind::Orb => OrbStrategy::NAME,
      StrategyKind::RoiOrb => RoiOrbStrategy::NAME,
      StrategyKind::Ocr => OcrStrategy::NAME,
      StrategyKind::Neural => NeuralStrategy::NAME,
    }
  }
}

/// 显示名到策略实例的映射，保持注册顺序
#[derive(Default)]
pub struct StrategyRegistry {
  entries: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
  pub fn new() -> Self {
    StrategyRegistry::default()
  }

  /// 注册全部六种策略
  pub fn with_defaults(
    config: &AnalysisConfig,
    context: AnalysisContext,
    recognizers: Arc<dyn RecognizerFactory>,
    model_loader: Option<Box<dyn ModelLoader>>,
  ) -> Self {
    let mut registry = StrategyRegistry::new();
    registry.register(Box::new(HistogramStrategy::new(
      config.histogram.clone(),
      context.clone(),
    )));
    registry.register(Box::new(TemplateMatchingStrategy::new(
      config.template.clone(),
      context.clone(),
    )));
    registry.register(Box::new(OrbStrategy::new(config.orb.clone(), context.clone())));
    registry.register(Box::new(RoiOrbStrategy::new(
      config.roi_orb.clone(),
      context.clone(),
    )));
    registry.register(Box::new(OcrStrategy::new(
      config.ocr.clone(),
      context.clone(),
      recognizers,
    )));
    let mut neural = NeuralStrategy::new(config.neural.clone(), context);
    if let Some(loader) = model_loader {
      neural = neural.with_loader(loader);
    }
    registry.register(Box::new(neural));
    registry
  }

  /// 同名策略会被替换
  pub fn register(&mut self, strategy: Box<dyn Strategy>) {
    let name = strategy.name();
    if let Some(existing) = self.entries.iter_mut().find(|s| s.name() == name) {
      info!("替换策略: {}", name);
      *existing = strategy;
    } else {
      info!("注册策略: {}", name);
      self.entries.push(strategy);
    }
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.entries.iter().map(|s| s.name()).collect()
  }

  pub fn get_mut(&mut self, name: &str) -> Option<&mut dyn Strategy> {
    self
      .entries
      .iter_mut()
      .find(|s| s.name() == name)
      .map(|s| s.as_mut() as &mut dyn Strategy)
  }

  pub fn get_kind_mut(&mut self, kind: StrategyKind) -> Option<&mut dyn Strategy> {
    self.get_mut(kind.display_name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{input::MemoryMedia, ocr::TesseractFactory};

  struct Fixed(&'static str);

  impl Strategy for Fixed {
    fn name(&self) -> &'static str {
      self.0
    }

    fn analyze(&mut self, _media: &mut dyn Media) -> Result<Report, AnalysisError> {
      Ok(Report::default())
    }
  }

  #[test]
  fn export_names_follow_pattern() {
    assert_eq!(
      export_name("template", "whatsapp", 2, 0.1),
      "template_detected_whatsapp_frame2_scale0.1.png"
    );
    assert_eq!(
      export_name("histogram", "telegram", 0, 1.0),
      "histogram_detected_telegram_frame0_scale1.png"
    );
  }

  #[test]
  fn defaults_register_every_kind_in_order() {
    let context = AnalysisContext::new(TemplateLibrary::in_memory(Vec::new()));
    let mut registry = StrategyRegistry::with_defaults(
      &AnalysisConfig::default(),
      context,
      Arc::new(TesseractFactory::default()),
      None,
    );
    let expected: Vec<&str> = StrategyKind::ALL.iter().map(|k| k.display_name()).collect();
    assert_eq!(registry.names(), expected);
    for kind in StrategyKind::ALL {
      let strategy = registry.get_kind_mut(kind).unwrap();
      assert_eq!(
        strategy.requires_initialization(),
        kind == StrategyKind::Neural,
        "{kind:?}"
      );
    }
    assert!(registry.get_mut("Unknown Analyzer").is_none());
  }

  #[test]
  fn register_replaces_same_name() {
    let mut registry = StrategyRegistry::new();
    registry.register(Box::new(Fixed("A")));
    registry.register(Box::new(Fixed("B")));
    registry.register(Box::new(Fixed("A")));
    assert_eq!(registry.names(), vec!["A", "B"]);
  }

  #[test]
  fn per_frame_errors_skip_frames() {
    let mut media = MemoryMedia::from_frames(1.0, vec![image::RgbImage::new(2, 2); 3]);
    let report = scan_frames(FrameSource::default().frames(&mut media), |frame| {
      if frame.index == 1 {
        Err("boom".to_string())
      } else {
        Ok(vec![DetectionRecord::new("x", frame.time)])
      }
    })
    .unwrap();
    let times: Vec<f64> = report.iter().map(|r| r.time).collect();
    assert_eq!(times, vec![0.0, 2.0]);
    assert_eq!(report.skipped_frames.len(), 1);
    assert_eq!(report.skipped_frames[0].index, 1);
  }
}
