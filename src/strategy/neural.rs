// 该文件是 Tanzhen （探针） 项目的一部分。
// src/strategy/neural.rs - 目标检测网络
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
  config::NeuralConfig,
  frame::Frame,
  input::Media,
  model::{Model, ModelLoader, Tensor, decode_predictions},
  output::{draw::class_color, export_or_warn},
  report::{DetectionRecord, Report, keep_most_confident_per_class},
  strategy::{AnalysisContext, AnalysisError, Strategy, scan_frames},
  template::AssetLoadError,
};

/// 模型在 `initialize` 时加载，由下一次 `analyze` 取走并在结束时释放
pub struct NeuralStrategy {
  config: NeuralConfig,
  context: AnalysisContext,
  loader: Option<Box<dyn ModelLoader>>,
  model: Option<Box<dyn Model>>,
}

impl NeuralStrategy {
  pub const NAME: &'static str = "YOLO Analyzer";

  pub fn new(config: NeuralConfig, context: AnalysisContext) -> Self {
    NeuralStrategy {
      config,
      context,
      loader: None,
      model: None,
    }
  }

  pub fn with_loader(mut self, loader: Box<dyn ModelLoader>) -> Self {
    self.loader = Some(loader);
    self
  }

  pub fn is_loaded(&self) -> bool {
    self.model.is_some()
  }

  fn class_name(&self, class_id: u32) -> Option<&str> {
    self.config.classes.get(class_id as usize).map(String::as_str)
  }

  fn detect(&self, frame: &Frame, model: &mut dyn Model) -> Result<Vec<DetectionRecord>, String> {
    let input = Tensor::from_image(&frame.image, self.config.input_size, self.config.layout);
    let output = model.infer(&input).map_err(|e| e.to_string())?;
    let predictions = decode_predictions(
      &output,
      self.config.box_format,
      self.config.input_size,
      frame.image.dimensions(),
      self.config.threshold,
    )
    .map_err(|e| e.to_string())?;
    debug!("第 {} 帧: {} 个候选超过阈值", frame.index, predictions.len());

    let records = keep_most_confident_per_class(
      predictions
        .into_iter()
        .filter_map(|p| {
          let Some(name) = self.class_name(p.class_id) else {
            debug!("第 {} 帧: 忽略未知类别 {}", frame.index, p.class_id);
            return None;
          };
          Some(
            DetectionRecord::new(name, frame.time)
              .with_bbox(p.bbox)
              .with_confidence(p.confidence)
              .with_class_id(p.class_id),
          )
        })
        .collect(),
    );

    if !records.is_empty() {
      let mut annotated = frame.image.clone();
      for record in &records {
        if let Some(bbox) = &record.bbox {
          let label = format!(
            "{} {:.2}",
            record.found,
            record.confidence.unwrap_or_default()
          );
          self
            .context
            .draw
            .labeled_box(&mut annotated, bbox, &label, class_color(&record.found));
        }
        info!(
          "检测到 {}，置信度 {:.3}，时间 {:.3}s",
          record.found,
          record.confidence.unwrap_or_default(),
          record.time
        );
      }
      export_or_warn(
        self.context.export.as_ref(),
        &format!("neural_detected_frame{}.png", frame.index),
        &annotated,
      );
    }
    Ok(records)
  }
}

impl Strategy for NeuralStrategy {
  fn name(&self) -> &'static str {
    Self::NAME
  }

  fn requires_initialization(&self) -> bool {
    true
  }

  fn initialize(&mut self) -> Result<(), AnalysisError> {
    let loader = self.loader.as_ref().ok_or_else(|| AssetLoadError::NotFound {
      name: "model".to_string(),
      path: "<unset>".to_string(),
    })?;
    self.model = Some(loader.load()?);
    info!("{}: 模型已加载", Self::NAME);
    Ok(())
  }

  fn analyze(&mut self, media: &mut dyn Media) -> Result<Report, AnalysisError> {
    let mut model = self.model.take().ok_or(AnalysisError::ModelNotLoaded)?;
    info!("{}: 开始分析", Self::NAME);
    let frames = self.context.frames.frames(media);
    scan_frames(frames, |frame| self.detect(frame, model.as_mut()))
  }
}
