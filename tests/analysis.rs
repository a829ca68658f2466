// 该文件是 Tanzhen （探针） 项目的一部分。
// tests/analysis.rs - 端到端分析测试
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

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use image::{Rgb, RgbImage};

use tanzhen::{
  config::{AnalysisConfig, OcrConfig, TemplateMatchingConfig},
  input::{Media, MediaError, MemoryMedia},
  model::{Model, ModelError, ModelLoader, Tensor},
  ocr::{OcrError, RecognizerFactory, TextRecognizer},
  output::{ReportDocument, RecordingExport},
  strategy::{
    AnalysisContext, AnalysisError, NeuralStrategy, OcrStrategy, Strategy, StrategyKind,
    StrategyRegistry, TemplateMatchingStrategy,
  },
  task::AnalysisTask,
  template::{AssetLoadError, Template, TemplateLibrary},
  vision::resize_by,
};

fn disc_logo() -> RgbImage {
  RgbImage::from_fn(200, 200, |x, y| {
    let (dx, dy) = (x as f32 - 99.5, y as f32 - 99.5);
    if dx * dx + dy * dy <= 30.0 * 30.0 {
      Rgb([255, 255, 255])
    } else {
      Rgb([0, 0, 0])
    }
  })
}

#[test]
fn logo_in_one_frame_yields_exactly_one_record() {
  let logo = disc_logo();
  let background = RgbImage::from_pixel(160, 120, Rgb([128, 128, 128]));
  let mut with_logo = background.clone();
  image::imageops::replace(&mut with_logo, &resize_by(&logo, 0.1), 70, 50);
  let frames = vec![
    background.clone(),
    background.clone(),
    with_logo,
    background.clone(),
    background,
  ];

  let export = Arc::new(RecordingExport::new());
  let context = AnalysisContext::new(TemplateLibrary::in_memory(vec![Template::new(
    "whatsapp", logo,
  )]))
  .with_export(export.clone());
  let config = TemplateMatchingConfig {
    templates: vec!["whatsapp".to_string()],
    ..TemplateMatchingConfig::default()
  };
  let mut strategy = TemplateMatchingStrategy::new(config, context);
  let report = AnalysisTask
    .run(&mut strategy, &mut MemoryMedia::from_frames(1.0, frames))
    .unwrap();

  let found: Vec<(&str, f64)> = report.iter().map(|r| (r.found.as_str(), r.time)).collect();
  assert_eq!(found, vec![("whatsapp", 2.0)]);
  assert!(report.skipped_frames.is_empty());
  assert!(export.names().iter().all(|name| name.contains("_frame2_")));

  let mut json = Vec::new();
  ReportDocument::new(TemplateMatchingStrategy::NAME, &report)
    .write_to(&mut json)
    .unwrap();
  let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
  assert_eq!(value["strategy"], "Template Matching Analyzer");
  assert_eq!(value["records"][0]["found"], "whatsapp");
  assert_eq!(value["records"][0]["time"], 2.0);
}

struct Counted {
  live: Arc<AtomicUsize>,
}

impl TextRecognizer for Counted {
  fn recognize(&mut self, _image: &RgbImage) -> Result<String, OcrError> {
    Ok("ask ChatGPT".to_string())
  }
}

impl Drop for Counted {
  fn drop(&mut self) {
    self.live.fetch_sub(1, Ordering::SeqCst);
  }
}

struct CountedFactory {
  live: Arc<AtomicUsize>,
}

impl RecognizerFactory for CountedFactory {
  fn create(&self) -> Result<Box<dyn TextRecognizer>, OcrError> {
    self.live.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(Counted {
      live: self.live.clone(),
    }))
  }
}

/// 第二次截图起失败
struct Flaky {
  inner: MemoryMedia,
  captures: usize,
}

impl Media for Flaky {
  fn duration(&self) -> Option<f64> {
    self.inner.duration()
  }

  fn dimensions(&self) -> (u32, u32) {
    self.inner.dimensions()
  }

  fn frame_rate(&self) -> Option<f64> {
    self.inner.frame_rate()
  }

  fn seek(&mut self, time: f64) -> Result<(), MediaError> {
    self.inner.seek(time)
  }

  fn capture(&mut self) -> Result<RgbImage, MediaError> {
    self.captures += 1;
    if self.captures > 1 {
      return Err(MediaError::Capture("decoder stalled".to_string()));
    }
    self.inner.capture()
  }
}

fn three_seconds() -> MemoryMedia {
  MemoryMedia::from_frames(1.0, vec![RgbImage::new(16, 16); 3]).with_frame_rate(30.0)
}

#[test]
fn ocr_workers_are_released_on_every_path() {
  let live = Arc::new(AtomicUsize::new(0));
  let mut strategy = OcrStrategy::new(
    OcrConfig::default(),
    AnalysisContext::new(TemplateLibrary::in_memory(Vec::new())),
    Arc::new(CountedFactory { live: live.clone() }),
  );

  let mut flaky = Flaky {
    inner: three_seconds(),
    captures: 0,
  };
  assert!(matches!(
    strategy.analyze(&mut flaky),
    Err(AnalysisError::FrameCapture(_))
  ));
  assert_eq!(live.load(Ordering::SeqCst), 0);

  let report = strategy.analyze(&mut three_seconds()).unwrap();
  assert_eq!(live.load(Ordering::SeqCst), 0);
  // 每帧四个象限都命中
  assert_eq!(report.len(), 12);
  assert!(report.iter().all(|r| r.found == "chatgpt"));
}

struct Fixed;

impl Model for Fixed {
  fn infer(&mut self, _input: &Tensor) -> Result<Tensor, ModelError> {
    // 两个候选框都属于第 0 类
    Tensor::new(
      vec![1, 6, 2],
      vec![
        100.0, 300.0, // cx
        100.0, 300.0, // cy
        20.0, 40.0, // w
        20.0, 40.0, // h
        0.9, 0.95, // chat
        0.1, 0.2, // chat_ai
      ],
    )
  }
}

struct FixedLoader;

impl ModelLoader for FixedLoader {
  fn load(&self) -> Result<Box<dyn Model>, AssetLoadError> {
    Ok(Box::new(Fixed))
  }
}

#[test]
fn registry_task_initializes_the_detector() {
  let context = AnalysisContext::new(TemplateLibrary::in_memory(Vec::new()));
  let mut registry = StrategyRegistry::with_defaults(
    &AnalysisConfig::default(),
    context.clone(),
    Arc::new(CountedFactory {
      live: Arc::new(AtomicUsize::new(0)),
    }),
    None,
  );

  let neural = registry.get_kind_mut(StrategyKind::Neural).unwrap();
  let mut media = MemoryMedia::from_frames(1.0, vec![RgbImage::new(640, 640)]);
  assert!(matches!(
    AnalysisTask.run(neural, &mut media),
    Err(AnalysisError::AssetLoad(_))
  ));

  registry.register(Box::new(
    NeuralStrategy::new(AnalysisConfig::default().neural, context).with_loader(Box::new(FixedLoader)),
  ));
  let neural = registry.get_kind_mut(StrategyKind::Neural).unwrap();
  let report = AnalysisTask.run(neural, &mut media).unwrap();
  assert_eq!(report.len(), 1);
  let record = &report.records[0];
  assert_eq!(record.found, "chat");
  assert_eq!(record.confidence, Some(0.95));
  assert_eq!(record.class_id, Some(0));
  assert_eq!(record.time, 0.0);
}
