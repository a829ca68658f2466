// 该文件是 Tanzhen （探针） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{fs::File, io::BufWriter, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tanzhen::{
  FromUrl,
  config::AnalysisConfig,
  frame::FrameSource,
  input::InputWrapper,
  model::ModelLoader,
  ocr::TesseractFactory,
  output::{OutputWrapper, ReportDocument, draw::Draw},
  strategy::{AnalysisContext, StrategyKind, StrategyRegistry},
  task::AnalysisTask,
  template::TemplateLibrary,
};

fn model_loader(config: &AnalysisConfig) -> Option<Box<dyn ModelLoader>> {
  let path = config.neural.model.as_ref()?;
  #[cfg(feature = "model_onnx")]
  {
    Some(Box::new(tanzhen::model::OnnxModelLoader::new(path)))
  }
  #[cfg(not(feature = "model_onnx"))]
  {
    tracing::warn!("未启用 model_onnx 特性，忽略模型文件 {}", path.display());
    None
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  if args.list {
    for kind in StrategyKind::ALL {
      println!("{}", kind.display_name());
    }
    return Ok(());
  }

  let mut config = match &args.config {
    Some(path) => AnalysisConfig::from_file(path)?,
    None => AnalysisConfig::default(),
  };
  if let Some(fps) = args.fps {
    config.sampling.fps = fps;
  }
  if let Some(model) = &args.model {
    config.neural.model = Some(model.clone());
  }
  if let Some(tesseract) = &args.tesseract {
    config.ocr.tesseract = tesseract.clone();
  }

  let input_url = args.input.context("缺少 --input")?;
  let kind = args.strategy.context("缺少 --strategy")?;
  info!("输入来源: {}", input_url);
  info!("检测策略: {}", kind.display_name());
  info!("模板目录: {}", args.logos.display());
  info!("标注输出: {}", args.export);

  let mut media = InputWrapper::from_url(&input_url)
    .with_context(|| format!("无法打开输入 {}", input_url))?;
  let export = OutputWrapper::from_url(&args.export)
    .with_context(|| format!("无法创建输出 {}", args.export))?;
  let draw = match &args.font {
    Some(path) => Draw::default()
      .with_font_file(path)
      .with_context(|| format!("无法加载字体 {}", path.display()))?,
    None => Draw::default(),
  };

  let context = AnalysisContext::new(TemplateLibrary::directory(&args.logos))
    .with_export(Arc::new(export))
    .with_draw(draw)
    .with_frames(FrameSource::at_rate(config.sampling.fps));
  let recognizers = Arc::new(TesseractFactory::new(
    config.ocr.tesseract.clone(),
    config.ocr.language.clone(),
  ));
  let loader = model_loader(&config);
  let mut registry = StrategyRegistry::with_defaults(&config, context, recognizers, loader);
  let strategy = registry
    .get_kind_mut(kind)
    .with_context(|| format!("未注册的策略 {}", kind.display_name()))?;

  let report = AnalysisTask
    .run(strategy, &mut media)
    .with_context(|| format!("{} 分析失败", kind.display_name()))?;

  let document = ReportDocument::new(kind.display_name(), &report);
  match &args.report {
    Some(path) => {
      let file = File::create(path).with_context(|| format!("无法创建报告 {}", path.display()))?;
      document.write_to(BufWriter::new(file))?;
      info!("报告已写入: {}", path.display());
    }
    None => document.write_to(std::io::stdout().lock())?,
  }

  Ok(())
}
