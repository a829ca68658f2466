// 该文件是 Tanzhen （探针） 项目的一部分。
// src/config.rs - 分析参数
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

//! 各检测策略的阈值、尺度和词表。
//!
//! 所有字段都有默认值，JSON 文件只需写出要覆盖的部分。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::{DEFAULT_NATIVE_FPS, DEFAULT_SAMPLE_FPS},
  model::{BoxFormat, TensorLayout},
  vision::{
    correlation::MatchMethod,
    homography::{GeometryCheck, RansacParams},
    orb::OrbParams,
  },
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {path} 失败: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("解析配置文件 {path} 失败: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

/// 每个通道最多 256 个桶，即一个灰度级一个桶
pub const MAX_BINS_PER_CHANNEL: usize = 256;

fn names(list: &[&str]) -> Vec<String> {
  list.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
  pub sampling: SamplingConfig,
  pub histogram: HistogramConfig,
  pub template: TemplateMatchingConfig,
  pub orb: OrbConfig,
  pub roi_orb: RoiOrbConfig,
  pub ocr: OcrConfig,
  pub neural: NeuralConfig,
}

impl AnalysisConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let shown = path.as_ref().display().to_string();
    let text = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
      path: shown.clone(),
      source,
    })?;
    let config: AnalysisConfig =
      serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: shown.clone(),
        source,
      })?;
    config.validate()?;
    info!("已加载配置文件: {}", shown);
    Ok(config)
  }

  /// 检查无法由类型表达的取值范围
  pub fn validate(&self) -> Result<(), ConfigError> {
    let bins = self.histogram.bins_per_channel;
    if !(1..=MAX_BINS_PER_CHANNEL).contains(&bins) {
      return Err(ConfigError::Invalid {
        field: "histogram.bins_per_channel",
        reason: format!("{} 不在 1..={} 之内", bins, MAX_BINS_PER_CHANNEL),
      });
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
  /// 每秒采样帧数
  pub fps: f64,
}

impl Default for SamplingConfig {
  fn default() -> Self {
    SamplingConfig {
      fps: DEFAULT_SAMPLE_FPS,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
  pub templates: Vec<String>,
  pub bins_per_channel: usize,
  pub threshold: f64,
}

impl Default for HistogramConfig {
  fn default() -> Self {
    HistogramConfig {
      templates: names(&["whatsapp", "telegram", "chatGPT"]),
      bins_per_channel: 8,
      threshold: 0.7,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateMatchingConfig {
  pub templates: Vec<String>,
  pub scales: Vec<f32>,
  pub methods: Vec<MatchMethod>,
  pub threshold: f32,
  /// 缩放后边长小于该值的模板不参与匹配
  pub min_template_side: u32,
}

impl Default for TemplateMatchingConfig {
  fn default() -> Self {
    TemplateMatchingConfig {
      templates: names(&["whatsapp", "telegram", "chatGPT", "chatGPT2"]),
      scales: vec![0.02, 0.04, 0.06, 0.1],
      methods: vec![MatchMethod::CrossCorrelationNormed, MatchMethod::CoefficientNormed],
      threshold: 0.85,
      min_template_side: 8,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
  pub templates: Vec<String>,
  pub scales: Vec<f32>,
  pub features: OrbParams,
  pub ratio: f32,
  pub max_distance: u32,
  pub min_matches: usize,
  pub ransac: RansacParams,
  pub geometry: GeometryCheck,
}

impl Default for OrbConfig {
  fn default() -> Self {
    OrbConfig {
      templates: names(&["whatsapp", "telegram", "chatGPT", "chatGPT2"]),
      scales: vec![0.5, 0.75, 1.0, 1.5],
      features: OrbParams {
        n_features: 10000,
        scale_factor: 1.01,
        n_levels: 16,
        edge_threshold: 15,
        ..OrbParams::default()
      },
      ratio: 0.65,
      max_distance: 20,
      min_matches: 15,
      ransac: RansacParams::default(),
      geometry: GeometryCheck::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiOrbConfig {
  pub templates: Vec<String>,
  pub scales: Vec<f32>,
  /// 候选区域的相关系数阈值
  pub surface_threshold: f32,
  /// 候选区域四周额外保留的像素
  pub padding: u32,
  pub features: OrbParams,
  pub ratio: f32,
  pub min_matches: usize,
}

impl Default for RoiOrbConfig {
  fn default() -> Self {
    RoiOrbConfig {
      templates: names(&["whatsapp", "telegram", "chatGPT", "chatGPT2", "chatGPTInput"]),
      scales: vec![0.02, 0.04, 0.06, 0.1, 0.2],
      surface_threshold: 0.7,
      padding: 16,
      features: OrbParams::default(),
      ratio: 0.7,
      min_matches: 10,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
  pub words: Vec<String>,
  pub workers: usize,
  /// 每次前进的原生帧数
  pub frame_skip: u32,
  /// 媒体不提供帧率时使用
  pub native_fps: f64,
  /// 同一帧中多个象限命中同一个词时只记录一次
  pub dedupe_words: bool,
  pub tesseract: PathBuf,
  pub language: String,
}

impl Default for OcrConfig {
  fn default() -> Self {
    OcrConfig {
      words: names(&["whatsapp", "telegram", "chatgpt", "claude", "gemini"]),
      workers: 4,
      frame_skip: 30,
      native_fps: DEFAULT_NATIVE_FPS,
      dedupe_words: false,
      tesseract: PathBuf::from(crate::ocr::DEFAULT_TESSERACT),
      language: crate::ocr::DEFAULT_LANGUAGE.to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
  pub model: Option<PathBuf>,
  pub input_size: u32,
  pub layout: TensorLayout,
  pub box_format: BoxFormat,
  pub classes: Vec<String>,
  pub threshold: f32,
}

impl Default for NeuralConfig {
  fn default() -> Self {
    NeuralConfig {
      model: None,
      input_size: 640,
      layout: TensorLayout::default(),
      box_format: BoxFormat::default(),
      classes: names(&["chat", "chat_ai"]),
      threshold: 0.8,
    }
  }
}
