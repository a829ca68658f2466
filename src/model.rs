// 该文件是 Tanzhen （探针） 项目的一部分。
// src/model.rs - 神经网络模型接口
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

use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{report::BoundingBox, template::AssetLoadError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("张量形状 {shape:?} 与数据长度 {len} 不一致")]
  Shape { shape: Vec<usize>, len: usize },
  #[error("模型输出形状无效: {0:?}")]
  OutputShape(Vec<usize>),
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 行优先存储的 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
    if shape.iter().product::<usize>() != data.len() {
      return Err(ModelError::Shape {
        len: data.len(),
        shape,
      });
    }
    Ok(Tensor { shape, data })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
    (self.shape, self.data)
  }

  /// 双线性缩放到 size x size，像素值除以 255，加上批次维度
  pub fn from_image(image: &RgbImage, size: u32, layout: TensorLayout) -> Self {
    let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
    let plane = (size * size) as usize;
    let raw = resized.as_raw();
    let side = size as usize;
    match layout {
      TensorLayout::Nhwc => Tensor {
        shape: vec![1, side, side, 3],
        data: raw.iter().map(|&v| v as f32 / 255.0).collect(),
      },
      TensorLayout::Nchw => {
        let mut data = vec![0f32; 3 * plane];
        for (idx, px) in raw.chunks_exact(3).enumerate() {
          data[idx] = px[0] as f32 / 255.0;
          data[plane + idx] = px[1] as f32 / 255.0;
          data[2 * plane + idx] = px[2] as f32 / 255.0;
        }
        Tensor {
          shape: vec![1, 3, side, side],
          data,
        }
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

/// 模型输出中框坐标的含义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxFormat {
  /// cx, cy, w, h
  #[default]
  Center,
  /// x1, y1, x2, y2
  Corners,
}

pub trait Model: Send {
  fn infer(&mut self, input: &Tensor) -> Result<Tensor, ModelError>;
}

pub trait ModelLoader: Send {
  fn load(&self) -> Result<Box<dyn Model>, AssetLoadError>;
}

/// 超过阈值的一个 (候选框, 类别) 组合
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
  pub class_id: u32,
  pub confidence: f32,
  /// 帧像素坐标
  pub bbox: BoundingBox,
}

/// 解析 [1, 4 + C, N] 形状的检测输出
///
/// 每个候选框的每个类别置信度单独与阈值比较，框从模型输入尺寸换算到帧尺寸。
pub fn decode_predictions(
  output: &Tensor,
  format: BoxFormat,
  input_size: u32,
  frame_size: (u32, u32),
  threshold: f32,
) -> Result<Vec<Prediction>, ModelError> {
  let (attributes, candidates) = match output.shape() {
    [1, a, n] if *a > 4 => (*a, *n),
    shape => return Err(ModelError::OutputShape(shape.to_vec())),
  };
  let data = output.data();
  let at = |attr: usize, i: usize| data[attr * candidates + i];
  let sx = frame_size.0 as f32 / input_size as f32;
  let sy = frame_size.1 as f32 / input_size as f32;

  let mut predictions = Vec::new();
  for i in 0..candidates {
    for class in 0..attributes - 4 {
      let confidence = at(4 + class, i);
      if confidence <= threshold {
        continue;
      }
      let (a, b, c, d) = (at(0, i), at(1, i), at(2, i), at(3, i));
      let bbox = match format {
        BoxFormat::Center => BoundingBox::from_center(a, b, c, d),
        BoxFormat::Corners => BoundingBox::from_corners(a, b, c, d),
      };
      predictions.push(Prediction {
        class_id: class as u32,
        confidence,
        bbox: bbox.scaled(sx, sy),
      });
    }
  }
  Ok(predictions)
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModel, OnnxModelLoader};
