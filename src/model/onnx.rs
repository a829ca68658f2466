// 该文件是 Tanzhen （探针） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::path::PathBuf;

use ort::{session::Session, value::Tensor as OrtTensor};
use tracing::{debug, info};

use crate::{
  model::{Model, ModelError, ModelLoader, Tensor},
  template::AssetLoadError,
};

impl From<ort::Error> for ModelError {
  fn from(err: ort::Error) -> Self {
    ModelError::Inference(err.to_string())
  }
}

/// 单输入单输出的 ONNX 模型
pub struct OnnxModel {
  session: Session,
}

impl Model for OnnxModel {
  fn infer(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
    let value = OrtTensor::from_array((
      input.shape().to_vec(),
      input.data().to_vec().into_boxed_slice(),
    ))?;
    let outputs = self.session.run(ort::inputs![value])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    debug!("ONNX 输出形状: {:?}", shape);
    Tensor::new(shape, data.to_vec())
  }
}

impl Drop for OnnxModel {
  fn drop(&mut self) {
    info!("释放 ONNX 推理会话");
  }
}

#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
  path: PathBuf,
}

impl OnnxModelLoader {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    OnnxModelLoader { path: path.into() }
  }
}

impl ModelLoader for OnnxModelLoader {
  fn load(&self) -> Result<Box<dyn Model>, AssetLoadError> {
    let shown = self.path.display().to_string();
    if !self.path.is_file() {
      return Err(AssetLoadError::NotFound {
        name: "model".to_string(),
        path: shown,
      });
    }
    info!("加载模型文件: {}", shown);
    let session = Session::builder()
      .and_then(|builder| builder.commit_from_file(&self.path))
      .map_err(|e| AssetLoadError::Model {
        path: shown.clone(),
        reason: e.to_string(),
      })?;
    info!("模型加载完成");
    Ok(Box::new(OnnxModel { session }))
  }
}
