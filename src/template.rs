// 该文件是 Tanzhen （探针） 项目的一部分。
// src/template.rs - 模板库
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AssetLoadError {
  #[error("资源 {name} 不存在: {path}")]
  NotFound { name: String, path: String },
  #[error("读取资源 {path} 失败: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("解码资源 {path} 失败: {source}")]
  Decode {
    path: String,
    #[source]
    source: image::ImageError,
  },
  #[error("模型 {path} 加载失败: {reason}")]
  Model { path: String, reason: String },
}

/// 命名的参考图像
#[derive(Debug, Clone)]
pub struct Template {
  pub name: String,
  pub image: RgbImage,
}

impl Template {
  pub fn new(name: impl Into<String>, image: RgbImage) -> Self {
    Template {
      name: name.into(),
      image,
    }
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }
}

#[derive(Debug, Clone)]
enum TemplateStore {
  Directory(PathBuf),
  InMemory(Vec<Template>),
}

/// 模板库
///
/// 只负责按名字取回原始图像，直方图和特征点由各检测策略自行计算。
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
  store: TemplateStore,
}

impl TemplateLibrary {
  /// 从目录读取 `<root>/<name>.png`
  pub fn directory(root: impl AsRef<Path>) -> Self {
    TemplateLibrary {
      store: TemplateStore::Directory(root.as_ref().to_path_buf()),
    }
  }

  pub fn in_memory(templates: Vec<Template>) -> Self {
    TemplateLibrary {
      store: TemplateStore::InMemory(templates),
    }
  }

  /// 按 `names` 的顺序加载模板
  pub fn load<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Template>, AssetLoadError> {
    let templates = names
      .iter()
      .map(|name| self.load_one(name.as_ref()))
      .collect::<Result<Vec<_>, _>>()?;
    info!("已加载 {} 个模板", templates.len());
    Ok(templates)
  }

  fn load_one(&self, name: &str) -> Result<Template, AssetLoadError> {
    match &self.store {
      TemplateStore::Directory(root) => {
        let path = root.join(format!("{}.png", name));
        let shown = path.display().to_string();
        if !path.is_file() {
          return Err(AssetLoadError::NotFound {
            name: name.to_string(),
            path: shown,
          });
        }
        let image = ImageReader::open(&path)
          .map_err(|source| AssetLoadError::Io {
            path: shown.clone(),
            source,
          })?
          .decode()
          .map_err(|source| AssetLoadError::Decode {
            path: shown.clone(),
            source,
          })?
          .to_rgb8();
        debug!("模板 {} 来自 {}: {:?}", name, shown, image.dimensions());
        Ok(Template::new(name, image))
      }
      TemplateStore::InMemory(templates) => templates
        .iter()
        .find(|t| t.name == name)
        .cloned()
        .ok_or_else(|| AssetLoadError::NotFound {
          name: name.to_string(),
          path: "<memory>".to_string(),
        }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn loads_templates_in_requested_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(4, 3, Rgb([1, 0, 0]))
      .save(dir.path().join("whatsapp.png"))
      .unwrap();
    RgbImage::from_pixel(2, 2, Rgb([0, 1, 0]))
      .save(dir.path().join("telegram.png"))
      .unwrap();

    let library = TemplateLibrary::directory(dir.path());
    let templates = library.load(&["telegram", "whatsapp"]).unwrap();
    let names: Vec<_> = templates.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["telegram", "whatsapp"]);
    assert_eq!(templates[1].dimensions(), (4, 3));
  }

  #[test]
  fn missing_asset_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let library = TemplateLibrary::directory(dir.path());
    assert!(matches!(
      library.load(&["chatGPT"]),
      Err(AssetLoadError::NotFound { .. })
    ));
  }

  #[test]
  fn undecodable_asset_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
    let library = TemplateLibrary::directory(dir.path());
    assert!(matches!(
      library.load(&["broken"]),
      Err(AssetLoadError::Decode { .. })
    ));
  }
}
