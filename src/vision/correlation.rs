// 该文件是 Tanzhen （探针） 项目的一部分。
// src/vision/correlation.rs - 模板匹配相关曲面
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

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
  definitions::Image,
  integral_image::{integral_image, integral_squared_image, sum_image_pixels},
  template_matching::{MatchTemplateMethod, find_extremes, match_template},
};
use serde::{Deserialize, Serialize};

pub type CorrelationSurface = Image<Luma<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
  /// 归一化互相关
  CrossCorrelationNormed,
  /// 去均值的归一化互相关
  CoefficientNormed,
}

impl MatchMethod {
  pub fn label(&self) -> &'static str {
    match self {
      MatchMethod::CrossCorrelationNormed => "ccorr",
      MatchMethod::CoefficientNormed => "ccoeff",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePeak {
  pub x: u32,
  pub y: u32,
  pub score: f32,
}

/// 计算相关曲面，尺寸为 (W - w + 1) x (H - h + 1)
///
/// 模板任一方向大于图像时没有曲面。
pub fn correlation_surface(
  image: &GrayImage,
  template: &GrayImage,
  method: MatchMethod,
) -> Option<CorrelationSurface> {
  let (iw, ih) = image.dimensions();
  let (tw, th) = template.dimensions();
  if tw == 0 || th == 0 || tw > iw || th > ih {
    return None;
  }
  let surface = match method {
    MatchMethod::CrossCorrelationNormed => {
      match_template(image, template, MatchTemplateMethod::CrossCorrelationNormalized)
    }
    MatchMethod::CoefficientNormed => coefficient_normed(image, template),
  };
  Some(surface)
}

/// 曲面全局最大值，同值时取行优先的第一个
pub fn peak(surface: &CorrelationSurface) -> Option<SurfacePeak> {
  if surface.width() == 0 || surface.height() == 0 {
    return None;
  }
  let extremes = find_extremes(surface);
  let (x, y) = extremes.max_value_location;
  Some(SurfacePeak {
    x,
    y,
    score: extremes.max_value,
  })
}

fn coefficient_normed(image: &GrayImage, template: &GrayImage) -> CorrelationSurface {
  let (iw, ih) = image.dimensions();
  let (tw, th) = template.dimensions();
  let n = (tw * th) as f64;

  let template_mean = template.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
  let centered: Vec<f64> = template
    .pixels()
    .map(|p| p[0] as f64 - template_mean)
    .collect();
  let template_energy: f64 = centered.iter().map(|v| v * v).sum();

  let sums: Image<Luma<u64>> = integral_image(image);
  let squares: Image<Luma<u64>> = integral_squared_image(image);

  let raw = image.as_raw();
  ImageBuffer::from_fn(iw - tw + 1, ih - th + 1, |x, y| {
    let sum = sum_image_pixels(&sums, x, y, x + tw - 1, y + th - 1)[0] as u128;
    let square = sum_image_pixels(&squares, x, y, x + tw - 1, y + th - 1)[0] as u128;
    // n * Σi² - (Σi)²，整数运算，常数窗口恰好为 0
    let spread = (tw * th) as u128 * square - sum * sum;
    if spread == 0 || template_energy <= f64::EPSILON {
      return Luma([0.0]);
    }
    let window_energy = spread as f64 / n;

    let mut num = 0.0;
    for dy in 0..th {
      let row = ((y + dy) * iw + x) as usize;
      let t_row = (dy * tw) as usize;
      for dx in 0..tw as usize {
        num += centered[t_row + dx] * raw[row + dx] as f64;
      }
    }
    let score = num / (template_energy * window_energy).sqrt();
    Luma([score.clamp(-1.0, 1.0) as f32])
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn checker(width: u32, height: u32, cell: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
      if (x / cell + y / cell) % 2 == 0 {
        Luma([220])
      } else {
        Luma([30])
      }
    })
  }

  fn embed(background: u8, size: (u32, u32), patch: &GrayImage, at: (u32, u32)) -> GrayImage {
    let mut image = GrayImage::from_pixel(size.0, size.1, Luma([background]));
    image::imageops::replace(&mut image, patch, at.0 as i64, at.1 as i64);
    image
  }

  #[test]
  fn exact_copy_peaks_at_its_location() {
    let patch = checker(9, 7, 3);
    let image = embed(90, (40, 30), &patch, (17, 11));
    for method in [MatchMethod::CoefficientNormed, MatchMethod::CrossCorrelationNormed] {
      let surface = correlation_surface(&image, &patch, method).unwrap();
      assert_eq!(surface.dimensions(), (32, 24));
      let best = peak(&surface).unwrap();
      assert_eq!((best.x, best.y), (17, 11), "{method:?}");
      assert!(best.score > 0.999, "{method:?}: {}", best.score);
    }
  }

  #[test]
  fn constant_window_scores_zero_for_coefficient() {
    let image = GrayImage::from_pixel(20, 20, Luma([128]));
    let surface =
      correlation_surface(&image, &checker(5, 5, 1), MatchMethod::CoefficientNormed).unwrap();
    assert!(surface.pixels().all(|p| p[0] == 0.0));
  }

  #[test]
  fn coefficient_ignores_brightness_offset() {
    let patch = checker(6, 6, 2);
    let brighter = GrayImage::from_fn(6, 6, |x, y| Luma([patch.get_pixel(x, y)[0] / 2 + 100]));
    let image = embed(0, (20, 20), &brighter, (4, 5));
    let surface = correlation_surface(&image, &patch, MatchMethod::CoefficientNormed).unwrap();
    let best = peak(&surface).unwrap();
    assert_eq!((best.x, best.y), (4, 5));
    assert!(best.score > 0.999);
  }

  #[test]
  fn oversized_template_has_no_surface() {
    let image = GrayImage::new(10, 10);
    assert!(correlation_surface(&image, &GrayImage::new(11, 3), MatchMethod::CoefficientNormed).is_none());
    assert!(
      correlation_surface(&image, &GrayImage::new(10, 10), MatchMethod::CrossCorrelationNormed)
        .is_some()
    );
  }
}
