// 该文件是 Tanzhen （探针） 项目的一部分。
// src/vision/histogram.rs - 颜色直方图
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

use image::RgbImage;

/// 三通道联合直方图，按 min-max 归一化到 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ColorHistogram {
  bins_per_channel: usize,
  values: Vec<f32>,
}

/// 窗口扫描结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowMatch {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
  pub score: f64,
}

fn bin_of(value: u8, bins_per_channel: usize) -> usize {
  value as usize * bins_per_channel / 256
}

fn bin_index(pixel: &[u8], bins_per_channel: usize) -> usize {
  let r = bin_of(pixel[0], bins_per_channel);
  let g = bin_of(pixel[1], bins_per_channel);
  let b = bin_of(pixel[2], bins_per_channel);
  (r * bins_per_channel + g) * bins_per_channel + b
}

impl ColorHistogram {
  fn from_counts(bins_per_channel: usize, counts: &[u32]) -> Self {
    let (min, max) = counts
      .iter()
      .fold((u32::MAX, u32::MIN), |(lo, hi), &c| (lo.min(c), hi.max(c)));
    let range = max.saturating_sub(min);
    let values = counts
      .iter()
      .map(|&c| {
        if range == 0 {
          0.0
        } else {
          (c - min) as f32 / range as f32
        }
      })
      .collect();
    ColorHistogram {
      bins_per_channel,
      values,
    }
  }

  pub fn of_image(image: &RgbImage, bins_per_channel: usize) -> Self {
    let mut counts = vec![0u32; bins_per_channel.pow(3)];
    for pixel in image.pixels() {
      counts[bin_index(&pixel.0, bins_per_channel)] += 1;
    }
    ColorHistogram::from_counts(bins_per_channel, &counts)
  }

  pub fn values(&self) -> &[f32] {
    &self.values
  }

  /// 皮尔逊相关系数，范围 [-1, 1]；任一方差为零时为 0
  pub fn correlation(&self, other: &ColorHistogram) -> f64 {
    debug_assert_eq!(self.bins_per_channel, other.bins_per_channel);
    let n = self.values.len() as f64;
    let mean_a = self.values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = other.values.iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut num, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&a, &b) in self.values.iter().zip(other.values.iter()) {
      let da = a as f64 - mean_a;
      let db = b as f64 - mean_b;
      num += da * db;
      var_a += da * da;
      var_b += db * db;
    }

    let den = (var_a * var_b).sqrt();
    if den <= f64::EPSILON { 0.0 } else { num / den }
  }
}

/// 预先计算整帧每个像素的直方图下标，用于滑动窗口
pub struct BinnedFrame {
  width: u32,
  height: u32,
  bins_per_channel: usize,
  indices: Vec<u32>,
}

impl BinnedFrame {
  pub fn new(frame: &RgbImage, bins_per_channel: usize) -> Self {
    let indices = frame
      .pixels()
      .map(|p| bin_index(&p.0, bins_per_channel) as u32)
      .collect();
    BinnedFrame {
      width: frame.width(),
      height: frame.height(),
      bins_per_channel,
      indices,
    }
  }

  pub fn window(&self, x: u32, y: u32, width: u32, height: u32) -> ColorHistogram {
    let mut counts = vec![0u32; self.bins_per_channel.pow(3)];
    for row in y..y + height {
      let start = (row * self.width + x) as usize;
      for &index in &self.indices[start..start + width as usize] {
        counts[index as usize] += 1;
      }
    }
    ColorHistogram::from_counts(self.bins_per_channel, &counts)
  }

  /// 以模板尺寸为窗口、半个模板尺寸为步长扫描整帧
  ///
  /// 行优先扫描，分数严格更高才替换，相同分数保留先出现的窗口。
  pub fn best_window(
    &self,
    target: &ColorHistogram,
    width: u32,
    height: u32,
  ) -> Option<WindowMatch> {
    if width == 0 || height == 0 || width > self.width || height > self.height {
      return None;
    }
    let step_x = (width / 2).max(1) as usize;
    let step_y = (height / 2).max(1) as usize;

    let mut best: Option<WindowMatch> = None;
    for y in (0..=self.height - height).step_by(step_y) {
      for x in (0..=self.width - width).step_by(step_x) {
        let score = self.window(x, y, width, height).correlation(target);
        if best.map(|b| score > b.score).unwrap_or(true) {
          best = Some(WindowMatch {
            x,
            y,
            width,
            height,
            score,
          });
        }
      }
    }
    best
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn stripes(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| match (x / 4 + y / 4) % 3 {
      0 => Rgb([250, 10, 10]),
      1 => Rgb([10, 250, 10]),
      _ => Rgb([10, 10, 250]),
    })
  }

  #[test]
  fn identical_histograms_correlate_perfectly() {
    let image = stripes(16, 16);
    let a = ColorHistogram::of_image(&image, 8);
    let b = ColorHistogram::of_image(&image, 8);
    assert!((a.correlation(&b) - 1.0).abs() < 1e-9);
    assert!(a.values().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn flat_histogram_has_zero_correlation() {
    let flat = ColorHistogram::from_counts(2, &[3; 8]);
    let other = ColorHistogram::of_image(&stripes(8, 8), 2);
    assert_eq!(flat.correlation(&other), 0.0);
  }

  #[test]
  fn window_histogram_matches_cropped_image() {
    let frame = stripes(40, 30);
    let binned = BinnedFrame::new(&frame, 8);
    let crop = image::imageops::crop_imm(&frame, 8, 6, 12, 10).to_image();
    assert_eq!(
      binned.window(8, 6, 12, 10),
      ColorHistogram::of_image(&crop, 8)
    );
  }

  #[test]
  fn fine_bins_index_past_sixteen_bits() {
    // 64 桶时红色像素的下标超过 65535
    let frame = stripes(24, 16);
    let binned = BinnedFrame::new(&frame, 64);
    let crop = image::imageops::crop_imm(&frame, 4, 0, 8, 8).to_image();
    assert_eq!(binned.window(4, 0, 8, 8), ColorHistogram::of_image(&crop, 64));
  }

  #[test]
  fn ties_keep_first_window_in_scan_order() {
    let frame = RgbImage::from_pixel(20, 20, Rgb([100, 100, 100]));
    let binned = BinnedFrame::new(&frame, 8);
    let target = ColorHistogram::of_image(&stripes(4, 4), 8);
    let best = binned.best_window(&target, 4, 4).unwrap();
    assert_eq!((best.x, best.y), (0, 0));
  }

  #[test]
  fn oversized_template_has_no_window() {
    let binned = BinnedFrame::new(&stripes(10, 10), 8);
    let target = ColorHistogram::of_image(&stripes(12, 4), 8);
    assert!(binned.best_window(&target, 12, 4).is_none());
  }
}
