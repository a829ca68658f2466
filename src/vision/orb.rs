// 该文件是 Tanzhen （探针） 项目的一部分。
// src/vision/orb.rs - ORB 特征点与描述子
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

//! 图像金字塔上的 oriented FAST 角点加 steered BRIEF 描述子。
//!
//! 角点检测和方向使用 `imageproc::corners::oriented_fast`，
//! 描述子在高斯平滑后的图像上按旋转后的 256 个点对比较得到 32 字节。

use image::{GrayImage, imageops};
use imageproc::{corners::oriented_fast, filter::gaussian_blur_f32};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DESCRIPTOR_BYTES: usize = 32;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_BYTES * 8;
// 点对坐标范围，旋转后仍落在 31x31 的邻域内
const PATTERN_RADIUS: i32 = 13;
const PATTERN_SEED: u64 = 0x4f52_4221;
const SMOOTHING_SIGMA: f32 = 2.0;
// FAST-9 需要半径 3 的圆
const MIN_EDGE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
  pub n_features: usize,
  pub scale_factor: f32,
  pub n_levels: usize,
  pub edge_threshold: u32,
  pub fast_threshold: u8,
}

impl Default for OrbParams {
  fn default() -> Self {
    OrbParams {
      n_features: 500,
      scale_factor: 1.2,
      n_levels: 8,
      edge_threshold: 31,
      fast_threshold: 20,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
  /// 第 0 层像素坐标
  pub x: f32,
  pub y: f32,
  /// 弧度，像素坐标系
  pub angle: f32,
  pub level: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
  pub fn hamming(&self, other: &Descriptor) -> u32 {
    self
      .0
      .iter()
      .zip(other.0.iter())
      .map(|(a, b)| (a ^ b).count_ones())
      .sum()
  }
}

#[derive(Debug, Clone, Default)]
pub struct Features {
  pub keypoints: Vec<Keypoint>,
  pub descriptors: Vec<Descriptor>,
}

impl Features {
  pub fn len(&self) -> usize {
    self.descriptors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.descriptors.is_empty()
  }
}

pub struct Orb {
  params: OrbParams,
  pattern: Vec<[(f32, f32); 2]>,
}

impl Orb {
  pub fn new(params: OrbParams) -> Self {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut point = || {
      (
        rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS) as f32,
        rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS) as f32,
      )
    };
    let pattern = (0..DESCRIPTOR_BITS).map(|_| [point(), point()]).collect();
    Orb { params, pattern }
  }

  pub fn params(&self) -> &OrbParams {
    &self.params
  }

  /// 每层的目标特征数，按尺度因子几何递减
  fn features_per_level(&self) -> Vec<usize> {
    let levels = self.params.n_levels.max(1);
    let total = self.params.n_features;
    let factor = 1.0 / self.params.scale_factor.max(1.0 + f32::EPSILON) as f64;

    let mut counts = Vec::with_capacity(levels);
    let mut desired = total as f64 * (1.0 - factor) / (1.0 - factor.powi(levels as i32));
    let mut assigned = 0usize;
    for _ in 0..levels - 1 {
      let n = (desired.round() as usize).min(total - assigned);
      counts.push(n);
      assigned += n;
      desired *= factor;
    }
    counts.push(total - assigned);
    counts
  }

  pub fn detect_and_compute(&self, image: &GrayImage) -> Features {
    let mut features = Features::default();
    let edge = self.params.edge_threshold.max(MIN_EDGE);
    let (width, height) = image.dimensions();

    for (level, target) in self.features_per_level().into_iter().enumerate() {
      if target == 0 {
        continue;
      }
      let scale = self.params.scale_factor.powi(level as i32);
      let level_w = (width as f32 / scale).round() as u32;
      let level_h = (height as f32 / scale).round() as u32;
      if level_w <= 2 * edge || level_h <= 2 * edge {
        break;
      }

      let resized;
      let level_image = if level == 0 {
        image
      } else {
        resized = imageops::resize(image, level_w, level_h, imageops::FilterType::Triangle);
        &resized
      };

      let corners = oriented_fast(level_image, Some(self.params.fast_threshold), target, edge, None);
      if corners.is_empty() {
        continue;
      }
      let smoothed = gaussian_blur_f32(level_image, SMOOTHING_SIGMA);
      for corner in corners {
        let (cx, cy) = (corner.corner.x, corner.corner.y);
        features
          .descriptors
          .push(self.describe(&smoothed, cx, cy, corner.orientation));
        features.keypoints.push(Keypoint {
          x: cx as f32 * scale,
          y: cy as f32 * scale,
          angle: corner.orientation,
          level,
        });
      }
    }

    debug!(
      "ORB: {}x{} 图像检测到 {} 个特征点",
      width,
      height,
      features.len()
    );
    features
  }

  fn describe(&self, smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let (w, h) = smoothed.dimensions();
    let sample = |(px, py): (f32, f32)| {
      let rx = (px * cos - py * sin).round() as i64 + x as i64;
      let ry = (px * sin + py * cos).round() as i64 + y as i64;
      let sx = rx.clamp(0, w as i64 - 1) as u32;
      let sy = ry.clamp(0, h as i64 - 1) as u32;
      smoothed.get_pixel(sx, sy)[0]
    };

    let mut bytes = [0u8; DESCRIPTOR_BYTES];
    for (bit, [a, b]) in self.pattern.iter().enumerate() {
      if sample(*a) < sample(*b) {
        bytes[bit / 8] |= 1 << (bit % 8);
      }
    }
    Descriptor(bytes)
  }
}
