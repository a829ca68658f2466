// 该文件是 Tanzhen （探针） 项目的一部分。
// src/vision/homography.rs - 单应性估计与几何校验
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

use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::{SeedableRng, rngs::StdRng, seq::index::sample};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub type Point = (f64, f64);

const DEGENERATE_EPSILON: f64 = 1e-9;
const MIN_SAMPLE: usize = 4;

/// 3x3 平面射影变换，右下角元素归一化为 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
  pub fn identity() -> Self {
    Homography(Matrix3::identity())
  }

  pub fn from_matrix(matrix: Matrix3<f64>) -> Option<Self> {
    let h33 = matrix[(2, 2)];
    if h33.abs() < DEGENERATE_EPSILON || !matrix.iter().all(|v| v.is_finite()) {
      return None;
    }
    Some(Homography(matrix / h33))
  }

  pub fn matrix(&self) -> &Matrix3<f64> {
    &self.0
  }

  pub fn determinant(&self) -> f64 {
    self.0.determinant()
  }

  pub fn project(&self, (x, y): Point) -> Option<Point> {
    let v = self.0 * Vector3::new(x, y, 1.0);
    if v.z.abs() < DEGENERATE_EPSILON {
      return None;
    }
    Some((v.x / v.z, v.y / v.z))
  }

  /// 最小二乘 DLT，点数不少于 4
  pub fn estimate(src: &[Point], dst: &[Point]) -> Option<Self> {
    if src.len() != dst.len() || src.len() < MIN_SAMPLE {
      return None;
    }
    let t_src = normalization(src)?;
    let t_dst = normalization(dst)?;

    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (&s, &d)) in src.iter().zip(dst.iter()).enumerate() {
      let (x, y) = apply(&t_src, s);
      let (u, v) = apply(&t_dst, d);
      let r = 2 * i;
      a[(r, 0)] = -x;
      a[(r, 1)] = -y;
      a[(r, 2)] = -1.0;
      a[(r, 6)] = u * x;
      a[(r, 7)] = u * y;
      a[(r, 8)] = u;
      a[(r + 1, 3)] = -x;
      a[(r + 1, 4)] = -y;
      a[(r + 1, 5)] = -1.0;
      a[(r + 1, 6)] = v * x;
      a[(r + 1, 7)] = v * y;
      a[(r + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (smallest, _) = svd
      .singular_values
      .iter()
      .enumerate()
      .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h: Vec<f64> = v_t.row(smallest).iter().copied().collect();
    let normalized = Matrix3::from_row_slice(&h);

    let denormalized = t_dst.try_inverse()? * normalized * t_src;
    Homography::from_matrix(denormalized)
  }

  fn reprojection_error(&self, s: Point, d: Point) -> f64 {
    match self.project(s) {
      Some((x, y)) => ((x - d.0).powi(2) + (y - d.1).powi(2)).sqrt(),
      None => f64::INFINITY,
    }
  }

  fn inlier_mask(&self, src: &[Point], dst: &[Point], threshold: f64) -> Vec<bool> {
    src
      .iter()
      .zip(dst.iter())
      .map(|(&s, &d)| self.reprojection_error(s, d) <= threshold)
      .collect()
  }
}

fn apply(t: &Matrix3<f64>, (x, y): Point) -> Point {
  (t[(0, 0)] * x + t[(0, 2)], t[(1, 1)] * y + t[(1, 2)])
}

/// Hartley 归一化：平移到质心，平均距离缩放为 sqrt(2)
fn normalization(points: &[Point]) -> Option<Matrix3<f64>> {
  let n = points.len() as f64;
  let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
  let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
  let mean_distance = points
    .iter()
    .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
    .sum::<f64>()
    / n;
  if mean_distance < DEGENERATE_EPSILON || !mean_distance.is_finite() {
    return None;
  }
  let s = std::f64::consts::SQRT_2 / mean_distance;
  Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn has_collinear_triple(points: &[Point]) -> bool {
  let n = points.len();
  for i in 0..n {
    for j in i + 1..n {
      for k in j + 1..n {
        let (a, b, c) = (points[i], points[j], points[k]);
        let cross = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
        if cross.abs() < 1e-6 {
          return true;
        }
      }
    }
  }
  false
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
  /// 重投影误差阈值（像素）
  pub reprojection_threshold: f64,
  pub max_iterations: usize,
  pub confidence: f64,
  pub seed: u64,
}

impl Default for RansacParams {
  fn default() -> Self {
    RansacParams {
      reprojection_threshold: 3.0,
      max_iterations: 2000,
      confidence: 0.995,
      seed: 0x5eed,
    }
  }
}

#[derive(Debug, Clone)]
pub struct RansacEstimate {
  pub homography: Homography,
  pub inliers: Vec<bool>,
}

impl RansacEstimate {
  pub fn inlier_count(&self) -> usize {
    self.inliers.iter().filter(|&&inlier| inlier).count()
  }

  pub fn inlier_ratio(&self) -> f64 {
    if self.inliers.is_empty() {
      0.0
    } else {
      self.inlier_count() as f64 / self.inliers.len() as f64
    }
  }
}

fn required_iterations(inlier_ratio: f64, confidence: f64, cap: usize) -> usize {
  let all_inliers = inlier_ratio.powi(MIN_SAMPLE as i32);
  if all_inliers >= 1.0 {
    return 1;
  }
  let num = (1.0 - confidence).max(f64::MIN_POSITIVE).ln();
  let den = (1.0 - all_inliers).ln();
  if den >= 0.0 || !den.is_finite() {
    return cap;
  }
  ((num / den).ceil() as usize).clamp(1, cap)
}

/// RANSAC 单应性估计，随机数种子固定，结果可复现
pub fn find_homography(src: &[Point], dst: &[Point], params: &RansacParams) -> Option<RansacEstimate> {
  let n = src.len();
  if n != dst.len() || n < MIN_SAMPLE {
    return None;
  }

  let mut rng = StdRng::seed_from_u64(params.seed);
  let mut best: Option<(Homography, usize)> = None;
  let mut iterations = params.max_iterations;
  let mut i = 0;
  while i < iterations {
    i += 1;
    let picked = sample(&mut rng, n, MIN_SAMPLE).into_vec();
    let s: Vec<Point> = picked.iter().map(|&k| src[k]).collect();
    let d: Vec<Point> = picked.iter().map(|&k| dst[k]).collect();
    if has_collinear_triple(&s) || has_collinear_triple(&d) {
      continue;
    }
    let Some(h) = Homography::estimate(&s, &d) else {
      continue;
    };
    let count = h
      .inlier_mask(src, dst, params.reprojection_threshold)
      .iter()
      .filter(|&&inlier| inlier)
      .count();
    if best.map(|(_, c)| count > c).unwrap_or(true) {
      best = Some((h, count));
      iterations = iterations.min(required_iterations(
        count as f64 / n as f64,
        params.confidence,
        params.max_iterations,
      ));
    }
  }

  let (model, count) = best?;
  if count < MIN_SAMPLE {
    return None;
  }
  let mask = model.inlier_mask(src, dst, params.reprojection_threshold);

  // 用全部内点重新拟合，内点不减少时采用
  let (inlier_src, inlier_dst): (Vec<Point>, Vec<Point>) = src
    .iter()
    .zip(dst.iter())
    .zip(mask.iter())
    .filter(|(_, inlier)| **inlier)
    .map(|((&s, &d), _)| (s, d))
    .unzip();
  if let Some(refined) = Homography::estimate(&inlier_src, &inlier_dst) {
    let refined_mask = refined.inlier_mask(src, dst, params.reprojection_threshold);
    if refined_mask.iter().filter(|&&v| v).count() >= count {
      return Some(RansacEstimate {
        homography: refined,
        inliers: refined_mask,
      });
    }
  }
  Some(RansacEstimate {
    homography: model,
    inliers: mask,
  })
}

/// 几何校验门限
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryCheck {
  /// 内点数必须严格大于该值
  pub min_inliers: usize,
  /// 内点比例必须严格大于该值
  pub min_inlier_ratio: f64,
  /// |det(H)| 的允许范围
  pub determinant_range: (f64, f64),
}

impl Default for GeometryCheck {
  fn default() -> Self {
    GeometryCheck {
      min_inliers: 20,
      min_inlier_ratio: 0.5,
      determinant_range: (1e-3, 1e3),
    }
  }
}

/// 估计单应性并校验内点数、内点比例和行列式范围
pub fn verify_geometry(
  src: &[Point],
  dst: &[Point],
  ransac: &RansacParams,
  check: &GeometryCheck,
) -> Option<RansacEstimate> {
  let estimate = find_homography(src, dst, ransac)?;
  let inliers = estimate.inlier_count();
  let ratio = estimate.inlier_ratio();
  if inliers <= check.min_inliers || ratio <= check.min_inlier_ratio {
    debug!("几何校验失败: 内点 {} / {}, 比例 {:.3}", inliers, src.len(), ratio);
    return None;
  }
  let det = estimate.homography.determinant().abs();
  let (low, high) = check.determinant_range;
  if !(low..=high).contains(&det) {
    debug!("几何校验失败: 行列式 {:.3e} 超出范围", det);
    return None;
  }
  Some(estimate)
}
