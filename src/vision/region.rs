// 该文件是 Tanzhen （探针） 项目的一部分。
// src/vision/region.rs - 相关曲面上的候选区域
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

use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, find_contours};

use crate::vision::correlation::CorrelationSurface;

/// 帧像素坐标下的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// 曲面二值化，四周留 1 像素空白
fn threshold_mask(surface: &CorrelationSurface, threshold: f32) -> GrayImage {
  let (w, h) = surface.dimensions();
  let mut mask = GrayImage::new(w + 2, h + 2);
  for (x, y, p) in surface.enumerate_pixels() {
    if p[0] > threshold {
      mask.put_pixel(x + 1, y + 1, Luma([255]));
    }
  }
  mask
}

/// 曲面上分数高于阈值的连通区域，换算为帧中的搜索区域
///
/// 曲面位置 (x, y) 对应模板左上角，因此区域向右下扩展一个模板尺寸，
/// 再向四周扩展 `padding` 像素，并裁剪到 `bounds` 以内。
pub fn candidate_regions(
  surface: &CorrelationSurface,
  threshold: f32,
  footprint: (u32, u32),
  padding: u32,
  bounds: (u32, u32),
) -> Vec<PixelRect> {
  let mask = threshold_mask(surface, threshold);
  find_contours::<i32>(&mask)
    .into_iter()
    .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    .filter_map(|contour| {
      let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
      for p in &contour.points {
        x0 = x0.min(p.x - 1);
        y0 = y0.min(p.y - 1);
        x1 = x1.max(p.x - 1);
        y1 = y1.max(p.y - 1);
      }
      if x0 > x1 || y0 > y1 {
        return None;
      }
      let left = (x0 as u32).saturating_sub(padding);
      let top = (y0 as u32).saturating_sub(padding);
      let right = (x1 as u32 + footprint.0 + padding).min(bounds.0);
      let bottom = (y1 as u32 + footprint.1 + padding).min(bounds.1);
      if right <= left || bottom <= top {
        return None;
      }
      Some(PixelRect {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::ImageBuffer;

  fn fill(surface: &mut CorrelationSurface, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>, v: f32) {
    for y in ys {
      for x in xs.clone() {
        surface.put_pixel(x, y, Luma([v]));
      }
    }
  }

  #[test]
  fn blobs_become_expanded_regions() {
    let mut surface: CorrelationSurface = ImageBuffer::new(30, 20);
    fill(&mut surface, 0..3, 0..3, 0.9);
    // 环形区域，内部空洞不产生额外区域
    fill(&mut surface, 10..15, 2..7, 0.95);
    surface.put_pixel(12, 4, Luma([0.1]));
    fill(&mut surface, 20..24, 10..12, 0.8);

    let regions = candidate_regions(&surface, 0.7, (5, 4), 2, (40, 30));
    assert_eq!(
      regions,
      vec![
        PixelRect { x: 0, y: 0, width: 9, height: 8 },
        PixelRect { x: 8, y: 0, width: 13, height: 12 },
        PixelRect { x: 18, y: 8, width: 12, height: 9 },
      ]
    );
  }

  #[test]
  fn regions_are_clamped_to_the_frame() {
    let mut surface: CorrelationSurface = ImageBuffer::new(10, 10);
    fill(&mut surface, 7..10, 7..10, 0.9);
    let regions = candidate_regions(&surface, 0.7, (6, 6), 16, (15, 15));
    assert_eq!(regions, vec![PixelRect { x: 0, y: 0, width: 15, height: 15 }]);
  }

  #[test]
  fn scores_at_threshold_are_ignored() {
    let surface: CorrelationSurface = ImageBuffer::from_pixel(8, 8, Luma([0.7]));
    assert!(candidate_regions(&surface, 0.7, (2, 2), 0, (10, 10)).is_empty());
  }
}
