// 该文件是 Tanzhen （探针） 项目的一部分。
// src/vision.rs - 视觉基础算法
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

use image::{GrayImage, ImageBuffer, Pixel, RgbImage, imageops};

pub mod correlation;
pub mod histogram;
pub mod homography;
pub mod matcher;
pub mod orb;
pub mod region;

pub fn to_gray(image: &RgbImage) -> GrayImage {
  imageops::grayscale(image)
}

/// 按比例缩放，尺寸至少为 1 像素
pub fn resize_by<P>(image: &ImageBuffer<P, Vec<u8>>, scale: f32) -> ImageBuffer<P, Vec<u8>>
where
  P: Pixel<Subpixel = u8> + 'static,
{
  let (w, h) = image.dimensions();
  let width = ((w as f32 * scale).round() as u32).max(1);
  let height = ((h as f32 * scale).round() as u32).max(1);
  if (width, height) == (w, h) {
    return image.clone();
  }
  imageops::resize(image, width, height, imageops::FilterType::Triangle)
}
