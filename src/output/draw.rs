// 该文件是 Tanzhen （探针） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut},
  rect::Rect,
};

use crate::{output::ExportError, report::BoundingBox};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BORDER_THICKNESS: i32 = 2;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

/// 检测类别对应的颜色
pub fn class_color(label: &str) -> Rgb<u8> {
  match label {
    "chat" => GREEN,
    "chat_ai" => RED,
    "email" => BLUE,
    _ => RED,
  }
}

/// 绘图工具，没有字体时只画框不写字
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Draw {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, ExportError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)
      .map_err(|_| ExportError::Font(path.as_ref().display().to_string()))?;
    Ok(self.with_font(font))
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 加粗的空心矩形，超出图像的部分被裁掉
  pub fn rectangle(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let x_min = (bbox.x.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.y.floor() as i32).clamp(0, h - 1);
    let x_max = ((bbox.x + bbox.width).ceil() as i32).clamp(0, w - 1);
    let y_max = ((bbox.y + bbox.height).ceil() as i32).clamp(0, h - 1);

    for t in 0..BORDER_THICKNESS {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  /// 矩形加上方的文字标签
  pub fn labeled_box(&self, image: &mut RgbImage, bbox: &BoundingBox, label: &str, color: Rgb<u8>) {
    self.rectangle(image, bbox, color);
    let Some(font) = &self.font else {
      return;
    };

    let w = image.width() as i32;
    if w == 0 || image.height() == 0 {
      return;
    }
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = (bbox.x.floor() as i32).clamp(0, w - 1);
    let label_y = (bbox.y.floor() as i32 - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, self.label_text_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }

  /// 按顺序连接各顶点的闭合多边形
  pub fn polygon(&self, image: &mut RgbImage, corners: &[(f32, f32)], color: Rgb<u8>) {
    for (i, &start) in corners.iter().enumerate() {
      let end = corners[(i + 1) % corners.len()];
      draw_line_segment_mut(image, start, end, color);
    }
  }

  /// 左右拼接两幅图像，并用线段连接匹配点
  pub fn side_by_side(
    &self,
    left: &RgbImage,
    right: &RgbImage,
    pairs: &[((f32, f32), (f32, f32))],
    color: Rgb<u8>,
  ) -> RgbImage {
    let width = left.width() + right.width();
    let height = left.height().max(right.height());
    let mut canvas = RgbImage::new(width, height);
    imageops::replace(&mut canvas, left, 0, 0);
    imageops::replace(&mut canvas, right, left.width() as i64, 0);

    let offset = left.width() as f32;
    for &(a, b) in pairs {
      draw_line_segment_mut(&mut canvas, a, (b.0 + offset, b.1), color);
    }
    canvas
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rectangle_is_clamped_to_the_image() {
    let mut image = RgbImage::new(20, 10);
    Draw::default().rectangle(&mut image, &BoundingBox::new(15.0, 5.0, 30.0, 30.0), RED);
    assert_eq!(*image.get_pixel(15, 5), RED);
    assert_eq!(*image.get_pixel(19, 9), RED);
    assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
  }

  #[test]
  fn labels_without_font_only_draw_the_box() {
    let mut image = RgbImage::new(40, 40);
    let draw = Draw::default();
    assert!(!draw.has_font());
    draw.labeled_box(&mut image, &BoundingBox::new(10.0, 30.0, 5.0, 5.0), "chat", GREEN);
    assert_eq!(*image.get_pixel(10, 30), GREEN);
    assert_eq!(*image.get_pixel(10, 20), Rgb([0, 0, 0]));
  }

  #[test]
  fn side_by_side_offsets_right_image() {
    let left = RgbImage::from_pixel(4, 3, Rgb([9, 9, 9]));
    let right = RgbImage::from_pixel(6, 5, Rgb([7, 7, 7]));
    let canvas = Draw::default().side_by_side(&left, &right, &[((0.0, 0.0), (0.0, 4.0))], BLUE);
    assert_eq!(canvas.dimensions(), (10, 5));
    assert_eq!(*canvas.get_pixel(9, 0), Rgb([7, 7, 7]));
    assert_eq!(*canvas.get_pixel(3, 4), Rgb([0, 0, 0]));
  }

  #[test]
  fn class_colours() {
    assert_eq!(class_color("chat"), GREEN);
    assert_eq!(class_color("chat_ai"), RED);
    assert_eq!(class_color("email"), BLUE);
    assert_eq!(class_color("other"), RED);
  }

  #[test]
  fn empty_image_is_left_alone() {
    let draw = Draw::default();
    for (w, h) in [(0, 0), (0, 8), (8, 0)] {
      let mut image = RgbImage::new(w, h);
      draw.rectangle(&mut image, &BoundingBox::new(1.0, 1.0, 4.0, 4.0), GREEN);
      draw.labeled_box(&mut image, &BoundingBox::new(1.0, 1.0, 4.0, 4.0), "chat", GREEN);
      assert_eq!(image.dimensions(), (w, h));
    }
  }
}
