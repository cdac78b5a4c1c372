// 该文件是 Huijing （绘境） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::RgbNchwFrame,
  input::AsNchwFrame,
  model::{DetectItem, DetectResult, Keypoint, WithLabel},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const KEYPOINT_RADIUS: i32 = 3;
const KEYPOINT_MIN_SCORE: f32 = 0.5;
const PALETTE_SIZE: u32 = 80;

/// COCO 人体关键点骨架连接
const COCO_SKELETON: [(usize, usize); 16] = [
  (15, 13),
  (13, 11),
  (16, 14),
  (14, 12),
  (11, 12),
  (5, 11),
  (6, 12),
  (5, 6),
  (5, 7),
  (6, 8),
  (7, 9),
  (8, 10),
  (1, 2),
  (0, 1),
  (0, 2),
  (1, 3),
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontArc>,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 每个类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
      colors,
    }
  }
}

impl Draw {
  /// 加载标签字体，不设置字体时只绘制边框和标签底色
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    debug!("加载标签字体: {}", path.as_ref().display());
    self.font = Some(FontArc::try_from_vec(data)?);
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  // 在图像上绘制一个矩形边框，bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let color = self.color_of(item.kind.to_label_id());
    let (w, h) = (image.width() as f32, image.height() as f32);
    let (max_x, max_y) = (image.width() as i32 - 1, image.height() as i32 - 1);

    let x_min = ((item.bbox[0] * w).floor() as i32).clamp(0, max_x);
    let y_min = ((item.bbox[1] * h).floor() as i32).clamp(0, max_y);
    let x_max = ((item.bbox[2] * w).ceil() as i32).clamp(0, max_x);
    let y_max = ((item.bbox[3] * h).ceil() as i32).clamp(0, max_y);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗）
    for t in 0..BOX_THICKNESS {
      let (x0, y0) = ((x_min + t).min(max_x), (y_min + t).min(max_y));
      let (x1, y1) = ((x_max - t).max(0), (y_max - t).max(0));
      for x in x0..=x1 {
        image.put_pixel(x as u32, y0 as u32, color);
        image.put_pixel(x as u32, y1 as u32, color);
      }
      for y in y0..=y1 {
        image.put_pixel(x0 as u32, y as u32, color);
        image.put_pixel(x1 as u32, y as u32, color);
      }
    }

    let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签在边框上方，不超出图像
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w as i32 - label_x).max(0) as u32;

    if label_width > 0 && text_height > 0 {
      let rect = imageproc::rect::Rect::at(label_x, label_y).of_size(label_width, text_height as u32);
      draw_filled_rect_mut(image, rect, color);

      if let Some(font) = &self.font {
        draw_text_mut(
          image,
          Rgb([255u8, 255u8, 255u8]),
          label_x,
          label_y + self.label_text_vertical_padding,
          PxScale::from(self.font_size),
          font,
          &label,
        );
      }
    }

    if let Some(keypoints) = &item.keypoints {
      self.draw_keypoints(image, keypoints, color);
    }
  }

  fn draw_keypoints(&self, image: &mut RgbImage, keypoints: &[Keypoint], color: Rgb<u8>) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let visible = |k: &Keypoint| k.score >= KEYPOINT_MIN_SCORE;

    if keypoints.len() == 17 {
      for &(a, b) in COCO_SKELETON.iter() {
        let (ka, kb) = (&keypoints[a], &keypoints[b]);
        if visible(ka) && visible(kb) {
          draw_line_segment_mut(image, (ka.x * w, ka.y * h), (kb.x * w, kb.y * h), color);
        }
      }
    }

    for k in keypoints.iter().filter(|k| visible(k)) {
      draw_filled_circle_mut(
        image,
        ((k.x * w) as i32, (k.y * h) as i32),
        KEYPOINT_RADIUS,
        Rgb([255, 255, 255]),
      );
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;
  let (r, g, b) = match h as u32 {
    0..60 => (c, x, 0.0),
    60..120 => (x, c, 0.0),
    120..180 => (0.0, c, x),
    180..240 => (0.0, x, c),
    240..300 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };
  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

pub trait DrawDetectionOnImage<T: WithLabel> {
  fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult<T>);
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

pub trait DrawDetectionOnFrame<FromFrame, T: WithLabel> {
  fn draw_detection(&self, frame: &FromFrame, result: &DetectResult<T>) -> RgbImage;
}

impl<FromFrame: ToRgbImage, T: WithLabel, D: DrawDetectionOnImage<T>>
  DrawDetectionOnFrame<FromFrame, T> for D
{
  fn draw_detection(&self, frame: &FromFrame, result: &DetectResult<T>) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

impl<const W: u32, const H: u32> ToRgbImage for RgbNchwFrame<W, H> {
  /// 有原图时返回原图，否则由 NCHW 数据还原
  fn to_rgb_image(&self) -> RgbImage {
    if let Some(source) = self.source() {
      return source.clone();
    }

    let width = self.width();
    let height = self.height();
    let plane = width * height;
    let data = self.as_nchw();

    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
      let idx = y as usize * width + x as usize;
      Rgb([data[idx], data[plane + idx], data[2 * plane + idx]])
    })
  }
}

impl<T: WithLabel> DrawDetectionOnImage<T> for Draw {
  fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult<T>) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item);
    }
  }
}

/// 以文本形式记录检测结果，每个检测框一行
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn format<T: WithLabel>(&self, result: &DetectResult<T>) -> String {
    result
      .items
      .iter()
      .map(|item| {
        let name = if self.label_with_name {
          item.kind.to_label_str()
        } else {
          item.kind.to_label_id().to_string()
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn record<T: WithLabel>(
    &self,
    result: &DetectResult<T>,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.format(result))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ClassLabel, LabelSet};

  fn result_with(bbox: [f32; 4], keypoints: Option<Vec<Keypoint>>) -> DetectResult<ClassLabel> {
    DetectResult {
      items: vec![DetectItem {
        kind: LabelSet::coco().label(0),
        score: 0.87,
        bbox,
        keypoints: keypoints.map(Vec::into_boxed_slice),
      }]
      .into_boxed_slice(),
      probs: None,
    }
  }

  #[test]
  fn draws_box_edges_in_class_color() {
    let draw = Draw::default();
    let mut image = RgbImage::new(100, 100);
    let result = result_with([0.5, 0.5, 0.9, 0.9], None);
    draw.draw_detections_on_image(&mut image, &result);

    let color = draw.color_of(0);
    assert_eq!(image.get_pixel(50, 70), &color);
    assert_eq!(image.get_pixel(90, 70), &color);
    assert_eq!(image.get_pixel(70, 70), &Rgb([0, 0, 0]));
    // 标签底色在边框上方
    assert_eq!(image.get_pixel(52, 30), &color);
  }

  #[test]
  fn empty_boxes_are_skipped() {
    let draw = Draw::default();
    let mut image = RgbImage::new(10, 10);
    draw.draw_detections_on_image(&mut image, &result_with([0.5, 0.5, 0.5, 0.5], None));
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn visible_keypoints_are_drawn() {
    let draw = Draw::default();
    let mut image = RgbImage::new(100, 100);
    let keypoints = vec![
      Keypoint { x: 0.7, y: 0.7, score: 0.9 },
      Keypoint { x: 0.6, y: 0.8, score: 0.1 },
    ];
    draw.draw_detections_on_image(&mut image, &result_with([0.5, 0.5, 0.9, 0.9], Some(keypoints)));
    assert_eq!(image.get_pixel(70, 70), &Rgb([255, 255, 255]));
    assert_eq!(image.get_pixel(60, 80), &Rgb([0, 0, 0]));
  }

  #[test]
  fn frame_without_source_is_rebuilt_from_planes() {
    let frame = RgbNchwFrame::<2, 1>::try_from(vec![1, 2, 3, 4, 5, 6]).unwrap();
    let image = frame.to_rgb_image();
    assert_eq!(image.get_pixel(0, 0), &Rgb([1, 3, 5]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([2, 4, 6]));
  }

  #[test]
  fn record_lines_by_name_and_id() {
    let result = result_with([0.1, 0.2, 0.3, 0.4], None);
    let by_name = Record { label_with_name: true }.format(&result);
    assert_eq!(by_name, "person, 0.8700, 0.1000, 0.2000, 0.3000, 0.4000");
    let by_id = Record { label_with_name: false }.format(&result);
    assert!(by_id.starts_with("0, 0.8700"));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::default().with_font_file("/no/such/font.ttf"),
      Err(DrawError::IoError(_))
    ));
  }

  #[test]
  fn palette_wraps_around() {
    let draw = Draw::default();
    assert_eq!(draw.color_of(3), draw.color_of(3 + PALETTE_SIZE));
  }
}
