// 该文件是 Huijing （绘境） 项目的一部分。
// src/model.rs - 模型
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
use serde::Serialize;

use crate::frame::{MaskFrame, RgbNchwFrame};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
}

/// 关键点，坐标为归一化坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keypoint {
  pub x: f32,
  pub y: f32,
  pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub keypoints: Option<Box<[Keypoint]>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassScore<T> {
  pub kind: T,
  pub score: f32,
}

/// 一张图像的推理结果：检测框（可带关键点）或分类概率
#[derive(Debug, Clone, Serialize)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub probs: Option<Box<[ClassScore<T>]>>,
}

impl<T> Default for DetectResult<T> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
      probs: None,
    }
  }
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty() && self.probs.as_ref().is_none_or(|p| p.is_empty())
  }

  pub fn has_keypoints(&self) -> bool {
    self.items.iter().any(|item| item.keypoints.is_some())
  }
}

/// 一次修复请求：原图、掩码与提示词
#[derive(Debug, Clone)]
pub struct InpaintRequest<const W: u32, const H: u32> {
  pub image: RgbNchwFrame<W, H>,
  pub mask: MaskFrame<W, H>,
  pub prompt: String,
}

/// 修复结果，分辨率为模型输入尺寸
#[derive(Debug, Clone)]
pub struct InpaintResult {
  pub image: RgbImage,
}

mod labels;
pub use self::labels::{COCO_CLASSES, ClassLabel, LabelSet};

#[cfg(any(feature = "model_yolov8", feature = "model_inpaint"))]
mod session;
#[cfg(any(feature = "model_yolov8", feature = "model_inpaint"))]
pub use self::session::{Device, SessionBuilder, SessionError};

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error, Yolov8Params, Yolov8Task};

#[cfg(feature = "model_inpaint")]
mod inpaint;
#[cfg(feature = "model_inpaint")]
pub use self::inpaint::{
  InpaintBuilder, InpaintError, InpaintParams, InpaintPipeline, InputArray, InputRole, PixelRange,
  prepare_input,
};
