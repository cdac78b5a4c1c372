// 该文件是 Huijing （绘境） 项目的一部分。
// src/frame.rs - NCHW 帧与掩码帧定义
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

use std::sync::Arc;

use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

use crate::input::AsNchwFrame;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 模型输入尺寸下的 RGB 平面帧，同时保留解码后的原图用于渲染
#[derive(Debug, Clone)]
pub struct RgbNchwFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
  source: Option<Arc<RgbImage>>,
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNchwFrame<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    let expected = RGB_CHANNELS * W as usize * H as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      source: None,
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNchwFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      source: None,
    }
  }
}

impl<const W: u32, const H: u32> RgbNchwFrame<W, H> {
  pub fn with_source(mut self, source: RgbImage) -> Self {
    self.source = Some(Arc::new(source));
    self
  }

  /// 解码得到的原始图像（原始分辨率）
  pub fn source(&self) -> Option<&RgbImage> {
    self.source.as_deref()
  }

  /// 原图尺寸，没有原图时为模型输入尺寸
  pub fn source_size(&self) -> (u32, u32) {
    self
      .source
      .as_ref()
      .map(|s| s.dimensions())
      .unwrap_or((W, H))
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 转为 (1, 3, H, W) 的浮点张量，取值范围 [0, 1]
  pub fn to_tensor(&self) -> Array4<f32> {
    let plane = (W as usize) * (H as usize);
    Array4::from_shape_fn((1, RGB_CHANNELS, H as usize, W as usize), |(_, c, y, x)| {
      self.data[c * plane + y * W as usize + x] as f32 / 255.0
    })
  }
}

impl<const W: u32, const H: u32> AsMut<[u8]> for RgbNchwFrame<W, H> {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNchwFrame<W, H> for RgbNchwFrame<W, H> {
  fn as_nchw(&self) -> &[u8] {
    &self.data
  }
}

/// 二值掩码帧：1 表示需要重新生成，0 表示保持原样
#[derive(Debug, Clone)]
pub struct MaskFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for MaskFrame<W, H> {
  type Error = FrameError;

  fn try_from(mut data: Vec<u8>) -> Result<Self, Self::Error> {
    let expected = W as usize * H as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    for v in data.iter_mut() {
      *v = u8::from(*v != 0);
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> MaskFrame<W, H> {
  pub fn is_regenerate(&self, x: u32, y: u32) -> bool {
    self.data[(y * W + x) as usize] == 1
  }

  /// 需要重新生成的像素占比
  pub fn coverage(&self) -> f32 {
    let marked = self.data.iter().filter(|&&v| v == 1).count();
    marked as f32 / self.data.len() as f32
  }

  /// 转为 (1, 1, H, W) 的浮点张量
  pub fn to_tensor(&self) -> Array4<f32> {
    Array4::from_shape_fn((1, 1, H as usize, W as usize), |(_, _, y, x)| {
      self.data[y * W as usize + x] as f32
    })
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  /// 掩码区域取生成图像，其余取原图；两张图尺寸相同，掩码按比例映射
  pub fn composite(&self, original: &RgbImage, generated: &RgbImage) -> RgbImage {
    let (width, height) = original.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
      let mx = (x as u64 * W as u64 / width as u64) as u32;
      let my = (y as u64 * H as u64 / height as u64) as u32;
      if self.is_regenerate(mx.min(W - 1), my.min(H - 1)) {
        *generated.get_pixel(x, y)
      } else {
        *original.get_pixel(x, y)
      }
    })
  }
}
