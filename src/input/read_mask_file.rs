// 该文件是 Huijing （绘境） 项目的一部分。
// src/input/read_mask_file.rs - 修复掩码文件输入
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

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, MaskFrame},
  utils::{QueryParamError, query_flag, query_value, url_path},
};

const DEFAULT_MASK_THRESHOLD: u8 = 128;

#[derive(Error, Debug)]
pub enum MaskFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemaMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("掩码加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("参数错误: {0}")]
  QueryParam(#[from] QueryParamError),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
}

/// 掩码图像：白色（亮度不低于阈值）为需要重新生成的区域，黑色保持原样
pub struct MaskFileInput<const W: u32, const H: u32> {
  path: PathBuf,
  threshold: u8,
  invert: bool,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for MaskFileInput<W, H> {
  const SCHEME: &'static str = "mask";
}

impl<const W: u32, const H: u32> FromUrl for MaskFileInput<W, H> {
  type Error = MaskFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(MaskFileInputError::SchemaMismatch(url.scheme().to_string()));
    }

    let path = url_path(url);
    std::fs::metadata(&path)?;

    Ok(MaskFileInput {
      path,
      threshold: query_value(url, "threshold")?.unwrap_or(DEFAULT_MASK_THRESHOLD),
      invert: query_flag(url, "invert"),
    })
  }
}

impl<const W: u32, const H: u32> MaskFileInput<W, H> {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, MaskFileInputError> {
    let path = path.as_ref().to_path_buf();
    std::fs::metadata(&path)?;
    Ok(MaskFileInput {
      path,
      threshold: DEFAULT_MASK_THRESHOLD,
      invert: false,
    })
  }

  pub fn threshold(mut self, threshold: u8) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn invert(mut self, invert: bool) -> Self {
    self.invert = invert;
    self
  }

  pub fn load(&self) -> Result<MaskFrame<W, H>, MaskFileInputError> {
    debug!("读取掩码文件: {}", self.path.display());
    let mask = ImageReader::open(&self.path)?
      .with_guessed_format()?
      .decode()?
      .into_luma8();
    self.binarize(&mask)
  }

  /// 缩放到模型尺寸后按阈值二值化
  pub fn binarize(&self, mask: &GrayImage) -> Result<MaskFrame<W, H>, MaskFileInputError> {
    let resized = if mask.dimensions() == (W, H) {
      mask.clone()
    } else {
      image::imageops::resize(mask, W, H, FilterType::Nearest)
    };

    let data = resized
      .into_raw()
      .into_iter()
      .map(|v| u8::from((v >= self.threshold) != self.invert))
      .collect::<Vec<_>>();

    Ok(MaskFrame::try_from(data)?)
  }

  pub fn into_masks(self) -> MaskFileInputIter<W, H> {
    MaskFileInputIter { inner: Some(self) }
  }
}

pub struct MaskFileInputIter<const W: u32, const H: u32> {
  inner: Option<MaskFileInput<W, H>>,
}

impl<const W: u32, const H: u32> Iterator for MaskFileInputIter<W, H> {
  type Item = MaskFrame<W, H>;

  fn next(&mut self) -> Option<Self::Item> {
    let input = self.inner.take()?;
    match input.load() {
      Ok(mask) => Some(mask),
      Err(e) => {
        error!("读取掩码 {} 失败: {}", input.path.display(), e);
        None
      }
    }
  }
}
