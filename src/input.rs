// 该文件是 Huijing （绘境） 项目的一部分。
// src/input.rs - 图像/掩码输入
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

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNchwFrame, model::InpaintRequest};

pub trait AsNchwFrame<const W: u32, const H: u32> {
  fn as_nchw(&self) -> &[u8];
}

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, ImageFileInputNchw};

mod read_mask_file;
pub use self::read_mask_file::{MaskFileInput, MaskFileInputError, MaskFileInputIter};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("掩码文件输入错误: {0}")]
  MaskFileInputError(#[from] MaskFileInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URI 方案选择的帧输入
pub enum InputWrapper<const W: u32, const H: u32> {
  ReadImageFile(ImageFileInput<W, H>),
}

impl<const W: u32, const H: u32> FromUrl for InputWrapper<W, H> {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == ImageFileInput::<W, H>::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl<const W: u32, const H: u32> InputWrapper<W, H> {
  pub fn len(&self) -> usize {
    match self {
      InputWrapper::ReadImageFile(input) => input.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_directory(&self) -> bool {
    match self {
      InputWrapper::ReadImageFile(input) => input.is_directory(),
    }
  }

  pub fn load_single(&self) -> Result<RgbNchwFrame<W, H>, InputError> {
    match self {
      InputWrapper::ReadImageFile(input) => Ok(input.load_single()?),
    }
  }

  pub fn into_nchw(self) -> InputWrapperNchwIter<W, H> {
    match self {
      InputWrapper::ReadImageFile(input) => InputWrapperNchwIter::ReadImageFile(input.into_nchw()),
    }
  }
}

pub enum InputWrapperNchwIter<const W: u32, const H: u32> {
  ReadImageFile(ImageFileInputNchw<W, H>),
}

impl<const W: u32, const H: u32> Iterator for InputWrapperNchwIter<W, H> {
  type Item = RgbNchwFrame<W, H>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapperNchwIter::ReadImageFile(input) => input.next(),
    }
  }
}

/// 读取一组图像与掩码，组成一次修复请求
pub fn load_inpaint_request<const W: u32, const H: u32>(
  image: &ImageFileInput<W, H>,
  mask: &MaskFileInput<W, H>,
  prompt: &str,
) -> Result<InpaintRequest<W, H>, InputError> {
  Ok(InpaintRequest {
    image: image.load_single()?,
    mask: mask.load()?,
    prompt: prompt.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma, Rgb, RgbImage};
  use std::path::Path;

  fn write_pair(dir: &Path) -> (ImageFileInput<8, 8>, MaskFileInput<8, 8>) {
    let image = dir.join("airplane.png");
    let mask = dir.join("mask.png");
    RgbImage::from_pixel(16, 16, Rgb([0, 0, 200])).save(&image).unwrap();
    GrayImage::from_pixel(16, 16, Luma([255])).save(&mask).unwrap();
    (
      ImageFileInput::open(&image).unwrap(),
      MaskFileInput::open(&mask).unwrap(),
    )
  }

  #[test]
  fn loads_one_image_mask_pair() {
    let dir = tempfile::tempdir().unwrap();
    let (image, mask) = write_pair(dir.path());
    let request = load_inpaint_request(&image, &mask, "a red boeing airplane").unwrap();
    assert_eq!(request.image.source_size(), (16, 16));
    assert_eq!(request.mask.coverage(), 1.0);
    assert_eq!(request.prompt, "a red boeing airplane");
  }

  #[test]
  fn corrupt_mask_error_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let (image, _) = write_pair(dir.path());
    let broken = dir.path().join("m.png");
    std::fs::write(&broken, [0u8; 16]).unwrap();
    let mask = MaskFileInput::<8, 8>::open(&broken).unwrap();

    let err = load_inpaint_request(&image, &mask, "").err().unwrap();
    assert!(matches!(
      err,
      InputError::MaskFileInputError(MaskFileInputError::ImageLoadError(_))
    ));
    assert!(err.to_string().contains("掩码加载错误"));
  }

  #[test]
  fn image_directory_is_rejected_for_inpainting() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mask) = write_pair(dir.path());
    let images = dir.path().join("images");
    std::fs::create_dir(&images).unwrap();
    for name in ["a.png", "b.png", "c.png"] {
      RgbImage::new(4, 4).save(images.join(name)).unwrap();
    }
    let image = ImageFileInput::<8, 8>::open(&images).unwrap();
    assert_eq!(image.len(), 3);

    let err = load_inpaint_request(&image, &mask, "").err().unwrap();
    assert!(matches!(
      err,
      InputError::ImageFileInputError(ImageFileInputError::NotSingleImage(_))
    ));
  }

  #[test]
  fn wrapper_single_load_surfaces_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bus.jpg");
    std::fs::write(&path, b"garbage").unwrap();
    let url = url::Url::parse(&format!("image://{}", path.display())).unwrap();
    let input = InputWrapper::<8, 8>::from_url(&url).unwrap();
    let err = input.load_single().err().unwrap();
    assert!(err.to_string().contains("图像加载错误"));
  }
}
