// 该文件是 Huijing （绘境） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, frame::RgbNchwFrame,
  utils::{is_image_path, url_path},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemaMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("目录中没有图像文件: {0}")]
  EmptyDirectory(String),
  #[error("需要单张图像，实际为目录: {0}")]
  NotSingleImage(String),
}

/// 单张图像文件，或目录中的全部图像文件（按文件名排序）
pub struct ImageFileInput<const W: u32, const H: u32> {
  paths: VecDeque<PathBuf>,
  directory: Option<PathBuf>,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for ImageFileInput<W, H> {
  const SCHEME: &'static str = "image";
}

impl<const W: u32, const H: u32> FromUrl for ImageFileInput<W, H> {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch(url.scheme().to_string()));
    }

    Self::open(url_path(url))
  }
}

impl<const W: u32, const H: u32> ImageFileInput<W, H> {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let directory = path.is_dir().then(|| path.to_path_buf());
    let paths = if directory.is_some() {
      let mut paths = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_path(p))
        .collect::<Vec<_>>();
      paths.sort();
      if paths.is_empty() {
        return Err(ImageFileInputError::EmptyDirectory(
          path.display().to_string(),
        ));
      }
      info!("从目录 {} 读取 {} 张图像", path.display(), paths.len());
      paths
    } else {
      // 提前检查文件是否存在，错误在构建阶段暴露
      std::fs::metadata(path)?;
      vec![path.to_path_buf()]
    };

    Ok(ImageFileInput {
      paths: paths.into(),
      directory,
    })
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  pub fn is_directory(&self) -> bool {
    self.directory.is_some()
  }

  /// 读取唯一的一张图像，解码错误直接返回
  pub fn load_single(&self) -> Result<RgbNchwFrame<W, H>, ImageFileInputError> {
    if let Some(directory) = &self.directory {
      return Err(ImageFileInputError::NotSingleImage(
        directory.display().to_string(),
      ));
    }
    match self.paths.front() {
      Some(path) => load_frame(path),
      None => Err(ImageFileInputError::EmptyDirectory(String::new())),
    }
  }

  pub fn into_nchw(self) -> ImageFileInputNchw<W, H> {
    ImageFileInputNchw { inner: self }
  }
}

/// 解码图像并缩放到模型输入尺寸
pub fn load_frame<const W: u32, const H: u32>(
  path: &Path,
) -> Result<RgbNchwFrame<W, H>, ImageFileInputError> {
  debug!("读取图像文件: {}", path.display());
  let image: RgbImage = ImageReader::open(path)?
    .with_guessed_format()?
    .decode()?
    .into_rgb8();
  Ok(RgbNchwFrame::from(image))
}

pub struct ImageFileInputNchw<const W: u32, const H: u32> {
  inner: ImageFileInput<W, H>,
}

impl<const W: u32, const H: u32> Iterator for ImageFileInputNchw<W, H> {
  type Item = RgbNchwFrame<W, H>;

  fn next(&mut self) -> Option<Self::Item> {
    // 无法解码的文件跳过，继续处理后面的图像
    while let Some(path) = self.inner.paths.pop_front() {
      match load_frame(&path) {
        Ok(frame) => return Some(frame),
        Err(e) => error!("读取图像 {} 失败: {}", path.display(), e),
      }
    }
    None
  }
}

impl<const W: u32, const H: u32> From<RgbImage> for RgbNchwFrame<W, H> {
  fn from(image: RgbImage) -> Self {
    let resized = if image.dimensions() == (W, H) {
      image.clone()
    } else {
      image::imageops::resize(&image, W, H, FilterType::Triangle)
    };

    let mut frame = RgbNchwFrame::<W, H>::default();
    let channels = frame.channels();
    let height = frame.height();
    let width = frame.width();
    let slice = frame.as_mut();

    for c in 0..channels {
      for h in 0..height {
        for w in 0..width {
          let pixel = resized.get_pixel(w as u32, h as u32);
          slice[c * height * width + h * width + w] = pixel[c];
        }
      }
    }
    frame.with_source(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::AsNchwFrame;
  use image::Rgb;

  fn write_image(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(20, 10, Rgb(color)).save(&path).unwrap();
    path
  }

  #[test]
  fn reads_single_file_into_model_sized_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_image(dir.path(), "red.png", [255, 0, 0]);
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();

    let input = ImageFileInput::<8, 8>::from_url(&url).unwrap();
    assert_eq!(input.len(), 1);

    let frames: Vec<_> = input.into_nchw().collect();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.source_size(), (20, 10));
    // R 平面全部为 255，G 平面为 0
    assert!(frame.as_nchw()[..64].iter().all(|&v| v == 255));
    assert!(frame.as_nchw()[64..128].iter().all(|&v| v == 0));
  }

  #[test]
  fn reads_directory_sorted_and_skips_other_files() {
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "b.png", [0, 255, 0]);
    write_image(dir.path(), "a.png", [255, 0, 0]);
    std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let input = ImageFileInput::<4, 4>::open(dir.path()).unwrap();
    assert_eq!(input.len(), 2);
    let frames: Vec<_> = input.into_nchw().collect();
    assert_eq!(frames[0].source().unwrap().get_pixel(0, 0), &Rgb([255, 0, 0]));
    assert_eq!(frames[1].source().unwrap().get_pixel(0, 0), &Rgb([0, 255, 0]));
  }

  #[test]
  fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ImageFileInput::<4, 4>::open(dir.path()).err().unwrap();
    assert!(matches!(err, ImageFileInputError::EmptyDirectory(_)));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let err = ImageFileInput::<4, 4>::open("/definitely/not/here.png")
      .err()
      .unwrap();
    assert!(matches!(err, ImageFileInputError::IoError(_)));
  }

  #[test]
  fn single_load_reports_decode_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"definitely not a png").unwrap();

    let input = ImageFileInput::<4, 4>::open(&path).unwrap();
    let err = input.load_single().err().unwrap();
    assert!(matches!(err, ImageFileInputError::ImageLoadError(_)));
    assert!(err.to_string().starts_with("图像加载错误"));
  }

  #[test]
  fn single_load_rejects_directories() {
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "a.png", [255, 0, 0]);
    let input = ImageFileInput::<4, 4>::open(dir.path()).unwrap();
    assert_eq!(input.len(), 1);
    assert!(input.is_directory());
    assert!(matches!(
      input.load_single(),
      Err(ImageFileInputError::NotSingleImage(_))
    ));

    let input = ImageFileInput::<4, 4>::open(dir.path().join("a.png")).unwrap();
    assert_eq!(input.load_single().unwrap().source_size(), (20, 10));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("mask:///tmp/a.png").unwrap();
    let err = ImageFileInput::<4, 4>::from_url(&url).err().unwrap();
    assert!(matches!(err, ImageFileInputError::SchemaMismatch(_)));
  }
}
