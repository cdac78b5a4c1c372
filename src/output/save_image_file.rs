// 该文件是 Huijing （绘境） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicUsize, Ordering},
};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNchwFrame,
  model::{DetectResult, InpaintRequest, InpaintResult, WithLabel},
  output::{
    Render,
    draw::{Draw, DrawDetectionOnFrame, DrawError},
    restore_inpainted,
  },
  utils::{QueryParamError, query_flag, query_value, url_path},
};

pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
  keep_unmasked: bool,
  counter: AtomicUsize,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("参数错误: {0}")]
  QueryParam(#[from] QueryParamError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let draw = match query_value::<PathBuf>(uri, "font")? {
      Some(font) => Draw::default().with_font_file(font)?,
      None => Draw::default(),
    };

    Ok(SaveImageFileOutput {
      path: url_path(uri),
      draw,
      keep_unmasked: query_flag(uri, "keep_unmasked"),
      counter: AtomicUsize::new(0),
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl AsRef<Path>) -> Self {
    SaveImageFileOutput {
      path: path.as_ref().to_path_buf(),
      draw: Draw::default(),
      keep_unmasked: false,
      counter: AtomicUsize::new(0),
    }
  }

  pub fn keep_unmasked(mut self, keep_unmasked: bool) -> Self {
    self.keep_unmasked = keep_unmasked;
    self
  }

  /// 第一张图写入给定路径，之后的图在文件名后追加序号
  fn next_path(&self) -> PathBuf {
    let index = self.counter.fetch_add(1, Ordering::Relaxed);
    if index == 0 {
      return self.path.clone();
    }
    let stem = self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    let file_name = match self.path.extension() {
      Some(ext) => format!("{}_{}.{}", stem, index, ext.to_string_lossy()),
      None => format!("{}_{}", stem, index),
    };
    self.path.with_file_name(file_name)
  }

  fn save_image(&self, image: &RgbImage) -> Result<PathBuf, SaveImageFileError> {
    let path = self.next_path();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&path)?;
    info!("保存图像到文件: {}", path.display());

    Ok(path)
  }
}

impl<const W: u32, const H: u32, T: WithLabel> Render<RgbNchwFrame<W, H>, DetectResult<T>>
  for SaveImageFileOutput
{
  type Error = SaveImageFileError;

  fn render_result(
    &self,
    frame: &RgbNchwFrame<W, H>,
    result: &DetectResult<T>,
  ) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result);
    self.save_image(&image).map(|_| ())
  }
}

impl<const W: u32, const H: u32> Render<InpaintRequest<W, H>, InpaintResult>
  for SaveImageFileOutput
{
  type Error = SaveImageFileError;

  fn render_result(
    &self,
    request: &InpaintRequest<W, H>,
    result: &InpaintResult,
  ) -> Result<(), Self::Error> {
    let image = restore_inpainted(request, result, self.keep_unmasked);
    self.save_image(&image).map(|_| ())
  }
}
