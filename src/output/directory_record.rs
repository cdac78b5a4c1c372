// 该文件是 Huijing （绘境） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNchwFrame,
  model::{DetectResult, InpaintRequest, InpaintResult, WithLabel},
  output::{
    Render,
    draw::{Draw, DrawDetectionOnFrame, Record, ToRgbImage},
    restore_inpainted,
  },
  utils::{query_flag, url_path},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("未知记录方式: {0}")]
  UnknownRecord(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 画框保存，或者保存原图并附带文本记录
pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result<F, T>(
    &self,
    path: &Path,
    frame: &F,
    result: &DetectResult<T>,
  ) -> Result<(), DirectoryRecordOutputError>
  where
    F: ToRgbImage,
    T: WithLabel,
  {
    match self {
      DrawWrapper::Draw(draw) => {
        let image: RgbImage = draw.draw_detection(frame, result);
        image.save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.to_rgb_image().save(path)?;
        record.record(result, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: Option<&str>) -> Result<Self, DirectoryRecordOutputError> {
    match kind {
      None | Some("draw") => Ok(DrawWrapper::Draw(Box::default())),
      Some("name") => Ok(DrawWrapper::Record(Record {
        label_with_name: true,
      })),
      Some("id") => Ok(DrawWrapper::Record(Record {
        label_with_name: false,
      })),
      Some(other) => Err(DirectoryRecordOutputError::UnknownRecord(other.to_string())),
    }
  }
}

/// 按日期分层保存每一次结果：`<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.png`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch(
        uri.scheme().to_string(),
      ));
    }

    let kind = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned());

    Ok(DirectoryRecordOutput {
      directory: url_path(uri),
      draw: DrawWrapper::with(kind.as_deref())?,
      frame_counter: AtomicU16::new(0),
      always: query_flag(uri, "always"),
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path_at(&self, now: DateTime<Local>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    self.frame_path_at(Local::now())
  }
}

impl<const W: u32, const H: u32, T: WithLabel> Render<RgbNchwFrame<W, H>, DetectResult<T>>
  for DirectoryRecordOutput
{
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &RgbNchwFrame<W, H>,
    result: &DetectResult<T>,
  ) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("结果为空，跳过记录");
      return Ok(());
    }
    let path = self.frame_path()?;
    self.draw.save_result(&path, frame, result)?;
    info!("记录结果到: {}", path.display());
    Ok(())
  }
}

impl<const W: u32, const H: u32> Render<InpaintRequest<W, H>, InpaintResult>
  for DirectoryRecordOutput
{
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    request: &InpaintRequest<W, H>,
    result: &InpaintResult,
  ) -> Result<(), Self::Error> {
    let path = self.frame_path()?;
    restore_inpainted(request, result, false).save(&path)?;
    info!("记录修复结果到: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ClassLabel, DetectItem, LabelSet};
  use chrono::TimeZone;

  fn output_in(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn detection() -> DetectResult<ClassLabel> {
    DetectResult {
      items: vec![DetectItem {
        kind: LabelSet::coco().label(15),
        score: 0.66,
        bbox: [0.0, 0.0, 0.5, 0.5],
        keypoints: None,
      }]
      .into_boxed_slice(),
      probs: None,
    }
  }

  /// 收集目录下所有文件
  fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
      for entry in std::fs::read_dir(d).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  #[test]
  fn path_is_laid_out_by_date() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(dir.path(), "");
    let now = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
    let path = output.frame_path_at(now).unwrap();
    assert_eq!(
      path,
      dir.path().join("2026").join("03").join("07").join("09-05-01-0001.png")
    );
    assert!(path.parent().unwrap().is_dir());
    let path = output.frame_path_at(now).unwrap();
    assert!(path.ends_with("09-05-01-0002.png"));
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let frame = RgbNchwFrame::<4, 4>::default();
    let empty = DetectResult::<ClassLabel>::default();

    let dir = tempfile::tempdir().unwrap();
    output_in(dir.path(), "").render_result(&frame, &empty).unwrap();
    assert!(files_under(dir.path()).is_empty());

    output_in(dir.path(), "?always").render_result(&frame, &empty).unwrap();
    assert_eq!(files_under(dir.path()).len(), 1);
  }

  #[test]
  fn record_writes_image_and_text() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(dir.path(), "?record=name");
    let frame = RgbNchwFrame::<4, 4>::default();
    output.render_result(&frame, &detection()).unwrap();

    let files = files_under(dir.path());
    assert_eq!(files.len(), 2);
    let text = files.iter().find(|p| p.extension().unwrap() == "txt").unwrap();
    let content = std::fs::read_to_string(text).unwrap();
    assert!(content.starts_with("cat, 0.6600"));
  }

  #[test]
  fn unknown_record_kind_is_rejected() {
    let url = Url::parse("folder:///tmp/records?record=video").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::UnknownRecord(k)) if k == "video"
    ));
  }
}
