// 该文件是 Huijing （绘境） 项目的一部分。
// src/output/console.rs - 控制台打印输出
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
  fmt::Write as _,
  io::Write,
  str::FromStr,
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, InpaintRequest, InpaintResult, WithLabel},
  output::Render,
  utils::{QueryParamError, query_value},
};

#[derive(Error, Debug)]
pub enum ConsoleOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数错误: {0}")]
  QueryParam(#[from] QueryParamError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleFormat {
  #[default]
  Text,
  Json,
}

impl FromStr for ConsoleFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "text" => Ok(ConsoleFormat::Text),
      "json" => Ok(ConsoleFormat::Json),
      other => Err(format!("未知输出格式: {}", other)),
    }
  }
}

/// 把结果中存在的属性打印到标准输出
pub struct ConsoleOutput {
  format: ConsoleFormat,
  counter: AtomicUsize,
  writer: Mutex<Box<dyn Write + Send>>,
}

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    let format = query_value(url, "format")?.unwrap_or_default();
    Ok(Self::new(format, Box::new(std::io::stdout())))
  }
}

impl ConsoleOutput {
  pub fn new(format: ConsoleFormat, writer: Box<dyn Write + Send>) -> Self {
    Self {
      format,
      counter: AtomicUsize::new(0),
      writer: Mutex::new(writer),
    }
  }

  fn write_line(&self, line: &str) -> Result<(), ConsoleOutputError> {
    let mut writer = self
      .writer
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    Ok(())
  }
}

/// 文本格式：只打印非空的属性
pub fn format_detect_result<T: WithLabel>(index: usize, result: &DetectResult<T>) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "result {}:", index);

  if !result.items.is_empty() || result.probs.is_none() {
    let _ = writeln!(out, "boxes: {}", result.items.len());
    for item in result.items.iter() {
      let _ = writeln!(
        out,
        "  - {} ({}): {:.2}% at [{:.4}, {:.4}, {:.4}, {:.4}]",
        item.kind.to_label_str(),
        item.kind.to_label_id(),
        item.score * 100.0,
        item.bbox[0],
        item.bbox[1],
        item.bbox[2],
        item.bbox[3]
      );
    }
  }

  if result.has_keypoints() {
    let _ = writeln!(out, "keypoints:");
    for (i, item) in result.items.iter().enumerate() {
      if let Some(keypoints) = &item.keypoints {
        let points = keypoints
          .iter()
          .map(|k| format!("({:.4}, {:.4}, {:.2})", k.x, k.y, k.score))
          .collect::<Vec<_>>()
          .join(" ");
        let _ = writeln!(out, "  [{}] {}", i, points);
      }
    }
  }

  if let Some(probs) = &result.probs {
    let _ = writeln!(out, "probs:");
    for p in probs.iter() {
      let _ = writeln!(
        out,
        "  - {} ({}): {:.2}%",
        p.kind.to_label_str(),
        p.kind.to_label_id(),
        p.score * 100.0
      );
    }
  }

  out.trim_end().to_string()
}

impl<F, T: WithLabel + Serialize> Render<F, DetectResult<T>> for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn render_result(&self, _frame: &F, result: &DetectResult<T>) -> Result<(), Self::Error> {
    let index = self.counter.fetch_add(1, Ordering::Relaxed);
    let line = match self.format {
      ConsoleFormat::Text => format_detect_result(index, result),
      ConsoleFormat::Json => serde_json::to_string(result)?,
    };
    self.write_line(&line)
  }
}

#[derive(Serialize)]
struct InpaintSummary<'a> {
  prompt: &'a str,
  mask_coverage: f32,
  width: u32,
  height: u32,
}

impl<const W: u32, const H: u32> Render<InpaintRequest<W, H>, InpaintResult> for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn render_result(
    &self,
    request: &InpaintRequest<W, H>,
    result: &InpaintResult,
  ) -> Result<(), Self::Error> {
    let summary = InpaintSummary {
      prompt: &request.prompt,
      mask_coverage: request.mask.coverage(),
      width: result.image.width(),
      height: result.image.height(),
    };
    let line = match self.format {
      ConsoleFormat::Text => format!(
        "inpainted \"{}\": {}x{}, mask coverage {:.2}%",
        summary.prompt,
        summary.width,
        summary.height,
        summary.mask_coverage * 100.0
      ),
      ConsoleFormat::Json => serde_json::to_string(&summary)?,
    };
    self.write_line(&line)
  }
}
