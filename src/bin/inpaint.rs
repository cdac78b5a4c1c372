// 该文件是 Huijing （绘境） 项目的一部分。
// src/bin/inpaint.rs - 图像修复程序
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use huijing::{
  FromUrl,
  input::{ImageFileInput, MaskFileInput, load_inpaint_request},
  model::InpaintBuilder,
  output::OutputWrapper,
  task::{OneShotTask, Task},
};

const MODEL_SIZE: u32 = 512;

/// Huijing 图像修复
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 修复模型，例如 inpaint:///models/sd2/model.onnx?steps=50
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///data/airplane.png
  #[arg(long, value_name = "IMAGE")]
  pub image: Url,
  /// 掩码图像，白色区域重新生成，例如 mask:///data/mask.png
  #[arg(long, value_name = "MASK")]
  pub mask: Url,
  /// 提示词
  #[arg(long, value_name = "PROMPT")]
  pub prompt: String,
  /// 输出，例如 image:///out/inpainted.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入图像: {}", args.image);
  info!("掩码图像: {}", args.mask);
  info!("提示词: {}", args.prompt);
  info!("输出路径: {}", args.output);

  let image = ImageFileInput::<MODEL_SIZE, MODEL_SIZE>::from_url(&args.image)
    .with_context(|| format!("打开输入图像失败: {}", args.image))?;
  let mask = MaskFileInput::<MODEL_SIZE, MODEL_SIZE>::from_url(&args.mask)
    .with_context(|| format!("打开掩码失败: {}", args.mask))?;
  let request = load_inpaint_request(&image, &mask, &args.prompt).context("读取修复输入失败")?;

  let model = InpaintBuilder::from_url(&args.model)
    .with_context(|| format!("解析模型地址失败: {}", args.model))?
    .build::<MODEL_SIZE, MODEL_SIZE>()
    .context("加载模型失败")?;
  let output = OutputWrapper::from_url(&args.output).context("创建输出失败")?;

  OneShotTask.run_task(std::iter::once(request), model, output)?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const REQUIRED: [&str; 9] = [
    "huijing-inpaint",
    "--model",
    "inpaint:///models/sd2/model.onnx",
    "--image",
    "image:///data/airplane.png",
    "--mask",
    "mask:///data/mask.png",
    "--output",
    "image:///out/inpainted.png",
  ];

  #[test]
  fn prompt_is_required() {
    let err = Args::try_parse_from(REQUIRED).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    assert!(err.to_string().contains("--prompt"));
  }

  #[test]
  fn explicit_empty_prompt_is_accepted() {
    let args = Args::try_parse_from(REQUIRED.into_iter().chain(["--prompt", ""])).unwrap();
    assert_eq!(args.prompt, "");

    let args = Args::try_parse_from(
      REQUIRED
        .into_iter()
        .chain(["--prompt", "a red boeing airplane"]),
    )
    .unwrap();
    assert_eq!(args.prompt, "a red boeing airplane");
  }
}
