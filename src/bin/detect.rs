// 该文件是 Huijing （绘境） 项目的一部分。
// src/bin/detect.rs - 目标检测程序
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
  frame::RgbNchwFrame,
  input::InputWrapper,
  model::{Yolov8, Yolov8Builder},
  output::OutputWrapper,
  task::{BatchTask, RepeatShotTask, Task},
};

const MODEL_SIZE: u32 = 640;

/// Huijing 目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 yolov8:///models/yolov8n.onnx?iou=0.7
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像文件或目录，例如 image:///data/bus.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，可指定多个：stdout:、image:///out.png、folder:///records
  #[arg(long, value_name = "OUTPUT", default_value = "stdout:")]
  pub output: Vec<Url>,
  /// 置信度阈值，覆盖模型 URL 中的 conf
  #[arg(long, value_name = "THRESHOLD")]
  pub conf: Option<f32>,
  /// 最多处理的图像数量
  #[arg(long, value_name = "COUNT")]
  pub max_items: Option<usize>,
  /// 对第一张图像重复推理的次数，用于测速
  #[arg(long, value_name = "TIMES")]
  pub repeat: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  for output in args.output.iter() {
    info!("输出路径: {}", output);
  }

  let input = InputWrapper::<MODEL_SIZE, MODEL_SIZE>::from_url(&args.input)
    .with_context(|| format!("打开输入失败: {}", args.input))?;
  info!("输入图像数量: {}", input.len());

  let mut builder = Yolov8Builder::from_url(&args.model)
    .with_context(|| format!("解析模型地址失败: {}", args.model))?;
  if let Some(conf) = args.conf {
    builder = builder.conf(conf);
  }
  let model = builder
    .build::<MODEL_SIZE, MODEL_SIZE>()
    .context("加载模型失败")?;
  info!("模型任务类型: {:?}", model.task());

  let output = args
    .output
    .iter()
    .map(OutputWrapper::from_url)
    .collect::<Result<Vec<_>, _>>()
    .context("创建输出失败")?;

  if input.is_directory() {
    run(&args, input.into_nchw(), model, output)
  } else {
    // 单张图像的解码错误直接返回
    let frame = input
      .load_single()
      .with_context(|| format!("读取输入图像失败: {}", args.input))?;
    run(&args, std::iter::once(frame), model, output)
  }
}

fn run<I>(
  args: &Args,
  frames: I,
  model: Yolov8<MODEL_SIZE, MODEL_SIZE>,
  output: Vec<OutputWrapper>,
) -> Result<()>
where
  I: Iterator<Item = RgbNchwFrame<MODEL_SIZE, MODEL_SIZE>>,
{
  match args.repeat {
    Some(times) => RepeatShotTask::default()
      .with_times(times)
      .run_task(frames, model, output)?,
    None => BatchTask::default()
      .with_frame_number(args.max_items)
      .run_task(frames, model, output)?,
  }

  Ok(())
}
