// 该文件是 Huijing （绘境） 项目的一部分。
// src/task.rs - 任务调度
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

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一个输入
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let infer_elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", infer_elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed() - infer_elapsed);

    Ok(())
  }
}

/// 对同一输入重复推理，用于测量耗时
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }
}

/// 去掉前两次预热后的平均耗时
pub fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  let warm = if times.len() > 2 { &times[2..] } else { times };
  if warm.is_empty() {
    return None;
  }
  Some(warm.iter().sum::<Duration>() / warm.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed() - elapsed);
      times.push(elapsed);
    }

    if let Some(average) = average_after_warmup(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

/// 依次处理所有输入，可限制处理数量
#[derive(Default, Debug)]
pub struct BatchTask {
  frame_number: Option<usize>,
}

impl BatchTask {
  /// `Some(0)` 视为不限制
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number.filter(|&n| n > 0);
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for BatchTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let started = Instant::now();
    let mut frame_index = 0;
    for frame in input {
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定数量 {}, 退出任务循环", frame_index);
        break;
      }
      frame_index += 1;
      info!("处理第 {} 张图像", frame_index);
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
    }

    if frame_index == 0 {
      return Err(anyhow::anyhow!("没有输入帧"));
    }
    info!(
      results_list_len = frame_index,
      "任务完成，总耗时: {:.2?}",
      started.elapsed()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{cell::RefCell, convert::Infallible};

  #[derive(Debug, thiserror::Error)]
  #[error("模型失败")]
  struct Failing;

  struct Double;

  impl Model for Double {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&self, input: &u32) -> Result<u32, Infallible> {
      Ok(input * 2)
    }
  }

  struct FailOn(u32);

  impl Model for FailOn {
    type Input = u32;
    type Output = u32;
    type Error = Failing;

    fn infer(&self, input: &u32) -> Result<u32, Failing> {
      if *input == self.0 { Err(Failing) } else { Ok(*input) }
    }
  }

  #[derive(Default)]
  struct Collect(RefCell<Vec<(u32, u32)>>);

  impl Render<u32, u32> for &Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), Infallible> {
      self.0.borrow_mut().push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_uses_first_frame() {
    let collect = Collect::default();
    OneShotTask
      .run_task(vec![3, 4].into_iter(), Double, &collect)
      .unwrap();
    assert_eq!(*collect.0.borrow(), vec![(3, 6)]);
  }

  #[test]
  fn one_shot_without_input_fails() {
    let collect = Collect::default();
    assert!(
      OneShotTask
        .run_task(Vec::<u32>::new().into_iter(), Double, &collect)
        .is_err()
    );
  }

  #[test]
  fn batch_processes_all_or_limit() {
    let collect = Collect::default();
    BatchTask::default()
      .run_task(vec![1, 2, 3].into_iter(), Double, &collect)
      .unwrap();
    assert_eq!(collect.0.borrow().len(), 3);

    let collect = Collect::default();
    BatchTask::default()
      .with_frame_number(Some(2))
      .run_task(vec![1, 2, 3].into_iter(), Double, &collect)
      .unwrap();
    assert_eq!(*collect.0.borrow(), vec![(1, 2), (2, 4)]);
  }

  #[test]
  fn batch_stops_on_model_error() {
    let collect = Collect::default();
    let err = BatchTask::default()
      .run_task(vec![1, 2, 3].into_iter(), FailOn(2), &collect)
      .unwrap_err();
    assert_eq!(err.to_string(), "模型失败");
    assert_eq!(collect.0.borrow().len(), 1);
  }

  #[test]
  fn repeat_renders_every_round() {
    let collect = Collect::default();
    RepeatShotTask::default()
      .with_times(3)
      .run_task(vec![5].into_iter(), Double, &collect)
      .unwrap();
    assert_eq!(*collect.0.borrow(), vec![(5, 10); 3]);
  }

  #[test]
  fn average_skips_warmup_and_handles_short_runs() {
    let ms = Duration::from_millis;
    assert_eq!(average_after_warmup(&[]), None);
    assert_eq!(average_after_warmup(&[ms(10)]), Some(ms(10)));
    assert_eq!(
      average_after_warmup(&[ms(100), ms(50), ms(10), ms(20)]),
      Some(ms(15))
    );
  }
}
