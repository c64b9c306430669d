// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 任务驱动：输入 → 模型 → 输出
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

/// 预热轮数，不计入平均耗时
pub const WARMUP_RUNS: usize = 2;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

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
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入"))?;
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("后处理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("输出完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一输入重复执行，报告去掉预热后的平均耗时
#[derive(Debug, Clone, Copy)]
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  pub fn new(times: usize) -> Self {
    Self { times }
  }
}

/// 去掉前 [`WARMUP_RUNS`] 次后的平均值；样本不足时返回 `None`
pub fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = times.get(WARMUP_RUNS..)?;
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
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
    if self.times == 0 {
      anyhow::bail!("重复次数必须大于 0");
    }

    info!("开始任务，重复 {} 次...", self.times);
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入"))?;
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})后处理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    match average_after_warmup(&times) {
      Some(average) => warn!("平均后处理时间: {:.2?}", average),
      None => warn!("重复次数不超过 {}，不统计平均时间", WARMUP_RUNS),
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  struct Double;

  #[derive(Debug, thiserror::Error)]
  #[error("never")]
  struct Never;

  impl Model for Double {
    type Input = i32;
    type Output = i32;
    type Error = Never;

    fn infer(&self, input: &i32) -> Result<i32, Never> {
      Ok(input * 2)
    }
  }

  struct Count<'a>(&'a Cell<usize>, &'a Cell<i32>);

  impl Render<i32, i32> for Count<'_> {
    type Error = Never;

    fn render_result(&self, _frame: &i32, result: &i32) -> Result<(), Never> {
      self.0.set(self.0.get() + 1);
      self.1.set(*result);
      Ok(())
    }
  }

  #[test]
  fn one_shot_renders_once() {
    let (calls, last) = (Cell::new(0), Cell::new(0));
    OneShotTask
      .run_task(vec![21, 5].into_iter(), Double, Count(&calls, &last))
      .unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(last.get(), 42);
  }

  #[test]
  fn one_shot_without_input_fails() {
    let (calls, last) = (Cell::new(0), Cell::new(0));
    let result = OneShotTask.run_task(std::iter::empty(), Double, Count(&calls, &last));
    assert!(result.is_err());
    assert_eq!(calls.get(), 0);
  }

  #[test]
  fn repeat_shot_renders_every_round() {
    let (calls, last) = (Cell::new(0), Cell::new(0));
    RepeatShotTask::new(5)
      .run_task(std::iter::once(3), Double, Count(&calls, &last))
      .unwrap();
    assert_eq!(calls.get(), 5);
    assert_eq!(last.get(), 6);
  }

  #[test]
  fn average_skips_warmup() {
    let times = [
      Duration::from_millis(100),
      Duration::from_millis(50),
      Duration::from_millis(2),
      Duration::from_millis(4),
    ];
    assert_eq!(average_after_warmup(&times), Some(Duration::from_millis(3)));
    assert_eq!(average_after_warmup(&times[..2]), None);
    assert_eq!(average_after_warmup(&[]), None);
  }
}
