// 该文件是 Shitu （识图） 项目的一部分。
// src/task.rs - 分类任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{frame::RawImage, output::Render, pipeline::Classify, postprocess::RankedResult};

pub trait Task<I, C, O>: Sized {
  type Error;
  type Summary;
  fn run_task(self, input: I, classifier: C, output: O) -> Result<Self::Summary, Self::Error>;
}

/// 只处理第一张图像，任何错误直接返回
pub struct OneShotTask;

impl<I, C, O, RE> Task<I, C, O> for OneShotTask
where
  I: Iterator<Item = RawImage>,
  C: Classify,
  O: Render<RawImage, RankedResult, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;
  type Summary = RankedResult;

  fn run_task(self, mut input: I, classifier: C, output: O) -> Result<Self::Summary, Self::Error> {
    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像 {} 获取成功，开始分类...", image.source);
    let now = Instant::now();
    let result = classifier.classify(&image)?;
    let elapsed = now.elapsed();
    info!("分类完成，耗时: {:.2?}", elapsed);
    output.render_result(&image, &result)?;

    Ok(result)
  }
}

/// 对同一张图像重复分类，统计平均耗时
pub struct RepeatShotTask {
  repeat_times: usize,
  warmup: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat_times: 1000,
      warmup: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times.max(1);
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }
}

#[derive(Debug, Clone, Copy)]
pub struct RepeatShotSummary {
  pub runs: usize,
  pub average: Duration,
}

impl<I, C, O, RE> Task<I, C, O> for RepeatShotTask
where
  I: Iterator<Item = RawImage>,
  C: Classify,
  O: Render<RawImage, RankedResult, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;
  type Summary = RepeatShotSummary;

  fn run_task(self, mut input: I, classifier: C, output: O) -> Result<Self::Summary, Self::Error> {
    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始分类...");
    let mut times = Vec::with_capacity(self.repeat_times);
    let mut last = None;
    for i in 0..self.repeat_times {
      let now = Instant::now();
      let result = classifier.classify(&image)?;
      let elapsed = now.elapsed();
      info!("({})分类完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      last = Some(result);
    }
    if let Some(result) = &last {
      output.render_result(&image, result)?;
    }

    // 预热次数不少于总次数时退化为全部参与平均
    let skip = if self.warmup < times.len() { self.warmup } else { 0 };
    let measured = &times[skip..];
    let average = measured.iter().sum::<Duration>() / measured.len() as u32;
    warn!("平均分类时间: {:.2?}", average);

    Ok(RepeatShotSummary {
      runs: times.len(),
      average,
    })
  }
}

/// 处理所有输入直到耗尽、达到数量上限或收到中断信号；单张失败只记录不退出
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  handle_interrupt: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousSummary {
  pub processed: usize,
  pub failed: usize,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_interrupt_handler(mut self, handle_interrupt: bool) -> Self {
    self.handle_interrupt = handle_interrupt;
    self
  }

  fn install_interrupt(&self) -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    if self.handle_interrupt {
      let flag = stop.clone();
      let installed = ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        flag.store(true, Ordering::SeqCst);
      });
      if let Err(e) = installed {
        warn!("无法设置 Ctrl-C 处理器: {}", e);
      }
    }
    stop
  }
}

impl<I, C, O, RE> Task<I, C, O> for ContinuousTask
where
  I: Iterator<Item = RawImage>,
  C: Classify,
  O: Render<RawImage, RankedResult, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;
  type Summary = ContinuousSummary;

  fn run_task(self, input: I, classifier: C, output: O) -> Result<Self::Summary, Self::Error> {
    info!("开始任务...");
    let stop = self.install_interrupt();
    let mut summary = ContinuousSummary::default();

    for image in input {
      let index = summary.processed + summary.failed + 1;
      info!("处理第 {} 张图像: {}", index, image.source);
      let now = Instant::now();
      match classifier.classify(&image) {
        Ok(result) => {
          let elapsed_a = now.elapsed();
          output.render_result(&image, &result)?;
          let elapsed_b = now.elapsed();
          info!("分类完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
          summary.processed += 1;
        }
        Err(e) if e.is_recoverable() => {
          warn!("跳过 {}（{}）: {}", image.source, e.stage(), e);
          summary.failed += 1;
        }
        Err(e) => return Err(e.into()),
      }
      if self.frame_number.map(|n| index >= n).unwrap_or(false) {
        info!("达到指定数量 {}, 退出任务循环", index);
        break;
      }
      if stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!(
      "任务完成: 成功 {} 张, 失败 {} 张",
      summary.processed, summary.failed
    );
    Ok(summary)
  }
}
