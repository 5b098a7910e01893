// 该文件是 Shitu （识图） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shitu::{
  Classifier, FromUrl,
  frame::{MODEL_INPUT_H, MODEL_INPUT_W},
  input::{InputWrapper, Preprocessor},
  label::LabelTable,
  model::{OnnxClassifier, OnnxClassifierBuilder},
  output::OutputWrapper,
  postprocess::Postprocessor,
  task::{ContinuousTask, OneShotTask, Task},
};

use args::{Args, TaskKind};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("标签文件: {}", args.labels.display());
  info!("输入来源: {}", args.input);
  info!("输出方式: {}", args.output);

  // 模型与标签加载失败时直接退出，不接受任何请求
  let model: OnnxClassifier<MODEL_INPUT_W, MODEL_INPUT_H> =
    OnnxClassifierBuilder::from_url(&args.model)?.build()?;
  let labels = LabelTable::from_path(&args.labels)?;
  let classifier = Classifier::new(model, labels)?
    .with_preprocessor(Preprocessor::default().with_normalization(args.normalization.into()))
    .with_postprocessor(
      Postprocessor::default()
        .with_top_k(args.top_k)
        .with_activation(args.activation.into()),
    );

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  match args.task {
    TaskKind::Oneshot => {
      OneShotTask.run_task(input, &classifier, output)?;
    }
    TaskKind::Continuous => {
      let frame_number = (args.max_frames > 0).then_some(args.max_frames);
      let summary = ContinuousTask::default()
        .with_frame_number(frame_number)
        .with_interrupt_handler(true)
        .run_task(input, &classifier, output)?;
      info!("成功 {} 张, 失败 {} 张", summary.processed, summary.failed);
    }
  }

  Ok(())
}
