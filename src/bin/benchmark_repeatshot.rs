// 该文件是 Shitu （识图） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理基准测试
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use shitu::{
  Classifier, FromUrl,
  frame::{MODEL_INPUT_H, MODEL_INPUT_W},
  input::ImageFileInput,
  label::LabelTable,
  model::{OnnxClassifier, OnnxClassifierBuilder},
  output::LogOutput,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// Shitu 基准测试参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 标签文件
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,
  /// 输入图片，image:///path/to/photo.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 重复次数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);

  let model: OnnxClassifier<MODEL_INPUT_W, MODEL_INPUT_H> =
    OnnxClassifierBuilder::from_url(&args.model)?.build()?;
  let classifier = Classifier::new(model, LabelTable::from_path(&args.labels)?)?;
  let input = ImageFileInput::from_url(&args.input)?;

  let summary = RepeatShotTask::default()
    .with_repeat_times(args.repeat)
    .run_task(input, &classifier, LogOutput)?;
  info!("共 {} 次, 平均耗时 {:.2?}", summary.runs, summary.average);

  Ok(())
}
