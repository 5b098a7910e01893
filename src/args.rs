// 该文件是 Shitu （识图） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Parser, ValueEnum};
use url::Url;

use shitu::{input::Normalization, postprocess::Activation};

/// Shitu 图像分类
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 onnx:///path/to/mobilenet.onnx?threads=4
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 标签文件，每行一个类别
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,

  /// 输入来源:
  /// - 单张图片: image:///path/to/photo.jpg
  /// - 目录: folder:///path/to/photos
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出方式: log:, console:, jsonl:///path/to/records.jsonl
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,

  /// 保留的结果数量
  #[arg(long, default_value = "5", value_name = "K")]
  pub top_k: usize,

  /// 像素归一化方式
  #[arg(long, value_enum, default_value_t = NormalizationPreset::Unit)]
  pub normalization: NormalizationPreset,

  /// 排序前对模型输出施加的变换
  #[arg(long, value_enum, default_value_t = ActivationArg::None)]
  pub activation: ActivationArg,

  /// 任务类型
  #[arg(long, value_enum, default_value_t = TaskKind::Continuous)]
  pub task: TaskKind,

  /// 最大处理图像数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalizationPreset {
  /// value / 255
  Unit,
  /// [-1, 1]
  Signed,
  /// ImageNet 均值与标准差
  Imagenet,
}

impl From<NormalizationPreset> for Normalization {
  fn from(preset: NormalizationPreset) -> Self {
    match preset {
      NormalizationPreset::Unit => Normalization::UNIT,
      NormalizationPreset::Signed => Normalization::SIGNED,
      NormalizationPreset::Imagenet => Normalization::IMAGENET,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationArg {
  None,
  Softmax,
}

impl From<ActivationArg> for Activation {
  fn from(arg: ActivationArg) -> Self {
    match arg {
      ActivationArg::None => Activation::None,
      ActivationArg::Softmax => Activation::Softmax,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
  /// 只处理第一张图像
  Oneshot,
  /// 处理全部输入
  Continuous,
}
