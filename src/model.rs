// 该文件是 Shitu （识图） 项目的一部分。
// src/model.rs - 推理引擎
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

use thiserror::Error;
use tracing::error;

use crate::frame::ScoreTensor;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 推理引擎：一个定形输入映射到一个定形输出，对相同输入必须给出相同输出
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 模型声明的输出类别数，未知时为 `None`
  fn output_len(&self) -> Option<usize> {
    None
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {path}: {source}")]
  ModelLoad {
    path: PathBuf,
    #[source]
    source: BoxError,
  },
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("输入张量形状不匹配: 模型声明 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch { expected: Vec<i64>, actual: Vec<i64> },
  #[error("推理失败（{stage}）: {message}")]
  Inference {
    stage: &'static str,
    message: String,
    #[source]
    source: Option<BoxError>,
  },
}

impl ModelError {
  pub fn inference(stage: &'static str, message: impl Into<String>) -> Self {
    ModelError::Inference {
      stage,
      message: message.into(),
      source: None,
    }
  }

  pub fn inference_with<E>(stage: &'static str, message: impl Into<String>, source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    ModelError::Inference {
      stage,
      message: message.into(),
      source: Some(Box::new(source)),
    }
  }

  /// 加载期错误，出现后流水线不能接受任何请求
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      ModelError::ModelLoad { .. } | ModelError::ModelInvalid(_) | ModelError::ModelPath(_)
    )
  }
}

/// 检查实际形状是否符合模型声明；声明中的非正维度视为动态维度
pub fn check_input_shape(declared: &[i64], actual: &[usize]) -> Result<(), ModelError> {
  let matches = declared.len() == actual.len()
    && declared
      .iter()
      .zip(actual)
      .all(|(&d, &a)| d <= 0 || d as usize == a);
  if matches {
    Ok(())
  } else {
    Err(ModelError::ShapeMismatch {
      expected: declared.to_vec(),
      actual: actual.iter().map(|&a| a as i64).collect(),
    })
  }
}

/// 将输出形状解释为类别数：可选的批维度（1 或动态）之后，
/// 除类别维度外只允许大小为 1 的维度，如 `[C]`、`[1, C]`、`[1, C, 1, 1]`
pub fn class_count(shape: &[i64]) -> Option<usize> {
  let dims = match shape {
    [] => return None,
    [b, rest @ ..] if !rest.is_empty() && (*b == 1 || *b < 0) => rest,
    _ => shape,
  };
  if dims.iter().any(|&d| d <= 0) {
    return None;
  }
  let mut classes = dims.iter().filter(|&&d| d != 1);
  match (classes.next(), classes.next()) {
    (None, _) => Some(1),
    (Some(&c), None) => Some(c as usize),
    _ => None,
  }
}

/// 模型输出中出现 NaN 或无穷时报告推理错误
pub fn check_finite(scores: &ScoreTensor) -> Result<(), ModelError> {
  match scores.first_non_finite() {
    Some(index) => {
      error!("输出中第 {} 个分数不是有限值", index);
      Err(ModelError::inference(
        "output_validation",
        format!(
          "输出中第 {} 个分数不是有限值: {}",
          index,
          scores.as_slice()[index]
        ),
      ))
    }
    None => Ok(()),
  }
}

/// 校验推理引擎给出的原始输出并转换为分数向量
pub fn scores_from_output(shape: &[i64], data: Vec<f32>) -> Result<ScoreTensor, ModelError> {
  let classes = class_count(shape).ok_or_else(|| {
    ModelError::inference(
      "output_validation",
      format!("期望输出形状为 [C]、[1, C] 或 [1, C, 1, 1], 实际为 {:?}", shape),
    )
  })?;
  if data.len() != classes {
    return Err(ModelError::inference(
      "output_validation",
      format!("输出数据长度 {} 与形状 {:?} 不一致", data.len(), shape),
    ));
  }
  let scores = ScoreTensor::from(data);
  check_finite(&scores)?;
  Ok(scores)
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxClassifier, OnnxClassifierBuilder};
