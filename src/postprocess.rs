// 该文件是 Shitu （识图） 项目的一部分。
// src/postprocess.rs - 分数排序与置信度格式化
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

use std::cmp::Ordering;

use thiserror::Error;
use tracing::debug;

use crate::{frame::ScoreTensor, label::LabelTable};

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostprocessError {
  #[error("标签数量不匹配: 模型输出 {scores} 个分数, 标签表有 {labels} 个标签")]
  LabelCountMismatch { scores: usize, labels: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub class_id: usize,
  pub label: String,
  pub score: f32,
  /// 百分比，固定两位小数，例如 "90.00"
  pub confidence: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedResult {
  pub items: Box<[Prediction]>,
}

impl RankedResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn best(&self) -> Option<&Prediction> {
    self.items.first()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
    self.items.iter()
  }
}

/// 排序前对分数施加的变换
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Activation {
  /// 直接使用模型输出
  #[default]
  None,
  /// 对 logits 做 softmax
  Softmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Postprocessor {
  pub top_k: usize,
  pub activation: Activation,
}

impl Default for Postprocessor {
  fn default() -> Self {
    Self {
      top_k: DEFAULT_TOP_K,
      activation: Activation::None,
    }
  }
}

impl Postprocessor {
  pub fn with_top_k(mut self, top_k: usize) -> Self {
    self.top_k = top_k;
    self
  }

  pub fn with_activation(mut self, activation: Activation) -> Self {
    self.activation = activation;
    self
  }

  pub fn run(
    &self,
    output: &ScoreTensor,
    labels: &LabelTable,
  ) -> Result<RankedResult, PostprocessError> {
    match self.activation {
      Activation::None => postprocess(output, labels, self.top_k),
      Activation::Softmax => {
        let activated = ScoreTensor::from(softmax(output.as_slice()));
        postprocess(&activated, labels, self.top_k)
      }
    }
  }
}

/// 将分数与标签按下标配对，按分数降序（稳定）排序后取前 `top_k` 个
pub fn postprocess(
  output: &ScoreTensor,
  labels: &LabelTable,
  top_k: usize,
) -> Result<RankedResult, PostprocessError> {
  if output.len() != labels.len() {
    return Err(PostprocessError::LabelCountMismatch {
      scores: output.len(),
      labels: labels.len(),
    });
  }

  let scores = output.as_slice();
  let mut order: Vec<usize> = (0..scores.len()).collect();
  // sort_by 是稳定排序，分数相同时保持原下标顺序
  order.sort_by(|&a, &b| descending(scores[a], scores[b]));

  let items: Vec<Prediction> = order
    .into_iter()
    .take(top_k)
    .filter_map(|class_id| {
      let label = labels.get(class_id)?;
      Some(Prediction {
        class_id,
        label: label.to_string(),
        score: scores[class_id],
        confidence: format_confidence(scores[class_id]),
      })
    })
    .collect();
  debug!("后处理完成, 保留 {} 个结果", items.len());

  Ok(RankedResult {
    items: items.into_boxed_slice(),
  })
}

fn descending(a: f32, b: f32) -> Ordering {
  // -0.0 与 0.0 视为相等
  let a = if a == 0.0 { 0.0 } else { a };
  let b = if b == 0.0 { 0.0 } else { b };
  b.total_cmp(&a)
}

/// 分数转为百分比字符串，两位小数，四舍五入（.5 远离零）
pub fn format_confidence(score: f32) -> String {
  let hundredths = (score as f64 * 10_000.0).round();
  let value = hundredths / 100.0;
  // 避免输出 "-0.00"
  if value == 0.0 {
    return "0.00".to_string();
  }
  format!("{:.2}", value)
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  if !max.is_finite() {
    return logits.to_vec();
  }
  let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels(n: usize) -> LabelTable {
    (0..n).map(|i| format!("class-{i}")).collect::<Vec<_>>().into()
  }

  #[test]
  fn pairs_scores_with_labels() {
    let labels = LabelTable::from(["cat", "dog", "bird"]);
    let output = ScoreTensor::from(vec![0.1, 0.9, 0.3]);
    let result = postprocess(&output, &labels, 2).unwrap();

    let summary: Vec<(&str, &str)> = result
      .iter()
      .map(|p| (p.label.as_str(), p.confidence.as_str()))
      .collect();
    assert_eq!(summary, vec![("dog", "90.00"), ("bird", "30.00")]);
    assert_eq!(result.best().map(|p| p.class_id), Some(1));
  }

  #[test]
  fn ties_keep_index_order() {
    let output = ScoreTensor::from(vec![0.2, 0.5, 0.2, 0.5, 0.0, -0.0, 0.2]);
    let result = postprocess(&output, &labels(7), 7).unwrap();
    let ids: Vec<usize> = result.iter().map(|p| p.class_id).collect();
    assert_eq!(ids, vec![1, 3, 0, 2, 6, 4, 5]);
  }

  #[test]
  fn ranking_is_non_increasing() {
    let scores: Vec<f32> = (0..1001).map(|i| ((i * 7919) % 1013) as f32 / 1013.0).collect();
    let output = ScoreTensor::from(scores);
    let result = postprocess(&output, &labels(1001), 1001).unwrap();
    assert_eq!(result.len(), 1001);
    for pair in result.items.windows(2) {
      assert!(pair[0].score >= pair[1].score);
      if pair[0].score == pair[1].score {
        assert!(pair[0].class_id < pair[1].class_id);
      }
    }
  }

  #[test]
  fn top_k_larger_than_table_returns_everything() {
    let output = ScoreTensor::from(vec![0.3, 0.1, 0.6]);
    let result = postprocess(&output, &labels(3), 10).unwrap();
    let ids: Vec<usize> = result.iter().map(|p| p.class_id).collect();
    assert_eq!(ids, vec![2, 0, 1]);
  }

  #[test]
  fn top_k_zero_is_empty() {
    let output = ScoreTensor::from(vec![0.3, 0.1, 0.6]);
    let result = postprocess(&output, &labels(3), 0).unwrap();
    assert!(result.is_empty());
  }

  #[test]
  fn default_keeps_five() {
    let output = ScoreTensor::from(vec![0.1; 10]);
    let result = Postprocessor::default().run(&output, &labels(10)).unwrap();
    assert_eq!(result.len(), DEFAULT_TOP_K);
  }

  #[test]
  fn label_count_mismatch_is_reported() {
    let output = ScoreTensor::from(vec![0.0; 1001]);
    let err = postprocess(&output, &labels(999), 5).unwrap_err();
    assert_eq!(
      err,
      PostprocessError::LabelCountMismatch {
        scores: 1001,
        labels: 999
      }
    );
  }

  #[test]
  fn numeric_not_lexicographic_order() {
    // "9.00" > "10.00" as strings
    let output = ScoreTensor::from(vec![0.09, 0.1]);
    let result = postprocess(&output, &labels(2), 2).unwrap();
    assert_eq!(result.items[0].confidence, "10.00");
    assert_eq!(result.items[1].confidence, "9.00");
  }

  #[test]
  fn confidence_has_two_decimals_rounded_half_up() {
    assert_eq!(format_confidence(1.0), "100.00");
    assert_eq!(format_confidence(0.0), "0.00");
    assert_eq!(format_confidence(-0.0), "0.00");
    assert_eq!(format_confidence(0.125), "12.50");
    assert_eq!(format_confidence(0.9876543), "98.77");
    assert_eq!(format_confidence(0.1234321), "12.34");
    assert_eq!(format_confidence(0.00004), "0.00");
    assert_eq!(format_confidence(0.00006), "0.01");
    assert_eq!(format_confidence(3.5), "350.00");
  }

  #[test]
  fn softmax_ranks_logits() {
    let labels = LabelTable::from(["a", "b", "c"]);
    let output = ScoreTensor::from(vec![1.0, 3.0, 2.0]);
    let result = Postprocessor::default()
      .with_activation(Activation::Softmax)
      .run(&output, &labels)
      .unwrap();
    let ids: Vec<usize> = result.iter().map(|p| p.class_id).collect();
    assert_eq!(ids, vec![1, 2, 0]);
    let total: f32 = result.iter().map(|p| p.score).sum();
    assert!((total - 1.0).abs() < 1e-5);
    assert_eq!(result.items[0].confidence, "66.52");
  }
}
