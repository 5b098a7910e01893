// 该文件是 Shitu （识图） 项目的一部分。
// src/label.rs - 类别标签表
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
  path::{Path, PathBuf},
  sync::Arc,
};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("读取标签文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("标签文件为空: {0}")]
  Empty(String),
}

/// 与模型输出逐下标对齐的标签表，加载后只读，克隆只增加引用计数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Arc<[String]>,
}

impl LabelTable {
  /// 读取每行一个标签的 UTF-8 文本文件
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let table = Self::parse(&content).ok_or_else(|| LabelError::Empty(path.display().to_string()))?;
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  /// 按行切分；中间的空行保留以维持下标对齐，末尾换行不产生空标签
  pub fn parse(content: &str) -> Option<Self> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let labels: Vec<String> = content
      .lines()
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect();
    if labels.is_empty() {
      return None;
    }
    Some(labels.into())
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

impl From<Vec<String>> for LabelTable {
  fn from(labels: Vec<String>) -> Self {
    Self {
      labels: labels.into(),
    }
  }
}

impl<const N: usize> From<[&str; N]> for LabelTable {
  fn from(labels: [&str; N]) -> Self {
    labels
      .iter()
      .map(|s| s.to_string())
      .collect::<Vec<_>>()
      .into()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use tempfile::NamedTempFile;

  #[test]
  fn reads_one_label_per_line() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "background").unwrap();
    writeln!(file, "tench").unwrap();
    writeln!(file, "goldfish").unwrap();

    let table = LabelTable::from_path(file.path()).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(0), Some("background"));
    assert_eq!(table.get(2), Some("goldfish"));
    assert_eq!(table.get(3), None);
  }

  #[test]
  fn handles_crlf_and_missing_trailing_newline() {
    let table = LabelTable::parse("cat\r\ndog\r\nbird").unwrap();
    assert_eq!(table.iter().collect::<Vec<_>>(), vec!["cat", "dog", "bird"]);
  }

  #[test]
  fn keeps_blank_lines_for_alignment() {
    let table = LabelTable::parse("cat\n\nbird\n").unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(1), Some(""));
  }

  #[test]
  fn strips_byte_order_mark() {
    let table = LabelTable::parse("\u{feff}cat\ndog\n").unwrap();
    assert_eq!(table.get(0), Some("cat"));
  }

  #[test]
  fn empty_file_is_rejected() {
    let file = NamedTempFile::new().unwrap();
    let err = LabelTable::from_path(file.path()).unwrap_err();
    assert!(matches!(err, LabelError::Empty(_)));
  }

  #[test]
  fn missing_file_is_io_error() {
    let err = LabelTable::from_path("/nonexistent/shitu/labels.txt").unwrap_err();
    assert!(matches!(err, LabelError::Io { .. }));
  }

  #[test]
  fn clones_share_storage() {
    let table = LabelTable::from(["cat", "dog"]);
    let clone = table.clone();
    assert!(Arc::ptr_eq(&table.labels, &clone.labels));
  }
}
