// 该文件是 Shitu （识图） 项目的一部分。
// src/output/json_record.rs - JSON Lines 结果记录
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
  fs::{File, OpenOptions},
  io::Write,
  path::PathBuf,
  sync::Mutex,
};

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::RawImage,
  output::Render,
  postprocess::RankedResult,
};

#[derive(Error, Debug)]
pub enum JsonRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("记录文件锁已中毒")]
  Poisoned,
}

/// 每个分类结果追加一行 JSON
pub struct JsonRecordOutput {
  path: PathBuf,
  file: Mutex<File>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonRecordOutputError::SchemeMismatch);
    }
    Self::open(decoded_path(url))
  }
}

impl JsonRecordOutput {
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, JsonRecordOutputError> {
    let path = path.into();
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() && !parent.exists() {
        std::fs::create_dir_all(parent)?;
      }
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("分类结果将记录到 {}", path.display());
    Ok(Self {
      path,
      file: Mutex::new(file),
    })
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }
}

pub fn record(frame: &RawImage, result: &RankedResult) -> Value {
  let predictions: Vec<Value> = result
    .iter()
    .map(|item| {
      json!({
        "class_id": item.class_id,
        "label": item.label,
        "score": item.score,
        "confidence": item.confidence,
      })
    })
    .collect();

  json!({
    "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    "source": frame.source,
    "predictions": predictions,
  })
}

impl Render<RawImage, RankedResult> for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn render_result(&self, frame: &RawImage, result: &RankedResult) -> Result<(), Self::Error> {
    let mut line = serde_json::to_string(&record(frame, result))?;
    line.push('\n');
    let mut file = self
      .file
      .lock()
      .map_err(|_| JsonRecordOutputError::Poisoned)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
  }
}
