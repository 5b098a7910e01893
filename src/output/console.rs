// 该文件是 Shitu （识图） 项目的一部分。
// src/output/console.rs - 日志与终端输出
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

use std::{convert::Infallible, io::Write};

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawImage,
  output::{OutputError, Render},
  postprocess::RankedResult,
};

/// 通过 tracing 输出分类结果
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogOutput)
  }
}

impl Render<RawImage, RankedResult> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &RawImage, result: &RankedResult) -> Result<(), Self::Error> {
    if result.is_empty() {
      info!("{}: 没有分类结果", frame.source);
      return Ok(());
    }
    info!("{}: 分类结果 {} 项", frame.source, result.len());
    for (rank, item) in result.iter().enumerate() {
      info!(
        "  {}. {} ({}): {}%",
        rank + 1,
        item.label,
        item.class_id,
        item.confidence
      );
    }
    Ok(())
  }
}

/// 以纯文本表格写到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(ConsoleOutput)
  }
}

impl ConsoleOutput {
  pub fn write_result<Wr: Write>(
    &self,
    writer: &mut Wr,
    frame: &RawImage,
    result: &RankedResult,
  ) -> std::io::Result<()> {
    writeln!(writer, "{}", frame.source)?;
    for (rank, item) in result.iter().enumerate() {
      writeln!(writer, "  {}. {:>6}%  {}", rank + 1, item.confidence, item.label)?;
    }
    Ok(())
  }
}

impl Render<RawImage, RankedResult> for ConsoleOutput {
  type Error = std::io::Error;

  fn render_result(&self, frame: &RawImage, result: &RankedResult) -> Result<(), Self::Error> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    self.write_result(&mut lock, frame, result)?;
    lock.flush()
  }
}
