// 该文件是 Shibie （识别） 项目的一部分。
// src/output/console_output.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::Recognition,
  output::{OutputError, Render},
  recognizer::FrameRecognition,
};

/// 通过 `tracing` 记录识别结果
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = OutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(ConsoleOutput)
  }
}

fn log_recognitions(result: &[Recognition]) {
  for item in result {
    info!(
      "  类别: {} ({}), 置信度: {:.4}",
      item.label, item.index, item.confidence
    );
  }
}

impl Render<[Recognition]> for ConsoleOutput {
  type Error = Infallible;

  fn render_result(&self, source: &str, result: &[Recognition]) -> Result<(), Self::Error> {
    info!("{}: 识别到 {} 个结果", source, result.len());
    log_recognitions(result);
    Ok(())
  }
}

impl Render<[FrameRecognition]> for ConsoleOutput {
  type Error = Infallible;

  fn render_result(&self, source: &str, result: &[FrameRecognition]) -> Result<(), Self::Error> {
    info!("{}: 共 {} 帧", source, result.len());
    for frame in result {
      info!(
        "第 {} 帧 ({} ms): {} 个结果",
        frame.index,
        frame.timestamp_ms,
        frame.recognitions.len()
      );
      log_recognitions(&frame.recognitions);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scheme_is_checked() {
    assert!(ConsoleOutput::from_url(&url::Url::parse("console://").unwrap()).is_ok());
    assert!(ConsoleOutput::from_url(&url::Url::parse("json:///tmp/a.json").unwrap()).is_err());
  }
}
