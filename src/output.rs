// 该文件是 Shibie （识别） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::Recognition,
  recognizer::FrameRecognition,
};

pub trait Render<Output: ?Sized> {
  type Error;
  fn render_result(&self, source: &str, result: &Output) -> Result<(), Self::Error>;
}

mod console_output;
mod json_output;

pub use self::console_output::ConsoleOutput;
pub use self::json_output::{JsonOutput, JsonOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON 输出错误: {0}")]
  JsonOutputError(#[from] JsonOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URI 解析错误: {0}")]
  UrlError(#[from] url::ParseError),
}

pub enum OutputWrapper {
  Console(ConsoleOutput),
  Json(JsonOutput),
}

impl OutputWrapper {
  /// 解析命令行给出的输出地址
  pub fn parse(value: &str) -> Result<Self, OutputError> {
    Self::from_url(&Url::parse(value)?)
  }
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(OutputWrapper::Console(ConsoleOutput)),
      JsonOutput::SCHEME | JsonOutput::STDOUT_SCHEME => {
        let output = JsonOutput::from_url(url)?;
        Ok(OutputWrapper::Json(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render<[Recognition]> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, source: &str, result: &[Recognition]) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => {
        let Ok(()) = output.render_result(source, result);
        Ok(())
      }
      OutputWrapper::Json(output) => output
        .render_result(source, result)
        .map_err(OutputError::from),
    }
  }
}

impl Render<[FrameRecognition]> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, source: &str, result: &[FrameRecognition]) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => {
        let Ok(()) = output.render_result(source, result);
        Ok(())
      }
      OutputWrapper::Json(output) => output
        .render_result(source, result)
        .map_err(OutputError::from),
    }
  }
}
