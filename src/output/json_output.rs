// 该文件是 Shibie （识别） 项目的一部分。
// src/output/json_output.rs - JSON 结果输出
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
  fs::File,
  io::{BufWriter, Write},
  path::PathBuf,
};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{FromUrl, FromUrlWithScheme, output::Render, url_file_path};

#[derive(Error, Debug)]
pub enum JsonOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("输出路径为空")]
  EmptyPath,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
  File(PathBuf),
  Stdout,
}

/// 以 JSON 文档输出识别结果
///
/// - `json:///path/to/result.json` 写入文件（已存在则覆盖）
/// - `stdout://` 写到标准输出
#[derive(Debug, Clone)]
pub struct JsonOutput {
  target: Target,
  pretty: bool,
}

#[derive(Serialize)]
struct Report<'a, T: ?Sized> {
  source: &'a str,
  recognized_at: String,
  results: &'a T,
}

impl JsonOutput {
  pub const STDOUT_SCHEME: &'static str = "stdout";

  pub fn stdout() -> Self {
    JsonOutput {
      target: Target::Stdout,
      pretty: true,
    }
  }

  pub fn file<P: Into<PathBuf>>(path: P) -> Self {
    JsonOutput {
      target: Target::File(path.into()),
      pretty: true,
    }
  }

  fn write<T: Serialize + ?Sized>(&self, writer: impl Write, report: &T) -> serde_json::Result<()> {
    if self.pretty {
      serde_json::to_writer_pretty(writer, report)
    } else {
      serde_json::to_writer(writer, report)
    }
  }
}

impl FromUrlWithScheme for JsonOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonOutput {
  type Error = JsonOutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    let pretty = !url.query_pairs().any(|(k, v)| k == "pretty" && v == "false");
    let target = match url.scheme() {
      Self::SCHEME => {
        let path = url_file_path(url);
        if path.is_empty() || path == "/" {
          return Err(JsonOutputError::EmptyPath);
        }
        Target::File(PathBuf::from(path))
      }
      Self::STDOUT_SCHEME => Target::Stdout,
      _ => return Err(JsonOutputError::SchemeMismatch),
    };
    Ok(JsonOutput { target, pretty })
  }
}

impl<T: Serialize + ?Sized> Render<T> for JsonOutput {
  type Error = JsonOutputError;

  fn render_result(&self, source: &str, result: &T) -> Result<(), Self::Error> {
    let report = Report {
      source,
      recognized_at: Utc::now().to_rfc3339(),
      results: result,
    };

    match &self.target {
      Target::File(path) => {
        if let Some(parent) = path.parent()
          && !parent.as_os_str().is_empty()
        {
          std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer, &report)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!("识别结果已写入: {}", path.display());
      }
      Target::Stdout => {
        let mut stdout = std::io::stdout().lock();
        self.write(&mut stdout, &report)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
      }
    }
    Ok(())
  }
}
