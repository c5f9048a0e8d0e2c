// 该文件是 Shibie （识别） 项目的一部分。
// src/lib.rs - 库主文件
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

#[cfg(not(any(feature = "backend_tract", feature = "backend_rknpu")))]
compile_error!("至少需要启用一个推理后端特性: backend_tract 或 backend_rknpu");

pub mod frame;
pub mod input;
pub mod labels;
pub mod model;
pub mod output;
pub mod recognizer;

pub use self::labels::{Labels, LabelsError};
pub use self::model::{Activation, Model, ModelWrapper, Recognition};
pub use self::frame::{Normalization, Orientation};
pub use self::recognizer::{
  Aggregation, FrameRecognition, ImageProcessor, ImageRecognizer, RecognizerError,
  VideoRecognizer,
};

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 从 URL 中取出本地文件路径（处理百分号编码）
pub(crate) fn url_file_path(url: &url::Url) -> String {
  let raw = url.path();
  match urlencoding::decode(raw) {
    Ok(path) => path.into_owned(),
    Err(_) => raw.to_string(),
  }
}
