// 该文件是 Shibie （识别） 项目的一部分。
// src/model.rs - 模型
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

use std::{collections::HashMap, path::Path};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl,
  frame::{Normalization, RgbNhwcFrame, TensorLayout},
  labels::Labels,
};

pub trait Model {
  type Error;

  /// 输入帧已缩放到目标尺寸，返回每个类别的得分
  fn infer(&self, frame: &RgbNhwcFrame, normalization: Normalization)
  -> Result<Vec<f32>, Self::Error>;

  /// 模型声明的输入尺寸 (宽, 高)
  fn input_size(&self) -> Option<(u32, u32)> {
    None
  }

  /// 清除推理过程中缓存的状态
  fn reset(&self) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Error = M::Error;

  fn infer(
    &self,
    frame: &RgbNhwcFrame,
    normalization: Normalization,
  ) -> Result<Vec<f32>, Self::Error> {
    (**self).infer(frame, normalization)
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    (**self).input_size()
  }

  fn reset(&self) -> Result<(), Self::Error> {
    (**self).reset()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
  pub index: usize,
  pub label: String,
  pub confidence: f32,
}

/// 模型输出的激活函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
  #[default]
  None,
  Softmax,
  Sigmoid,
}

impl Activation {
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "none" | "identity" => Some(Activation::None),
      "softmax" => Some(Activation::Softmax),
      "sigmoid" => Some(Activation::Sigmoid),
      _ => None,
    }
  }

  pub fn apply(&self, values: &mut [f32]) {
    match self {
      Activation::None => {}
      Activation::Sigmoid => values.iter_mut().for_each(|v| *v = sigmoid(*v)),
      Activation::Softmax => {
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
          return;
        }
        let mut sum = 0.0f32;
        for v in values.iter_mut() {
          *v = (*v - max).exp();
          sum += *v;
        }
        if sum > 0.0 {
          values.iter_mut().for_each(|v| *v /= sum);
        }
      }
    }
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 按阈值过滤、按置信度降序排序并截断到 `max_results`
pub fn top_k(
  scores: &[f32],
  labels: &Labels,
  max_results: usize,
  threshold: f32,
) -> Vec<Recognition> {
  if max_results == 0 {
    return Vec::new();
  }

  if scores.len() > labels.len() {
    warn!(
      "模型输出类别数 {} 多于标签数 {}，多余的类别将被忽略",
      scores.len(),
      labels.len()
    );
  }

  let mut candidates: Vec<(usize, f32)> = scores
    .iter()
    .copied()
    .take(labels.len())
    .enumerate()
    .filter(|(_, score)| *score >= threshold)
    .collect();

  candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
  candidates.truncate(max_results);

  candidates
    .into_iter()
    .map(|(index, confidence)| Recognition {
      index,
      label: labels.get(index).unwrap_or_default().to_string(),
      confidence,
    })
    .collect()
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[cfg(feature = "backend_tract")]
  #[error("Tract 错误: {0}")]
  TractError(#[from] tract_onnx::prelude::TractError),
  #[cfg(feature = "backend_rknpu")]
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数错误: {0}")]
  InvalidOption(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型状态锁已损坏")]
  Poisoned,
}

/// 通过 URL 查询参数传入的模型选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOptions {
  pub layout: Option<TensorLayout>,
  pub input_size: Option<(u32, u32)>,
  pub activation: Activation,
  pub input_name: Option<String>,
  pub output_name: Option<String>,
}

impl ModelOptions {
  pub fn from_query(url: &Url) -> Result<Self, ModelError> {
    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let parse_dim = |key: &str| -> Result<Option<u32>, ModelError> {
      match query.get(key) {
        None => Ok(None),
        Some(v) => match v.parse::<u32>() {
          Ok(0) | Err(_) => Err(ModelError::InvalidOption(format!("{}={}", key, v))),
          Ok(n) => Ok(Some(n)),
        },
      }
    };

    let input_size = match (parse_dim("size")?, parse_dim("width")?, parse_dim("height")?) {
      (_, Some(w), Some(h)) => Some((w, h)),
      (Some(s), None, None) => Some((s, s)),
      (None, None, None) => None,
      _ => {
        return Err(ModelError::InvalidOption(
          "width 与 height 必须同时给出".to_string(),
        ));
      }
    };

    let layout = match query.get("layout") {
      Some(v) => Some(
        TensorLayout::parse(v).ok_or_else(|| ModelError::InvalidOption(format!("layout={}", v)))?,
      ),
      None => None,
    };

    let activation = match query.get("activation") {
      Some(v) => {
        Activation::parse(v).ok_or_else(|| ModelError::InvalidOption(format!("activation={}", v)))?
      }
      None => Activation::default(),
    };

    Ok(ModelOptions {
      layout,
      input_size,
      activation,
      input_name: query.get("input").cloned(),
      output_name: query.get("output").cloned(),
    })
  }
}

#[cfg(feature = "backend_tract")]
mod tract;
#[cfg(feature = "backend_tract")]
pub use self::tract::{TractFormat, TractModel};

#[cfg(feature = "backend_rknpu")]
mod rknn;
#[cfg(feature = "backend_rknpu")]
pub use self::rknn::RknnModel;

pub enum ModelWrapper {
  #[cfg(feature = "backend_tract")]
  Tract(TractModel),
  #[cfg(feature = "backend_rknpu")]
  Rknn(RknnModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "backend_tract")]
    {
      if TractFormat::from_scheme(url.scheme()).is_some() {
        return Ok(ModelWrapper::Tract(TractModel::from_url(url)?));
      }
    }
    #[cfg(feature = "backend_rknpu")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnModel::SCHEME {
        return Ok(ModelWrapper::Rknn(RknnModel::from_url(url)?));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl ModelWrapper {
  /// 接受模型文件路径，或带后端方案与选项的 URL（如 `onnx:///m.onnx?size=299`）
  pub fn open<P: AsRef<Path>>(model: P) -> Result<Self, ModelError> {
    let model = model.as_ref();
    if let Some(text) = model.to_str()
      && text.contains("://")
    {
      let url = Url::parse(text).map_err(|e| ModelError::ModelPathError(e.to_string()))?;
      return Self::from_url(&url);
    }
    Self::from_path(model)
  }

  /// 按文件扩展名选择后端: .onnx / .pb / .rknn
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let extension = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
      #[cfg(feature = "backend_tract")]
      Some("onnx") => Ok(ModelWrapper::Tract(TractModel::load(
        path,
        TractFormat::Onnx,
        ModelOptions::default(),
      )?)),
      #[cfg(feature = "backend_tract")]
      Some("pb") => Ok(ModelWrapper::Tract(TractModel::load(
        path,
        TractFormat::TensorFlow,
        ModelOptions::default(),
      )?)),
      #[cfg(feature = "backend_rknpu")]
      Some("rknn") => Ok(ModelWrapper::Rknn(RknnModel::load(
        path,
        rknpu::InitFlags::default(),
        ModelOptions::default(),
      )?)),
      #[allow(unreachable_patterns)]
      Some(ext @ ("onnx" | "pb" | "rknn")) => Err(ModelError::SchemeMismatch(format!(
        "未启用 .{} 模型的推理后端",
        ext
      ))),
      _ => Err(ModelError::ModelPathError(format!(
        "无法识别的模型文件类型: {}",
        path.display()
      ))),
    }
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn infer(
    &self,
    frame: &RgbNhwcFrame,
    normalization: Normalization,
  ) -> Result<Vec<f32>, Self::Error> {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.infer(frame, normalization),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Rknn(model) => model.infer(frame, normalization),
    }
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.input_size(),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Rknn(model) => model.input_size(),
    }
  }

  fn reset(&self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.reset(),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Rknn(model) => model.reset(),
    }
  }
}
