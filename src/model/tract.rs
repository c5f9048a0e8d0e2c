// 该文件是 Shibie （识别） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX / TensorFlow 推理后端
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
  collections::HashMap,
  path::Path,
  sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::infer::Factoid;
use url::Url;

use crate::{
  FromUrl,
  frame::{Normalization, RgbNhwcFrame, TensorLayout},
  model::{Model, ModelError, ModelOptions},
  url_file_path,
};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TractFormat {
  Onnx,
  TensorFlow,
}

impl TractFormat {
  pub fn from_scheme(scheme: &str) -> Option<Self> {
    match scheme {
      "onnx" => Some(TractFormat::Onnx),
      "tf" | "tensorflow" => Some(TractFormat::TensorFlow),
      _ => None,
    }
  }

  /// ONNX 模型通常为通道优先，TensorFlow 冻结图通常为通道在后
  fn default_layout(&self) -> TensorLayout {
    match self {
      TractFormat::Onnx => TensorLayout::Nchw,
      TractFormat::TensorFlow => TensorLayout::Nhwc,
    }
  }
}

/// tract 推理模型
///
/// 计算图只加载一次；每种输入尺寸在首次使用时编译为可执行计划并缓存。
pub struct TractModel {
  model: InferenceModel,
  format: TractFormat,
  options: ModelOptions,
  /// 模型输入声明的排布与尺寸 (宽, 高)
  declared: Option<(TensorLayout, (u32, u32))>,
  plans: Mutex<HashMap<(u32, u32), Arc<Plan>>>,
}

/// 读取模型输入声明的 4 维形状，按通道所在位置判断排布
fn declared_input(
  model: &InferenceModel,
  preferred: TensorLayout,
) -> Option<(TensorLayout, (u32, u32))> {
  let fact = model.input_fact(0).ok()?;
  if fact.shape.rank().concretize() != Some(4) {
    return None;
  }
  let dim = |i: usize| -> Option<u32> {
    let value = fact.shape.dim(i)?.concretize()?.as_i64()?;
    u32::try_from(value).ok().filter(|v| *v > 0)
  };

  let nchw = || Some((TensorLayout::Nchw, (dim(3)?, dim(2)?)));
  let nhwc = || Some((TensorLayout::Nhwc, (dim(2)?, dim(1)?)));
  match (dim(1), dim(3)) {
    (Some(3), Some(c)) if c != 3 => nchw(),
    (Some(c), Some(3)) if c != 3 => nhwc(),
    _ => match preferred {
      TensorLayout::Nchw => nchw(),
      TensorLayout::Nhwc => nhwc(),
    },
  }
}

impl FromUrl for TractModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let format = TractFormat::from_scheme(url.scheme())
      .ok_or_else(|| ModelError::SchemeMismatch(url.scheme().to_string()))?;
    let options = ModelOptions::from_query(url)?;
    Self::load(url_file_path(url), format, options)
  }
}

impl TractModel {
  pub fn load<P: AsRef<Path>>(
    path: P,
    format: TractFormat,
    options: ModelOptions,
  ) -> Result<Self, ModelError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(ModelError::ModelPathError(format!(
        "模型文件不存在: {}",
        path.display()
      )));
    }

    info!("加载 {:?} 模型文件: {}", format, path.display());
    let mut model = match format {
      TractFormat::Onnx => tract_onnx::onnx().model_for_path(path)?,
      TractFormat::TensorFlow => tract_tensorflow::tensorflow().model_for_path(path)?,
    };

    if let Some(name) = &options.input_name {
      debug!("指定输入节点: {}", name);
      model = model.with_input_names([name.as_str()])?;
    }
    if let Some(name) = &options.output_name {
      debug!("指定输出节点: {}", name);
      model = model.with_output_names([name.as_str()])?;
    }

    debug!(
      "模型输入数量: {}, 输出数量: {}",
      model.inputs.len(),
      model.outputs.len()
    );
    if model.inputs.len() != 1 {
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        model.inputs.len()
      )));
    }

    info!("模型加载完成");
    Ok(Self::from_model(model, format, options))
  }

  fn from_model(model: InferenceModel, format: TractFormat, options: ModelOptions) -> Self {
    let preferred = options.layout.unwrap_or_else(|| format.default_layout());
    let declared = declared_input(&model, preferred);
    match declared {
      Some((layout, (width, height))) => {
        info!("模型声明的输入: {:?} {}x{}", layout, width, height)
      }
      None => warn!("模型未声明完整的输入尺寸"),
    }
    if let (Some(layout), Some((declared_layout, _))) = (options.layout, declared)
      && layout != declared_layout
    {
      warn!(
        "指定的排布 {:?} 与模型声明的 {:?} 不一致，按指定排布处理",
        layout, declared_layout
      );
    }

    TractModel {
      model,
      format,
      options,
      declared,
      plans: Mutex::new(HashMap::new()),
    }
  }

  /// 查询参数优先，其次是模型声明，最后按模型格式推断
  pub fn layout(&self) -> TensorLayout {
    self
      .options
      .layout
      .or(self.declared.map(|(layout, _)| layout))
      .unwrap_or_else(|| self.format.default_layout())
  }

  fn plan(&self, width: u32, height: u32) -> Result<Arc<Plan>, ModelError> {
    let mut plans = self.plans.lock().map_err(|_| ModelError::Poisoned)?;
    if let Some(plan) = plans.get(&(width, height)) {
      return Ok(plan.clone());
    }

    let shape = self.layout().shape(width, height);
    info!("编译推理计划，输入形状: {:?}", shape);
    let now = std::time::Instant::now();
    let plan = self
      .model
      .clone()
      .with_input_fact(0, f32::fact(shape).into())?
      .into_optimized()?
      .into_runnable()?;
    debug!("推理计划编译完成，耗时: {:.2?}", now.elapsed());

    let plan = Arc::new(plan);
    plans.insert((width, height), plan.clone());
    Ok(plan)
  }
}

impl Model for TractModel {
  type Error = ModelError;

  fn infer(
    &self,
    frame: &RgbNhwcFrame,
    normalization: Normalization,
  ) -> Result<Vec<f32>, Self::Error> {
    let (width, height) = (frame.width() as u32, frame.height() as u32);
    let plan = self.plan(width, height)?;

    let layout = self.layout();
    let values = frame.to_tensor_values(layout, normalization);
    let input = Tensor::from_shape(&layout.shape(width, height), &values)?;

    debug!("执行模型推理");
    let outputs = plan.run(tvec!(input.into()))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::ModelInvalid("模型没有输出".to_string()))?;

    let mut scores: Vec<f32> = output.to_array_view::<f32>()?.iter().copied().collect();
    debug!("模型输出长度: {}", scores.len());
    self.options.activation.apply(&mut scores);
    Ok(scores)
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    self
      .options
      .input_size
      .or(self.declared.map(|(_, size)| size))
  }

  fn reset(&self) -> Result<(), Self::Error> {
    let mut plans = self.plans.lock().map_err(|_| ModelError::Poisoned)?;
    debug!("清除 {} 个已编译的推理计划", plans.len());
    plans.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scheme_selects_format() {
    assert_eq!(TractFormat::from_scheme("onnx"), Some(TractFormat::Onnx));
    assert_eq!(TractFormat::from_scheme("tf"), Some(TractFormat::TensorFlow));
    assert_eq!(TractFormat::from_scheme("rknn"), None);
    assert_eq!(TractFormat::Onnx.default_layout(), TensorLayout::Nchw);
    assert_eq!(TractFormat::TensorFlow.default_layout(), TensorLayout::Nhwc);
  }

  #[test]
  fn missing_model_file_is_path_error() {
    let url = Url::parse("onnx:///nonexistent/model.onnx").unwrap();
    assert!(matches!(
      TractModel::from_url(&url),
      Err(ModelError::ModelPathError(_))
    ));
  }

  /// 只有一个输入节点、原样输出的计算图
  fn passthrough_model(shape: [usize; 4]) -> InferenceModel {
    let mut model = InferenceModel::default();
    let input = model.add_source("input", f32::fact(shape).into()).unwrap();
    model.set_output_outlets(&[input]).unwrap();
    model
  }

  #[test]
  fn declared_input_size_is_used() {
    let model = TractModel::from_model(
      passthrough_model([1, 3, 2, 5]),
      TractFormat::Onnx,
      ModelOptions::default(),
    );
    assert_eq!(model.layout(), TensorLayout::Nchw);
    assert_eq!(model.input_size(), Some((5, 2)));

    let model = TractModel::from_model(
      passthrough_model([1, 6, 4, 3]),
      TractFormat::Onnx,
      ModelOptions::default(),
    );
    assert_eq!(model.layout(), TensorLayout::Nhwc);
    assert_eq!(model.input_size(), Some((4, 6)));
  }

  #[test]
  fn query_size_overrides_declared_size() {
    let options = ModelOptions {
      input_size: Some((7, 7)),
      ..Default::default()
    };
    let model = TractModel::from_model(passthrough_model([1, 3, 2, 5]), TractFormat::Onnx, options);
    assert_eq!(model.input_size(), Some((7, 7)));
  }

  #[test]
  fn recognizer_resizes_to_declared_size() {
    let model = TractModel::from_model(
      passthrough_model([1, 3, 2, 5]),
      TractFormat::Onnx,
      ModelOptions::default(),
    );
    let labels: crate::Labels = (0..30).map(|i| i.to_string()).collect();
    let recognizer = crate::ImageRecognizer::from_model(model, labels);
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
      40,
      30,
      image::Rgb([255, 255, 255]),
    ));

    let results = recognizer.recognize(&image, 100, 0.5).unwrap();
    assert_eq!(results.len(), 30);
    assert!(results.iter().all(|r| (r.confidence - 1.0).abs() < 1e-6));
  }

  #[test]
  fn garbage_model_file_fails_to_load() {
    let file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
    std::fs::write(file.path(), b"not a model").unwrap();
    assert!(TractModel::load(file.path(), TractFormat::Onnx, ModelOptions::default()).is_err());
  }
}
