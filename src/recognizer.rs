// 该文件是 Shibie （识别） 项目的一部分。
// src/recognizer.rs - 识别器
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

use std::path::Path;

use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{DEFAULT_INPUT_SIZE, Normalization, resize_to_frame},
  input::{ImageFileInputError, VideoInputError},
  labels::{Labels, LabelsError},
  model::{Model, ModelError, ModelWrapper},
};

mod image_processor;
mod image_recognizer;
mod video_recognizer;

pub use self::image_processor::ImageProcessor;
pub use self::image_recognizer::ImageRecognizer;
pub use self::video_recognizer::{Aggregation, FrameRecognition, VideoRecognizer};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum RecognizerError {
  #[error("标签错误: {0}")]
  Labels(#[from] LabelsError),
  #[error("模型错误: {0}")]
  Model(#[source] BoxedError),
  #[error("图像输入错误: {0}")]
  ImageInput(#[from] ImageFileInputError),
  #[error("视频输入错误: {0}")]
  VideoInput(#[from] VideoInputError),
  #[error("参数错误: {0}")]
  InvalidArgument(String),
  #[error("视频中没有可识别的帧: {0}")]
  NoFrames(String),
}

impl From<ModelError> for RecognizerError {
  fn from(err: ModelError) -> Self {
    RecognizerError::Model(Box::new(err))
  }
}

impl RecognizerError {
  fn model<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    RecognizerError::Model(Box::new(err))
  }
}

/// 检查所有识别接口共用的参数
pub(crate) fn validate_threshold(threshold: f32) -> Result<(), RecognizerError> {
  if !threshold.is_finite() {
    return Err(RecognizerError::InvalidArgument(format!(
      "threshold={}",
      threshold
    )));
  }
  Ok(())
}

pub(crate) fn validate_input_size(size: (u32, u32)) -> Result<(), RecognizerError> {
  if size.0 == 0 || size.1 == 0 {
    return Err(RecognizerError::InvalidArgument(format!(
      "input_size={}x{}",
      size.0, size.1
    )));
  }
  Ok(())
}

/// 模型、标签与预处理参数的组合，供各识别器复用
pub(crate) struct Classifier<M> {
  model: M,
  labels: Labels,
  normalization: Normalization,
  input_size: Option<(u32, u32)>,
}

impl Classifier<ModelWrapper> {
  fn open<P: AsRef<Path>, Q: AsRef<Path>>(
    model_path: P,
    label_path: Q,
  ) -> Result<Self, RecognizerError> {
    let labels = Labels::from_path(label_path)?;
    let model = ModelWrapper::open(model_path)?;
    Ok(Classifier::new(model, labels))
  }
}

impl<M> Classifier<M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  fn new(model: M, labels: Labels) -> Self {
    Classifier {
      model,
      labels,
      normalization: Normalization::default(),
      input_size: None,
    }
  }

  fn set_normalization(&mut self, normalization: Normalization) -> Result<(), RecognizerError> {
    if !normalization.is_valid() {
      return Err(RecognizerError::InvalidArgument(format!(
        "image_mean={}, image_std={}",
        normalization.mean, normalization.std
      )));
    }
    self.normalization = normalization;
    Ok(())
  }

  fn set_input_size(&mut self, size: (u32, u32)) -> Result<(), RecognizerError> {
    validate_input_size(size)?;
    self.input_size = Some(size);
    Ok(())
  }

  /// 调用参数优先，其次是识别器设置、模型声明，最后是默认值
  fn resolve_input_size(&self, requested: Option<(u32, u32)>) -> (u32, u32) {
    requested
      .or(self.input_size)
      .or_else(|| self.model.input_size())
      .unwrap_or(DEFAULT_INPUT_SIZE)
  }

  fn labels(&self) -> &Labels {
    &self.labels
  }

  fn scores(
    &self,
    image: &DynamicImage,
    input_size: (u32, u32),
  ) -> Result<Vec<f32>, RecognizerError> {
    let frame = resize_to_frame(image, input_size.0, input_size.1);
    let now = std::time::Instant::now();
    let scores = self
      .model
      .infer(&frame, self.normalization)
      .map_err(RecognizerError::model)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());
    Ok(scores)
  }

  fn reset(&self) -> Result<(), RecognizerError> {
    self.model.reset().map_err(RecognizerError::model)
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use crate::frame::{AsNhwcFrame, Normalization, RgbNhwcFrame};
  use crate::model::Model;

  #[derive(Debug, thiserror::Error)]
  #[error("stub model failure")]
  pub struct StubError;

  /// 以输入帧第一个像素的红色分量挑选输出，便于测试不同帧得到不同得分
  pub struct StubModel {
    pub outputs: Vec<Vec<f32>>,
    pub calls: AtomicUsize,
    pub resets: AtomicUsize,
    pub last_shape: std::sync::Mutex<Option<(usize, usize)>>,
    pub input_size: Option<(u32, u32)>,
    pub fail: bool,
  }

  impl StubModel {
    pub fn new(outputs: Vec<Vec<f32>>) -> Self {
      StubModel {
        outputs,
        calls: AtomicUsize::new(0),
        resets: AtomicUsize::new(0),
        last_shape: std::sync::Mutex::new(None),
        input_size: None,
        fail: false,
      }
    }
  }

  impl Model for StubModel {
    type Error = StubError;

    fn infer(
      &self,
      frame: &RgbNhwcFrame,
      _normalization: Normalization,
    ) -> Result<Vec<f32>, Self::Error> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      *self.last_shape.lock().unwrap() = Some((frame.width(), frame.height()));
      if self.fail {
        return Err(StubError);
      }
      let selector = frame.as_nhwc()[0] as usize;
      Ok(self.outputs[selector % self.outputs.len()].clone())
    }

    fn input_size(&self) -> Option<(u32, u32)> {
      self.input_size
    }

    fn reset(&self) -> Result<(), Self::Error> {
      self.resets.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  pub fn solid_image(red: u8, width: u32, height: u32) -> image::DynamicImage {
    image::DynamicImage::ImageRgb8(image::ImageBuffer::from_pixel(
      width,
      height,
      image::Rgb([red, 0, 0]),
    ))
  }
}
