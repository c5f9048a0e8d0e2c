// 该文件是 Shibie （识别） 项目的一部分。
// src/recognizer/image_recognizer.rs - 图像文件识别
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
use tracing::info;

use super::{Classifier, RecognizerError, validate_input_size, validate_threshold};
use crate::{
  frame::Normalization,
  input::ImageFileInput,
  labels::Labels,
  model::{Model, ModelWrapper, Recognition, top_k},
};

/// 图像文件识别器
///
/// 可选的归一化参数在构造时给出，可选的输入尺寸在调用时给出：
///
/// ```no_run
/// use shibie::ImageRecognizer;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let recognizer =
///   ImageRecognizer::with_normalization("mobilenet.pb", "labels.txt", 128.0, 128.0)?;
/// for result in recognizer.recognize_image("cat.jpg", 5, 0.1)? {
///   println!("{}: {:.3}", result.label, result.confidence);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ImageRecognizer<M = ModelWrapper> {
  classifier: Classifier<M>,
}

impl ImageRecognizer<ModelWrapper> {
  pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
    model_path: P,
    label_path: Q,
  ) -> Result<Self, RecognizerError> {
    Ok(ImageRecognizer {
      classifier: Classifier::open(model_path, label_path)?,
    })
  }

  pub fn with_normalization<P: AsRef<Path>, Q: AsRef<Path>>(
    model_path: P,
    label_path: Q,
    image_mean: f32,
    image_std: f32,
  ) -> Result<Self, RecognizerError> {
    Self::new(model_path, label_path)?.normalization(Normalization::new(image_mean, image_std))
  }
}

impl<M> ImageRecognizer<M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn from_model(model: M, labels: Labels) -> Self {
    ImageRecognizer {
      classifier: Classifier::new(model, labels),
    }
  }

  pub fn normalization(mut self, normalization: Normalization) -> Result<Self, RecognizerError> {
    self.classifier.set_normalization(normalization)?;
    Ok(self)
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Result<Self, RecognizerError> {
    self.classifier.set_input_size((width, height))?;
    Ok(self)
  }

  pub fn labels(&self) -> &Labels {
    self.classifier.labels()
  }

  pub fn recognize_image<P: AsRef<Path>>(
    &self,
    image_path: P,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    self.recognize_image_inner(image_path.as_ref(), None, max_results, threshold)
  }

  /// 以 `input_size x input_size` 的方形输入识别
  pub fn recognize_image_with_input_size<P: AsRef<Path>>(
    &self,
    image_path: P,
    input_size: u32,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    let size = (input_size, input_size);
    validate_input_size(size)?;
    self.recognize_image_inner(image_path.as_ref(), Some(size), max_results, threshold)
  }

  /// 识别已解码的图像
  pub fn recognize(
    &self,
    image: &DynamicImage,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    self.recognize_decoded(image, None, max_results, threshold)
  }

  fn recognize_image_inner(
    &self,
    image_path: &Path,
    input_size: Option<(u32, u32)>,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    validate_threshold(threshold)?;
    if max_results == 0 {
      return Ok(Vec::new());
    }

    info!("识别图像: {}", image_path.display());
    let image = ImageFileInput::open(image_path)?.into_image();
    self.recognize_decoded(&image, input_size, max_results, threshold)
  }

  fn recognize_decoded(
    &self,
    image: &DynamicImage,
    input_size: Option<(u32, u32)>,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    validate_threshold(threshold)?;
    if max_results == 0 {
      return Ok(Vec::new());
    }

    let size = self.classifier.resolve_input_size(input_size);
    let scores = self.classifier.scores(image, size)?;
    let results = top_k(&scores, self.classifier.labels(), max_results, threshold);
    info!("识别到 {} 个结果", results.len());
    Ok(results)
  }
}
