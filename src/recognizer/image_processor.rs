// 该文件是 Shibie （识别） 项目的一部分。
// src/recognizer/image_processor.rs - 连续图像帧识别
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
use tracing::{debug, info, warn};

use super::{Classifier, RecognizerError, validate_threshold};
use crate::{
  frame::{Normalization, Orientation},
  labels::Labels,
  model::{Model, ModelWrapper, Recognition, top_k},
};

/// 默认平滑衰减系数: 新得分 = 0.75 * 旧得分 + 0.25 * 本帧得分
pub const DEFAULT_DECAY: f32 = 0.75;

/// 面向连续帧（如摄像头画面）的识别器
///
/// 每帧先按方向摆正再推理，得分在帧间做指数平滑；`reset` 清除平滑状态
/// 与模型缓存的推理状态。
pub struct ImageProcessor<M = ModelWrapper> {
  classifier: Classifier<M>,
  decay: Option<f32>,
  smoothed: Option<Vec<f32>>,
}

impl ImageProcessor<ModelWrapper> {
  pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
    model_path: P,
    label_path: Q,
  ) -> Result<Self, RecognizerError> {
    Ok(Self::with_classifier(Classifier::open(model_path, label_path)?))
  }
}

impl<M> ImageProcessor<M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  fn with_classifier(classifier: Classifier<M>) -> Self {
    ImageProcessor {
      classifier,
      decay: Some(DEFAULT_DECAY),
      smoothed: None,
    }
  }

  pub fn from_model(model: M, labels: Labels) -> Self {
    Self::with_classifier(Classifier::new(model, labels))
  }

  /// `None` 关闭平滑；衰减系数须在 [0, 1) 内
  pub fn smoothing(mut self, decay: Option<f32>) -> Result<Self, RecognizerError> {
    if let Some(d) = decay
      && !(0.0..1.0).contains(&d)
    {
      return Err(RecognizerError::InvalidArgument(format!("decay={}", d)));
    }
    self.decay = decay;
    self.smoothed = None;
    Ok(self)
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

  pub fn reset(&mut self) -> Result<(), RecognizerError> {
    info!("重置识别状态");
    self.smoothed = None;
    self.classifier.reset()
  }

  pub fn recognize(
    &mut self,
    image: &DynamicImage,
    orientation: Orientation,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    validate_threshold(threshold)?;
    if max_results == 0 {
      return Ok(Vec::new());
    }

    debug!("图像方向: {}", orientation);
    let upright = orientation.apply(image.clone());
    let size = self.classifier.resolve_input_size(None);
    let scores = self.classifier.scores(&upright, size)?;
    let scores = smooth(&mut self.smoothed, self.decay, scores);

    Ok(top_k(scores, self.classifier.labels(), max_results, threshold))
  }
}

/// 指数平滑，首帧或长度变化时直接采用本帧得分
fn smooth(state: &mut Option<Vec<f32>>, decay: Option<f32>, current: Vec<f32>) -> &[f32] {
  let decay = match decay {
    Some(decay) => decay,
    None => return state.insert(current).as_slice(),
  };

  match state.take() {
    Some(mut previous) if previous.len() == current.len() => {
      for (old, new) in previous.iter_mut().zip(current) {
        *old = decay * *old + (1.0 - decay) * new;
      }
      state.insert(previous).as_slice()
    }
    Some(previous) => {
      warn!(
        "模型输出长度变化 {} -> {}，丢弃平滑状态",
        previous.len(),
        current.len()
      );
      state.insert(current).as_slice()
    }
    None => state.insert(current).as_slice(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recognizer::testing::{StubModel, solid_image};
  use std::sync::atomic::Ordering;

  fn labels() -> Labels {
    ["a", "b"].into_iter().collect()
  }

  /// 红色分量 0 选择第一组输出，1 选择第二组
  fn processor() -> ImageProcessor<StubModel> {
    ImageProcessor::from_model(StubModel::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]), labels())
  }

  #[test]
  fn first_frame_uses_raw_scores() {
    let mut p = processor();
    let results = p.recognize(&solid_image(0, 8, 8), Orientation::Up, 2, 0.0).unwrap();
    assert_eq!(results[0].label, "a");
    assert_eq!(results[0].confidence, 1.0);
    assert_eq!(results[1].confidence, 0.0);
  }

  #[test]
  fn scores_are_smoothed_across_frames() {
    let mut p = processor();
    p.recognize(&solid_image(0, 8, 8), Orientation::Up, 2, 0.0).unwrap();
    let results = p.recognize(&solid_image(1, 8, 8), Orientation::Up, 2, 0.0).unwrap();
    assert_eq!(results[0].label, "a");
    assert!((results[0].confidence - 0.75).abs() < 1e-6);
    assert!((results[1].confidence - 0.25).abs() < 1e-6);
  }

  #[test]
  fn reset_clears_smoothing_and_model_state() {
    let mut p = processor();
    p.recognize(&solid_image(0, 8, 8), Orientation::Up, 2, 0.0).unwrap();
    p.reset().unwrap();
    let results = p.recognize(&solid_image(1, 8, 8), Orientation::Up, 2, 0.0).unwrap();
    assert_eq!(results[0].label, "b");
    assert_eq!(results[0].confidence, 1.0);
    assert_eq!(p.classifier.model.resets.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn smoothing_can_be_disabled() {
    let mut p = processor().smoothing(None).unwrap();
    p.recognize(&solid_image(0, 8, 8), Orientation::Up, 2, 0.0).unwrap();
    let results = p.recognize(&solid_image(1, 8, 8), Orientation::Up, 1, 0.0).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].label, "b");
    assert_eq!(results[0].confidence, 1.0);
  }

  #[test]
  fn invalid_decay_is_rejected() {
    assert!(processor().smoothing(Some(1.0)).is_err());
    assert!(processor().smoothing(Some(-0.1)).is_err());
    assert!(processor().smoothing(Some(0.0)).is_ok());
  }

  #[test]
  fn orientation_is_applied_before_inference() {
    let mut p = processor().input_size(4, 4).unwrap().smoothing(None).unwrap();

    // 左上角像素红色分量为 1，其余为 0；旋转 180 度后左上角变为 0
    let mut img = image::RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));
    img.put_pixel(0, 0, image::Rgb([1, 0, 0]));
    let image = DynamicImage::ImageRgb8(img);

    let up = p.recognize(&image, Orientation::Up, 1, 0.0).unwrap();
    assert_eq!(up[0].label, "b");
    let down = p.recognize(&image, Orientation::Down, 1, 0.0).unwrap();
    assert_eq!(down[0].label, "a");
  }

  #[test]
  fn threshold_filters_smoothed_scores() {
    let mut p = processor();
    let results = p.recognize(&solid_image(0, 8, 8), Orientation::Up, 5, 0.5).unwrap();
    assert_eq!(results.len(), 1);
    assert!(p.recognize(&solid_image(0, 8, 8), Orientation::Up, 5, f32::INFINITY).is_err());
  }
}
