// 该文件是 Shibie （识别） 项目的一部分。
// tests/recognizers.rs - 识别器集成测试
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

use std::sync::atomic::AtomicBool;

use image::{DynamicImage, Rgb, RgbImage};
use shibie::{
  ImageProcessor, ImageRecognizer, Labels, Model, RecognizerError, VideoRecognizer,
  frame::{Normalization, Orientation, RgbNhwcFrame, TensorLayout},
  input::{VideoFrame, VideoInputError},
  output::{JsonOutput, Render},
  recognizer::Aggregation,
};

#[derive(Debug, thiserror::Error)]
#[error("empty frame")]
struct EmptyFrame;

/// 以归一化后的平均亮度作为 "bright" 的得分
struct BrightnessModel;

impl Model for BrightnessModel {
  type Error = EmptyFrame;

  fn infer(
    &self,
    frame: &RgbNhwcFrame,
    normalization: Normalization,
  ) -> Result<Vec<f32>, Self::Error> {
    let values = frame.to_tensor_values(TensorLayout::Nhwc, normalization);
    if values.is_empty() {
      return Err(EmptyFrame);
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    Ok(vec![1.0 - mean, mean])
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    Some((8, 8))
  }
}

fn labels() -> Labels {
  ["dark", "bright"].into_iter().collect()
}

fn gray(value: u8, width: u32, height: u32) -> RgbImage {
  RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

#[test]
fn image_recognizer_classifies_files() {
  let dir = tempfile::tempdir().unwrap();
  let bright = dir.path().join("bright.png");
  let dark = dir.path().join("dark.jpg");
  gray(230, 40, 30).save(&bright).unwrap();
  gray(10, 40, 30).save(&dark).unwrap();

  let recognizer = ImageRecognizer::from_model(BrightnessModel, labels());

  let results = recognizer.recognize_image(&bright, 1, 0.0).unwrap();
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].label, "bright");

  let results = recognizer
    .recognize_image_with_input_size(&dark, 16, 2, 0.0)
    .unwrap();
  assert_eq!(results[0].label, "dark");
  assert!(results[0].confidence >= results[1].confidence);
}

#[test]
fn image_recognizer_applies_normalization() {
  let image = DynamicImage::ImageRgb8(gray(128, 8, 8));

  let recognizer = ImageRecognizer::from_model(BrightnessModel, labels());
  let default = recognizer.recognize(&image, 2, -10.0).unwrap();
  let bright = default.iter().find(|r| r.label == "bright").unwrap();
  assert!((bright.confidence - 128.0 / 255.0).abs() < 1e-5);

  let recognizer = ImageRecognizer::from_model(BrightnessModel, labels())
    .normalization(Normalization::new(128.0, 128.0))
    .unwrap();
  let centered = recognizer.recognize(&image, 2, -10.0).unwrap();
  let bright = centered.iter().find(|r| r.label == "bright").unwrap();
  assert!(bright.confidence.abs() < 1e-6);
}

#[test]
fn labels_file_aligns_with_model_output() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("labels.txt");
  std::fs::write(&path, "dark\r\nbright\n\n\n").unwrap();

  let labels = Labels::from_path(&path).unwrap();
  assert_eq!(labels.len(), 2);

  let recognizer = ImageRecognizer::from_model(BrightnessModel, labels);
  let results = recognizer
    .recognize(&DynamicImage::ImageRgb8(gray(255, 8, 8)), 5, 0.5)
    .unwrap();
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].index, 1);
  assert_eq!(results[0].label, "bright");
}

#[test]
fn boxed_models_are_accepted() {
  let model: Box<BrightnessModel> = Box::new(BrightnessModel);
  let recognizer = ImageRecognizer::from_model(model, labels());
  let results = recognizer
    .recognize(&DynamicImage::ImageRgb8(gray(0, 4, 4)), 1, 0.0)
    .unwrap();
  assert_eq!(results[0].label, "dark");
}

#[test]
fn image_processor_smooths_and_resets() {
  let mut processor = ImageProcessor::from_model(BrightnessModel, labels())
    .smoothing(Some(0.5))
    .unwrap();
  let white = DynamicImage::ImageRgb8(gray(255, 8, 8));
  let black = DynamicImage::ImageRgb8(gray(0, 8, 8));

  processor.recognize(&white, Orientation::Up, 2, 0.0).unwrap();
  let results = processor.recognize(&black, Orientation::Right, 2, 0.0).unwrap();
  assert!((results[0].confidence - 0.5).abs() < 1e-6);
  assert!((results[1].confidence - 0.5).abs() < 1e-6);

  processor.reset().unwrap();
  let results = processor.recognize(&black, Orientation::Left, 1, 0.0).unwrap();
  assert_eq!(results[0].label, "dark");
  assert!((results[0].confidence - 1.0).abs() < 1e-6);
}

#[test]
fn video_recognizer_aggregates_and_reports_frames() {
  let frames = || -> Vec<Result<VideoFrame, VideoInputError>> {
    [255u8, 255, 0]
      .into_iter()
      .enumerate()
      .map(|(i, value)| {
        Ok(VideoFrame {
          image: gray(value, 8, 8),
          index: i as u64,
          timestamp_ms: i as u64 * 500,
        })
      })
      .collect()
  };

  let stop = AtomicBool::new(false);
  let recognizer = VideoRecognizer::from_model(BrightnessModel, labels());
  let results = recognizer
    .recognize_source(frames(), 2, 0.0, &stop)
    .unwrap();
  assert_eq!(results[0].label, "bright");
  assert!((results[0].confidence - 2.0 / 3.0).abs() < 1e-5);

  let recognizer = recognizer.aggregation(Aggregation::Max);
  let results = recognizer
    .recognize_source(frames(), 2, 0.0, &stop)
    .unwrap();
  assert!((results[0].confidence - 1.0).abs() < 1e-6);
  assert!((results[1].confidence - 1.0).abs() < 1e-6);

  let per_frame = recognizer
    .recognize_source_frames(frames(), 1, 0.0, &stop)
    .unwrap();
  assert_eq!(per_frame.len(), 3);
  assert_eq!(per_frame[2].recognitions[0].label, "dark");

  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("frames.json");
  JsonOutput::file(&path)
    .render_result("clip.mp4", per_frame.as_slice())
    .unwrap();
  let value: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
  assert_eq!(value["source"], "clip.mp4");
  assert_eq!(value["results"][1]["timestamp_ms"], 500);
  assert_eq!(value["results"][2]["recognitions"][0]["label"], "dark");
}

#[test]
fn video_recognizer_missing_file() {
  let recognizer = VideoRecognizer::from_model(BrightnessModel, labels());
  assert!(matches!(
    recognizer.recognize("/nonexistent/clip.mp4", 3, 0.1),
    Err(RecognizerError::VideoInput(_))
  ));
}
