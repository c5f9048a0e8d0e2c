// 该文件是 Shibie （识别） 项目的一部分。
// src/recognizer/video_recognizer.rs - 视频文件识别
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
  fmt,
  path::Path,
  sync::atomic::{AtomicBool, Ordering},
};

use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Classifier, RecognizerError, validate_threshold};
use crate::{
  frame::Normalization,
  input::{VideoFrame, VideoInputError, VideoOptions, VideoSource, open_video},
  labels::Labels,
  model::{Model, ModelWrapper, Recognition, top_k},
};

/// 多帧得分的合并方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
  /// 各帧得分取平均
  #[default]
  Mean,
  /// 各帧得分取最大值
  Max,
}

impl Aggregation {
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "mean" | "avg" | "average" => Some(Aggregation::Mean),
      "max" => Some(Aggregation::Max),
      _ => None,
    }
  }
}

impl fmt::Display for Aggregation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Aggregation::Mean => write!(f, "mean"),
      Aggregation::Max => write!(f, "max"),
    }
  }
}

/// 单帧识别结果
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecognition {
  pub index: u64,
  pub timestamp_ms: u64,
  pub recognitions: Vec<Recognition>,
}

struct ScoreAccumulator {
  aggregation: Aggregation,
  scores: Vec<f32>,
  frames: usize,
}

impl ScoreAccumulator {
  fn new(aggregation: Aggregation) -> Self {
    ScoreAccumulator {
      aggregation,
      scores: Vec::new(),
      frames: 0,
    }
  }

  fn push(&mut self, scores: Vec<f32>) {
    if self.frames == 0 {
      self.scores = scores;
      self.frames = 1;
      return;
    }

    if scores.len() != self.scores.len() {
      warn!(
        "帧间模型输出长度不一致 {} / {}，按较短者合并",
        self.scores.len(),
        scores.len()
      );
      self.scores.truncate(scores.len());
    }

    for (acc, score) in self.scores.iter_mut().zip(scores) {
      match self.aggregation {
        Aggregation::Mean => *acc += score,
        Aggregation::Max => *acc = acc.max(score),
      }
    }
    self.frames += 1;
  }

  fn finish(mut self) -> Option<Vec<f32>> {
    if self.frames == 0 {
      return None;
    }
    if self.aggregation == Aggregation::Mean {
      let n = self.frames as f32;
      self.scores.iter_mut().for_each(|score| *score /= n);
    }
    Some(self.scores)
  }
}

/// 视频文件识别器
///
/// 按采样帧率解码视频，逐帧推理后合并得分。解码直接输出模型输入尺寸的帧。
pub struct VideoRecognizer<M = ModelWrapper> {
  classifier: Classifier<M>,
  fps: f32,
  max_frames: Option<usize>,
  aggregation: Aggregation,
}

impl VideoRecognizer<ModelWrapper> {
  pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
    model_path: P,
    label_path: Q,
  ) -> Result<Self, RecognizerError> {
    Ok(Self::with_classifier(Classifier::open(model_path, label_path)?))
  }
}

impl<M> VideoRecognizer<M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  fn with_classifier(classifier: Classifier<M>) -> Self {
    VideoRecognizer {
      classifier,
      fps: VideoOptions::default().fps,
      max_frames: None,
      aggregation: Aggregation::default(),
    }
  }

  pub fn from_model(model: M, labels: Labels) -> Self {
    Self::with_classifier(Classifier::new(model, labels))
  }

  /// 每秒采样帧数
  pub fn fps(mut self, fps: f32) -> Result<Self, RecognizerError> {
    if !fps.is_finite() || fps <= 0.0 {
      return Err(RecognizerError::InvalidArgument(format!("fps={}", fps)));
    }
    self.fps = fps;
    Ok(self)
  }

  pub fn max_frames(mut self, max_frames: Option<usize>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
    self.aggregation = aggregation;
    self
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

  pub fn recognize<P: AsRef<Path>>(
    &self,
    video_path: P,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    let stop = AtomicBool::new(false);
    self.recognize_until(video_path, max_results, threshold, &stop)
  }

  /// `stop` 被置位后停止解码，只合并已处理的帧
  pub fn recognize_until<P: AsRef<Path>>(
    &self,
    video_path: P,
    max_results: usize,
    threshold: f32,
    stop: &AtomicBool,
  ) -> Result<Vec<Recognition>, RecognizerError> {
    validate_threshold(threshold)?;
    if max_results == 0 {
      return Ok(Vec::new());
    }

    let video_path = video_path.as_ref();
    info!("识别视频: {}", video_path.display());
    let source = self.open(video_path)?;
    self.recognize_source(checked_frames(source), max_results, threshold, stop)
  }

  /// 逐帧识别，不合并得分
  pub fn recognize_frames<P: AsRef<Path>>(
    &self,
    video_path: P,
    max_results: usize,
    threshold: f32,
  ) -> Result<Vec<FrameRecognition>, RecognizerError> {
    let stop = AtomicBool::new(false);
    self.recognize_frames_until(video_path, max_results, threshold, &stop)
  }

  /// 逐帧识别，`stop` 被置位后停止解码并返回已处理的帧
  pub fn recognize_frames_until<P: AsRef<Path>>(
    &self,
    video_path: P,
    max_results: usize,
    threshold: f32,
    stop: &AtomicBool,
  ) -> Result<Vec<FrameRecognition>, RecognizerError> {
    validate_threshold(threshold)?;

    let video_path = video_path.as_ref();
    info!("逐帧识别视频: {}", video_path.display());
    let source = self.open(video_path)?;
    self.recognize_source_frames(checked_frames(source), max_results, threshold, stop)
  }

  /// 从已解码的帧序列识别并合并得分
  pub fn recognize_source<I, E>(
    &self,
    frames: I,
    max_results: usize,
    threshold: f32,
    stop: &AtomicBool,
  ) -> Result<Vec<Recognition>, RecognizerError>
  where
    I: IntoIterator<Item = Result<VideoFrame, E>>,
    RecognizerError: From<E>,
  {
    validate_threshold(threshold)?;
    if max_results == 0 {
      return Ok(Vec::new());
    }

    let size = self.classifier.resolve_input_size(None);
    let mut accumulator = ScoreAccumulator::new(self.aggregation);
    for frame in until_stopped(frames.into_iter().take(self.frame_limit()), stop) {
      let frame = frame?;
      debug!("处理第 {} 帧 ({} ms)", frame.index, frame.timestamp_ms);
      let image = DynamicImage::ImageRgb8(frame.image);
      accumulator.push(self.classifier.scores(&image, size)?);
    }

    let frames = accumulator.frames;
    let scores = accumulator
      .finish()
      .ok_or_else(|| RecognizerError::NoFrames("未解码出任何帧".to_string()))?;
    let results = top_k(&scores, self.classifier.labels(), max_results, threshold);
    info!(
      "共处理 {} 帧（{}），识别到 {} 个结果",
      frames,
      self.aggregation,
      results.len()
    );
    Ok(results)
  }

  /// 从已解码的帧序列逐帧识别
  pub fn recognize_source_frames<I, E>(
    &self,
    frames: I,
    max_results: usize,
    threshold: f32,
    stop: &AtomicBool,
  ) -> Result<Vec<FrameRecognition>, RecognizerError>
  where
    I: IntoIterator<Item = Result<VideoFrame, E>>,
    RecognizerError: From<E>,
  {
    validate_threshold(threshold)?;

    let size = self.classifier.resolve_input_size(None);
    let mut results = Vec::new();
    for frame in until_stopped(frames.into_iter().take(self.frame_limit()), stop) {
      let frame = frame?;
      let recognitions = if max_results == 0 {
        Vec::new()
      } else {
        let image = DynamicImage::ImageRgb8(frame.image);
        let scores = self.classifier.scores(&image, size)?;
        top_k(&scores, self.classifier.labels(), max_results, threshold)
      };
      results.push(FrameRecognition {
        index: frame.index,
        timestamp_ms: frame.timestamp_ms,
        recognitions,
      });
    }

    if results.is_empty() {
      return Err(RecognizerError::NoFrames("未解码出任何帧".to_string()));
    }
    info!("共识别 {} 帧", results.len());
    Ok(results)
  }

  fn frame_limit(&self) -> usize {
    self.max_frames.unwrap_or(usize::MAX)
  }

  fn open(&self, video_path: &Path) -> Result<Box<dyn VideoSource>, RecognizerError> {
    let options = VideoOptions {
      fps: self.fps,
      size: self.classifier.resolve_input_size(None),
    };
    Ok(open_video(video_path, &options)?)
  }
}

/// 取下一帧之前检查停止标志，置位后不再解码新的帧
fn until_stopped<I: Iterator>(mut frames: I, stop: &AtomicBool) -> impl Iterator<Item = I::Item> {
  let mut count = 0usize;
  std::iter::from_fn(move || {
    if stop.load(Ordering::SeqCst) {
      info!("收到停止信号，已解码 {} 帧", count);
      return None;
    }
    let frame = frames.next()?;
    count += 1;
    Some(frame)
  })
}

/// 解码出的帧尺寸须与视频源声明的输出尺寸一致
fn checked_frames<S: VideoSource + ?Sized>(
  source: Box<S>,
) -> impl Iterator<Item = Result<VideoFrame, VideoInputError>> {
  let expected = (source.width(), source.height());
  info!(
    "视频输入: {}x{} @ {} fps",
    expected.0,
    expected.1,
    source.fps()
  );
  source.map(move |frame| {
    let frame = frame?;
    if frame.image.dimensions() != expected {
      let (width, height) = frame.image.dimensions();
      return Err(VideoInputError::DecodeFailed(format!(
        "第 {} 帧尺寸 {}x{} 与预期 {}x{} 不符",
        frame.index, width, height, expected.0, expected.1
      )));
    }
    Ok(frame)
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recognizer::testing::StubModel;
  use std::sync::atomic::Ordering;

  fn labels() -> Labels {
    ["a", "b", "c"].into_iter().collect()
  }

  fn recognizer() -> VideoRecognizer<StubModel> {
    let outputs = vec![vec![0.6, 0.4, 0.0], vec![0.0, 0.8, 0.2]];
    VideoRecognizer::from_model(StubModel::new(outputs), labels())
      .input_size(4, 4)
      .unwrap()
  }

  fn frame(index: u64, red: u8) -> Result<VideoFrame, VideoInputError> {
    Ok(VideoFrame {
      image: image::RgbImage::from_pixel(4, 4, image::Rgb([red, 0, 0])),
      index,
      timestamp_ms: index * 1000,
    })
  }

  #[test]
  fn aggregation_parse() {
    assert_eq!(Aggregation::parse("MEAN"), Some(Aggregation::Mean));
    assert_eq!(Aggregation::parse("max"), Some(Aggregation::Max));
    assert_eq!(Aggregation::parse("median"), None);
  }

  #[test]
  fn mean_aggregation_over_frames() {
    let stop = AtomicBool::new(false);
    let results = recognizer()
      .recognize_source(vec![frame(0, 0), frame(1, 1)], 3, 0.0, &stop)
      .unwrap();
    let labels: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["b", "a", "c"]);
    assert!((results[0].confidence - 0.6).abs() < 1e-6);
    assert!((results[1].confidence - 0.3).abs() < 1e-6);
  }

  #[test]
  fn max_aggregation_over_frames() {
    let stop = AtomicBool::new(false);
    let results = recognizer()
      .aggregation(Aggregation::Max)
      .recognize_source(vec![frame(0, 0), frame(1, 1)], 2, 0.0, &stop)
      .unwrap();
    assert_eq!(results[0].label, "b");
    assert!((results[0].confidence - 0.8).abs() < 1e-6);
    assert_eq!(results[1].label, "a");
    assert!((results[1].confidence - 0.6).abs() < 1e-6);
  }

  #[test]
  fn max_frames_limits_processing() {
    let stop = AtomicBool::new(false);
    let r = recognizer().max_frames(Some(1));
    let results = r
      .recognize_source(vec![frame(0, 0), frame(1, 1), frame(2, 1)], 1, 0.0, &stop)
      .unwrap();
    assert_eq!(results[0].label, "a");
    assert_eq!(r.classifier.model.calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn stop_flag_before_first_frame_is_no_frames() {
    let stop = AtomicBool::new(true);
    let result = recognizer().recognize_source(vec![frame(0, 0)], 1, 0.0, &stop);
    assert!(matches!(result, Err(RecognizerError::NoFrames(_))));
  }

  #[test]
  fn stop_flag_is_checked_before_next_frame() {
    let stop = AtomicBool::new(false);
    let pulled = std::cell::Cell::new(0u64);
    let frames = std::iter::from_fn(|| {
      let index = pulled.get();
      pulled.set(index + 1);
      stop.store(true, Ordering::SeqCst);
      Some(frame(index, 0))
    });
    let results = recognizer().recognize_source(frames, 1, 0.0, &stop).unwrap();
    assert_eq!(results[0].label, "a");
    assert_eq!(pulled.get(), 1);
  }

  #[test]
  fn per_frame_stop_keeps_processed_frames() {
    let stop = AtomicBool::new(false);
    let pulled = std::cell::Cell::new(0u64);
    let frames = std::iter::from_fn(|| {
      let index = pulled.get();
      pulled.set(index + 1);
      if index == 1 {
        stop.store(true, Ordering::SeqCst);
      }
      Some(frame(index, 0))
    });
    let results = recognizer()
      .recognize_source_frames(frames, 1, 0.0, &stop)
      .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(pulled.get(), 2);

    let stop = AtomicBool::new(true);
    assert!(matches!(
      recognizer().recognize_source_frames(vec![frame(0, 0)], 1, 0.0, &stop),
      Err(RecognizerError::NoFrames(_))
    ));
  }

  struct FixedSource {
    frames: std::vec::IntoIter<Result<VideoFrame, VideoInputError>>,
  }

  impl Iterator for FixedSource {
    type Item = Result<VideoFrame, VideoInputError>;

    fn next(&mut self) -> Option<Self::Item> {
      self.frames.next()
    }
  }

  impl VideoSource for FixedSource {
    fn width(&self) -> u32 {
      4
    }

    fn height(&self) -> u32 {
      4
    }

    fn fps(&self) -> f32 {
      1.0
    }
  }

  #[test]
  fn frame_size_must_match_source() {
    let odd = Ok(VideoFrame {
      image: image::RgbImage::new(3, 4),
      index: 1,
      timestamp_ms: 1000,
    });
    let source: Box<dyn VideoSource> = Box::new(FixedSource {
      frames: vec![frame(0, 0), odd].into_iter(),
    });
    let mut frames = checked_frames(source);
    assert!(matches!(frames.next(), Some(Ok(_))));
    assert!(matches!(
      frames.next(),
      Some(Err(VideoInputError::DecodeFailed(_)))
    ));
    assert!(frames.next().is_none());

    let stop = AtomicBool::new(false);
    let source: Box<dyn VideoSource> = Box::new(FixedSource {
      frames: vec![frame(0, 0), frame(1, 1)].into_iter(),
    });
    let results = recognizer()
      .recognize_source(checked_frames(source), 1, 0.0, &stop)
      .unwrap();
    assert_eq!(results[0].label, "b");
  }

  #[test]
  fn empty_video_is_no_frames() {
    let stop = AtomicBool::new(false);
    let empty: Vec<Result<VideoFrame, VideoInputError>> = Vec::new();
    assert!(matches!(
      recognizer().recognize_source(empty, 1, 0.0, &stop),
      Err(RecognizerError::NoFrames(_))
    ));
    let empty: Vec<Result<VideoFrame, VideoInputError>> = Vec::new();
    assert!(matches!(
      recognizer().recognize_source_frames(empty, 1, 0.0, &stop),
      Err(RecognizerError::NoFrames(_))
    ));
  }

  #[test]
  fn decode_error_is_propagated() {
    let stop = AtomicBool::new(false);
    let frames = vec![
      frame(0, 0),
      Err(VideoInputError::DecodeFailed("broken".to_string())),
    ];
    assert!(matches!(
      recognizer().recognize_source(frames, 1, 0.0, &stop),
      Err(RecognizerError::VideoInput(_))
    ));
  }

  #[test]
  fn per_frame_results_keep_timestamps() {
    let stop = AtomicBool::new(false);
    let results = recognizer()
      .recognize_source_frames(vec![frame(0, 0), frame(1, 1)], 1, 0.5, &stop)
      .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].recognitions[0].label, "a");
    assert_eq!(results[1].timestamp_ms, 1000);
    assert_eq!(results[1].recognitions[0].label, "b");
  }

  #[test]
  fn zero_max_results_skips_decoding() {
    let r = recognizer();
    let results = r.recognize("/nonexistent/video.mp4", 0, 0.1).unwrap();
    assert!(results.is_empty());
    assert_eq!(r.classifier.model.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn invalid_arguments_are_rejected() {
    assert!(recognizer().fps(0.0).is_err());
    assert!(recognizer().fps(f32::NAN).is_err());
    assert!(matches!(
      recognizer().recognize("/nonexistent/video.mp4", 1, f32::NAN),
      Err(RecognizerError::InvalidArgument(_))
    ));
  }

  #[test]
  fn missing_video_is_input_error() {
    assert!(matches!(
      recognizer().recognize("/nonexistent/video.mp4", 1, 0.1),
      Err(RecognizerError::VideoInput(_))
    ));
  }
}
