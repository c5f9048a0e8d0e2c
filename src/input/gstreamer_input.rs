// 该文件是 Shibie （识别） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入模块
//!
//! 解码视频文件，按采样帧率输出目标尺寸的 RGB 帧。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use shibie::{FromUrl, input::GStreamerInputPipelineBuilder};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst://file/videos/clip.mp4?fps=2&width=224&height=224")?;
//! let input = GStreamerInputPipelineBuilder::from_url(&url)?.build()?;
//! for frame in input {
//!     let frame = frame?;
//!     println!("帧 {} @ {}ms", frame.index, frame.timestamp_ms);
//! }
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, path::Path};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use super::{VideoFrame, VideoInputError, VideoOptions, VideoSource};
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://file/..."）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Invalid option: {0}")]
  InvalidOption(String),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  FrameRate { numerator: i32, denominator: i32 },
  Scale { width: u32, height: u32 },
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!(
          "filesrc location=\"{}\" ! decodebin",
          path.replace('"', "\\\"")
        )
      }
      GStreamerInputBuilderItem::FrameRate {
        numerator,
        denominator,
      } => {
        format!(
          "videorate ! video/x-raw,framerate={}/{}",
          numerator, denominator
        )
      }
      GStreamerInputBuilderItem::Scale { width, height } => {
        format!("videoscale ! video/x-raw,width={},height={}", width, height)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// 采样帧率转换为分数，精确到千分之一帧
fn frame_rate_fraction(fps: f32) -> (i32, i32) {
  const DENOMINATOR: i32 = 1000;
  ((fps * DENOMINATOR as f32).round() as i32, DENOMINATOR)
}

/// GStreamer 视频文件输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  options: VideoOptions,
}

impl GStreamerInputPipelineBuilder {
  pub fn for_file(path: &Path, options: &VideoOptions) -> Self {
    let (numerator, denominator) = frame_rate_fraction(options.fps);
    let items = vec![
      GStreamerInputBuilderItem::FileSource(path.to_string_lossy().into_owned()),
      GStreamerInputBuilderItem::TargetFormat {
        format: "RGB".to_string(),
      },
      GStreamerInputBuilderItem::FrameRate {
        numerator,
        denominator,
      },
      GStreamerInputBuilderItem::Scale {
        width: options.size.0,
        height: options.size.1,
      },
    ];
    GStreamerInputPipelineBuilder {
      items,
      options: *options,
    }
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink name=sink sync=false max-buffers=4 drop=false",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerVideoInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerVideoInput {
      pipeline,
      appsink,
      options: self.options,
      frame_index: 0,
      finished: false,
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("file") {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let defaults = VideoOptions::default();
    let fps = match query.get("fps") {
      Some(v) => v
        .parse::<f32>()
        .map_err(|_| GStreamerInputError::InvalidOption(format!("fps={}", v)))?,
      None => defaults.fps,
    };
    let width = query
      .get("width")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(defaults.size.0);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(defaults.size.1);

    let options = VideoOptions {
      fps,
      size: (width, height),
    };
    options
      .validate()
      .map_err(|e| GStreamerInputError::InvalidOption(e.to_string()))?;

    Ok(Self::for_file(Path::new(&url_file_path(url)), &options))
  }
}

/// GStreamer 视频输入
pub struct GStreamerVideoInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  options: VideoOptions,
  frame_index: u64,
  finished: bool,
}

impl Drop for GStreamerVideoInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerVideoInput {
  /// 管道出错时取出总线上的错误消息
  fn pipeline_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(err.error().to_string()),
      _ => None,
    }
  }
}

impl Iterator for GStreamerVideoInput {
  type Item = Result<VideoFrame, VideoInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) => {
        self.finished = true;
        return self.pipeline_error().map(|message| {
          error!("GStreamer 管道错误: {}", message);
          Err(VideoInputError::DecodeFailed(message))
        });
      }
    };

    let fallback_ms = (self.frame_index as f64 * 1000.0 / self.options.fps as f64) as u64;
    let result = convert_sample_to_rgb(&sample).map(|(image, pts_ms)| VideoFrame {
      image,
      index: self.frame_index,
      timestamp_ms: pts_ms.unwrap_or(fallback_ms),
    });
    self.frame_index += 1;
    Some(result.map_err(VideoInputError::from))
  }
}

impl VideoSource for GStreamerVideoInput {
  fn width(&self) -> u32 {
    self.options.size.0
  }

  fn height(&self) -> u32 {
    self.options.size.1
  }

  fn fps(&self) -> f32 {
    self.options.fps
  }
}

fn convert_sample_to_rgb(
  sample: &gst::Sample,
) -> Result<(RgbImage, Option<u64>), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  let mut pixels = Vec::with_capacity(width * height * 3);
  for h in 0..height {
    let row = &data[h * stride..h * stride + width * 3];
    if swap {
      for px in row.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(row);
    }
  }

  let image = RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("无法创建 RGB 图像".to_string()))?;
  let pts_ms = buffer.pts().map(|pts| pts.mseconds());
  Ok((image, pts_ms))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipeline_description_for_file() {
    let options = VideoOptions {
      fps: 0.5,
      size: (224, 224),
    };
    let builder = GStreamerInputPipelineBuilder::for_file(Path::new("/tmp/clip.mp4"), &options);
    let description = builder.pipeline_description();
    assert!(description.starts_with("filesrc location=\"/tmp/clip.mp4\" ! decodebin"));
    assert!(description.contains("framerate=500/1000"));
    assert!(description.contains("width=224,height=224"));
    assert!(description.ends_with("appsink name=sink sync=false max-buffers=4 drop=false"));
  }

  #[test]
  fn from_url_reads_query() {
    let url = Url::parse("gst://file/tmp/clip.mp4?fps=2&width=64&height=48").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert_eq!(builder.options.size, (64, 48));
    assert_eq!(builder.options.fps, 2.0);

    let url = Url::parse("gst://camera/dev/video0").unwrap();
    assert!(GStreamerInputPipelineBuilder::from_url(&url).is_err());
  }
}
