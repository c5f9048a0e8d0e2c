// 该文件是 Shibie （识别） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::frame::DEFAULT_INPUT_SIZE;

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "ffmpeg_input")]
mod ffmpeg_input;
#[cfg(feature = "ffmpeg_input")]
pub use self::ffmpeg_input::FfmpegVideoInput;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInputError, GStreamerInputPipelineBuilder, GStreamerVideoInput,
};

#[derive(Error, Debug)]
pub enum VideoInputError {
  #[error("视频文件不存在: {0}")]
  NotFound(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("视频解码失败: {0}")]
  DecodeFailed(String),
  #[error("视频参数错误: {0}")]
  InvalidOption(String),
  #[error("没有可用的视频解码器")]
  NoDecoder,
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 视频帧
pub struct VideoFrame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 采样帧序号
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

/// 视频解码参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoOptions {
  /// 每秒采样帧数
  pub fps: f32,
  /// 输出帧尺寸 (宽, 高)
  pub size: (u32, u32),
}

impl Default for VideoOptions {
  fn default() -> Self {
    Self {
      fps: 1.0,
      size: DEFAULT_INPUT_SIZE,
    }
  }
}

impl VideoOptions {
  pub fn validate(&self) -> Result<(), VideoInputError> {
    if !self.fps.is_finite() || self.fps <= 0.0 {
      return Err(VideoInputError::InvalidOption(format!("fps={}", self.fps)));
    }
    if self.size.0 == 0 || self.size.1 == 0 {
      return Err(VideoInputError::InvalidOption(format!(
        "size={}x{}",
        self.size.0, self.size.1
      )));
    }
    Ok(())
  }
}

/// 视频输入源
pub trait VideoSource: Iterator<Item = Result<VideoFrame, VideoInputError>> {
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn fps(&self) -> f32;
}

/// 打开视频文件，GStreamer 与 ffmpeg 同时可用时优先使用 GStreamer
pub fn open_video<P: AsRef<Path>>(
  path: P,
  options: &VideoOptions,
) -> Result<Box<dyn VideoSource>, VideoInputError> {
  let path = path.as_ref();
  options.validate()?;
  if !path.is_file() {
    return Err(VideoInputError::NotFound(path.display().to_string()));
  }

  #[cfg(feature = "gstreamer_input")]
  {
    info!("使用 GStreamer 解码视频: {}", path.display());
    let input = GStreamerInputPipelineBuilder::for_file(path, options).build()?;
    return Ok(Box::new(input));
  }

  #[cfg(all(feature = "ffmpeg_input", not(feature = "gstreamer_input")))]
  {
    info!("使用 ffmpeg 解码视频: {}", path.display());
    let input = FfmpegVideoInput::open(path, options)?;
    return Ok(Box::new(input));
  }

  #[cfg(not(any(feature = "ffmpeg_input", feature = "gstreamer_input")))]
  return Err(VideoInputError::NoDecoder);
}
