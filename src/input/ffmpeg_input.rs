// 该文件是 Shibie （识别） 项目的一部分。
// src/input/ffmpeg_input.rs - 基于 ffmpeg 子进程的视频输入
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

//! 启动 `ffmpeg` 进程，按采样帧率与目标尺寸输出 rgb24 原始帧，
//! 从其标准输出逐帧读取。运行时需要 `PATH` 中存在 `ffmpeg`。

use std::{
  io::Read,
  path::Path,
  process::{Child, ChildStdout, Command, ExitStatus, Stdio},
  thread::{self, JoinHandle},
};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::{VideoFrame, VideoInputError, VideoOptions, VideoSource};

const FFMPEG_PROGRAM: &str = "ffmpeg";
const RGB_CHANNELS: usize = 3;

pub struct FfmpegVideoInput {
  child: Child,
  frames: RawFrameReader<ChildStdout>,
  stderr: Option<JoinHandle<String>>,
  finished: bool,
}

/// 从字节流中逐帧读取 rgb24 原始帧
pub(crate) struct RawFrameReader<R> {
  reader: R,
  width: u32,
  height: u32,
  fps: f32,
  frame_index: u64,
}

impl<R: Read> RawFrameReader<R> {
  pub(crate) fn new(reader: R, width: u32, height: u32, fps: f32) -> Self {
    RawFrameReader {
      reader,
      width,
      height,
      fps,
      frame_index: 0,
    }
  }

  fn frame_size(&self) -> usize {
    self.width as usize * self.height as usize * RGB_CHANNELS
  }

  /// 流结束返回 `None`，末尾不完整的帧被丢弃
  pub(crate) fn read_frame(&mut self) -> Result<Option<VideoFrame>, VideoInputError> {
    let mut buffer = vec![0u8; self.frame_size()];
    let mut filled = 0;
    while filled < buffer.len() {
      match self.reader.read(&mut buffer[filled..]) {
        Ok(0) => {
          if filled > 0 {
            warn!("丢弃不完整的末尾帧: {} / {} 字节", filled, buffer.len());
          }
          return Ok(None);
        }
        Ok(n) => filled += n,
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e.into()),
      }
    }

    let image = RgbImage::from_raw(self.width, self.height, buffer)
      .ok_or_else(|| VideoInputError::DecodeFailed("无法创建 RGB 图像".to_string()))?;
    let timestamp_ms = (self.frame_index as f64 * 1000.0 / self.fps as f64) as u64;
    let frame = VideoFrame {
      image,
      index: self.frame_index,
      timestamp_ms,
    };
    self.frame_index += 1;
    Ok(Some(frame))
  }
}

pub(crate) fn ffmpeg_args(path: &Path, options: &VideoOptions) -> Vec<String> {
  let (width, height) = options.size;
  vec![
    "-hide_banner".to_string(),
    "-loglevel".to_string(),
    "error".to_string(),
    "-nostdin".to_string(),
    "-i".to_string(),
    path.to_string_lossy().into_owned(),
    "-an".to_string(),
    "-vf".to_string(),
    format!("fps={},scale={}:{}", options.fps, width, height),
    "-pix_fmt".to_string(),
    "rgb24".to_string(),
    "-f".to_string(),
    "rawvideo".to_string(),
    "-".to_string(),
  ]
}

/// ffmpeg 非零退出时携带其错误输出
fn check_exit(status: ExitStatus, stderr: &str) -> Result<(), VideoInputError> {
  if status.success() {
    return Ok(());
  }
  Err(VideoInputError::DecodeFailed(format!(
    "ffmpeg 退出状态 {}: {}",
    status,
    stderr.trim()
  )))
}

impl FfmpegVideoInput {
  pub fn open(path: &Path, options: &VideoOptions) -> Result<Self, VideoInputError> {
    options.validate()?;
    let args = ffmpeg_args(path, options);
    debug!("ffmpeg 参数: {:?}", args);

    let mut child = Command::new(FFMPEG_PROGRAM)
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| VideoInputError::DecodeFailed("无法获取 ffmpeg 标准输出".to_string()))?;

    // 单独线程收集错误输出，避免管道写满阻塞 ffmpeg
    let stderr = child.stderr.take().map(|mut stderr| {
      thread::spawn(move || {
        let mut message = String::new();
        let _ = stderr.read_to_string(&mut message);
        message
      })
    });

    info!(
      "ffmpeg 视频输入已打开: {}x{} @ {} fps",
      options.size.0, options.size.1, options.fps
    );

    Ok(FfmpegVideoInput {
      child,
      frames: RawFrameReader::new(stdout, options.size.0, options.size.1, options.fps),
      stderr,
      finished: false,
    })
  }

  fn finish(&mut self) -> Result<(), VideoInputError> {
    self.finished = true;
    let status = self.child.wait()?;
    let message = self
      .stderr
      .take()
      .and_then(|handle| handle.join().ok())
      .unwrap_or_default();

    check_exit(status, &message)?;
    debug!("ffmpeg 解码结束，共 {} 帧", self.frames.frame_index);
    Ok(())
  }
}

impl Iterator for FfmpegVideoInput {
  type Item = Result<VideoFrame, VideoInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.frames.read_frame() {
      Ok(Some(frame)) => Some(Ok(frame)),
      Ok(None) => self.finish().err().map(Err),
      Err(e) => {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.finished = true;
        Some(Err(e))
      }
    }
  }
}

impl VideoSource for FfmpegVideoInput {
  fn width(&self) -> u32 {
    self.frames.width
  }

  fn height(&self) -> u32 {
    self.frames.height
  }

  fn fps(&self) -> f32 {
    self.frames.fps
  }
}

impl Drop for FfmpegVideoInput {
  fn drop(&mut self) {
    if !self.finished {
      if let Err(e) = self.child.kill() {
        debug!("结束 ffmpeg 进程失败: {}", e);
      }
      let _ = self.child.wait();
    }
  }
}
