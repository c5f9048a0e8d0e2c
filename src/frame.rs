// 该文件是 Shibie （识别） 项目的一部分。
// src/frame.rs - NHWC 帧定义与预处理
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

use image::{DynamicImage, RgbImage, imageops::FilterType, metadata};

const RGB_CHANNELS: usize = 3;

/// 默认模型输入尺寸
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 张量排布
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  #[default]
  Nchw,
  Nhwc,
}

impl TensorLayout {
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "nchw" => Some(TensorLayout::Nchw),
      "nhwc" => Some(TensorLayout::Nhwc),
      _ => None,
    }
  }

  /// 批大小为 1 的输入形状
  pub fn shape(&self, width: u32, height: u32) -> [usize; 4] {
    let (w, h) = (width as usize, height as usize);
    match self {
      TensorLayout::Nchw => [1, RGB_CHANNELS, h, w],
      TensorLayout::Nhwc => [1, h, w, RGB_CHANNELS],
    }
  }
}

/// 像素归一化参数: (v - mean) / std
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub mean: f32,
  pub std: f32,
}

impl Default for Normalization {
  fn default() -> Self {
    Self {
      mean: 0.0,
      std: 255.0,
    }
  }
}

impl Normalization {
  pub fn new(mean: f32, std: f32) -> Self {
    Self { mean, std }
  }

  pub fn is_valid(&self) -> bool {
    self.mean.is_finite() && self.std.is_finite() && self.std != 0.0
  }

  #[inline]
  pub fn apply(&self, value: u8) -> f32 {
    (value as f32 - self.mean) / self.std
  }
}

/// 图像方向，取值与 EXIF 方向标签一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
  #[default]
  Up = 1,
  UpMirrored = 2,
  Down = 3,
  DownMirrored = 4,
  LeftMirrored = 5,
  Right = 6,
  RightMirrored = 7,
  Left = 8,
}

impl Orientation {
  pub fn from_exif(value: u8) -> Option<Self> {
    match value {
      1 => Some(Orientation::Up),
      2 => Some(Orientation::UpMirrored),
      3 => Some(Orientation::Down),
      4 => Some(Orientation::DownMirrored),
      5 => Some(Orientation::LeftMirrored),
      6 => Some(Orientation::Right),
      7 => Some(Orientation::RightMirrored),
      8 => Some(Orientation::Left),
      _ => None,
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    if let Ok(v) = value.parse::<u8>() {
      return Self::from_exif(v);
    }
    match value.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
      "up" => Some(Orientation::Up),
      "upmirrored" => Some(Orientation::UpMirrored),
      "down" => Some(Orientation::Down),
      "downmirrored" => Some(Orientation::DownMirrored),
      "leftmirrored" => Some(Orientation::LeftMirrored),
      "right" => Some(Orientation::Right),
      "rightmirrored" => Some(Orientation::RightMirrored),
      "left" => Some(Orientation::Left),
      _ => None,
    }
  }

  fn to_image_orientation(self) -> metadata::Orientation {
    match self {
      Orientation::Up => metadata::Orientation::NoTransforms,
      Orientation::UpMirrored => metadata::Orientation::FlipHorizontal,
      Orientation::Down => metadata::Orientation::Rotate180,
      Orientation::DownMirrored => metadata::Orientation::FlipVertical,
      Orientation::LeftMirrored => metadata::Orientation::Rotate90FlipH,
      Orientation::Right => metadata::Orientation::Rotate90,
      Orientation::RightMirrored => metadata::Orientation::Rotate270FlipH,
      Orientation::Left => metadata::Orientation::Rotate270,
    }
  }

  /// 将图像旋转/翻转为正向
  pub fn apply(self, image: DynamicImage) -> DynamicImage {
    if self == Orientation::Up {
      return image;
    }
    let mut image = image;
    image.apply_orientation(self.to_image_orientation());
    image
  }
}

impl std::fmt::Display for Orientation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}({})", self, *self as u8)
  }
}

#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  /// 按排布与归一化参数展开为浮点张量数据
  pub fn to_tensor_values(&self, layout: TensorLayout, normalization: Normalization) -> Vec<f32> {
    match layout {
      TensorLayout::Nhwc => self.data.iter().map(|&v| normalization.apply(v)).collect(),
      TensorLayout::Nchw => {
        let spatial = self.height * self.width;
        let mut values = vec![0f32; RGB_CHANNELS * spatial];
        for (idx, pixel) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
          for (c, &value) in pixel.iter().enumerate() {
            values[c * spatial + idx] = normalization.apply(value);
          }
        }
        values
      }
    }
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

/// 缩放到模型输入尺寸（不保持宽高比）
pub fn resize_to_frame(image: &DynamicImage, width: u32, height: u32) -> RgbNhwcFrame {
  let rgb = if image.width() == width && image.height() == height {
    image.to_rgb8()
  } else {
    image
      .resize_exact(width, height, FilterType::Triangle)
      .to_rgb8()
  };
  RgbNhwcFrame::from(rgb)
}
