// 该文件是 Shibie （识别） 项目的一部分。
// src/bin/process_image.rs - 连续帧识别演示
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

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use image::ImageReader;
use tracing::info;

use shibie::{
  ImageProcessor,
  frame::Orientation,
  output::{OutputWrapper, Render},
};

/// 将同一张图像当作连续帧反复识别，观察帧间平滑的效果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径（.onnx / .pb / .rknn）或模型 URL
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 标签文件路径，每行一个类别
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 输入图像（不读取 EXIF 方向）
  #[arg(long, value_name = "IMAGE")]
  pub image: PathBuf,
  /// 图像方向: 1-8 或 up / down / left / right / *-mirrored
  #[arg(long, default_value = "up")]
  pub orientation: String,
  /// 重复识别次数
  #[arg(long, default_value_t = 3)]
  pub repeat: usize,
  /// 每隔多少帧重置一次，0 表示不重置
  #[arg(long, default_value_t = 0)]
  pub reset_every: usize,
  /// 平滑衰减系数，取值 [0, 1)
  #[arg(long, conflicts_with = "no_smoothing")]
  pub decay: Option<f32>,
  /// 关闭帧间平滑
  #[arg(long)]
  pub no_smoothing: bool,
  /// 最多返回的结果数
  #[arg(long, default_value_t = 5)]
  pub max_results: usize,
  /// 置信度阈值
  #[arg(long, default_value_t = 0.1)]
  pub threshold: f32,
  /// 输出地址: console:// / stdout:// / json:///path
  #[arg(long, value_name = "OUTPUT", default_value = "console://")]
  pub output: String,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let orientation = Orientation::parse(&args.orientation)
    .ok_or_else(|| anyhow!("无法识别的图像方向: {}", args.orientation))?;
  info!("模型文件路径: {}", args.model.display());
  info!("输入图像: {} ({})", args.image.display(), orientation);

  let mut processor = ImageProcessor::new(&args.model, &args.labels)?;
  if args.no_smoothing {
    processor = processor.smoothing(None)?;
  } else if let Some(decay) = args.decay {
    processor = processor.smoothing(Some(decay))?;
  }
  let output = OutputWrapper::parse(&args.output)?;

  let image = ImageReader::open(&args.image)?
    .with_guessed_format()?
    .decode()?;

  for round in 0..args.repeat {
    if args.reset_every > 0 && round > 0 && round % args.reset_every == 0 {
      processor.reset()?;
    }
    let now = std::time::Instant::now();
    let results = processor.recognize(&image, orientation, args.max_results, args.threshold)?;
    info!("第 {} 帧推理完成，耗时: {:.2?}", round + 1, now.elapsed());
    output.render_result(&format!("{}#{}", args.image.display(), round + 1), results.as_slice())?;
  }

  Ok(())
}
