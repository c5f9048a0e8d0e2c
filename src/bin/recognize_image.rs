// 该文件是 Shibie （识别） 项目的一部分。
// src/bin/recognize_image.rs - 图像文件识别
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shibie::{ImageRecognizer, output::{OutputWrapper, Render}};

/// Shibie 图像识别参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径（.onnx / .pb / .rknn）或模型 URL
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 标签文件路径，每行一个类别
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 待识别的图像文件
  #[arg(long, value_name = "IMAGE")]
  pub image: PathBuf,
  /// 方形输入尺寸，覆盖模型默认值
  #[arg(long, value_name = "PIXELS")]
  pub input_size: Option<u32>,
  /// 归一化均值
  #[arg(long, requires = "std")]
  pub mean: Option<f32>,
  /// 归一化标准差
  #[arg(long, requires = "mean")]
  pub std: Option<f32>,
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

  info!("模型文件路径: {}", args.model.display());
  info!("标签文件路径: {}", args.labels.display());
  info!("输入图像: {}", args.image.display());

  let recognizer = match (args.mean, args.std) {
    (Some(mean), Some(std)) => {
      ImageRecognizer::with_normalization(&args.model, &args.labels, mean, std)?
    }
    _ => ImageRecognizer::new(&args.model, &args.labels)?,
  };
  let output = OutputWrapper::parse(&args.output)?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let results = match args.input_size {
    Some(size) => recognizer.recognize_image_with_input_size(
      &args.image,
      size,
      args.max_results,
      args.threshold,
    )?,
    None => recognizer.recognize_image(&args.image, args.max_results, args.threshold)?,
  };
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  output.render_result(&args.image.display().to_string(), results.as_slice())?;

  Ok(())
}
