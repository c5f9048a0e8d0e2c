// 该文件是 Shibie （识别） 项目的一部分。
// src/bin/recognize_video.rs - 视频文件识别
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
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::info;

use shibie::{
  VideoRecognizer,
  output::{OutputWrapper, Render},
  recognizer::Aggregation,
};

/// Shibie 视频识别参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径（.onnx / .pb / .rknn）或模型 URL
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 标签文件路径，每行一个类别
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 待识别的视频文件
  #[arg(long, value_name = "VIDEO")]
  pub video: PathBuf,
  /// 每秒采样帧数
  #[arg(long, default_value_t = 1.0)]
  pub fps: f32,
  /// 最多处理的帧数
  #[arg(long)]
  pub max_frames: Option<usize>,
  /// 多帧得分合并方式: mean / max
  #[arg(long, default_value = "mean")]
  pub aggregate: String,
  /// 输出逐帧结果而不合并
  #[arg(long)]
  pub per_frame: bool,
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

  let aggregation = Aggregation::parse(&args.aggregate)
    .ok_or_else(|| anyhow!("无法识别的合并方式: {}", args.aggregate))?;
  info!("模型文件路径: {}", args.model.display());
  info!("输入视频: {}", args.video.display());

  let recognizer = VideoRecognizer::new(&args.model, &args.labels)?
    .fps(args.fps)?
    .max_frames(args.max_frames)
    .aggregation(aggregation);
  let output = OutputWrapper::parse(&args.output)?;
  let source = args.video.display().to_string();

  let now = std::time::Instant::now();
  let stop = Arc::new(AtomicBool::new(false));
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，停止解码并汇总已处理的帧...");
      stop.store(true, Ordering::SeqCst);
    })?;
  }

  if args.per_frame {
    let results =
      recognizer.recognize_frames_until(&args.video, args.max_results, args.threshold, &stop)?;
    info!("识别完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&source, results.as_slice())?;
    return Ok(());
  }

  let results =
    recognizer.recognize_until(&args.video, args.max_results, args.threshold, &stop)?;
  info!("识别完成，耗时: {:.2?}", now.elapsed());
  output.render_result(&source, results.as_slice())?;

  Ok(())
}
