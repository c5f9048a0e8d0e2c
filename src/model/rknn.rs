// 该文件是 Shibie （识别） 项目的一部分。
// src/model/rknn.rs - RKNPU 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, Normalization, RgbNhwcFrame},
  model::{Model, ModelError, ModelOptions},
  url_file_path,
};

const RKNN_NUM_INPUTS: u32 = 1;

/// RKNN 分类模型
///
/// 归一化参数在模型转换时已编译进模型，输入为 NHWC 排布的 u8 数据，
/// 因此 `infer` 忽略传入的 `Normalization`。
pub struct RknnModel {
  context: Context,
  options: ModelOptions,
  declared_size: Option<(u32, u32)>,
}

/// RKNN 输入属性的维度为 NHWC: dims[1] 为高，dims[2] 为宽
fn nhwc_input_size(dims: &[u32]) -> Option<(u32, u32)> {
  match dims {
    [_, height, width, _, ..] if *height > 0 && *width > 0 => Some((*width, *height)),
    _ => None,
  }
}

impl FromUrlWithScheme for RknnModel {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let options = ModelOptions::from_query(url)?;
    Self::load(&url_file_path(url), InitFlags::default(), options)
  }
}

impl RknnModel {
  pub fn load<P: AsRef<Path>>(
    path: P,
    flags: InitFlags,
    options: ModelOptions,
  ) -> Result<Self, ModelError> {
    let path = path.as_ref();
    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(ModelError::ModelInvalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    debug!("模型输入数量: {}, 输出数量: {}", num_inputs, num_outputs);

    if num_inputs != RKNN_NUM_INPUTS {
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs == 0 {
      return Err(ModelError::ModelInvalid("模型没有输出".to_string()));
    }

    let declared_size = context
      .input_attrs
      .first()
      .and_then(|attr| nhwc_input_size(&attr.dims));
    if let Some((width, height)) = declared_size {
      debug!("模型声明的输入尺寸: {}x{}", width, height);
    }

    info!("模型加载完成");
    Ok(RknnModel {
      context,
      options,
      declared_size,
    })
  }
}

impl Model for RknnModel {
  type Error = ModelError;

  fn infer(
    &self,
    frame: &RgbNhwcFrame,
    _normalization: Normalization,
  ) -> Result<Vec<f32>, Self::Error> {
    debug!("设置模型输入");
    self
      .context
      .set_input(0, frame.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let mut scores = output
      .get_f32(0)
      .map_err(|e| ModelError::ModelInvalid(format!("获取第 0 个输出失败: {}", e)))?
      .to_vec();
    debug!("模型输出长度: {}", scores.len());

    self.options.activation.apply(&mut scores);
    Ok(scores)
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    self.options.input_size.or(self.declared_size)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn input_size_from_nhwc_dims() {
    assert_eq!(nhwc_input_size(&[1, 480, 640, 3]), Some((640, 480)));
    assert_eq!(nhwc_input_size(&[1, 0, 640, 3]), None);
    assert_eq!(nhwc_input_size(&[1, 3]), None);
  }
}
