// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

#[cfg(any(feature = "json_record", feature = "text_record"))]
use crate::FromUrlWithScheme;
use crate::{
  FromUrl,
  model::{DetectResult, WithLabel},
  preprocess::ResizeInfo,
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "json_record")]
mod json_record;
#[cfg(feature = "json_record")]
pub use self::json_record::{JsonRecordOutput, JsonRecordOutputError};

#[cfg(feature = "text_record")]
mod record;
#[cfg(feature = "text_record")]
pub use self::record::{RecordOutput, RecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "json_record")]
  #[error("JSON 记录输出错误: {0}")]
  JsonRecordOutputError(#[from] JsonRecordOutputError),
  #[cfg(feature = "text_record")]
  #[error("文本记录输出错误: {0}")]
  RecordOutputError(#[from] RecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "json_record")]
  JsonRecordOutput(JsonRecordOutput),
  #[cfg(feature = "text_record")]
  RecordOutput(RecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "json_record")]
      JsonRecordOutput::SCHEME => {
        let output = JsonRecordOutput::from_url(url)?;
        Ok(OutputWrapper::JsonRecordOutput(output))
      }
      #[cfg(feature = "text_record")]
      RecordOutput::SCHEME => {
        let output = RecordOutput::from_url(url)?;
        Ok(OutputWrapper::RecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<F, T: WithLabel> Render<F, Vec<DetectResult<T>>> for OutputWrapper {
  type Error = OutputError;

  #[allow(unused_variables)]
  fn render_result(&self, frame: &F, result: &Vec<DetectResult<T>>) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "json_record")]
      OutputWrapper::JsonRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "text_record")]
      OutputWrapper::RecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

/// 渲染前先把框从模型输入帧映射回源帧
pub struct RescaleOutput<O> {
  inner: O,
  info: ResizeInfo,
}

impl<O> RescaleOutput<O> {
  pub fn new(inner: O, info: ResizeInfo) -> Self {
    Self { inner, info }
  }
}

impl<F, T, O> Render<F, Vec<DetectResult<T>>> for RescaleOutput<O>
where
  T: WithLabel + Clone,
  O: Render<F, Vec<DetectResult<T>>>,
{
  type Error = O::Error;

  fn render_result(&self, frame: &F, result: &Vec<DetectResult<T>>) -> Result<(), Self::Error> {
    let rescaled: Vec<DetectResult<T>> = result.iter().map(|r| r.rescale(&self.info)).collect();
    self.inner.render_result(frame, &rescaled)
  }
}
