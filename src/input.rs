// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input.rs - 张量/图像输入
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
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{HeadOutput, TensorError},
};

mod raw_tensor;
pub use self::raw_tensor::{RawTensorInput, RawTensorInputError};

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Raw tensor input error: {0}")]
  RawTensorInputError(#[from] RawTensorInputError),
  #[error("Tensor error: {0}")]
  TensorError(#[from] TensorError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("No input given")]
  NoInput,
}

/// 检测头输入：一个或多个 `raw://` 张量，按给定顺序组成一个 [`HeadOutput`]。
///
/// 作为迭代器只产生一次。
pub struct TensorInput {
  head: Option<HeadOutput>,
}

impl FromUrl for TensorInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Self::from_urls(std::slice::from_ref(url))
  }
}

impl TensorInput {
  pub fn from_urls(urls: &[Url]) -> Result<Self, InputError> {
    if urls.is_empty() {
      return Err(InputError::NoInput);
    }

    let mut levels = Vec::with_capacity(urls.len());
    for url in urls {
      if url.scheme() != RawTensorInput::SCHEME {
        return Err(InputError::SchemeMismatch);
      }
      levels.push(RawTensorInput::from_url(url)?.into_array());
    }

    let head = HeadOutput::from_levels(levels)?;
    info!(
      "检测头输入: batch={}, C={}, N={}",
      head.batch(),
      head.channels(),
      head.slots()
    );
    Ok(Self { head: Some(head) })
  }
}

impl Iterator for TensorInput {
  type Item = HeadOutput;

  fn next(&mut self) -> Option<Self::Item> {
    self.head.take()
  }
}
