// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/raw_tensor.rs - 原始 f32 张量文件输入
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

use ndarray::{ArrayD, IxDyn};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_path, utils::parse_list};

#[derive(Error, Debug)]
pub enum RawTensorInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Missing 'shape' query, e.g. raw:///out.bin?shape=1,144,80,80")]
  MissingShape,
  #[error("Invalid shape: {0}")]
  InvalidShape(String),
  #[error("File holds {actual} bytes, shape {shape:?} needs {expected}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

/// 小端 f32 连续存储的张量文件，形状由 URL 的 `shape` 参数给出
pub struct RawTensorInput {
  array: ArrayD<f32>,
}

impl FromUrlWithScheme for RawTensorInput {
  const SCHEME: &'static str = "raw";
}

impl FromUrl for RawTensorInput {
  type Error = RawTensorInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RawTensorInputError::SchemaMismatch);
    }

    let shape: Vec<usize> = url
      .query_pairs()
      .find(|(k, _)| k == "shape")
      .map(|(_, v)| parse_list(&v).map_err(|e| RawTensorInputError::InvalidShape(e.to_string())))
      .ok_or(RawTensorInputError::MissingShape)??;
    if shape.is_empty() || shape.contains(&0) {
      return Err(RawTensorInputError::InvalidShape(format!("{:?}", shape)));
    }

    let expected = shape
      .iter()
      .try_fold(std::mem::size_of::<f32>(), |acc, &dim| acc.checked_mul(dim))
      .ok_or_else(|| RawTensorInputError::InvalidShape(format!("{:?} is too large", shape)))?;

    let path = url_path(url);
    let bytes = std::fs::read(&path)?;
    if bytes.len() != expected {
      error!("张量文件 {} 长度 {} 与形状 {:?} 不符", path, bytes.len(), shape);
      return Err(RawTensorInputError::LengthMismatch {
        shape,
        expected,
        actual: bytes.len(),
      });
    }

    let data: Vec<f32> = bytes
      .chunks_exact(4)
      .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect();
    let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
      .map_err(|e| RawTensorInputError::InvalidShape(e.to_string()))?;
    debug!("读取张量 {}: {:?}", path, shape);

    Ok(Self { array })
  }
}

impl RawTensorInput {
  pub fn shape(&self) -> &[usize] {
    self.array.shape()
  }

  pub fn into_array(self) -> ArrayD<f32> {
    self.array
  }
}
