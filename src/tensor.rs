// 该文件是 Qianli （千里眼） 项目的一部分。
// src/tensor.rs - 模型输入/输出张量定义
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

use std::{io::Write, path::Path};

use ndarray::{Array3, Array4, ArrayD, ArrayView3, Axis, Ix3, Ix4, concatenate};
use thiserror::Error;
use tracing::{debug, error};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("张量维度不支持: {0:?}，应为 [batch, C, N] 或 [batch, C, H, W]")]
  UnsupportedShape(Vec<usize>),
  #[error("检测头之间形状不一致: 期望 batch={batch}, C={channels}，实际 {actual:?}")]
  LevelMismatch {
    batch: usize,
    channels: usize,
    actual: Vec<usize>,
  },
  #[error("没有任何检测头输出")]
  NoLevels,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 检测头原始输出，形状 `[batch, 4 * bins + nc, N]`。
///
/// N 为所有特征层槽位数之和，顺序与锚点表一致。
#[derive(Debug, Clone, PartialEq)]
pub struct HeadOutput {
  data: Array3<f32>,
}

impl HeadOutput {
  pub fn new(data: Array3<f32>) -> Self {
    Self { data }
  }

  /// 接受已经拼接好的三维张量，或单个四维特征层张量
  pub fn from_array(array: ArrayD<f32>) -> Result<Self, TensorError> {
    match array.ndim() {
      3 => {
        let data = array
          .into_dimensionality::<Ix3>()
          .map_err(|_| TensorError::UnsupportedShape(vec![]))?;
        Ok(Self { data })
      }
      4 => Self::from_levels(vec![array]),
      _ => Err(TensorError::UnsupportedShape(array.shape().to_vec())),
    }
  }

  /// 将多个 `[batch, C, h, w]` 特征层展平为 `[batch, C, h*w]` 并按给定顺序拼接
  pub fn from_levels(levels: Vec<ArrayD<f32>>) -> Result<Self, TensorError> {
    let mut flattened = Vec::with_capacity(levels.len());
    let mut expected: Option<(usize, usize)> = None;

    for level in levels {
      let shape = level.shape().to_vec();
      let level = match level.ndim() {
        3 => level
          .into_dimensionality::<Ix3>()
          .map_err(|_| TensorError::UnsupportedShape(shape.clone()))?,
        4 => {
          let level = level
            .into_dimensionality::<Ix4>()
            .map_err(|_| TensorError::UnsupportedShape(shape.clone()))?;
          let (b, c, h, w) = level.dim();
          level
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((b, c, h * w))
            .map_err(|_| TensorError::UnsupportedShape(shape.clone()))?
        }
        _ => return Err(TensorError::UnsupportedShape(shape)),
      };

      let (b, c, _) = level.dim();
      match expected {
        None => expected = Some((b, c)),
        Some((batch, channels)) if batch != b || channels != c => {
          error!("检测头形状不一致: 期望 [{}, {}, _], 实际 {:?}", batch, channels, shape);
          return Err(TensorError::LevelMismatch {
            batch,
            channels,
            actual: shape,
          });
        }
        Some(_) => {}
      }
      debug!("检测头形状 {:?} -> {:?}", shape, level.dim());
      flattened.push(level);
    }

    if flattened.is_empty() {
      return Err(TensorError::NoLevels);
    }

    let views: Vec<_> = flattened.iter().map(|level| level.view()).collect();
    let data = concatenate(Axis(2), &views).map_err(|_| TensorError::NoLevels)?;
    Ok(Self { data })
  }

  pub fn batch(&self) -> usize {
    self.data.dim().0
  }

  pub fn channels(&self) -> usize {
    self.data.dim().1
  }

  pub fn slots(&self) -> usize {
    self.data.dim().2
  }

  pub fn view(&self) -> ArrayView3<'_, f32> {
    self.data.view()
  }
}

/// 预处理后的模型输入，形状 `[1, 3, H, W]`，取值范围 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  data: Array4<f32>,
}

impl InputTensor {
  pub fn zeros(width: usize, height: usize) -> Self {
    Self {
      data: Array4::zeros((1, RGB_CHANNELS, height, width)),
    }
  }

  pub fn shape(&self) -> [usize; 4] {
    let (n, c, h, w) = self.data.dim();
    [n, c, h, w]
  }

  pub fn as_array(&self) -> &Array4<f32> {
    &self.data
  }

  pub fn as_array_mut(&mut self) -> &mut Array4<f32> {
    &mut self.data
  }

  /// 以小端 f32 序列写出，供推理引擎直接读取
  pub fn write_raw<P: AsRef<Path>>(&self, path: P) -> Result<(), TensorError> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for value in self.data.iter() {
      file.write_all(&value.to_le_bytes())?;
    }
    file.flush()?;
    Ok(())
  }
}
