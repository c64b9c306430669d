// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess/dfl.rs - 分布焦点损失 (DFL) 解码
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

use ndarray::{Array3, ArrayView1, ArrayView4, s};
use tracing::error;

use super::PostprocessError;

/// 左、上、右、下
pub const BOX_SIDES: usize = 4;
pub const DEFAULT_BINS: usize = 16;

/// 将每条边的离散分布转换为连续距离：对 bins 轴做 softmax 后求期望。
///
/// 等价于权重固定为 `[0, 1, ..., bins - 1]` 的 1x1 卷积，不含可学习参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DflDecoder {
  bins: usize,
}

impl Default for DflDecoder {
  fn default() -> Self {
    Self { bins: DEFAULT_BINS }
  }
}

impl DflDecoder {
  pub fn new(bins: usize) -> Result<Self, PostprocessError> {
    if bins == 0 {
      return Err(PostprocessError::InvalidConfig(
        "distribution bin count must be positive".to_string(),
      ));
    }
    Ok(Self { bins })
  }

  pub fn bins(&self) -> usize {
    self.bins
  }

  /// 分布部分占用的通道数
  pub fn channels(&self) -> usize {
    BOX_SIDES * self.bins
  }

  /// 输入 `[batch, 4, bins, N]`，输出 `[batch, 4, N]`
  pub fn decode(&self, logits: ArrayView4<f32>) -> Result<Array3<f32>, PostprocessError> {
    let (batch, sides, bins, slots) = logits.dim();
    if sides != BOX_SIDES || bins != self.bins {
      error!(
        "分布张量形状 {:?} 无效, 期望 [_, {}, {}, _]",
        logits.dim(),
        BOX_SIDES,
        self.bins
      );
      return Err(PostprocessError::InvalidShape(format!(
        "distribution logits are [{}, {}, {}, {}], expected [_, {}, {}, _]",
        batch, sides, bins, slots, BOX_SIDES, self.bins
      )));
    }

    let mut distances = Array3::zeros((batch, sides, slots));
    for b in 0..batch {
      for side in 0..sides {
        for slot in 0..slots {
          distances[[b, side, slot]] = expectation(logits.slice(s![b, side, .., slot]))
            .ok_or_else(|| PostprocessError::NonFinite {
              stage: "distribution decoding",
              position: vec![b, side, slot],
            })?;
        }
      }
    }
    Ok(distances)
  }
}

/// softmax 期望；减去最大值保证数值稳定，任何非有限输入返回 None
fn expectation(logits: ArrayView1<f32>) -> Option<f32> {
  let mut max = f32::NEG_INFINITY;
  for &logit in logits.iter() {
    if !logit.is_finite() {
      return None;
    }
    max = max.max(logit);
  }

  let mut sum = 0.0f32;
  let mut weighted = 0.0f32;
  for (bin, &logit) in logits.iter().enumerate() {
    let e = (logit - max).exp();
    sum += e;
    weighted += e * bin as f32;
  }
  Some(weighted / sum)
}
