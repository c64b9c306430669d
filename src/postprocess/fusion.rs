// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess/fusion.rs - 框与类别分数融合
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

use ndarray::{Array3, ArrayView3};

use super::{BOX_SIDES, PostprocessError};

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 拼接 `[batch, 4, N]` 框与 `[batch, nc, N]` 类别 logits，
/// 输出 `[batch, N, 4 + nc]`，每行为一个槽位。
///
/// 类别分数逐类独立做 sigmoid（多标签），而非 softmax。
pub fn fuse(
  boxes: ArrayView3<f32>,
  class_logits: ArrayView3<f32>,
) -> Result<Array3<f32>, PostprocessError> {
  let (batch, sides, slots) = boxes.dim();
  let (cls_batch, num_classes, cls_slots) = class_logits.dim();
  if sides != BOX_SIDES || cls_batch != batch || cls_slots != slots {
    return Err(PostprocessError::InvalidShape(format!(
      "boxes {:?} and class logits {:?} do not line up",
      boxes.dim(),
      class_logits.dim()
    )));
  }

  let mut fused = Array3::zeros((batch, slots, BOX_SIDES + num_classes));
  for b in 0..batch {
    for slot in 0..slots {
      for k in 0..BOX_SIDES {
        fused[[b, slot, k]] = boxes[[b, k, slot]];
      }
      for c in 0..num_classes {
        let logit = class_logits[[b, c, slot]];
        if !logit.is_finite() {
          return Err(PostprocessError::NonFinite {
            stage: "score fusion",
            position: vec![b, c, slot],
          });
        }
        fused[[b, slot, BOX_SIDES + c]] = sigmoid(logit);
      }
    }
  }
  Ok(fused)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rows_hold_box_then_probabilities() {
    let boxes = Array3::from_shape_vec((1, 4, 2), vec![1.0, 5.0, 2.0, 6.0, 3.0, 7.0, 4.0, 8.0]).unwrap();
    let logits = Array3::from_shape_vec((1, 2, 2), vec![0.0, 10.0, -10.0, 0.0]).unwrap();

    let fused = fuse(boxes.view(), logits.view()).unwrap();
    assert_eq!(fused.dim(), (1, 2, 6));
    assert_eq!(fused.slice(ndarray::s![0, 0, ..4]).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(fused.slice(ndarray::s![0, 1, ..4]).to_vec(), vec![5.0, 6.0, 7.0, 8.0]);
    assert_eq!(fused[[0, 0, 4]], 0.5);
    assert!(fused[[0, 1, 4]] > 0.9999);
    assert!(fused[[0, 0, 5]] < 0.0001);
  }

  #[test]
  fn class_probabilities_are_independent() {
    let boxes = Array3::<f32>::zeros((1, 4, 1));
    let logits = Array3::from_elem((1, 3, 1), 5.0f32);
    let fused = fuse(boxes.view(), logits.view()).unwrap();
    let total: f32 = fused.slice(ndarray::s![0, 0, 4..]).sum();
    assert!(total > 2.9);
  }

  #[test]
  fn misaligned_inputs_are_rejected() {
    let boxes = Array3::<f32>::zeros((1, 4, 3));
    let logits = Array3::<f32>::zeros((1, 80, 2));
    assert!(matches!(
      fuse(boxes.view(), logits.view()),
      Err(PostprocessError::InvalidShape(_))
    ));
  }
}
