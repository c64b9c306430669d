// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess/bbox.rs - 边界框组装与几何运算
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
use tracing::error;

use super::{BOX_SIDES, PostprocessError};
use crate::anchor::AnchorTable;

/// 边界框表示方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxFormat {
  /// [cx, cy, w, h]
  #[default]
  Xywh,
  /// [x_min, y_min, x_max, y_max]
  Xyxy,
}

/// 由锚点和四边距离 [l, t, r, b] 组装边界框，并乘以步长换算为像素
pub fn dist2bbox(distance: [f32; 4], anchor: [f32; 2], stride: f32, format: BoxFormat) -> [f32; 4] {
  let [l, t, r, b] = distance;
  let [ax, ay] = anchor;
  let (x1, y1) = (ax - l, ay - t);
  let (x2, y2) = (ax + r, ay + b);

  let cell = match format {
    BoxFormat::Xyxy => [x1, y1, x2, y2],
    BoxFormat::Xywh => [(x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1],
  };
  cell.map(|v| v * stride)
}

/// 输入 `[batch, 4, N]` 距离，输出 `[batch, 4, N]` 像素坐标框
pub fn decode_boxes(
  distances: ArrayView3<f32>,
  anchors: &AnchorTable,
  format: BoxFormat,
) -> Result<Array3<f32>, PostprocessError> {
  let (batch, sides, slots) = distances.dim();
  if sides != BOX_SIDES {
    return Err(PostprocessError::InvalidShape(format!(
      "distances have {} sides, expected {}",
      sides, BOX_SIDES
    )));
  }
  if slots != anchors.len() {
    error!("距离槽位数 {} 与锚点表长度 {} 不符", slots, anchors.len());
    return Err(PostprocessError::InvalidShape(format!(
      "distances have {} slots but anchor table has {}",
      slots,
      anchors.len()
    )));
  }

  let mut boxes = Array3::zeros((batch, BOX_SIDES, slots));
  for b in 0..batch {
    for (slot, (anchor, stride)) in anchors.iter().enumerate() {
      let distance = [
        distances[[b, 0, slot]],
        distances[[b, 1, slot]],
        distances[[b, 2, slot]],
        distances[[b, 3, slot]],
      ];
      let decoded = dist2bbox(distance, anchor, stride, format);
      for (k, value) in decoded.into_iter().enumerate() {
        boxes[[b, k, slot]] = value;
      }
    }
  }
  Ok(boxes)
}

pub fn xywh2xyxy([cx, cy, w, h]: [f32; 4]) -> [f32; 4] {
  [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

pub fn xyxy2xywh([x1, y1, x2, y2]: [f32; 4]) -> [f32; 4] {
  [(x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1]
}

pub fn box_area([x1, y1, x2, y2]: [f32; 4]) -> f32 {
  (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
}

/// 两个角点式框的交并比；并集为零时返回 0
pub fn iou(a: [f32; 4], b: [f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = box_area(a) + box_area(b) - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
