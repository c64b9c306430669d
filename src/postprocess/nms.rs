// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess/nms.rs - 非极大值抑制
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

use ndarray::{ArrayView2, ArrayView3, Axis, s};
use tracing::{debug, warn};

use super::{
  BOX_SIDES, PostprocessError,
  bbox::{iou, xywh2xyxy},
};

pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
pub const DEFAULT_MAX_DET: usize = 300;
/// 进入贪心抑制的候选框上限
pub const DEFAULT_MAX_NMS: usize = 30000;

/// NMS 参数，每次调用传入
#[derive(Debug, Clone, PartialEq)]
pub struct NmsConfig {
  pub conf_threshold: f32,
  pub iou_threshold: f32,
  pub max_det: usize,
  pub max_nms: usize,
  /// 只保留这些类别；None 表示全部类别
  pub classes: Option<Vec<usize>>,
  /// 为 true 时跨类别抑制
  pub agnostic: bool,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self {
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_det: DEFAULT_MAX_DET,
      max_nms: DEFAULT_MAX_NMS,
      classes: None,
      agnostic: false,
    }
  }
}

impl NmsConfig {
  pub fn conf_threshold(mut self, threshold: f32) -> Self {
    self.conf_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn max_det(mut self, max_det: usize) -> Self {
    self.max_det = max_det;
    self
  }

  pub fn max_nms(mut self, max_nms: usize) -> Self {
    self.max_nms = max_nms;
    self
  }

  pub fn classes(mut self, classes: Option<Vec<usize>>) -> Self {
    self.classes = classes;
    self
  }

  pub fn agnostic(mut self, agnostic: bool) -> Self {
    self.agnostic = agnostic;
    self
  }

  pub fn validate(&self) -> Result<(), PostprocessError> {
    if !(0.0..=1.0).contains(&self.conf_threshold) {
      return Err(PostprocessError::InvalidConfig(format!(
        "confidence threshold {} is outside [0, 1]",
        self.conf_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(PostprocessError::InvalidConfig(format!(
        "IoU threshold {} is outside [0, 1]",
        self.iou_threshold
      )));
    }
    if self.max_det == 0 {
      return Err(PostprocessError::InvalidConfig(
        "max_det must be positive".to_string(),
      ));
    }
    if self.max_nms == 0 {
      return Err(PostprocessError::InvalidConfig(
        "max_nms must be positive".to_string(),
      ));
    }
    Ok(())
  }

  fn accepts_class(&self, class_id: usize) -> bool {
    self
      .classes
      .as_ref()
      .is_none_or(|classes| classes.contains(&class_id))
  }
}

/// 单个检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  /// [x_min, y_min, x_max, y_max]，模型输入帧的像素坐标
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_id: usize,
  /// 在过滤前行序列中的位置
  pub index: usize,
}

/// 对 `[batch, N, 4 + nc]` 的融合结果逐个 batch 元素执行 NMS
pub fn non_max_suppression(
  prediction: ArrayView3<f32>,
  config: &NmsConfig,
) -> Result<Vec<Vec<Detection>>, PostprocessError> {
  config.validate()?;

  let (_, _, columns) = prediction.dim();
  if columns <= BOX_SIDES {
    return Err(PostprocessError::InvalidShape(format!(
      "prediction rows have {} columns, need at least {}",
      columns,
      BOX_SIDES + 1
    )));
  }

  prediction
    .axis_iter(Axis(0))
    .enumerate()
    .map(|(b, rows)| suppress(b, rows, config))
    .collect()
}

fn suppress(
  batch_index: usize,
  rows: ArrayView2<f32>,
  config: &NmsConfig,
) -> Result<Vec<Detection>, PostprocessError> {
  let mut candidates = Vec::new();

  for (index, row) in rows.axis_iter(Axis(0)).enumerate() {
    if let Some(column) = row.iter().position(|v| !v.is_finite()) {
      return Err(PostprocessError::NonFinite {
        stage: "non-max suppression",
        position: vec![batch_index, index, column],
      });
    }

    // 取最大类别概率作为置信度，并列时取较小的类别编号
    let mut score = f32::NEG_INFINITY;
    let mut class_id = 0usize;
    for (c, &p) in row.slice(s![BOX_SIDES..]).iter().enumerate() {
      if p > score {
        score = p;
        class_id = c;
      }
    }

    if score < config.conf_threshold || !config.accepts_class(class_id) {
      continue;
    }

    candidates.push(Detection {
      bbox: xywh2xyxy([row[0], row[1], row[2], row[3]]),
      score,
      class_id,
      index,
    });
  }

  if candidates.is_empty() {
    return Ok(Vec::new());
  }

  // 稳定排序：置信度相同时原始序号小者在前
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  if candidates.len() > config.max_nms {
    warn!(
      "候选框数量 {} 超过上限 {}，仅保留置信度最高的部分",
      candidates.len(),
      config.max_nms
    );
    candidates.truncate(config.max_nms);
  }

  let mut suppressed = vec![false; candidates.len()];
  let mut keep = Vec::with_capacity(config.max_det.min(candidates.len()));

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    let best = candidates[i];
    keep.push(best);
    if keep.len() >= config.max_det {
      break;
    }

    for j in (i + 1)..candidates.len() {
      if suppressed[j] {
        continue;
      }
      let other = &candidates[j];
      if !config.agnostic && other.class_id != best.class_id {
        continue;
      }
      if iou(best.bbox, other.bbox) > config.iou_threshold {
        suppressed[j] = true;
      }
    }
  }

  debug!(
    "batch {}: {} 个候选框, 保留 {} 个",
    batch_index,
    candidates.len(),
    keep.len()
  );
  Ok(keep)
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array3;

  /// 由 (xyxy, 各类别概率) 构造融合行
  fn rows(items: &[([f32; 4], &[f32])]) -> Array3<f32> {
    let classes = items[0].1.len();
    let mut data = Array3::zeros((1, items.len(), BOX_SIDES + classes));
    for (i, (xyxy, probs)) in items.iter().enumerate() {
      let [x1, y1, x2, y2] = *xyxy;
      data[[0, i, 0]] = (x1 + x2) / 2.0;
      data[[0, i, 1]] = (y1 + y2) / 2.0;
      data[[0, i, 2]] = x2 - x1;
      data[[0, i, 3]] = y2 - y1;
      for (c, &p) in probs.iter().enumerate() {
        data[[0, i, BOX_SIDES + c]] = p;
      }
    }
    data
  }

  #[test]
  fn overlapping_same_class_keeps_the_best() {
    // IoU = 90 / 100 = 0.9
    let data = rows(&[
      ([0.0, 0.0, 10.0, 10.0], &[0.8, 0.0]),
      ([0.0, 0.0, 10.0, 9.0], &[0.9, 0.0]),
    ]);
    let result = non_max_suppression(data.view(), &NmsConfig::default()).unwrap();
    assert_eq!(result[0].len(), 1);
    assert_eq!(result[0][0].score, 0.9);
    assert_eq!(result[0][0].index, 1);
  }

  #[test]
  fn different_classes_depend_on_agnostic_flag() {
    let data = rows(&[
      ([0.0, 0.0, 10.0, 10.0], &[0.9, 0.0]),
      ([0.0, 0.0, 10.0, 10.0], &[0.0, 0.8]),
    ]);

    let aware = non_max_suppression(data.view(), &NmsConfig::default()).unwrap();
    assert_eq!(aware[0].len(), 2);

    let agnostic = non_max_suppression(data.view(), &NmsConfig::default().agnostic(true)).unwrap();
    assert_eq!(agnostic[0].len(), 1);
    assert_eq!(agnostic[0][0].class_id, 0);
  }

  #[test]
  fn all_below_threshold_is_empty() {
    let data = rows(&[
      ([0.0, 0.0, 10.0, 10.0], &[0.1, 0.2]),
      ([5.0, 5.0, 20.0, 20.0], &[0.05, 0.0]),
    ]);
    let result = non_max_suppression(data.view(), &NmsConfig::default()).unwrap();
    assert_eq!(result, vec![Vec::new()]);
  }

  #[test]
  fn threshold_is_inclusive() {
    let data = rows(&[([0.0, 0.0, 10.0, 10.0], &[0.25])]);
    let result = non_max_suppression(data.view(), &NmsConfig::default()).unwrap();
    assert_eq!(result[0].len(), 1);
  }

  #[test]
  fn ties_prefer_lower_index() {
    let data = rows(&[
      ([0.0, 0.0, 10.0, 10.0], &[0.6]),
      ([0.0, 0.0, 10.0, 10.0], &[0.6]),
      ([0.0, 0.0, 10.0, 10.0], &[0.6]),
    ]);
    let result = non_max_suppression(data.view(), &NmsConfig::default()).unwrap();
    assert_eq!(result[0].len(), 1);
    assert_eq!(result[0][0].index, 0);
  }

  #[test]
  fn class_allow_list_filters_labels() {
    let data = rows(&[
      ([0.0, 0.0, 10.0, 10.0], &[0.9, 0.0, 0.0]),
      ([20.0, 20.0, 30.0, 30.0], &[0.0, 0.0, 0.7]),
    ]);
    let config = NmsConfig::default().classes(Some(vec![2]));
    let result = non_max_suppression(data.view(), &config).unwrap();
    assert_eq!(result[0].len(), 1);
    assert_eq!(result[0][0].class_id, 2);
  }

  #[test]
  fn max_det_caps_output() {
    let items: Vec<([f32; 4], &[f32])> = (0..10)
      .map(|i| {
        let x = i as f32 * 20.0;
        ([x, 0.0, x + 10.0, 10.0], &[0.5f32] as &[f32])
      })
      .collect();
    let data = rows(&items);
    let result = non_max_suppression(data.view(), &NmsConfig::default().max_det(3)).unwrap();
    assert_eq!(result[0].len(), 3);
    assert_eq!(
      result[0].iter().map(|d| d.index).collect::<Vec<_>>(),
      vec![0, 1, 2]
    );
  }

  #[test]
  fn zero_max_det_is_invalid_configuration() {
    let data = rows(&[([0.0, 0.0, 10.0, 10.0], &[0.9])]);
    let err = non_max_suppression(data.view(), &NmsConfig::default().max_det(0)).unwrap_err();
    assert!(matches!(err, PostprocessError::InvalidConfig(_)));
    assert!(err.to_string().starts_with("invalid configuration"));
  }

  #[test]
  fn nan_thresholds_are_rejected() {
    assert!(NmsConfig::default().conf_threshold(f32::NAN).validate().is_err());
    assert!(NmsConfig::default().iou_threshold(1.5).validate().is_err());
  }

  #[test]
  fn nan_box_is_reported() {
    let mut data = rows(&[([0.0, 0.0, 10.0, 10.0], &[0.9])]);
    data[[0, 0, 2]] = f32::NAN;
    assert!(matches!(
      non_max_suppression(data.view(), &NmsConfig::default()),
      Err(PostprocessError::NonFinite { .. })
    ));
  }
}
