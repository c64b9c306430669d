// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess.rs - 检测后处理流水线
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

//! 原始检测头张量 → 分布解码 → 框组装 → 分数融合 → NMS。
//!
//! 每一步都是无状态的纯函数；锚点表以 `Arc` 只读共享，
//! 因此同一个 [`Postprocessor`] 可以在多个线程中同时处理不同的帧。

use std::sync::Arc;

use ndarray::{Array3, s};
use thiserror::Error;
use tracing::{debug, error};

use crate::{anchor::AnchorTable, tensor::HeadOutput};

pub mod bbox;
pub mod dfl;
pub mod fusion;
pub mod nms;

pub use self::bbox::BoxFormat;
pub use self::dfl::{BOX_SIDES, DEFAULT_BINS, DflDecoder};
pub use self::nms::{Detection, NmsConfig, non_max_suppression};

pub const COCO_CLASS_NUM: usize = 80;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostprocessError {
  #[error("invalid tensor shape: {0}")]
  InvalidShape(String),
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
  #[error("non-finite value in {stage} at {position:?}")]
  NonFinite {
    stage: &'static str,
    position: Vec<usize>,
  },
}

/// YOLOv8 检测头后处理器
#[derive(Debug, Clone)]
pub struct Postprocessor {
  anchors: Arc<AnchorTable>,
  decoder: DflDecoder,
  num_classes: usize,
}

impl Postprocessor {
  pub fn new(
    anchors: Arc<AnchorTable>,
    bins: usize,
    num_classes: usize,
  ) -> Result<Self, PostprocessError> {
    if num_classes == 0 {
      return Err(PostprocessError::InvalidConfig(
        "class count must be positive".to_string(),
      ));
    }
    let decoder = DflDecoder::new(bins)?;
    Ok(Self {
      anchors,
      decoder,
      num_classes,
    })
  }

  pub fn anchors(&self) -> &AnchorTable {
    &self.anchors
  }

  /// 检测头应有的通道数：分布通道 + 类别通道
  pub fn expected_channels(&self) -> usize {
    self.decoder.channels() + self.num_classes
  }

  fn check_head(&self, head: &HeadOutput) -> Result<(), PostprocessError> {
    if head.channels() != self.expected_channels() {
      error!(
        "检测头通道数 {} 与期望 {} ({} 分布 + {} 类别) 不符",
        head.channels(),
        self.expected_channels(),
        self.decoder.channels(),
        self.num_classes
      );
      return Err(PostprocessError::InvalidShape(format!(
        "head has {} channels, expected {} ({} distribution + {} class)",
        head.channels(),
        self.expected_channels(),
        self.decoder.channels(),
        self.num_classes
      )));
    }
    if head.slots() != self.anchors.len() {
      error!(
        "检测头槽位数 {} 与锚点表长度 {} 不符",
        head.slots(),
        self.anchors.len()
      );
      return Err(PostprocessError::InvalidShape(format!(
        "head has {} slots but anchor table has {}",
        head.slots(),
        self.anchors.len()
      )));
    }
    Ok(())
  }

  /// 解码并融合，返回 `[batch, N, 4 + nc]`：中心式像素框 + 各类别概率
  pub fn fuse(&self, head: &HeadOutput) -> Result<Array3<f32>, PostprocessError> {
    self.check_head(head)?;

    let view = head.view();
    let (batch, _, slots) = view.dim();
    let dist_channels = self.decoder.channels();

    let dist_logits = view.slice(s![.., ..dist_channels, ..]);
    let dist_logits = dist_logits
      .to_shape((batch, BOX_SIDES, self.decoder.bins(), slots))
      .map_err(|e| PostprocessError::InvalidShape(e.to_string()))?;
    let distances = self.decoder.decode(dist_logits.view())?;
    debug!("分布解码完成: {:?}", distances.dim());

    let boxes = bbox::decode_boxes(distances.view(), &self.anchors, BoxFormat::Xywh)?;
    let class_logits = view.slice(s![.., dist_channels.., ..]);
    fusion::fuse(boxes.view(), class_logits)
  }

  /// 完整后处理，每个 batch 元素返回一组检测结果
  pub fn run(
    &self,
    head: &HeadOutput,
    config: &NmsConfig,
  ) -> Result<Vec<Vec<Detection>>, PostprocessError> {
    config.validate()?;
    let fused = self.fuse(head)?;
    let detections = non_max_suppression(fused.view(), config)?;
    debug!(
      "后处理完成: {:?} 个检测结果",
      detections.iter().map(Vec::len).collect::<Vec<_>>()
    );
    Ok(detections)
  }
}
