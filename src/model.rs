// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型
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

use crate::{postprocess::Detection, preprocess::ResizeInfo};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T: WithLabel> DetectResult<T> {
  pub fn from_detections(detections: Vec<Detection>) -> Self {
    let items = detections
      .into_iter()
      .map(|det| DetectItem {
        kind: T::from_label_id(det.class_id as u32),
        score: det.score,
        bbox: det.bbox,
        index: det.index,
      })
      .collect();
    Self { items }
  }
}

impl<T: Clone> DetectResult<T> {
  /// 将框从模型输入帧映射回源帧
  pub fn rescale(&self, info: &ResizeInfo) -> Self {
    let items = self
      .items
      .iter()
      .map(|item| DetectItem {
        bbox: info.restore_box(item.bbox),
        ..item.clone()
      })
      .collect();
    Self { items }
  }
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CocoLabel(pub u32);

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> String {
    COCO_CLASSES
      .get(self.0 as usize)
      .unwrap_or(&"unknown")
      .to_string()
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Self {
    CocoLabel(id)
  }
}

mod yolov8;
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};
