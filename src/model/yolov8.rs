// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测头后处理模型
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

use std::{marker::PhantomData, sync::Arc};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  anchor::{AnchorError, AnchorTable, DEFAULT_INPUT_SIZE, DEFAULT_STRIDES},
  model::{DetectResult, Model, WithLabel},
  postprocess::{COCO_CLASS_NUM, DEFAULT_BINS, NmsConfig, PostprocessError, Postprocessor},
  tensor::HeadOutput,
  utils::parse_list,
};

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("锚点表错误: {0}")]
  AnchorError(#[from] AnchorError),
  #[error("后处理错误: {0}")]
  PostprocessError(#[from] PostprocessError),
  #[error("URL 参数错误: {0}")]
  InvalidQuery(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

impl Yolov8Error {
  fn query(key: &str, value: &str) -> Self {
    Yolov8Error::InvalidQuery(format!("{}={}", key, value))
  }
}

/// YOLOv8 检测头后处理模型。
///
/// 推理由外部引擎完成，这里只消费检测头输出。
pub struct Yolov8<T> {
  post: Postprocessor,
  config: NmsConfig,
  _phantom: PhantomData<fn() -> T>,
}

#[derive(Debug, Clone)]
pub struct Yolov8Builder {
  anchors: Option<Arc<AnchorTable>>,
  config: NmsConfig,
  bins: usize,
  num_classes: usize,
}

impl Default for Yolov8Builder {
  fn default() -> Self {
    Self {
      anchors: None,
      config: NmsConfig::default(),
      bins: DEFAULT_BINS,
      num_classes: COCO_CLASS_NUM,
    }
  }
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  /// `yolov8:?conf=0.25&iou=0.7&max_det=300&classes=0,2&agnostic=true`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(Yolov8Error::SchemeMismatch);
    }

    let mut builder = Self::default();
    for (k, v) in url.query_pairs() {
      let config = builder.config.clone();
      builder.config = match k.as_ref() {
        "conf" => config.conf_threshold(v.parse().map_err(|_| Yolov8Error::query(&k, &v))?),
        "iou" => config.iou_threshold(v.parse().map_err(|_| Yolov8Error::query(&k, &v))?),
        "max_det" => config.max_det(v.parse().map_err(|_| Yolov8Error::query(&k, &v))?),
        "max_nms" => config.max_nms(v.parse().map_err(|_| Yolov8Error::query(&k, &v))?),
        // 空列表等同于不限制类别
        "classes" => {
          let classes: Vec<usize> = parse_list(&v).map_err(|_| Yolov8Error::query(&k, &v))?;
          config.classes((!classes.is_empty()).then_some(classes))
        }
        "agnostic" => config.agnostic(v.is_empty() || v.parse::<bool>().map_err(|_| Yolov8Error::query(&k, &v))?),
        "bins" => {
          builder.bins = v.parse().map_err(|_| Yolov8Error::query(&k, &v))?;
          config
        }
        "nc" => {
          builder.num_classes = v.parse().map_err(|_| Yolov8Error::query(&k, &v))?;
          config
        }
        _ => return Err(Yolov8Error::InvalidQuery(format!("未知参数 {}", k))),
      };
    }

    debug!("模型参数: {:?}", builder);
    Ok(builder)
  }
}

impl Yolov8Builder {
  pub fn new(anchors: AnchorTable) -> Self {
    Self::default().anchors(anchors)
  }

  pub fn anchors(mut self, anchors: AnchorTable) -> Self {
    self.anchors = Some(Arc::new(anchors));
    self
  }

  pub fn shared_anchors(mut self, anchors: Arc<AnchorTable>) -> Self {
    self.anchors = Some(anchors);
    self
  }

  pub fn config(mut self, config: NmsConfig) -> Self {
    self.config = config;
    self
  }

  pub fn bins(mut self, bins: usize) -> Self {
    self.bins = bins;
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn build<T: WithLabel>(self) -> Result<Yolov8<T>, Yolov8Error> {
    let anchors = match self.anchors {
      Some(anchors) => anchors,
      None => {
        info!(
          "未指定锚点表，按 {}x{} 输入与步长 {:?} 生成",
          DEFAULT_INPUT_SIZE.0, DEFAULT_INPUT_SIZE.1, DEFAULT_STRIDES
        );
        Arc::new(AnchorTable::for_input(
          DEFAULT_INPUT_SIZE.0,
          DEFAULT_INPUT_SIZE.1,
          &DEFAULT_STRIDES,
        )?)
      }
    };

    self.config.validate()?;
    let post = Postprocessor::new(anchors, self.bins, self.num_classes)?;
    info!(
      "模型构建完成: {} 个槽位, {} 个通道",
      post.anchors().len(),
      post.expected_channels()
    );

    Ok(Yolov8 {
      post,
      config: self.config,
      _phantom: PhantomData,
    })
  }
}

impl<T: WithLabel> Yolov8<T> {
  pub fn config(&self) -> &NmsConfig {
    &self.config
  }

  pub fn postprocessor(&self) -> &Postprocessor {
    &self.post
  }

  /// 使用调用方给定的 NMS 参数
  pub fn infer_with(
    &self,
    input: &HeadOutput,
    config: &NmsConfig,
  ) -> Result<Vec<DetectResult<T>>, Yolov8Error> {
    debug!(
      "后处理检测头输出: batch={}, C={}, N={}",
      input.batch(),
      input.channels(),
      input.slots()
    );
    let detections = self.post.run(input, config)?;
    let results: Vec<DetectResult<T>> = detections
      .into_iter()
      .map(DetectResult::from_detections)
      .collect();
    debug!(
      "检测到 {} 个物体",
      results.iter().map(DetectResult::len).sum::<usize>()
    );
    Ok(results)
  }
}

impl<T: WithLabel> Model for Yolov8<T> {
  type Input = HeadOutput;
  type Output = Vec<DetectResult<T>>;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.infer_with(input, &self.config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;
  use ndarray::Array3;

  #[test]
  fn url_query_sets_config() {
    let url = Url::parse("yolov8:?conf=0.5&iou=0.45&max_det=10&classes=0,2&agnostic").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(
      builder.config,
      NmsConfig::default()
        .conf_threshold(0.5)
        .iou_threshold(0.45)
        .max_det(10)
        .classes(Some(vec![0, 2]))
        .agnostic(true)
    );
  }

  #[test]
  fn empty_class_list_means_all_classes() {
    let url = Url::parse("yolov8:?classes=").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.config.classes, None);

    let url = Url::parse("yolov8:?classes=0,x").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::InvalidQuery(_))
    ));
  }

  #[test]
  fn url_rejects_unknown_keys_and_schemes() {
    let url = Url::parse("yolov8:?colour=red").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::InvalidQuery(_))
    ));
    let url = Url::parse("onnx:///model.onnx").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::SchemeMismatch)
    ));
  }

  #[test]
  fn build_without_anchors_uses_default_grid() {
    let model: Yolov8<CocoLabel> = Yolov8Builder::default().build().unwrap();
    assert_eq!(model.postprocessor().anchors().len(), 8400);
    assert_eq!(model.postprocessor().expected_channels(), 144);
  }

  #[test]
  fn build_rejects_invalid_config() {
    let builder = Yolov8Builder::default().config(NmsConfig::default().max_det(0));
    assert!(matches!(
      builder.build::<CocoLabel>(),
      Err(Yolov8Error::PostprocessError(PostprocessError::InvalidConfig(_)))
    ));
  }

  #[test]
  fn infer_labels_detections() {
    let anchors = AnchorTable::new(vec![[10.0, 10.0]], vec![32.0]).unwrap();
    let model: Yolov8<CocoLabel> = Yolov8Builder::new(anchors).build().unwrap();

    let mut data = Array3::from_elem((1, 144, 1), -20.0f32);
    for side in 0..4 {
      data[[0, side * 16 + 2, 0]] = 20.0;
    }
    data[[0, 64 + 2, 0]] = 3.0;

    let results = model.infer(&HeadOutput::new(data)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].len(), 1);
    assert_eq!(results[0].items[0].kind.to_label_str(), "car");
  }
}
