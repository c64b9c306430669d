// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/json_record.rs - JSON 行检测记录输出
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

use std::{
  fs::File,
  io::{BufWriter, Write},
  sync::Mutex,
};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::Render,
  url_path,
};

#[derive(Error, Debug)]
pub enum JsonRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("输出已被占用")]
  Poisoned,
}

#[derive(Serialize)]
struct DetectionRecord {
  class_id: u32,
  label: String,
  score: f32,
  bbox: [f32; 4],
  index: usize,
}

#[derive(Serialize)]
struct BatchRecord {
  timestamp: String,
  frame: u64,
  batch: usize,
  detections: Vec<DetectionRecord>,
}

struct Sink {
  writer: Box<dyn Write + Send>,
  frame: u64,
}

/// 每次渲染为每个 batch 项写一行 JSON；`json:-` 写到标准输出
pub struct JsonRecordOutput {
  sink: Mutex<Sink>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(JsonRecordOutputError::SchemeMismatch);
    }

    let path = url_path(url);
    let writer: Box<dyn Write + Send> = if path == "-" || path.is_empty() {
      debug!("JSON 记录写到标准输出");
      Box::new(std::io::stdout())
    } else {
      debug!("JSON 记录写到 {}", path);
      Box::new(BufWriter::new(File::create(&path)?))
    };

    Ok(Self::with_writer(writer))
  }
}

impl JsonRecordOutput {
  pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
    Self {
      sink: Mutex::new(Sink { writer, frame: 0 }),
    }
  }
}

impl<F, T: WithLabel> Render<F, Vec<DetectResult<T>>> for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn render_result(&self, _frame: &F, result: &Vec<DetectResult<T>>) -> Result<(), Self::Error> {
    let mut sink = self
      .sink
      .lock()
      .map_err(|_| JsonRecordOutputError::Poisoned)?;
    sink.frame += 1;
    let timestamp = Utc::now().to_rfc3339();

    for (batch, detections) in result.iter().enumerate() {
      let record = BatchRecord {
        timestamp: timestamp.clone(),
        frame: sink.frame,
        batch,
        detections: detections
          .items
          .iter()
          .map(|item| DetectionRecord {
            class_id: item.kind.to_label_id(),
            label: item.kind.to_label_str(),
            score: item.score,
            bbox: item.bbox,
            index: item.index,
          })
          .collect(),
      };
      serde_json::to_writer(&mut sink.writer, &record)?;
      sink.writer.write_all(b"\n")?;
    }
    sink.writer.flush()?;

    Ok(())
  }
}
