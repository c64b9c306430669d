// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/record.rs - 文本检测记录输出
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::Render,
  url_path,
};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知标签格式: {0}")]
  InvalidLabel(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 每行 `name, score, x1, y1, x2, y2`；多个 batch 项之间空一行。
///
/// 每次渲染覆盖整个文件。
pub struct RecordOutput {
  path: PathBuf,
  label_with_name: bool,
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }

    let mut label_with_name = true;
    for (k, v) in url.query_pairs() {
      if k == "label" {
        label_with_name = match v.as_ref() {
          "name" => true,
          "id" => false,
          other => return Err(RecordOutputError::InvalidLabel(other.to_string())),
        };
      }
    }

    Ok(RecordOutput {
      path: PathBuf::from(url_path(url)),
      label_with_name,
    })
  }
}

impl RecordOutput {
  fn format<T: WithLabel>(&self, result: &DetectResult<T>) -> Vec<String> {
    result
      .items
      .iter()
      .map(|item| {
        let name = if self.label_with_name {
          item.kind.to_label_str()
        } else {
          format!("{}", item.kind.to_label_id())
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect()
  }
}

impl<F, T: WithLabel> Render<F, Vec<DetectResult<T>>> for RecordOutput {
  type Error = RecordOutputError;

  fn render_result(&self, _frame: &F, result: &Vec<DetectResult<T>>) -> Result<(), Self::Error> {
    let text = result
      .iter()
      .map(|r| self.format(r).join("\n"))
      .collect::<Vec<_>>()
      .join("\n\n");
    std::fs::write(&self.path, text)?;
    debug!("记录写入 {}", self.path.display());
    Ok(())
  }
}
