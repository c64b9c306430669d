// 该文件是 Qianli （千里眼） 项目的一部分。
// src/utils.rs - 通用解析工具
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

use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
  #[error("尺寸格式错误: '{0}'，应为 WxH")]
  InvalidSize(String),
  #[error("列表元素解析失败: '{0}'")]
  InvalidItem(String),
}

/// 解析 `640x640` 形式的尺寸，返回 (宽, 高)
pub fn parse_size(text: &str) -> Result<(u32, u32), ParseError> {
  let (w, h) = text
    .split_once(['x', 'X'])
    .ok_or_else(|| ParseError::InvalidSize(text.to_string()))?;
  let w = w
    .trim()
    .parse::<u32>()
    .map_err(|_| ParseError::InvalidSize(text.to_string()))?;
  let h = h
    .trim()
    .parse::<u32>()
    .map_err(|_| ParseError::InvalidSize(text.to_string()))?;
  Ok((w, h))
}

/// 解析以逗号分隔的列表，空字符串得到空列表
pub fn parse_list<T: FromStr>(text: &str) -> Result<Vec<T>, ParseError> {
  text
    .split(',')
    .map(str::trim)
    .filter(|item| !item.is_empty())
    .map(|item| {
      item
        .parse::<T>()
        .map_err(|_| ParseError::InvalidItem(item.to_string()))
    })
    .collect()
}
