// 该文件是 Qianli （千里眼） 项目的一部分。
// src/anchor.rs - 锚点与步长表
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, url_path,
  utils::{parse_list, parse_size},
};

/// 锚点位于特征图单元中心
pub const GRID_CELL_OFFSET: f32 = 0.5;
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);
pub const DEFAULT_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

const GRID_SCHEME: &str = "grid";
const TABLE_SCHEME: &str = "table";

#[derive(Error, Debug)]
pub enum AnchorError {
  #[error("锚点数量 {anchors} 与步长数量 {strides} 不一致")]
  LengthMismatch { anchors: usize, strides: usize },
  #[error("锚点表为空")]
  Empty,
  #[error("第 {index} 个槽位的步长无效: {stride}")]
  InvalidStride { index: usize, stride: f32 },
  #[error("第 {0} 个锚点坐标不是有限值")]
  NonFiniteAnchor(usize),
  #[error("特征层尺寸无效: {0}x{1}")]
  InvalidLevel(usize, usize),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("锚点表解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URL 参数错误: {0}")]
  InvalidQuery(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 一个检测头对应的特征层
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureLevel {
  pub height: usize,
  pub width: usize,
  pub stride: f32,
}

impl FeatureLevel {
  pub fn new(height: usize, width: usize, stride: f32) -> Self {
    Self {
      height,
      width,
      stride,
    }
  }

  /// 槽位数；溢出时返回 None
  pub fn slots(&self) -> Option<usize> {
    self.height.checked_mul(self.width)
  }
}

/// 锚点/步长表，按多尺度特征图展平后拼接的顺序排列。
///
/// 加载后只读，第 i 项锚点、第 i 项步长与预测张量的第 i 个槽位一一对应。
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTable {
  anchors: Box<[[f32; 2]]>,
  strides: Box<[f32]>,
}

#[derive(Serialize, Deserialize)]
struct AnchorTableFile {
  anchors: Vec<[f32; 2]>,
  strides: Vec<f32>,
}

impl AnchorTable {
  pub fn new(anchors: Vec<[f32; 2]>, strides: Vec<f32>) -> Result<Self, AnchorError> {
    if anchors.len() != strides.len() {
      error!(
        "锚点数量 {} 与步长数量 {} 不一致",
        anchors.len(),
        strides.len()
      );
      return Err(AnchorError::LengthMismatch {
        anchors: anchors.len(),
        strides: strides.len(),
      });
    }
    if anchors.is_empty() {
      return Err(AnchorError::Empty);
    }
    if let Some(index) = anchors
      .iter()
      .position(|[x, y]| !x.is_finite() || !y.is_finite())
    {
      return Err(AnchorError::NonFiniteAnchor(index));
    }
    if let Some((index, &stride)) = strides
      .iter()
      .enumerate()
      .find(|(_, s)| !s.is_finite() || **s <= 0.0)
    {
      return Err(AnchorError::InvalidStride { index, stride });
    }

    Ok(Self {
      anchors: anchors.into_boxed_slice(),
      strides: strides.into_boxed_slice(),
    })
  }

  /// 为每个特征层生成单元中心锚点，层内按行优先展平
  pub fn from_levels(levels: &[FeatureLevel]) -> Result<Self, AnchorError> {
    let mut total = 0usize;
    for level in levels {
      total = level
        .slots()
        .filter(|&slots| slots > 0)
        .and_then(|slots| total.checked_add(slots))
        .ok_or(AnchorError::InvalidLevel(level.height, level.width))?;
    }
    let mut anchors = Vec::with_capacity(total);
    let mut strides = Vec::with_capacity(total);

    for level in levels {
      debug!(
        "特征层 {}x{}, 步长 {}",
        level.height, level.width, level.stride
      );
      for y in 0..level.height {
        for x in 0..level.width {
          anchors.push([x as f32 + GRID_CELL_OFFSET, y as f32 + GRID_CELL_OFFSET]);
          strides.push(level.stride);
        }
      }
    }

    Self::new(anchors, strides)
  }

  /// 根据模型输入尺寸与各层步长推算特征层尺寸。
  ///
  /// 步长小于 1 时特征层会比输入还大，视为无效。
  pub fn for_input(width: u32, height: u32, strides: &[f32]) -> Result<Self, AnchorError> {
    let mut levels = Vec::with_capacity(strides.len());
    for (index, &stride) in strides.iter().enumerate() {
      if !stride.is_finite() || stride < 1.0 {
        error!("第 {} 层步长 {} 无效", index, stride);
        return Err(AnchorError::InvalidStride { index, stride });
      }
      levels.push(FeatureLevel::new(
        (height as f32 / stride).ceil() as usize,
        (width as f32 / stride).ceil() as usize,
        stride,
      ));
    }
    Self::from_levels(&levels)
  }

  /// 从 JSON 文件加载：`{ "anchors": [[x, y], ...], "strides": [...] }`
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AnchorError> {
    let path = path.as_ref();
    info!("加载锚点表: {}", path.display());
    let data = std::fs::read(path)?;
    let file: AnchorTableFile = serde_json::from_slice(&data)?;
    let table = Self::new(file.anchors, file.strides)?;
    debug!("锚点表槽位数: {}", table.len());
    Ok(table)
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AnchorError> {
    let file = AnchorTableFile {
      anchors: self.anchors.to_vec(),
      strides: self.strides.to_vec(),
    };
    std::fs::write(path, serde_json::to_vec(&file)?)?;
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.anchors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
  }

  pub fn anchors(&self) -> &[[f32; 2]] {
    &self.anchors
  }

  pub fn strides(&self) -> &[f32] {
    &self.strides
  }

  pub fn iter(&self) -> impl Iterator<Item = ([f32; 2], f32)> + '_ {
    self.anchors.iter().copied().zip(self.strides.iter().copied())
  }

  /// 检查每个步长对应的网格是否与给定输入尺寸推算出的网格一致
  pub fn matches_input(&self, width: u32, height: u32) -> bool {
    // (步长, 最大列号, 最大行号)
    let mut levels: Vec<(f32, usize, usize)> = Vec::new();
    for ([x, y], stride) in self.iter() {
      let (col, row) = (x.max(0.0) as usize, y.max(0.0) as usize);
      match levels.iter_mut().find(|(s, _, _)| *s == stride) {
        Some(level) => {
          level.1 = level.1.max(col);
          level.2 = level.2.max(row);
        }
        None => levels.push((stride, col, row)),
      }
    }

    levels.iter().all(|&(stride, col, row)| {
      (width as f32 / stride).ceil() as usize == col + 1
        && (height as f32 / stride).ceil() as usize == row + 1
    })
  }
}

impl FromUrl for AnchorTable {
  type Error = AnchorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      GRID_SCHEME => {
        let mut size = DEFAULT_INPUT_SIZE;
        let mut strides = DEFAULT_STRIDES.to_vec();
        for (k, v) in url.query_pairs() {
          match k.as_ref() {
            "size" => {
              size = parse_size(&v).map_err(|e| AnchorError::InvalidQuery(e.to_string()))?
            }
            "strides" => {
              strides = parse_list(&v).map_err(|e| AnchorError::InvalidQuery(e.to_string()))?
            }
            other => {
              return Err(AnchorError::InvalidQuery(format!("未知参数 {}", other)));
            }
          }
        }
        info!(
          "生成锚点表: 输入 {}x{}, 步长 {:?}",
          size.0, size.1, strides
        );
        Self::for_input(size.0, size.1, &strides)
      }
      TABLE_SCHEME => Self::load(url_path(url)),
      other => {
        error!(
          "URI 方案不匹配: 期望 '{}' 或 '{}', 实际 '{}'",
          GRID_SCHEME, TABLE_SCHEME, other
        );
        Err(AnchorError::SchemeMismatch)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_grid_has_8400_slots() {
    let table = AnchorTable::for_input(640, 640, &DEFAULT_STRIDES).unwrap();
    assert_eq!(table.len(), 80 * 80 + 40 * 40 + 20 * 20);
    assert_eq!(table.len(), 8400);
  }

  #[test]
  fn anchors_are_level_major_then_row_major() {
    let table = AnchorTable::from_levels(&[
      FeatureLevel::new(2, 3, 8.0),
      FeatureLevel::new(1, 1, 16.0),
    ])
    .unwrap();

    assert_eq!(table.anchors()[0], [0.5, 0.5]);
    assert_eq!(table.anchors()[1], [1.5, 0.5]);
    assert_eq!(table.anchors()[3], [0.5, 1.5]);
    assert_eq!(table.anchors()[6], [0.5, 0.5]);
    assert_eq!(table.strides(), &[8.0, 8.0, 8.0, 8.0, 8.0, 8.0, 16.0]);
  }

  #[test]
  fn mismatched_lengths_are_rejected() {
    let err = AnchorTable::new(vec![[0.5, 0.5]; 3], vec![8.0; 2]).unwrap_err();
    assert!(matches!(
      err,
      AnchorError::LengthMismatch {
        anchors: 3,
        strides: 2
      }
    ));
  }

  #[test]
  fn bad_strides_are_rejected() {
    assert!(matches!(
      AnchorTable::new(vec![[0.5, 0.5]], vec![0.0]),
      Err(AnchorError::InvalidStride { index: 0, .. })
    ));
    assert!(matches!(
      AnchorTable::new(vec![], vec![]),
      Err(AnchorError::Empty)
    ));
  }

  #[test]
  fn grid_url_uses_query() {
    let url = Url::parse("grid:?size=64x32&strides=16,32").unwrap();
    let table = AnchorTable::from_url(&url).unwrap();
    assert_eq!(table.len(), 4 * 2 + 2);
  }

  #[test]
  fn table_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anchors.json");
    let table = AnchorTable::new(vec![[10.0, 10.0], [0.5, 1.5]], vec![32.0, 8.0]).unwrap();
    table.save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("table://{}", url.path())).unwrap();
    assert_eq!(AnchorTable::from_url(&url).unwrap(), table);
  }

  #[test]
  fn tiny_stride_is_rejected_without_overflow() {
    let url = Url::parse("grid:?size=640x640&strides=0.0000001").unwrap();
    assert!(matches!(
      AnchorTable::from_url(&url),
      Err(AnchorError::InvalidStride { index: 0, .. })
    ));
    assert!(matches!(
      AnchorTable::for_input(640, 640, &[8.0, 0.5]),
      Err(AnchorError::InvalidStride { index: 1, .. })
    ));
  }

  #[test]
  fn oversized_levels_are_rejected() {
    assert!(matches!(
      AnchorTable::from_levels(&[FeatureLevel::new(usize::MAX, 2, 8.0)]),
      Err(AnchorError::InvalidLevel(_, 2))
    ));
    assert!(matches!(
      AnchorTable::from_levels(&[
        FeatureLevel::new(1, usize::MAX, 8.0),
        FeatureLevel::new(1, 1, 16.0),
      ]),
      Err(AnchorError::InvalidLevel(1, 1))
    ));
    assert!(matches!(
      AnchorTable::for_input(0, 640, &[8.0]),
      Err(AnchorError::InvalidLevel(80, 0))
    ));
  }

  #[test]
  fn matches_input_compares_grids() {
    let table = AnchorTable::for_input(640, 640, &DEFAULT_STRIDES).unwrap();
    assert!(table.matches_input(640, 640));
    assert!(!table.matches_input(320, 320));
    assert!(!table.matches_input(640, 480));

    let table = AnchorTable::for_input(100, 60, &[32.0]).unwrap();
    assert!(table.matches_input(100, 60));
    assert!(table.matches_input(128, 64));
    assert!(!table.matches_input(60, 100));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("http://example.com/anchors").unwrap();
    assert!(matches!(
      AnchorTable::from_url(&url),
      Err(AnchorError::SchemeMismatch)
    ));
  }
}
