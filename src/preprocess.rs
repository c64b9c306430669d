// 该文件是 Qianli （千里眼） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use thiserror::Error;

pub const DEFAULT_INPUT_WIDTH: u32 = 640;
pub const DEFAULT_INPUT_HEIGHT: u32 = 640;
pub const DEFAULT_PAD_VALUE: u8 = 114;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("目标尺寸无效: {0}x{1}")]
  InvalidTargetSize(u32, u32),
  #[error("源图像尺寸无效: {0}x{1}")]
  InvalidSourceSize(u32, u32),
}

/// 缩放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
  /// 直接拉伸到目标尺寸
  #[default]
  Stretch,
  /// 等比缩放后居中填充
  Letterbox,
}

/// 源帧与模型输入帧之间的几何关系
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeInfo {
  pub source_width: u32,
  pub source_height: u32,
  pub scale_x: f32,
  pub scale_y: f32,
  pub pad_x: f32,
  pub pad_y: f32,
}

impl ResizeInfo {
  pub fn new(
    source: (u32, u32),
    target: (u32, u32),
    mode: ResizeMode,
  ) -> Result<Self, PreprocessError> {
    let (sw, sh) = source;
    let (tw, th) = target;
    if tw == 0 || th == 0 {
      return Err(PreprocessError::InvalidTargetSize(tw, th));
    }
    if sw == 0 || sh == 0 {
      return Err(PreprocessError::InvalidSourceSize(sw, sh));
    }

    let info = match mode {
      ResizeMode::Stretch => Self {
        source_width: sw,
        source_height: sh,
        scale_x: tw as f32 / sw as f32,
        scale_y: th as f32 / sh as f32,
        pad_x: 0.0,
        pad_y: 0.0,
      },
      ResizeMode::Letterbox => {
        let scale = (tw as f32 / sw as f32).min(th as f32 / sh as f32);
        let (nw, nh) = Self::scaled_size(sw, sh, scale);
        Self {
          source_width: sw,
          source_height: sh,
          scale_x: scale,
          scale_y: scale,
          pad_x: (tw.saturating_sub(nw) / 2) as f32,
          pad_y: (th.saturating_sub(nh) / 2) as f32,
        }
      }
    };
    Ok(info)
  }

  fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
      ((width as f32 * scale).round() as u32).max(1),
      ((height as f32 * scale).round() as u32).max(1),
    )
  }

  /// 缩放后（不含填充）的图像尺寸
  pub fn resized_size(&self) -> (u32, u32) {
    (
      ((self.source_width as f32 * self.scale_x).round() as u32).max(1),
      ((self.source_height as f32 * self.scale_y).round() as u32).max(1),
    )
  }

  /// 将模型输入帧上的角点式框映射回源帧，并裁剪到源帧范围
  pub fn restore_box(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.source_width as f32;
    let h = self.source_height as f32;
    [
      ((bbox[0] - self.pad_x) / self.scale_x).clamp(0.0, w),
      ((bbox[1] - self.pad_y) / self.scale_y).clamp(0.0, h),
      ((bbox[2] - self.pad_x) / self.scale_x).clamp(0.0, w),
      ((bbox[3] - self.pad_y) / self.scale_y).clamp(0.0, h),
    ]
  }
}

#[cfg(feature = "preprocess")]
pub use self::image_preprocess::Preprocessor;

#[cfg(feature = "preprocess")]
mod image_preprocess {
  use image::{
    Rgb, RgbImage,
    imageops::{self, FilterType},
  };
  use tracing::debug;

  use super::{
    DEFAULT_INPUT_HEIGHT, DEFAULT_INPUT_WIDTH, DEFAULT_PAD_VALUE, PreprocessError, ResizeInfo,
    ResizeMode,
  };
  use crate::tensor::InputTensor;

  /// 缩放 + 归一化到 [0, 1] + HWC 转 NCHW
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Preprocessor {
    width: u32,
    height: u32,
    mode: ResizeMode,
    pad_value: u8,
  }

  impl Default for Preprocessor {
    fn default() -> Self {
      Self {
        width: DEFAULT_INPUT_WIDTH,
        height: DEFAULT_INPUT_HEIGHT,
        mode: ResizeMode::default(),
        pad_value: DEFAULT_PAD_VALUE,
      }
    }
  }

  impl Preprocessor {
    pub fn new(width: u32, height: u32) -> Result<Self, PreprocessError> {
      if width == 0 || height == 0 {
        return Err(PreprocessError::InvalidTargetSize(width, height));
      }
      Ok(Self {
        width,
        height,
        ..Self::default()
      })
    }

    pub fn mode(mut self, mode: ResizeMode) -> Self {
      self.mode = mode;
      self
    }

    pub fn pad_value(mut self, pad_value: u8) -> Self {
      self.pad_value = pad_value;
      self
    }

    pub fn target_size(&self) -> (u32, u32) {
      (self.width, self.height)
    }

    pub fn apply(&self, image: &RgbImage) -> Result<(InputTensor, ResizeInfo), PreprocessError> {
      let info = ResizeInfo::new(image.dimensions(), (self.width, self.height), self.mode)?;
      let (nw, nh) = info.resized_size();
      debug!(
        "预处理: {:?} -> {}x{} (填充 {}, {})",
        image.dimensions(),
        nw,
        nh,
        info.pad_x,
        info.pad_y
      );

      let resized = imageops::resize(image, nw, nh, FilterType::Triangle);
      let canvas = match self.mode {
        ResizeMode::Stretch => resized,
        ResizeMode::Letterbox => {
          let mut canvas = RgbImage::from_pixel(self.width, self.height, Rgb([self.pad_value; 3]));
          imageops::replace(&mut canvas, &resized, info.pad_x as i64, info.pad_y as i64);
          canvas
        }
      };

      let mut tensor = InputTensor::zeros(self.width as usize, self.height as usize);
      let data = tensor.as_array_mut();
      for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
          data[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
      }

      Ok((tensor, info))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stretch_scales_each_axis() {
    let info = ResizeInfo::new((1280, 720), (640, 640), ResizeMode::Stretch).unwrap();
    assert_eq!(info.scale_x, 0.5);
    assert!((info.scale_y - 640.0 / 720.0).abs() < 1e-6);
    assert_eq!(info.resized_size(), (640, 640));
  }

  #[test]
  fn letterbox_pads_the_short_side() {
    let info = ResizeInfo::new((1280, 720), (640, 640), ResizeMode::Letterbox).unwrap();
    assert_eq!(info.scale_x, 0.5);
    assert_eq!(info.scale_y, 0.5);
    assert_eq!(info.resized_size(), (640, 360));
    assert_eq!(info.pad_x, 0.0);
    assert_eq!(info.pad_y, 140.0);
  }

  #[test]
  fn restore_box_inverts_letterbox() {
    let info = ResizeInfo::new((1280, 720), (640, 640), ResizeMode::Letterbox).unwrap();
    let restored = info.restore_box([100.0, 190.0, 300.0, 390.0]);
    assert_eq!(restored, [200.0, 100.0, 600.0, 500.0]);
  }

  #[test]
  fn restore_box_clips_to_source() {
    let info = ResizeInfo::new((100, 100), (200, 200), ResizeMode::Stretch).unwrap();
    assert_eq!(info.restore_box([-20.0, 10.0, 260.0, 400.0]), [0.0, 5.0, 100.0, 100.0]);
  }

  #[test]
  fn zero_sizes_are_rejected() {
    assert_eq!(
      ResizeInfo::new((100, 100), (0, 640), ResizeMode::Stretch),
      Err(PreprocessError::InvalidTargetSize(0, 640))
    );
    assert_eq!(
      ResizeInfo::new((0, 100), (640, 640), ResizeMode::Letterbox),
      Err(PreprocessError::InvalidSourceSize(0, 100))
    );
  }

  #[cfg(feature = "preprocess")]
  #[test]
  fn apply_normalizes_into_nchw() {
    use image::{Rgb, RgbImage};

    let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 51]));
    let preprocessor = Preprocessor::new(2, 2).unwrap();
    let (tensor, info) = preprocessor.apply(&image).unwrap();

    assert_eq!(tensor.shape(), [1, 3, 2, 2]);
    assert_eq!(info.scale_x, 0.5);
    let data = tensor.as_array();
    assert!((data[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
    assert!(data[[0, 1, 0, 0]].abs() < 1e-6);
    assert!((data[[0, 2, 0, 1]] - 0.2).abs() < 1e-6);
  }

  #[cfg(feature = "preprocess")]
  #[test]
  fn letterbox_fills_padding() {
    use image::{Rgb, RgbImage};

    let image = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
    let preprocessor = Preprocessor::new(4, 4).unwrap().mode(ResizeMode::Letterbox);
    let (tensor, info) = preprocessor.apply(&image).unwrap();

    assert_eq!(info.pad_y, 1.0);
    let data = tensor.as_array();
    assert!((data[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
    assert!(data[[0, 0, 1, 0]].abs() < 1e-6);
    assert!((data[[0, 0, 3, 0]] - 114.0 / 255.0).abs() < 1e-6);
  }
}
