// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  preprocess::{PreprocessError, Preprocessor, ResizeInfo},
  tensor::InputTensor,
  url_path,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url_path(url);
    let image = ImageReader::open(&path)?.decode()?.into_rgb8();
    debug!("读取图像 {}: {:?}", path, image.dimensions());

    Ok(ImageFileInput { image: Some(image) })
  }
}

impl ImageFileInput {
  /// 经预处理后产生模型输入张量及其缩放信息
  pub fn into_tensor(self, preprocessor: Preprocessor) -> ImageFileInputTensor {
    ImageFileInputTensor {
      inner: self,
      preprocessor,
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

pub struct ImageFileInputTensor {
  inner: ImageFileInput,
  preprocessor: Preprocessor,
}

impl Iterator for ImageFileInputTensor {
  type Item = Result<(InputTensor, ResizeInfo), PreprocessError>;

  fn next(&mut self) -> Option<Self::Item> {
    self
      .inner
      .next()
      .map(|image| self.preprocessor.apply(&image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn reads_png_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let image = input.next().unwrap();
    assert_eq!(image.dimensions(), (8, 4));
    assert_eq!(image.get_pixel(3, 2), &Rgb([10, 20, 30]));
    assert!(input.next().is_none());
  }

  #[test]
  fn tensor_iterator_preprocesses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    RgbImage::from_pixel(8, 4, Rgb([255, 255, 255]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut frames = ImageFileInput::from_url(&url)
      .unwrap()
      .into_tensor(Preprocessor::new(4, 4).unwrap());
    let (tensor, info) = frames.next().unwrap().unwrap();
    assert_eq!(tensor.shape(), [1, 3, 4, 4]);
    assert_eq!((info.source_width, info.source_height), (8, 4));
    assert!(frames.next().is_none());
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
