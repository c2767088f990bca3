// 该文件是 count-people （人数统计） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 count-people contributors

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbNchwFrame;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("failed to open image {path}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("failed to decode image {path}")]
  ImageLoadError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 单张图像输入，只产生一帧
pub struct ImageFileInput<const W: u32, const H: u32> {
  image: Option<RgbImage>,
}

impl<const W: u32, const H: u32> ImageFileInput<W, H> {
  /// 按文件内容识别格式并解码，忽略扩展名
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let io_error = |source| ImageFileInputError::IoError {
      path: path.to_path_buf(),
      source,
    };
    let image = ImageReader::open(path)
      .map_err(io_error)?
      .with_guessed_format()
      .map_err(io_error)?
      .decode()
      .map_err(|source| ImageFileInputError::ImageLoadError {
        path: path.to_path_buf(),
        source,
      })?;

    debug!(
      "图像已加载: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      image: Some(image.into_rgb8()),
    })
  }

  pub fn from_image(image: RgbImage) -> Self {
    ImageFileInput { image: Some(image) }
  }

  pub fn into_nchw(self) -> ImageFileInputNchw<W, H> {
    ImageFileInputNchw { inner: self }
  }
}

pub struct ImageFileInputNchw<const W: u32, const H: u32> {
  inner: ImageFileInput<W, H>,
}

impl<const W: u32, const H: u32> Iterator for ImageFileInputNchw<W, H> {
  type Item = RgbNchwFrame<W, H>;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.image.take().map(|image| RgbNchwFrame::from(&image))
  }
}
