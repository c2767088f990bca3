// 该文件是 count-people （人数统计） 项目的一部分。
// src/frame.rs - NCHW 帧定义
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

use crate::input::AsNchwFrame;

const RGB_CHANNELS: usize = 3;

/// 填充区域的灰度值（与 YOLOv8 训练时一致）
pub const LETTERBOX_PAD_VALUE: u8 = 114;

/// 信箱缩放参数，用于把模型坐标映射回原图
///
/// `pad_x`/`pad_y` 是内容区域左上角的整数像素偏移，放置像素与还原坐标共用。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: u32,
  pub pad_y: u32,
  pub src_width: u32,
  pub src_height: u32,
}

impl Letterbox {
  /// 计算把 `src_width x src_height` 等比缩放进 `dst_width x dst_height` 的参数
  pub fn fit(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
    let scale = f32::min(
      dst_width as f32 / src_width.max(1) as f32,
      dst_height as f32 / src_height.max(1) as f32,
    );
    let (new_w, new_h) = Self::scaled_size(src_width, src_height, scale);
    Letterbox {
      scale,
      // 奇数填充时多出的一像素留在右侧/下侧
      pad_x: dst_width.saturating_sub(new_w) / 2,
      pad_y: dst_height.saturating_sub(new_h) / 2,
      src_width,
      src_height,
    }
  }

  fn scaled_size(src_width: u32, src_height: u32, scale: f32) -> (u32, u32) {
    let w = ((src_width as f32 * scale).round() as u32).max(1);
    let h = ((src_height as f32 * scale).round() as u32).max(1);
    (w, h)
  }

  /// 缩放后的图像尺寸（不含填充）
  pub fn content_size(&self) -> (u32, u32) {
    Self::scaled_size(self.src_width, self.src_height, self.scale)
  }

  /// 模型输入坐标 -> 原图归一化坐标 [x_min, y_min, x_max, y_max]
  pub fn unmap_bbox(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.src_width.max(1) as f32;
    let h = self.src_height.max(1) as f32;
    let (pad_x, pad_y) = (self.pad_x as f32, self.pad_y as f32);
    let x0 = ((bbox[0] - pad_x) / self.scale).clamp(0.0, w);
    let y0 = ((bbox[1] - pad_y) / self.scale).clamp(0.0, h);
    let x1 = ((bbox[2] - pad_x) / self.scale).clamp(0.0, w);
    let y1 = ((bbox[3] - pad_y) / self.scale).clamp(0.0, h);
    [x0 / w, y0 / h, x1 / w, y1 / h]
  }
}

/// 固定尺寸、归一化到 [0, 1] 的 RGB 平面帧
#[derive(Debug, Clone)]
pub struct RgbNchwFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
  letterbox: Letterbox,
}

impl<const W: u32, const H: u32> RgbNchwFrame<W, H> {
  /// 以填充色初始化的空白帧
  pub fn blank(letterbox: Letterbox) -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    let fill = LETTERBOX_PAD_VALUE as f32 / 255.0;
    Self {
      data: vec![fill; size].into_boxed_slice(),
      letterbox,
    }
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn letterbox(&self) -> &Letterbox {
    &self.letterbox
  }
}

impl<const W: u32, const H: u32> AsMut<[f32]> for RgbNchwFrame<W, H> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNchwFrame<W, H> for RgbNchwFrame<W, H> {
  fn as_nchw(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(feature = "read_image_file")]
impl<const W: u32, const H: u32> From<&image::RgbImage> for RgbNchwFrame<W, H> {
  fn from(image: &image::RgbImage) -> Self {
    use image::imageops::{FilterType, resize};

    let (src_w, src_h) = image.dimensions();
    let letterbox = Letterbox::fit(src_w, src_h, W, H);
    let (new_w, new_h) = letterbox.content_size();
    let resized = resize(image, new_w, new_h, FilterType::Triangle);

    let mut frame = Self::blank(letterbox);
    let off_x = letterbox.pad_x as usize;
    let off_y = letterbox.pad_y as usize;
    let plane = (W as usize) * (H as usize);
    let width = W as usize;
    let slice = frame.as_mut();

    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = (y as usize + off_y) * width + (x as usize + off_x);
      for c in 0..RGB_CHANNELS {
        slice[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
    frame
  }
}
