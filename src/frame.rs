// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::{RgbImage, imageops::FilterType};

use crate::geometry::{Extent, PixelRect};

const RGB_CHANNELS: usize = 3;

/// 输入源产生的一帧图像
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  /// 帧序号，从 0 开始
  pub index: usize,
  /// 来源名称，用于日志和输出文件命名
  pub name: String,
}

impl Frame {
  pub fn new(image: RgbImage, index: usize, name: impl Into<String>) -> Self {
    Self {
      image,
      index,
      name: name.into(),
    }
  }

  pub fn extent(&self) -> Extent {
    Extent::of_image(&self.image)
  }

  /// 裁剪出源图像中的一个区域，区域会先被限制在图像范围内
  pub fn crop(&self, rect: PixelRect) -> RgbImage {
    let (w, h) = self.image.dimensions();
    let x = rect.x.min(w);
    let y = rect.y.min(h);
    let width = rect.width.min(w - x);
    let height = rect.height.min(h - y);
    image::imageops::crop_imm(&self.image, x, y, width, height).to_image()
  }

  /// 缩放到目标尺寸并转为 NCHW 排列的 `f32`，像素值保持 0-255
  pub fn to_nchw_f32(&self, extent: Extent) -> Vec<f32> {
    let resized = if self.extent() == extent {
      self.image.clone()
    } else {
      image::imageops::resize(&self.image, extent.width, extent.height, FilterType::Triangle)
    };

    let plane = (extent.width as usize) * (extent.height as usize);
    let mut data = vec![0f32; RGB_CHANNELS * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = (y as usize) * (extent.width as usize) + (x as usize);
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = pixel[c] as f32;
      }
    }
    data
  }
}
