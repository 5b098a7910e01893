// 该文件是 Shitu （识图） 项目的一部分。
// src/input/preprocess.rs - 图像预处理：解码、缩放、归一化
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
use thiserror::Error;
use tracing::debug;

use crate::frame::{RGB_CHANNELS, RgbNhwcTensor, TensorShapeError};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像尺寸为空: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("归一化参数无效: {0}")]
  InvalidNormalization(String),
  #[error("预处理张量形状错误: {0}")]
  Shape(#[from] TensorShapeError),
}

/// 逐通道归一化表：`(value / divisor - mean[c]) / std[c]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  divisor: f32,
  mean: [f32; RGB_CHANNELS],
  std: [f32; RGB_CHANNELS],
}

impl Normalization {
  /// 映射到 [0, 1]，即 `value / 255.0`
  pub const UNIT: Self = Self {
    divisor: 255.0,
    mean: [0.0; 3],
    std: [1.0; 3],
  };

  /// 映射到 [-1, 1]
  pub const SIGNED: Self = Self {
    divisor: 255.0,
    mean: [0.5; 3],
    std: [0.5; 3],
  };

  pub const IMAGENET: Self = Self {
    divisor: 255.0,
    mean: [0.485, 0.456, 0.406],
    std: [0.229, 0.224, 0.225],
  };

  pub fn new(
    divisor: f32,
    mean: [f32; RGB_CHANNELS],
    std: [f32; RGB_CHANNELS],
  ) -> Result<Self, PreprocessError> {
    if !divisor.is_finite() || divisor <= 0.0 {
      return Err(PreprocessError::InvalidNormalization(format!(
        "除数必须为正有限值, 实际为 {}",
        divisor
      )));
    }
    for (i, (&m, &s)) in mean.iter().zip(std.iter()).enumerate() {
      if !m.is_finite() {
        return Err(PreprocessError::InvalidNormalization(format!(
          "通道 {} 的均值不是有限值: {}",
          i, m
        )));
      }
      if !s.is_finite() || s <= 0.0 {
        return Err(PreprocessError::InvalidNormalization(format!(
          "通道 {} 的标准差必须为正有限值, 实际为 {}",
          i, s
        )));
      }
    }
    Ok(Self { divisor, mean, std })
  }

  pub fn divisor(&self) -> f32 {
    self.divisor
  }

  pub fn mean(&self) -> &[f32; RGB_CHANNELS] {
    &self.mean
  }

  pub fn std(&self) -> &[f32; RGB_CHANNELS] {
    &self.std
  }

  #[inline]
  pub fn apply(&self, channel: usize, value: u8) -> f32 {
    (value as f32 / self.divisor - self.mean[channel]) / self.std[channel]
  }
}

impl Default for Normalization {
  fn default() -> Self {
    Self::UNIT
  }
}

/// 将任意尺寸的编码图像转换为 [1, H, W, 3] 张量
#[derive(Debug, Clone)]
pub struct Preprocessor<const W: u32, const H: u32> {
  normalization: Normalization,
  filter: FilterType,
}

impl<const W: u32, const H: u32> Default for Preprocessor<W, H> {
  fn default() -> Self {
    Self {
      normalization: Normalization::UNIT,
      filter: FilterType::Triangle,
    }
  }
}

impl<const W: u32, const H: u32> Preprocessor<W, H> {
  pub fn with_normalization(mut self, normalization: Normalization) -> Self {
    self.normalization = normalization;
    self
  }

  pub fn with_filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn normalization(&self) -> &Normalization {
    &self.normalization
  }

  pub fn preprocess(&self, bytes: &[u8]) -> Result<RgbNhwcTensor<W, H>, PreprocessError> {
    let image = self.decode(bytes)?;
    let resized = self.resize(image);
    self.pack(&resized)
  }

  /// 解码并统一为 RGB，透明通道被丢弃，调色板图像展开为 RGB
  pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    let image = image::load_from_memory(bytes)?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyImage { width, height });
    }
    debug!("解码图像: {}x{}, 色彩类型 {:?}", width, height, image.color());
    Ok(image.to_rgb8())
  }

  // 不保持宽高比，直接拉伸到模型尺寸
  fn resize(&self, image: RgbImage) -> RgbImage {
    if image.dimensions() == (W, H) {
      return image;
    }
    image::imageops::resize(&image, W, H, self.filter)
  }

  fn pack(&self, image: &RgbImage) -> Result<RgbNhwcTensor<W, H>, PreprocessError> {
    let mut tensor = RgbNhwcTensor::<W, H>::default();
    let expected = tensor.as_ref().len();
    let actual = image.as_raw().len();
    if actual != expected {
      return Err(TensorShapeError {
        shape: tensor.shape(),
        expected,
        actual,
      }
      .into());
    }

    for (dst, pixel) in tensor
      .as_mut()
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(image.pixels())
    {
      for c in 0..RGB_CHANNELS {
        dst[c] = self.normalization.apply(c, pixel[c]);
      }
    }
    Ok(tensor)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{DynamicImage, ImageFormat, Luma, LumaA, Rgb, Rgba};
  use std::io::Cursor;

  const TOLERANCE: f32 = 1.0 / 255.0 + 1e-6;

  fn encode_png(image: DynamicImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
  }

  fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
      Rgb([
        (x * 255 / width.max(1)) as u8,
        (y * 255 / height.max(1)) as u8,
        ((x + y) % 256) as u8,
      ])
    });
    encode_png(DynamicImage::ImageRgb8(image))
  }

  #[test]
  fn output_shape_is_fixed_for_any_resolution() {
    let preprocessor = Preprocessor::<224, 224>::default();
    for (w, h) in [(1, 1), (224, 224), (640, 480), (97, 301), (1000, 3)] {
      let tensor = preprocessor.preprocess(&gradient_png(w, h)).unwrap();
      assert_eq!(tensor.shape(), [1, 224, 224, 3], "source {}x{}", w, h);
      assert_eq!(tensor.as_ref().len(), 224 * 224 * 3);
    }
  }

  #[test]
  fn unit_normalization_stays_in_bounds() {
    let preprocessor = Preprocessor::<32, 16>::default();
    let tensor = preprocessor.preprocess(&gradient_png(123, 77)).unwrap();
    assert!(tensor.as_ref().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn same_size_image_is_scaled_exactly() {
    let image = RgbImage::from_fn(2, 2, |x, y| match (x, y) {
      (0, 0) => Rgb([0, 0, 0]),
      (1, 0) => Rgb([255, 255, 255]),
      (0, 1) => Rgb([51, 102, 204]),
      _ => Rgb([1, 2, 3]),
    });
    let bytes = encode_png(DynamicImage::ImageRgb8(image));
    let tensor = Preprocessor::<2, 2>::default().preprocess(&bytes).unwrap();
    let expected: Vec<f32> = [0u8, 0, 0, 255, 255, 255, 51, 102, 204, 1, 2, 3]
      .iter()
      .map(|&v| v as f32 / 255.0)
      .collect();
    assert_eq!(tensor.as_ref(), expected.as_slice());
  }

  #[test]
  fn channel_order_is_rgb() {
    let image = RgbImage::from_pixel(50, 30, Rgb([255, 0, 0]));
    let bytes = encode_png(DynamicImage::ImageRgb8(image));
    let tensor = Preprocessor::<8, 8>::default().preprocess(&bytes).unwrap();
    for y in 0..8 {
      for x in 0..8 {
        assert!((tensor.get(y, x, 0).unwrap() - 1.0).abs() <= TOLERANCE);
        assert!(tensor.get(y, x, 1).unwrap().abs() <= TOLERANCE);
        assert!(tensor.get(y, x, 2).unwrap().abs() <= TOLERANCE);
      }
    }
  }

  #[test]
  fn grayscale_is_expanded_to_three_channels() {
    let image = image::GrayImage::from_pixel(10, 10, Luma([128]));
    let bytes = encode_png(DynamicImage::ImageLuma8(image));
    let tensor = Preprocessor::<4, 4>::default().preprocess(&bytes).unwrap();
    for px in tensor.as_ref().chunks_exact(3) {
      assert_eq!(px[0], px[1]);
      assert_eq!(px[1], px[2]);
      assert!((px[0] - 128.0 / 255.0).abs() <= TOLERANCE);
    }
  }

  #[test]
  fn alpha_channel_is_discarded() {
    let image = image::RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0]));
    let bytes = encode_png(DynamicImage::ImageRgba8(image));
    let tensor = Preprocessor::<4, 4>::default().preprocess(&bytes).unwrap();
    assert_eq!(
      &tensor.as_ref()[..3],
      &[10.0 / 255.0, 20.0 / 255.0, 30.0 / 255.0]
    );

    let image = image::GrayAlphaImage::from_pixel(4, 4, LumaA([200, 255]));
    let bytes = encode_png(DynamicImage::ImageLumaA8(image));
    let tensor = Preprocessor::<4, 4>::default().preprocess(&bytes).unwrap();
    assert_eq!(&tensor.as_ref()[..3], &[200.0 / 255.0; 3]);
  }

  #[test]
  fn indexed_png_is_expanded_through_its_palette() {
    let mut bytes = Vec::new();
    {
      let mut encoder = png::Encoder::new(&mut bytes, 2, 1);
      encoder.set_color(png::ColorType::Indexed);
      encoder.set_depth(png::BitDepth::Eight);
      encoder.set_palette(vec![255u8, 0, 0, 0, 0, 255]);
      let mut writer = encoder.write_header().unwrap();
      writer.write_image_data(&[0, 1]).unwrap();
    }
    let tensor = Preprocessor::<2, 1>::default().preprocess(&bytes).unwrap();
    assert_eq!(tensor.as_ref(), &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
  }

  #[test]
  fn signed_normalization_maps_to_minus_one_one() {
    let image = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([0; 3]) } else { Rgb([255; 3]) });
    let bytes = encode_png(DynamicImage::ImageRgb8(image));
    let tensor = Preprocessor::<2, 1>::default()
      .with_normalization(Normalization::SIGNED)
      .preprocess(&bytes)
      .unwrap();
    assert_eq!(tensor.as_ref(), &[-1.0, -1.0, -1.0, 1.0, 1.0, 1.0]);
  }

  #[test]
  fn invalid_normalization_is_rejected() {
    assert!(matches!(
      Normalization::new(0.0, [0.0; 3], [1.0; 3]),
      Err(PreprocessError::InvalidNormalization(_))
    ));
    assert!(Normalization::new(255.0, [0.0; 3], [1.0, 0.0, 1.0]).is_err());
    assert!(Normalization::new(255.0, [f32::NAN, 0.0, 0.0], [1.0; 3]).is_err());
    assert_eq!(
      Normalization::new(255.0, [0.0; 3], [1.0; 3]).unwrap(),
      Normalization::UNIT
    );

    let imagenet = Normalization::new(255.0, [0.485, 0.456, 0.406], [0.229, 0.224, 0.225]).unwrap();
    assert_eq!(imagenet, Normalization::IMAGENET);
    assert_eq!(imagenet.divisor(), 255.0);
    assert_eq!(imagenet.mean()[2], 0.406);
    assert_eq!(imagenet.std()[0], 0.229);
  }

  #[test]
  fn garbage_bytes_fail_to_decode() {
    let preprocessor = Preprocessor::<224, 224>::default();
    let err = preprocessor.preprocess(b"definitely not an image").unwrap_err();
    assert!(matches!(err, PreprocessError::Decode(_)));

    let err = preprocessor.preprocess(&[]).unwrap_err();
    assert!(matches!(err, PreprocessError::Decode(_)));
  }

  #[test]
  fn truncated_png_fails_to_decode() {
    let bytes = gradient_png(64, 64);
    let err = Preprocessor::<224, 224>::default()
      .preprocess(&bytes[..bytes.len() / 2])
      .unwrap_err();
    assert!(matches!(err, PreprocessError::Decode(_)));
  }
}
