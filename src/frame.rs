// 该文件是 Shitu （识图） 项目的一部分。
// src/frame.rs - 原始图像与定形张量定义
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

pub const RGB_CHANNELS: usize = 3;

/// 参考模型的输入宽度
pub const MODEL_INPUT_W: u32 = 224;
/// 参考模型的输入高度
pub const MODEL_INPUT_H: u32 = 224;

/// 参考模型的输入张量 [1, 224, 224, 3]
pub type InputTensor = RgbNhwcTensor<MODEL_INPUT_W, MODEL_INPUT_H>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("张量数据长度不匹配: 形状 {shape:?} 期望长度 {expected}, 实际长度 {actual}")]
pub struct TensorShapeError {
  pub shape: [usize; 4],
  pub expected: usize,
  pub actual: usize,
}

/// 一次请求提交的编码图像（JPEG/PNG 等）
#[derive(Debug, Clone)]
pub struct RawImage {
  /// 来源描述，仅用于日志与记录
  pub source: String,
  /// 编码后的图像字节
  pub bytes: Box<[u8]>,
}

impl RawImage {
  pub fn new(source: impl Into<String>, bytes: impl Into<Box<[u8]>>) -> Self {
    Self {
      source: source.into(),
      bytes: bytes.into(),
    }
  }
}

impl AsRef<[u8]> for RawImage {
  fn as_ref(&self) -> &[u8] {
    &self.bytes
  }
}

/// NHWC 排列的浮点 RGB 张量，形状固定为 [1, H, W, 3]
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNhwcTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> RgbNhwcTensor<W, H> {
  pub const LEN: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn shape(&self) -> [usize; 4] {
    [1, H as usize, W as usize, RGB_CHANNELS]
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 读取 (y, x, c) 处的值
  pub fn get(&self, y: usize, x: usize, c: usize) -> Option<f32> {
    if y >= self.height() || x >= self.width() || c >= RGB_CHANNELS {
      return None;
    }
    let index = (y * self.width() + x) * RGB_CHANNELS + c;
    self.data.get(index).copied()
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for RgbNhwcTensor<W, H> {
  type Error = TensorShapeError;

  fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
    if data.len() != Self::LEN {
      return Err(TensorShapeError {
        shape: [1, H as usize, W as usize, RGB_CHANNELS],
        expected: Self::LEN,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcTensor<W, H> {
  fn default() -> Self {
    let data = vec![0f32; Self::LEN].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> AsRef<[f32]> for RgbNhwcTensor<W, H> {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

impl<const W: u32, const H: u32> AsMut<[f32]> for RgbNhwcTensor<W, H> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

/// 模型输出的逐类别分数
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreTensor {
  scores: Box<[f32]>,
}

impl ScoreTensor {
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.scores
  }

  /// 第一个非有限值（NaN/Inf）的下标
  pub fn first_non_finite(&self) -> Option<usize> {
    self.scores.iter().position(|s| !s.is_finite())
  }
}

impl From<Vec<f32>> for ScoreTensor {
  fn from(scores: Vec<f32>) -> Self {
    Self {
      scores: scores.into_boxed_slice(),
    }
  }
}

impl From<&[f32]> for ScoreTensor {
  fn from(scores: &[f32]) -> Self {
    Self {
      scores: scores.into(),
    }
  }
}
