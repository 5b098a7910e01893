// 该文件是 Shitu （识图） 项目的一部分。
// src/pipeline.rs - 分类流水线：预处理 -> 推理 -> 后处理
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
use tracing::{debug, error, info};

use crate::{
  frame::{RawImage, RgbNhwcTensor, ScoreTensor},
  input::{PreprocessError, Preprocessor},
  label::LabelTable,
  model::{Model, ModelError, check_finite},
  postprocess::{PostprocessError, Postprocessor, RankedResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Startup,
  Preprocess,
  Inference,
  Postprocess,
}

impl std::fmt::Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Stage::Startup => "启动",
      Stage::Preprocess => "预处理",
      Stage::Inference => "推理",
      Stage::Postprocess => "后处理",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Decode,
  ModelLoad,
  ShapeMismatch,
  Inference,
  LabelCountMismatch,
}

#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error("预处理阶段失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理阶段失败: {0}")]
  Model(#[from] ModelError),
  #[error("后处理阶段失败: {0}")]
  Postprocess(#[from] PostprocessError),
  #[error("启动检查失败: {0}")]
  Startup(PostprocessError),
}

impl ClassifyError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ClassifyError::Preprocess(PreprocessError::Shape(_)) => ErrorKind::ShapeMismatch,
      ClassifyError::Preprocess(_) => ErrorKind::Decode,
      ClassifyError::Model(ModelError::ShapeMismatch { .. }) => ErrorKind::ShapeMismatch,
      ClassifyError::Model(ModelError::Inference { .. }) => ErrorKind::Inference,
      ClassifyError::Model(_) => ErrorKind::ModelLoad,
      ClassifyError::Postprocess(_) | ClassifyError::Startup(_) => ErrorKind::LabelCountMismatch,
    }
  }

  pub fn stage(&self) -> Stage {
    match self {
      ClassifyError::Preprocess(_) => Stage::Preprocess,
      ClassifyError::Model(e) if e.is_fatal() => Stage::Startup,
      ClassifyError::Model(_) => Stage::Inference,
      ClassifyError::Postprocess(_) => Stage::Postprocess,
      ClassifyError::Startup(_) => Stage::Startup,
    }
  }

  /// 单次请求的错误可以恢复，启动错误不可恢复
  pub fn is_recoverable(&self) -> bool {
    self.stage() != Stage::Startup
  }
}

/// 对一张编码图像给出排序后的分类结果
pub trait Classify {
  fn classify(&self, image: &RawImage) -> Result<RankedResult, ClassifyError>;
}

/// 分类上下文：启动时构造一次，之后只读，可在多个线程间共享
#[derive(Debug)]
pub struct Classifier<M, const W: u32, const H: u32> {
  preprocessor: Preprocessor<W, H>,
  model: M,
  labels: LabelTable,
  postprocessor: Postprocessor,
}

impl<M, const W: u32, const H: u32> Classifier<M, W, H>
where
  M: Model<Input = RgbNhwcTensor<W, H>, Output = ScoreTensor, Error = ModelError>,
{
  /// 模型已加载成功才能构造；若模型声明了类别数，立即核对标签表
  pub fn new(model: M, labels: LabelTable) -> Result<Self, ClassifyError> {
    if let Some(classes) = model.output_len() {
      if classes != labels.len() {
        error!(
          "标签数量 {} 与模型输出类别数 {} 不一致",
          labels.len(),
          classes
        );
        return Err(ClassifyError::Startup(
          PostprocessError::LabelCountMismatch {
            scores: classes,
            labels: labels.len(),
          },
        ));
      }
    }
    info!("分类器就绪: 输入 {}x{}, {} 个类别", W, H, labels.len());

    Ok(Self {
      preprocessor: Preprocessor::default(),
      model,
      labels,
      postprocessor: Postprocessor::default(),
    })
  }

  pub fn with_preprocessor(mut self, preprocessor: Preprocessor<W, H>) -> Self {
    self.preprocessor = preprocessor;
    self
  }

  pub fn with_postprocessor(mut self, postprocessor: Postprocessor) -> Self {
    self.postprocessor = postprocessor;
    self
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn classify_image(&self, bytes: &[u8]) -> Result<RankedResult, ClassifyError> {
    let tensor = self.preprocessor.preprocess(bytes)?;
    debug!("预处理完成: {:?}", tensor.shape());

    let scores = self.model.infer(&tensor)?;
    check_finite(&scores)?;
    debug!("推理完成: {} 个分数", scores.len());

    let result = self.postprocessor.run(&scores, &self.labels)?;
    Ok(result)
  }
}

impl<M, const W: u32, const H: u32> Classify for Classifier<M, W, H>
where
  M: Model<Input = RgbNhwcTensor<W, H>, Output = ScoreTensor, Error = ModelError>,
{
  fn classify(&self, image: &RawImage) -> Result<RankedResult, ClassifyError> {
    debug!("分类 {}", image.source);
    self.classify_image(image.as_ref())
  }
}

impl<C: Classify + ?Sized> Classify for &C {
  fn classify(&self, image: &RawImage) -> Result<RankedResult, ClassifyError> {
    (**self).classify(image)
  }
}

impl<C: Classify + ?Sized> Classify for std::sync::Arc<C> {
  fn classify(&self, image: &RawImage) -> Result<RankedResult, ClassifyError> {
    (**self).classify(image)
  }
}
