// 该文件是 Shitu （识图） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 分类模型
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

use std::{path::PathBuf, sync::Mutex};

use ndarray::ArrayView4;
use ort::{
  logging::LogLevel,
  session::Session,
  value::{TensorRef, ValueType},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::{RGB_CHANNELS, RgbNhwcTensor, ScoreTensor},
  model::{Model, ModelError, check_input_shape, class_count, scores_from_output},
};

const ONNX_NUM_INPUTS: usize = 1;

/// 基于 ONNX Runtime 的图像分类模型，输入为 [1, H, W, 3] 浮点张量
///
/// 会话放在互斥锁中，并发调用 `infer` 会被串行化；权重在推理期间只读。
pub struct OnnxClassifier<const W: u32, const H: u32> {
  session: Mutex<Session>,
  model_path: PathBuf,
  input_name: String,
  output_name: String,
  input_shape: Vec<i64>,
  output_len: Option<usize>,
}

impl<const W: u32, const H: u32> std::fmt::Debug for OnnxClassifier<W, H> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OnnxClassifier")
      .field("model_path", &self.model_path)
      .field("input_name", &self.input_name)
      .field("output_name", &self.output_name)
      .field("input_shape", &self.input_shape)
      .field("output_len", &self.output_len)
      .finish()
  }
}

#[derive(Debug, Clone)]
pub struct OnnxClassifierBuilder {
  model_path: PathBuf,
  intra_threads: Option<usize>,
  input_name: Option<String>,
  output_name: Option<String>,
}

impl FromUrlWithScheme for OnnxClassifierBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxClassifierBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPath(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = OnnxClassifierBuilder::new(decoded_path(url));
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "threads" => {
          let threads = v
            .parse::<usize>()
            .map_err(|e| ModelError::ModelPath(format!("线程数无效 '{}': {}", v, e)))?;
          builder = builder.intra_threads(threads);
        }
        "input" => builder = builder.input_name(v.as_ref()),
        "output" => builder = builder.output_name(v.as_ref()),
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }
    Ok(builder)
  }
}

impl OnnxClassifierBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      intra_threads: None,
      input_name: None,
      output_name: None,
    }
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads.max(1));
    self
  }

  pub fn input_name(mut self, name: impl Into<String>) -> Self {
    self.input_name = Some(name.into());
    self
  }

  pub fn output_name(mut self, name: impl Into<String>) -> Self {
    self.output_name = Some(name.into());
    self
  }

  fn load_error(&self, e: impl std::error::Error + Send + Sync + 'static) -> ModelError {
    ModelError::ModelLoad {
      path: self.model_path.clone(),
      source: Box::new(e),
    }
  }

  pub fn build<const W: u32, const H: u32>(self) -> Result<OnnxClassifier<W, H>, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path).map_err(|e| self.load_error(e))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let mut builder = Session::builder()
      .and_then(|b| b.with_log_level(LogLevel::Error))
      .map_err(|e| self.load_error(e))?;
    if let Some(threads) = self.intra_threads {
      builder = builder
        .with_intra_threads(threads)
        .map_err(|e| self.load_error(e))?;
    }
    let session = builder
      .commit_from_memory(&model_data)
      .map_err(|e| self.load_error(e))?;
    info!("模型加载完成");

    if session.inputs.len() != ONNX_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        ONNX_NUM_INPUTS,
        session.inputs.len()
      );
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        ONNX_NUM_INPUTS,
        session.inputs.len()
      )));
    }
    if session.outputs.is_empty() {
      return Err(ModelError::ModelInvalid("模型没有输出".to_string()));
    }

    let input = &session.inputs[0];
    let input_name = self.input_name.clone().unwrap_or_else(|| input.name.clone());
    if input.name != input_name {
      return Err(ModelError::ModelInvalid(format!(
        "模型中没有名为 '{}' 的输入, 仅有 '{}'",
        input_name, input.name
      )));
    }
    let input_shape: Vec<i64> = match &input.input_type {
      ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
      other => {
        return Err(ModelError::ModelInvalid(format!(
          "模型输入 '{}' 不是张量: {:?}",
          input.name, other
        )));
      }
    };

    let output = match &self.output_name {
      Some(name) => session
        .outputs
        .iter()
        .find(|o| &o.name == name)
        .ok_or_else(|| ModelError::ModelInvalid(format!("模型中没有名为 '{}' 的输出", name)))?,
      None => &session.outputs[0],
    };
    let output_name = output.name.clone();
    let output_len = match &output.output_type {
      ValueType::Tensor { shape, .. } => {
        let shape: Vec<i64> = shape.iter().copied().collect();
        debug!("模型输出 '{}' 形状: {:?}", output_name, shape);
        class_count(&shape)
      }
      other => {
        return Err(ModelError::ModelInvalid(format!(
          "模型输出 '{}' 不是张量: {:?}",
          output_name, other
        )));
      }
    };

    debug!("模型输入 '{}' 形状: {:?}", input_name, input_shape);
    let expected = [1, H as usize, W as usize, RGB_CHANNELS];
    if let Err(e) = check_input_shape(&input_shape, &expected) {
      // 形状不一致在推理时以 ShapeMismatch 报告
      warn!("模型输入形状与预处理配置不一致: {}", e);
    }

    Ok(OnnxClassifier {
      session: Mutex::new(session),
      model_path: self.model_path,
      input_name,
      output_name,
      input_shape,
      output_len,
    })
  }
}

impl<const W: u32, const H: u32> OnnxClassifier<W, H> {
  pub fn input_shape(&self) -> &[i64] {
    &self.input_shape
  }

  pub fn model_path(&self) -> &std::path::Path {
    &self.model_path
  }

  fn run(&self, input: &RgbNhwcTensor<W, H>) -> Result<(Vec<i64>, Vec<f32>), ModelError> {
    let view = ArrayView4::from_shape(
      (1, H as usize, W as usize, RGB_CHANNELS),
      input.as_ref(),
    )
    .map_err(|e| ModelError::inference_with("tensor_conversion", "无法构造输入视图", e))?;
    let tensor = TensorRef::from_array_view(view)
      .map_err(|e| ModelError::inference_with("tensor_conversion", "无法转换输入张量", e))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| ModelError::inference("session_lock", "推理会话锁已中毒"))?;
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => tensor])
      .map_err(|e| {
        ModelError::inference_with(
          "forward_pass",
          format!("ONNX Runtime 推理失败: '{}' -> '{}'", self.input_name, self.output_name),
          e,
        )
      })?;

    let (shape, data) = outputs[self.output_name.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(|e| {
        ModelError::inference_with(
          "output_extraction",
          format!("无法以 f32 读取输出 '{}'", self.output_name),
          e,
        )
      })?;
    Ok((shape.iter().copied().collect(), data.to_vec()))
  }
}

impl<const W: u32, const H: u32> Model for OnnxClassifier<W, H> {
  type Input = RgbNhwcTensor<W, H>;
  type Output = ScoreTensor;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    check_input_shape(&self.input_shape, &input.shape())?;

    debug!("执行模型推理");
    let (shape, data) = self.run(input)?;
    debug!("模型输出形状: {:?}", shape);

    scores_from_output(&shape, data)
  }

  fn output_len(&self) -> Option<usize> {
    self.output_len
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use tempfile::NamedTempFile;

  #[test]
  fn builder_parses_url_options() {
    let url = Url::parse("onnx:///models/mobilenet%20v1.onnx?threads=2&input=x&output=prob").unwrap();
    let builder = OnnxClassifierBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/mobilenet v1.onnx"));
    assert_eq!(builder.intra_threads, Some(2));
    assert_eq!(builder.input_name.as_deref(), Some("x"));
    assert_eq!(builder.output_name.as_deref(), Some("prob"));
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("rknn:///models/mobilenet.rknn").unwrap();
    let err = OnnxClassifierBuilder::from_url(&url).unwrap_err();
    assert!(matches!(err, ModelError::ModelPath(_)));
    assert!(err.is_fatal());
  }

  #[test]
  fn builder_rejects_bad_thread_count() {
    let url = Url::parse("onnx:///models/m.onnx?threads=many").unwrap();
    assert!(OnnxClassifierBuilder::from_url(&url).is_err());
  }

  #[test]
  fn missing_model_file_fails_to_load() {
    let err = OnnxClassifierBuilder::new("/nonexistent/shitu/model.onnx")
      .build::<224, 224>()
      .unwrap_err();
    assert!(matches!(err, ModelError::ModelLoad { .. }));
    assert!(err.is_fatal());
  }

  #[test]
  fn corrupt_model_file_fails_to_load() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"this is not an onnx graph").unwrap();
    let err = OnnxClassifierBuilder::new(file.path())
      .build::<224, 224>()
      .unwrap_err();
    assert!(matches!(err, ModelError::ModelLoad { .. }));
  }

  /// 需要一个 [1, 224, 224, 3] 输入的分类模型，路径由 SHITU_TEST_ONNX_MODEL 指定
  #[test]
  #[ignore]
  fn session_is_deterministic_under_concurrent_calls() {
    use std::sync::Arc;

    let Ok(path) = std::env::var("SHITU_TEST_ONNX_MODEL") else {
      eprintln!("未设置 SHITU_TEST_ONNX_MODEL, 跳过");
      return;
    };
    let model = Arc::new(OnnxClassifierBuilder::new(path).build::<224, 224>().unwrap());

    let mut input = RgbNhwcTensor::<224, 224>::default();
    for (i, v) in input.as_mut().iter_mut().enumerate() {
      *v = (i % 251) as f32 / 255.0;
    }
    let input = Arc::new(input);
    let expected = model.infer(&input).unwrap();
    if let Some(classes) = model.output_len() {
      assert_eq!(expected.len(), classes);
    }

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let model = Arc::clone(&model);
        let input = Arc::clone(&input);
        std::thread::spawn(move || {
          (0..8)
            .map(|_| model.infer(&input).unwrap())
            .collect::<Vec<_>>()
        })
      })
      .collect();
    for handle in handles {
      for scores in handle.join().unwrap() {
        assert_eq!(scores, expected);
      }
    }
  }
}
