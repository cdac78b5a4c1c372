// 该文件是 Huijing （绘境） 项目的一部分。
// src/model/inpaint.rs - 图像修复（inpainting）管线
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

//! 修复模型是一张完整导出的 ONNX 计算图，采样过程在图内完成，这里只负责
//! 按输入名称组装张量并调用一次。

use std::{
  borrow::Cow,
  path::{Path, PathBuf},
  str::FromStr,
};

use image::{Rgb, RgbImage};
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, ShapeError};
use ort::{
  session::{Session, SessionInputValue},
  tensor::TensorElementType,
  value::Tensor,
};
use thiserror::Error;
use tokenizers::Tokenizer;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    InpaintRequest, InpaintResult, Model,
    session::{SessionBuilder, SessionError},
  },
  utils::{QueryParamError, query_value, url_path},
};

const INPAINT_DEFAULT_STEPS: i64 = 50;
const INPAINT_DEFAULT_GUIDANCE: f32 = 7.5;
const INPAINT_DEFAULT_SEED: i64 = 0;
const INPAINT_DEFAULT_MAX_TOKENS: usize = 77;
const INPAINT_TOKENIZER_FILE: &str = "tokenizer.json";
const INPAINT_END_OF_TEXT: &str = "<|endoftext|>";

#[derive(Error, Debug)]
pub enum InpaintError {
  #[error("会话错误: {0}")]
  Session(#[from] SessionError),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("参数错误: {0}")]
  QueryParam(#[from] QueryParamError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("不支持的模型输入: {0}")]
  UnsupportedInput(String),
  #[error("模型缺少必需输入: {0}")]
  MissingInput(&'static str),
  #[error("模型需要提示词输入，但未找到分词器文件")]
  MissingTokenizer,
  #[error("分词器错误: {0}")]
  Tokenizer(String),
  #[error("输入尺寸不匹配: 模型为 {model_w}x{model_h}, 程序为 {frame_w}x{frame_h}")]
  InputSizeMismatch {
    model_w: i64,
    model_h: i64,
    frame_w: u32,
    frame_h: u32,
  },
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ShapeError),
  #[error("输出形状无效: {0:?}")]
  OutputShape(Vec<usize>),
}

/// 模型输入在修复管线中的角色，按输入名称识别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
  Image,
  Mask,
  PromptIds,
  Steps,
  Guidance,
  Seed,
}

impl InputRole {
  pub fn from_name(name: &str) -> Option<Self> {
    match name.to_ascii_lowercase().as_str() {
      "image" | "init_image" | "pixel_values" => Some(InputRole::Image),
      "mask" | "mask_image" => Some(InputRole::Mask),
      "input_ids" | "prompt_ids" | "text_ids" => Some(InputRole::PromptIds),
      "num_inference_steps" | "steps" => Some(InputRole::Steps),
      "guidance_scale" | "guidance" => Some(InputRole::Guidance),
      "seed" => Some(InputRole::Seed),
      _ => None,
    }
  }
}

/// 模型输入输出的像素取值范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelRange {
  /// [0, 1]
  Unit,
  /// [-1, 1]
  #[default]
  Signed,
}

impl FromStr for PixelRange {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "unit" => Ok(PixelRange::Unit),
      "signed" => Ok(PixelRange::Signed),
      other => Err(format!("未知像素范围: {}", other)),
    }
  }
}

impl PixelRange {
  /// 把 [0, 1] 的值映射到模型范围
  pub fn encode(&self, v: f32) -> f32 {
    match self {
      PixelRange::Unit => v,
      PixelRange::Signed => v * 2.0 - 1.0,
    }
  }

  /// 把模型输出映射回 8 位像素
  pub fn decode(&self, v: f32) -> u8 {
    let unit = match self {
      PixelRange::Unit => v,
      PixelRange::Signed => (v + 1.0) / 2.0,
    };
    (unit.clamp(0.0, 1.0) * 255.0).round() as u8
  }
}

pub struct InpaintBuilder {
  model_path: PathBuf,
  tokenizer_path: Option<PathBuf>,
  steps: i64,
  guidance: f32,
  seed: i64,
  range: PixelRange,
  max_tokens: usize,
  pad_id: Option<u32>,
  session: SessionBuilder,
}

impl FromUrlWithScheme for InpaintBuilder {
  const SCHEME: &'static str = "inpaint";
}

impl FromUrl for InpaintBuilder {
  type Error = InpaintError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InpaintError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = url_path(url);
    let tokenizer_path = query_value::<PathBuf>(url, "tokenizer")?.or_else(|| {
      model_path
        .parent()
        .map(|dir| dir.join(INPAINT_TOKENIZER_FILE))
        .filter(|p| p.is_file())
    });

    Ok(InpaintBuilder {
      model_path,
      tokenizer_path,
      steps: query_value(url, "steps")?.unwrap_or(INPAINT_DEFAULT_STEPS),
      guidance: query_value(url, "guidance")?.unwrap_or(INPAINT_DEFAULT_GUIDANCE),
      seed: query_value(url, "seed")?.unwrap_or(INPAINT_DEFAULT_SEED),
      range: query_value(url, "range")?.unwrap_or_default(),
      max_tokens: query_value(url, "max_tokens")?.unwrap_or(INPAINT_DEFAULT_MAX_TOKENS),
      pad_id: query_value(url, "pad_id")?,
      session: SessionBuilder::from_query(url)?,
    })
  }
}

impl InpaintBuilder {
  pub fn steps(mut self, steps: i64) -> Self {
    self.steps = steps;
    self
  }

  pub fn guidance(mut self, guidance: f32) -> Self {
    self.guidance = guidance;
    self
  }

  pub fn seed(mut self, seed: i64) -> Self {
    self.seed = seed;
    self
  }

  pub fn tokenizer(mut self, path: impl AsRef<Path>) -> Self {
    self.tokenizer_path = Some(path.as_ref().to_path_buf());
    self
  }

  pub fn build<const W: u32, const H: u32>(self) -> Result<InpaintPipeline<W, H>, InpaintError> {
    let session = self.session.build(&self.model_path)?;

    let mut inputs = Vec::with_capacity(session.inputs.len());
    for input in session.inputs.iter() {
      let role = InputRole::from_name(&input.name).ok_or_else(|| {
        error!("无法识别的模型输入: {}", input.name);
        InpaintError::UnsupportedInput(input.name.clone())
      })?;

      if role == InputRole::Image
        && let Some(dims) = input.input_type.tensor_dimensions()
        && dims.len() == 4
        && dims[2] > 0
        && dims[3] > 0
        && (dims[3] != W as i64 || dims[2] != H as i64)
      {
        return Err(InpaintError::InputSizeMismatch {
          model_w: dims[3],
          model_h: dims[2],
          frame_w: W,
          frame_h: H,
        });
      }

      debug!("模型输入 {} 识别为 {:?}", input.name, role);
      inputs.push(PipelineInput {
        name: input.name.clone(),
        role,
        dtype: input.input_type.tensor_type(),
      });
    }

    for (role, name) in [(InputRole::Image, "image"), (InputRole::Mask, "mask")] {
      if !inputs.iter().any(|i| i.role == role) {
        return Err(InpaintError::MissingInput(name));
      }
    }

    let tokenizer = if inputs.iter().any(|i| i.role == InputRole::PromptIds) {
      let path = self.tokenizer_path.ok_or(InpaintError::MissingTokenizer)?;
      info!("加载分词器: {}", path.display());
      Some(Tokenizer::from_file(&path).map_err(|e| InpaintError::Tokenizer(e.to_string()))?)
    } else {
      None
    };

    let pad_id = self
      .pad_id
      .or_else(|| {
        tokenizer
          .as_ref()
          .and_then(|t| t.token_to_id(INPAINT_END_OF_TEXT))
      })
      .unwrap_or(0);

    let output_name = session
      .outputs
      .first()
      .map(|o| o.name.clone())
      .ok_or_else(|| InpaintError::ModelInvalid("模型没有输出".to_string()))?;

    info!(
      "修复管线就绪: {}x{}, 步数 {}, 引导系数 {}, 种子 {}",
      W, H, self.steps, self.guidance, self.seed
    );

    Ok(InpaintPipeline {
      session,
      inputs,
      output_name,
      tokenizer,
      params: InpaintParams {
        steps: self.steps,
        guidance: self.guidance,
        seed: self.seed,
        range: self.range,
      },
      max_tokens: self.max_tokens,
      pad_id,
    })
  }
}

#[derive(Debug, Clone)]
struct PipelineInput {
  name: String,
  role: InputRole,
  dtype: Option<TensorElementType>,
}

/// 随请求一起送入模型的标量参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InpaintParams {
  pub steps: i64,
  pub guidance: f32,
  pub seed: i64,
  pub range: PixelRange,
}

impl Default for InpaintParams {
  fn default() -> Self {
    Self {
      steps: INPAINT_DEFAULT_STEPS,
      guidance: INPAINT_DEFAULT_GUIDANCE,
      seed: INPAINT_DEFAULT_SEED,
      range: PixelRange::default(),
    }
  }
}

/// 一个模型输入的张量数据，元素类型由输入声明决定
#[derive(Debug, Clone, PartialEq)]
pub enum InputArray {
  Float(ArrayD<f32>),
  Int64(ArrayD<i64>),
  Int32(ArrayD<i32>),
}

impl InputArray {
  pub fn shape(&self) -> &[usize] {
    match self {
      InputArray::Float(a) => a.shape(),
      InputArray::Int64(a) => a.shape(),
      InputArray::Int32(a) => a.shape(),
    }
  }

  fn into_value(self) -> Result<SessionInputValue<'static>, InpaintError> {
    Ok(match self {
      InputArray::Float(a) => Tensor::from_array(a)?.into(),
      InputArray::Int64(a) => Tensor::from_array(a)?.into(),
      InputArray::Int32(a) => Tensor::from_array(a)?.into(),
    })
  }
}

/// 按输入角色构造张量：图像按像素范围编码，提示词按声明类型输出 i32 或 i64
pub fn prepare_input<const W: u32, const H: u32>(
  role: InputRole,
  dtype: Option<TensorElementType>,
  request: &InpaintRequest<W, H>,
  params: &InpaintParams,
  encode_prompt: impl FnOnce(&str) -> Result<Vec<i64>, InpaintError>,
) -> Result<InputArray, InpaintError> {
  let array = match role {
    InputRole::Image => {
      let range = params.range;
      let tensor = request.image.to_tensor().mapv_into(|v| range.encode(v));
      InputArray::Float(tensor.into_dyn())
    }
    InputRole::Mask => InputArray::Float(request.mask.to_tensor().into_dyn()),
    InputRole::PromptIds => {
      let ids = encode_prompt(&request.prompt)?;
      let len = ids.len();
      if dtype == Some(TensorElementType::Int32) {
        let ids = ids.into_iter().map(|v| v as i32).collect::<Vec<_>>();
        InputArray::Int32(shape_ids(ids, len)?.into_dyn())
      } else {
        InputArray::Int64(shape_ids(ids, len)?.into_dyn())
      }
    }
    InputRole::Steps => InputArray::Int64(Array1::from_vec(vec![params.steps]).into_dyn()),
    InputRole::Guidance => InputArray::Float(Array1::from_vec(vec![params.guidance]).into_dyn()),
    InputRole::Seed => InputArray::Int64(Array1::from_vec(vec![params.seed]).into_dyn()),
  };
  Ok(array)
}

fn shape_ids<T>(ids: Vec<T>, len: usize) -> Result<Array2<T>, InpaintError> {
  Ok(Array2::from_shape_vec((1, len), ids)?)
}

pub struct InpaintPipeline<const W: u32, const H: u32> {
  session: Session,
  inputs: Vec<PipelineInput>,
  output_name: String,
  tokenizer: Option<Tokenizer>,
  params: InpaintParams,
  max_tokens: usize,
  pad_id: u32,
}

impl<const W: u32, const H: u32> InpaintPipeline<W, H> {
  pub fn takes_prompt(&self) -> bool {
    self.tokenizer.is_some()
  }

  fn encode_prompt(&self, prompt: &str) -> Result<Vec<i64>, InpaintError> {
    let tokenizer = self.tokenizer.as_ref().ok_or(InpaintError::MissingTokenizer)?;
    let encoding = tokenizer
      .encode(prompt, true)
      .map_err(|e| InpaintError::Tokenizer(e.to_string()))?;
    debug!("提示词分词长度: {}", encoding.get_ids().len());
    Ok(pad_tokens(encoding.get_ids(), self.max_tokens, self.pad_id))
  }
}

impl<const W: u32, const H: u32> Model for InpaintPipeline<W, H> {
  type Input = InpaintRequest<W, H>;
  type Output = InpaintResult;
  type Error = InpaintError;

  fn infer(&self, request: &Self::Input) -> Result<Self::Output, Self::Error> {
    if !self.takes_prompt() && !request.prompt.trim().is_empty() {
      warn!("模型不接受提示词输入，提示词 \"{}\" 被忽略", request.prompt);
    }
    debug!("掩码覆盖率: {:.2}%", request.mask.coverage() * 100.0);

    let mut inputs: Vec<(Cow<'_, str>, SessionInputValue<'static>)> =
      Vec::with_capacity(self.inputs.len());
    for input in self.inputs.iter() {
      let array = prepare_input(input.role, input.dtype, request, &self.params, |prompt| {
        self.encode_prompt(prompt)
      })?;
      debug!("模型输入 {}: {:?}", input.name, array.shape());
      inputs.push((Cow::from(input.name.as_str()), array.into_value()?));
    }

    debug!("执行修复推理");
    let outputs = self.session.run(inputs)?;
    let output = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
    let image = output_to_image(output, W, H, self.params.range)?;

    Ok(InpaintResult { image })
  }
}

/// 补齐或截断到固定长度
pub fn pad_tokens(ids: &[u32], max_tokens: usize, pad_id: u32) -> Vec<i64> {
  let mut tokens = ids
    .iter()
    .take(max_tokens)
    .map(|&id| id as i64)
    .collect::<Vec<_>>();
  tokens.resize(max_tokens, pad_id as i64);
  tokens
}

/// 把 (1, 3, H, W) 或 (1, H, W, 3) 的输出转为 RGB 图像
pub fn output_to_image(
  output: ArrayViewD<f32>,
  width: u32,
  height: u32,
  range: PixelRange,
) -> Result<RgbImage, InpaintError> {
  let shape = output.shape().to_vec();
  let (w, h) = (width as usize, height as usize);
  let nchw = match shape.as_slice() {
    [1, 3, hh, ww] if *hh == h && *ww == w => true,
    [1, hh, ww, 3] if *hh == h && *ww == w => false,
    _ => return Err(InpaintError::OutputShape(shape)),
  };

  let output = output
    .into_dimensionality::<ndarray::Ix4>()
    .map_err(|_| InpaintError::OutputShape(shape.clone()))?;

  Ok(RgbImage::from_fn(width, height, |x, y| {
    let (x, y) = (x as usize, y as usize);
    let px = |c: usize| {
      let v = if nchw {
        output[[0, c, y, x]]
      } else {
        output[[0, y, x, c]]
      };
      range.decode(v)
    };
    Rgb([px(0), px(1), px(2)])
  }))
}
