// 该文件是 Huijing （绘境） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测/姿态/分类模型
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

use std::{path::PathBuf, str::FromStr};

use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};
use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNchwFrame,
  model::{
    ClassLabel, ClassScore, DetectItem, DetectResult, Keypoint, LabelSet, Model,
    session::{SessionBuilder, SessionError, metadata_value},
  },
  utils::{QueryParamError, query_value, url_path},
};

const YOLOV8_DEFAULT_CONF: f32 = 0.25;
const YOLOV8_DEFAULT_IOU: f32 = 0.7;
const YOLOV8_DEFAULT_MAX_DET: usize = 300;
const YOLOV8_BOX_ROWS: usize = 4;
const YOLOV8_KEYPOINT_DIMS: usize = 3;
const YOLOV8_DEFAULT_KEYPOINTS: usize = 17;
const YOLOV8_TOP_K: usize = 5;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("会话错误: {0}")]
  Session(#[from] SessionError),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("参数错误: {0}")]
  QueryParam(#[from] QueryParamError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("输入尺寸不匹配: 模型为 {model_w}x{model_h}, 程序为 {frame_w}x{frame_h}")]
  InputSizeMismatch {
    model_w: i64,
    model_h: i64,
    frame_w: u32,
    frame_h: u32,
  },
  #[error("输出形状无效: {0:?}")]
  OutputShape(Vec<usize>),
}

/// 模型任务类型，对应 Ultralytics 导出时的 `task` 元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yolov8Task {
  Detect,
  Pose,
  Classify,
}

impl FromStr for Yolov8Task {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "detect" => Ok(Yolov8Task::Detect),
      "pose" => Ok(Yolov8Task::Pose),
      "classify" => Ok(Yolov8Task::Classify),
      other => Err(format!("不支持的任务类型: {}", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Yolov8Params {
  pub conf: f32,
  pub iou: f32,
  pub max_det: usize,
}

impl Default for Yolov8Params {
  fn default() -> Self {
    Self {
      conf: YOLOV8_DEFAULT_CONF,
      iou: YOLOV8_DEFAULT_IOU,
      max_det: YOLOV8_DEFAULT_MAX_DET,
    }
  }
}

pub struct Yolov8Builder {
  model_path: PathBuf,
  params: Yolov8Params,
  task: Option<Yolov8Task>,
  session: SessionBuilder,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let defaults = Yolov8Params::default();
    let params = Yolov8Params {
      conf: query_value(url, "conf")?.unwrap_or(defaults.conf),
      iou: query_value(url, "iou")?.unwrap_or(defaults.iou),
      max_det: query_value(url, "max_det")?.unwrap_or(defaults.max_det),
    };

    Ok(Yolov8Builder {
      model_path: url_path(url),
      params,
      task: query_value(url, "task")?,
      session: SessionBuilder::from_query(url)?,
    })
  }
}

impl Yolov8Builder {
  pub fn conf(mut self, conf: f32) -> Self {
    self.params.conf = conf;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.params.iou = iou;
    self
  }

  pub fn max_det(mut self, max_det: usize) -> Self {
    self.params.max_det = max_det;
    self
  }

  pub fn task(mut self, task: Yolov8Task) -> Self {
    self.task = Some(task);
    self
  }

  pub fn params(&self) -> &Yolov8Params {
    &self.params
  }

  pub fn build<const W: u32, const H: u32>(self) -> Result<Yolov8<W, H>, Yolov8Error> {
    let session = self.session.build(&self.model_path)?;

    let task = match self.task {
      Some(task) => task,
      None => metadata_value(&session, "task")
        .and_then(|t| t.parse().ok())
        .unwrap_or(Yolov8Task::Detect),
    };

    let labels = metadata_value(&session, "names")
      .and_then(|names| LabelSet::from_metadata(&names))
      .unwrap_or_else(|| {
        debug!("模型未携带类别元数据，使用 COCO 类别");
        LabelSet::coco()
      });

    let num_keypoints = match task {
      Yolov8Task::Pose => metadata_value(&session, "kpt_shape")
        .and_then(|shape| parse_kpt_shape(&shape))
        .unwrap_or(YOLOV8_DEFAULT_KEYPOINTS),
      _ => 0,
    };

    if session.inputs.len() != 1 {
      error!("预期模型输入数量为 1, 实际为 {}", session.inputs.len());
      return Err(Yolov8Error::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    let input = &session.inputs[0];
    if let Some(dims) = input.input_type.tensor_dimensions()
      && dims.len() == 4
      && dims[2] > 0
      && dims[3] > 0
      && (dims[3] != W as i64 || dims[2] != H as i64)
    {
      return Err(Yolov8Error::InputSizeMismatch {
        model_w: dims[3],
        model_h: dims[2],
        frame_w: W,
        frame_h: H,
      });
    }

    let input_name = input.name.clone();
    let output_name = session
      .outputs
      .first()
      .map(|o| o.name.clone())
      .ok_or_else(|| Yolov8Error::ModelInvalid("模型没有输出".to_string()))?;

    info!(
      "YOLOv8 模型就绪: 任务 {:?}, 类别数 {}, 置信度阈值 {}, IoU 阈值 {}",
      task,
      labels.len(),
      self.params.conf,
      self.params.iou
    );

    Ok(Yolov8 {
      session,
      input_name,
      output_name,
      labels,
      params: self.params,
      task,
      num_keypoints,
    })
  }
}

/// 解析 `kpt_shape` 元数据，如 `[17, 3]`
fn parse_kpt_shape(shape: &str) -> Option<usize> {
  let body = shape.trim().strip_prefix('[')?.strip_suffix(']')?;
  body.split(',').next()?.trim().parse().ok()
}

pub struct Yolov8<const W: u32, const H: u32> {
  session: Session,
  input_name: String,
  output_name: String,
  labels: LabelSet,
  params: Yolov8Params,
  task: Yolov8Task,
  num_keypoints: usize,
}

impl<const W: u32, const H: u32> Yolov8<W, H> {
  pub fn task(&self) -> Yolov8Task {
    self.task
  }

  pub fn labels(&self) -> &LabelSet {
    &self.labels
  }

  /// 解码原始输出张量
  pub fn decode(&self, output: ArrayViewD<f32>) -> Result<DetectResult<ClassLabel>, Yolov8Error> {
    decode_output(
      self.task,
      self.num_keypoints,
      &self.params,
      &self.labels,
      (W as f32, H as f32),
      output,
    )
  }
}

/// 按任务类型校验输出形状并解码：
/// 检测/姿态为 `(1, 4 + nc + 3k, N)`，分类为 `(1, nc)`
pub fn decode_output(
  task: Yolov8Task,
  num_keypoints: usize,
  params: &Yolov8Params,
  labels: &LabelSet,
  input_size: (f32, f32),
  output: ArrayViewD<f32>,
) -> Result<DetectResult<ClassLabel>, Yolov8Error> {
  let shape = output.shape().to_vec();
  match task {
    Yolov8Task::Classify => {
      if shape.len() != 2 || shape[0] != 1 || shape[1] == 0 {
        return Err(Yolov8Error::OutputShape(shape));
      }
      let probs = output.iter().copied().collect::<Vec<_>>();
      Ok(DetectResult {
        items: Box::new([]),
        probs: Some(top_k(&probs, YOLOV8_TOP_K, labels).into_boxed_slice()),
      })
    }
    Yolov8Task::Detect | Yolov8Task::Pose => {
      if shape.len() != 3 || shape[0] != 1 {
        return Err(Yolov8Error::OutputShape(shape));
      }
      let rows = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|_| Yolov8Error::OutputShape(shape.clone()))?;
      let keypoint_rows = num_keypoints * YOLOV8_KEYPOINT_DIMS;
      if rows.nrows() <= YOLOV8_BOX_ROWS + keypoint_rows {
        return Err(Yolov8Error::OutputShape(shape));
      }
      let num_classes = rows.nrows() - YOLOV8_BOX_ROWS - keypoint_rows;
      debug!(
        "输出 {:?}: 类别数 {}, 关键点数 {}",
        shape, num_classes, num_keypoints
      );

      let candidates = decode_candidates(
        rows,
        num_classes,
        num_keypoints,
        params.conf,
        input_size,
        labels,
      );
      let items = nms(candidates, params.iou, params.max_det);
      debug!("检测到 {} 个物体", items.len());

      Ok(DetectResult {
        items: items.into_boxed_slice(),
        probs: None,
      })
    }
  }
}

impl<const W: u32, const H: u32> Model for Yolov8<W, H> {
  type Input = RgbNchwFrame<W, H>;
  type Output = DetectResult<ClassLabel>;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let tensor = Tensor::from_array(input.to_tensor())?;

    debug!("执行模型推理");
    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => tensor]?)?;

    debug!("获取模型输出");
    let output = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
    self.decode(output)
  }
}

/// 逐个锚点取最高类别分数，过滤低于阈值的候选框
pub fn decode_candidates(
  rows: ArrayView2<f32>,
  num_classes: usize,
  num_keypoints: usize,
  conf: f32,
  (input_w, input_h): (f32, f32),
  labels: &LabelSet,
) -> Vec<DetectItem<ClassLabel>> {
  let mut items = Vec::new();
  let kpt_offset = YOLOV8_BOX_ROWS + num_classes;

  for (anchor, column) in rows.axis_iter(Axis(1)).enumerate() {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, column[YOLOV8_BOX_ROWS + c]))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if score <= conf {
      continue;
    }

    let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
    let bbox = [
      ((cx - w / 2.0) / input_w).clamp(0.0, 1.0),
      ((cy - h / 2.0) / input_h).clamp(0.0, 1.0),
      ((cx + w / 2.0) / input_w).clamp(0.0, 1.0),
      ((cy + h / 2.0) / input_h).clamp(0.0, 1.0),
    ];
    if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
      debug!("锚点 {} 的检测框为空，已丢弃", anchor);
      continue;
    }

    let keypoints = (num_keypoints > 0).then(|| {
      (0..num_keypoints)
        .map(|k| {
          let base = kpt_offset + k * YOLOV8_KEYPOINT_DIMS;
          Keypoint {
            x: (column[base] / input_w).clamp(0.0, 1.0),
            y: (column[base + 1] / input_h).clamp(0.0, 1.0),
            score: column[base + 2],
          }
        })
        .collect::<Vec<_>>()
        .into_boxed_slice()
    });

    items.push(DetectItem {
      kind: labels.label(class_id as u32),
      score,
      bbox,
      keypoints,
    });
  }

  items
}

/// 按类别进行非极大值抑制，结果按分数降序，最多保留 `max_det` 个
pub fn nms(
  mut items: Vec<DetectItem<ClassLabel>>,
  iou_threshold: f32,
  max_det: usize,
) -> Vec<DetectItem<ClassLabel>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<DetectItem<ClassLabel>> = Vec::new();
  for item in items {
    if result.len() >= max_det {
      break;
    }
    let suppressed = result
      .iter()
      .any(|kept| kept.kind.id == item.kind.id && iou(&kept.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      result.push(item);
    }
  }
  result
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 分类概率的前 k 名
pub fn top_k(probs: &[f32], k: usize, labels: &LabelSet) -> Vec<ClassScore<ClassLabel>> {
  let mut indexed = probs.iter().copied().enumerate().collect::<Vec<_>>();
  indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
  indexed
    .into_iter()
    .take(k)
    .map(|(id, score)| ClassScore {
      kind: labels.label(id as u32),
      score,
    })
    .collect()
}
