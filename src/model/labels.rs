// 该文件是 Huijing （绘境） 项目的一部分。
// src/model/labels.rs - 类别标签
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

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use tracing::warn;

use crate::model::WithLabel;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 带名称的类别标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassLabel {
  pub id: u32,
  pub name: Arc<str>,
}

impl WithLabel for ClassLabel {
  fn to_label_str(&self) -> String {
    self.name.to_string()
  }

  fn to_label_id(&self) -> u32 {
    self.id
  }
}

/// 类别 id 到名称的映射
#[derive(Debug, Clone)]
pub struct LabelSet {
  names: BTreeMap<u32, Arc<str>>,
}

impl Default for LabelSet {
  fn default() -> Self {
    Self::coco()
  }
}

impl LabelSet {
  pub fn coco() -> Self {
    Self {
      names: COCO_CLASSES
        .iter()
        .enumerate()
        .map(|(i, name)| (i as u32, Arc::from(*name)))
        .collect(),
    }
  }

  /// 解析 Ultralytics 导出模型中的 `names` 元数据，
  /// 形如 `{0: 'person', 1: 'bicycle'}`
  pub fn from_metadata(names: &str) -> Option<Self> {
    let body = names.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut map = BTreeMap::new();
    let mut rest = body.trim();

    while !rest.is_empty() {
      let (id, tail) = rest.split_once(':')?;
      let id = id.trim().parse::<u32>().ok()?;
      let tail = tail.trim_start();
      let quote = tail.chars().next().filter(|c| *c == '\'' || *c == '"')?;
      let tail = &tail[1..];
      let end = tail.find(quote)?;
      map.insert(id, Arc::from(&tail[..end]));
      rest = tail[end + 1..].trim_start();
      rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    if map.is_empty() {
      warn!("模型类别元数据为空");
      return None;
    }
    Some(Self { names: map })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn label(&self, id: u32) -> ClassLabel {
    let name = self
      .names
      .get(&id)
      .cloned()
      .unwrap_or_else(|| Arc::from(format!("class_{}", id)));
    ClassLabel { id, name }
  }
}
