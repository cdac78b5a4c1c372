// 该文件是 Huijing （绘境） 项目的一部分。
// src/utils.rs - URL 查询参数等公共工具
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

use std::{
  path::{Path, PathBuf},
  str::FromStr,
};

use thiserror::Error;
use url::Url;

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "gif", "webp", "tif", "tiff"];

#[derive(Error, Debug, PartialEq, Eq)]
#[error("查询参数 '{key}' 的值 '{value}' 无效")]
pub struct QueryParamError {
  pub key: String,
  pub value: String,
}

/// 读取并解析查询参数，不存在时返回 `None`
pub fn query_value<T: FromStr>(url: &Url, key: &str) -> Result<Option<T>, QueryParamError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v.parse::<T>().map(Some).map_err(|_| QueryParamError {
      key: key.to_string(),
      value: v.into_owned(),
    }),
    None => Ok(None),
  }
}

/// 查询参数是否存在（`?always` 这类无值开关）
pub fn query_flag(url: &Url, key: &str) -> bool {
  url.query_pairs().any(|(k, v)| k == key && v != "false" && v != "0")
}

/// URI 中的文件路径（解码百分号转义）
pub fn url_path(url: &Url) -> PathBuf {
  match urlencoding::decode(url.path()) {
    Ok(path) => PathBuf::from(path.into_owned()),
    Err(_) => PathBuf::from(url.path()),
  }
}

pub fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_value_parses_present_keys() {
    let url = Url::parse("yolov8:///m.onnx?conf=0.3&max_det=10").unwrap();
    assert_eq!(query_value::<f32>(&url, "conf").unwrap(), Some(0.3));
    assert_eq!(query_value::<usize>(&url, "max_det").unwrap(), Some(10));
    assert_eq!(query_value::<f32>(&url, "iou").unwrap(), None);
  }

  #[test]
  fn query_value_reports_bad_values() {
    let url = Url::parse("yolov8:///m.onnx?conf=high").unwrap();
    let err = query_value::<f32>(&url, "conf").unwrap_err();
    assert_eq!(err.key, "conf");
    assert_eq!(err.value, "high");
  }

  #[test]
  fn query_flag_accepts_bare_keys() {
    let url = Url::parse("folder:///tmp/out?always&record=id").unwrap();
    assert!(query_flag(&url, "always"));
    assert!(!query_flag(&url, "invert"));

    let url = Url::parse("folder:///tmp/out?always=false").unwrap();
    assert!(!query_flag(&url, "always"));
  }

  #[test]
  fn url_path_decodes_escapes() {
    let url = Url::parse("image:///data/coco%20glide/airplane_44652.png").unwrap();
    assert_eq!(
      url_path(&url),
      PathBuf::from("/data/coco glide/airplane_44652.png")
    );
  }

  #[test]
  fn image_extensions_are_case_insensitive() {
    assert!(is_image_path(Path::new("a/b/test1.WEBP")));
    assert!(is_image_path(Path::new("airplane_44652.png")));
    assert!(!is_image_path(Path::new("labels.txt")));
    assert!(!is_image_path(Path::new("noext")));
  }
}
