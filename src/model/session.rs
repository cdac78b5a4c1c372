// 该文件是 Huijing （绘境） 项目的一部分。
// src/model/session.rs - ONNX Runtime 推理会话
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

use std::{path::Path, str::FromStr};

use ort::session::{Session, builder::GraphOptimizationLevel};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::utils::{QueryParamError, query_value};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("参数错误: {0}")]
  QueryParam(#[from] QueryParamError),
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Cuda,
}

impl FromStr for Device {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::Cuda),
      other => Err(format!("未知设备: {}", other)),
    }
  }
}

/// 会话参数，来自模型 URI 的 `device` 与 `threads` 查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBuilder {
  pub device: Device,
  pub threads: usize,
}

impl Default for SessionBuilder {
  fn default() -> Self {
    Self {
      device: Device::Cpu,
      threads: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
    }
  }
}

impl SessionBuilder {
  pub fn from_query(url: &Url) -> Result<Self, SessionError> {
    let mut builder = Self::default();
    if let Some(device) = query_value::<Device>(url, "device")? {
      builder.device = device;
    }
    if let Some(threads) = query_value::<usize>(url, "threads")? {
      builder.threads = threads.max(1);
    }
    Ok(builder)
  }

  pub fn build(&self, model_path: &Path) -> Result<Session, SessionError> {
    if !model_path.is_file() {
      return Err(SessionError::ModelNotFound(
        model_path.display().to_string(),
      ));
    }

    info!("加载模型文件: {}", model_path.display());
    debug!("推理设备: {:?}, 线程数: {}", self.device, self.threads);

    let builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.threads)?;

    let builder = match self.device {
      Device::Cpu => builder,
      #[cfg(feature = "cuda")]
      Device::Cuda => {
        use ort::execution_providers::CUDAExecutionProvider;
        builder.with_execution_providers([CUDAExecutionProvider::default().build()])?
      }
      #[cfg(not(feature = "cuda"))]
      Device::Cuda => {
        warn!("未启用 cuda 特性，回退到 CPU 推理");
        builder
      }
    };

    let session = builder.commit_from_file(model_path)?;
    for input in session.inputs.iter() {
      debug!("模型输入: {} {:?}", input.name, input.input_type);
    }
    for output in session.outputs.iter() {
      debug!("模型输出: {} {:?}", output.name, output.output_type);
    }
    info!("模型加载完成");
    Ok(session)
  }
}

/// 读取模型自定义元数据
pub fn metadata_value(session: &Session, key: &str) -> Option<String> {
  match session.metadata().and_then(|meta| meta.custom(key)) {
    Ok(value) => value,
    Err(e) => {
      warn!("读取模型元数据 {} 失败: {}", key, e);
      None
    }
  }
}
