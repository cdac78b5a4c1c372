// 该文件是 Huijing （绘境） 项目的一部分。
// tests/pipeline.rs - 输入、模型与输出的串联测试
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
  convert::Infallible,
  path::{Path, PathBuf},
};

use image::{GrayImage, Luma, Rgb, RgbImage};
use url::Url;

use huijing::{
  FromUrl,
  frame::RgbNchwFrame,
  input::{ImageFileInput, InputWrapper, MaskFileInput, load_inpaint_request},
  model::{ClassLabel, DetectItem, DetectResult, InpaintRequest, InpaintResult, LabelSet, Model},
  output::OutputWrapper,
  task::{BatchTask, OneShotTask, Task},
};

/// 在中间位置“检测”出一架飞机
struct FakeDetector;

impl Model for FakeDetector {
  type Input = RgbNchwFrame<32, 32>;
  type Output = DetectResult<ClassLabel>;
  type Error = Infallible;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(DetectResult {
      items: vec![DetectItem {
        kind: LabelSet::coco().label(4),
        score: 0.8,
        bbox: [0.25, 0.25, 0.75, 0.75],
        keypoints: None,
      }]
      .into_boxed_slice(),
      probs: None,
    })
  }
}

/// 把整张图填成红色
struct FakeInpainter;

impl Model for FakeInpainter {
  type Input = InpaintRequest<16, 16>;
  type Output = InpaintResult;
  type Error = Infallible;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(InpaintResult {
      image: RgbImage::from_pixel(16, 16, Rgb([255, 0, 0])),
    })
  }
}

fn write_images(dir: &Path, count: usize) {
  for i in 0..count {
    RgbImage::from_pixel(64, 48, Rgb([30, 60, 90]))
      .save(dir.join(format!("frame_{i}.png")))
      .unwrap();
  }
  std::fs::write(dir.join("notes.txt"), "not an image").unwrap();
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
  let mut files = Vec::new();
  let mut stack = vec![dir.to_path_buf()];
  while let Some(d) = stack.pop() {
    for entry in std::fs::read_dir(d).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        stack.push(path);
      } else {
        files.push(path);
      }
    }
  }
  files
}

#[test]
fn detection_batch_writes_every_output() {
  let input_dir = tempfile::tempdir().unwrap();
  let output_dir = tempfile::tempdir().unwrap();
  write_images(input_dir.path(), 3);

  let input =
    InputWrapper::<32, 32>::from_url(&Url::parse(&format!("image://{}", input_dir.path().display())).unwrap())
      .unwrap();
  assert_eq!(input.len(), 3);

  let outputs = [
    format!("image://{}/annotated.png", output_dir.path().display()),
    format!("folder://{}/records?record=name", output_dir.path().display()),
  ]
  .iter()
  .map(|u| OutputWrapper::from_url(&Url::parse(u).unwrap()).unwrap())
  .collect::<Vec<_>>();

  BatchTask::default()
    .with_frame_number(Some(2))
    .run_task(input.into_nchw(), FakeDetector, outputs)
    .unwrap();

  let annotated = image::open(output_dir.path().join("annotated.png")).unwrap().into_rgb8();
  assert_eq!(annotated.dimensions(), (64, 48));
  assert!(output_dir.path().join("annotated_1.png").is_file());
  assert!(!output_dir.path().join("annotated_2.png").exists());

  let records = files_under(&output_dir.path().join("records"));
  assert_eq!(records.len(), 4);
  let text = records
    .iter()
    .find(|p| p.extension().is_some_and(|e| e == "txt"))
    .unwrap();
  assert!(std::fs::read_to_string(text).unwrap().starts_with("airplane, 0.8000"));
}

#[test]
fn inpainting_replaces_only_masked_region() {
  let dir = tempfile::tempdir().unwrap();
  let image_path = dir.path().join("airplane.png");
  let mask_path = dir.path().join("mask.png");
  RgbImage::from_pixel(32, 32, Rgb([0, 0, 200])).save(&image_path).unwrap();
  GrayImage::from_fn(32, 32, |x, _| if x >= 16 { Luma([255]) } else { Luma([0]) })
    .save(&mask_path)
    .unwrap();

  let image = ImageFileInput::<16, 16>::open(&image_path).unwrap();
  let mask = MaskFileInput::<16, 16>::from_url(&Url::parse(&format!("mask://{}", mask_path.display())).unwrap())
    .unwrap();
  let request = load_inpaint_request(&image, &mask, "a red boeing airplane").unwrap();

  let out_path = dir.path().join("out").join("inpainted.png");
  let output = OutputWrapper::from_url(
    &Url::parse(&format!("image://{}?keep_unmasked", out_path.display())).unwrap(),
  )
  .unwrap();

  OneShotTask
    .run_task(std::iter::once(request), FakeInpainter, output)
    .unwrap();

  let saved = image::open(&out_path).unwrap().into_rgb8();
  assert_eq!(saved.dimensions(), (32, 32));
  assert_eq!(saved.get_pixel(4, 10), &Rgb([0, 0, 200]));
  let Rgb([r, _, b]) = *saved.get_pixel(28, 10);
  assert!(r > 250 && b < 5);
}

#[test]
fn corrupt_mask_reaches_the_caller() {
  use anyhow::Context;

  let dir = tempfile::tempdir().unwrap();
  let image_path = dir.path().join("airplane.png");
  let mask_path = dir.path().join("m.png");
  RgbImage::new(32, 32).save(&image_path).unwrap();
  std::fs::write(&mask_path, [7u8; 16]).unwrap();

  let image = ImageFileInput::<16, 16>::open(&image_path).unwrap();
  let mask = MaskFileInput::<16, 16>::open(&mask_path).unwrap();
  let err = load_inpaint_request(&image, &mask, "a red boeing airplane")
    .context("读取修复输入失败")
    .unwrap_err();

  let chain = format!("{:#}", err);
  assert!(chain.starts_with("读取修复输入失败"));
  assert!(chain.contains("掩码加载错误"));
  assert!(!chain.contains("没有输入帧"));
}

#[test]
fn unknown_schemes_are_rejected() {
  let url = Url::parse("rtsp://camera/live").unwrap();
  assert!(InputWrapper::<32, 32>::from_url(&url).is_err());
  assert!(OutputWrapper::from_url(&url).is_err());
}
