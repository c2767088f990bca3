// 该文件是 count-people （人数统计） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 (ONNX Runtime) 模型定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 count-people contributors

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{Array4, ArrayViewD, Ix3};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Value;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Letterbox, RgbNchwFrame},
  input::AsNchwFrame,
  model::{CocoLabel, DetectItem, DetectResult, Model, WithLabel},
};

const YOLOV8_NUM_INPUTS: usize = 1;
const YOLOV8_CLASS_NUM: usize = 80;
const YOLOV8_BOX_CHANNELS: usize = 4;
pub const YOLOV8_INPUT_W: u32 = 640;
pub const YOLOV8_INPUT_H: u32 = 640;
const YOLOV8_OBJECT_THRESH: f32 = 0.25;
pub const YOLOV8_NMS_THRESH: f32 = 0.7;
const YOLOV8_MAX_DETECTIONS: usize = 300;

pub struct Yolov8<Frame> {
  session: Mutex<Session>,
  input_name: String,
  nms_threshold: f32,
  _phantom: PhantomData<Frame>,
}

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("model file not found: {0}")]
  ModelNotFound(PathBuf),
  #[error("invalid model: {0}")]
  ModelInvalid(String),
  #[error("{0}: {1}")]
  OrtError(&'static str, String),
  #[error("model path error: {0}")]
  ModelPathError(String),
  #[error("invalid tensor shape")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("unexpected model output shape {0:?}")]
  OutputShape(Vec<usize>),
  #[error("inference session lock poisoned")]
  SessionPoisoned,
}

impl Yolov8Error {
  pub fn ort(msg: &'static str, e: impl std::fmt::Display) -> Self {
    Yolov8Error::OrtError(msg, e.to_string())
  }
}

pub struct Yolov8Builder {
  model_path: PathBuf,
  nms_threshold: f32,
  intra_threads: Option<usize>,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "model location must use the {} scheme, got {}",
        Self::SCHEME,
        url.scheme()
      )));
    }
    if url.host_str().is_some_and(|host| !host.is_empty()) {
      return Err(Yolov8Error::ModelPathError(format!(
        "model location must not have a host: {}",
        url
      )));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| Yolov8Error::ModelPathError(e.to_string()))?;
    if path.is_empty() {
      return Err(Yolov8Error::ModelPathError(format!(
        "model location has an empty path: {}",
        url
      )));
    }

    Ok(Yolov8Builder {
      model_path: PathBuf::from(path.into_owned()),
      nms_threshold: YOLOV8_NMS_THRESH,
      intra_threads: None,
    })
  }
}

impl Yolov8Builder {
  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold.clamp(0.0, 1.0);
    self
  }

  pub fn intra_threads(mut self, threads: Option<usize>) -> Self {
    self.intra_threads = threads;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn build<Frame>(self) -> Result<Yolov8<Frame>, Yolov8Error> {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(Yolov8Error::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let mut builder = Session::builder()
      .map_err(|e| Yolov8Error::ort("failed to create session builder", e))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| Yolov8Error::ort("failed to set optimization level", e))?;
    if let Some(threads) = self.intra_threads {
      debug!("推理线程数: {}", threads);
      builder = builder
        .with_intra_threads(threads)
        .map_err(|e| Yolov8Error::ort("failed to set intra threads", e))?;
    }
    let session = builder
      .commit_from_file(&self.model_path)
      .map_err(|e| Yolov8Error::ort("failed to load model", e))?;

    let num_inputs = session.inputs.len();
    let num_outputs = session.outputs.len();
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != YOLOV8_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        YOLOV8_NUM_INPUTS, num_inputs
      );
      return Err(Yolov8Error::ModelInvalid(format!(
        "expected {} input, found {}",
        YOLOV8_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs == 0 {
      error!("模型没有输出");
      return Err(Yolov8Error::ModelInvalid("model has no outputs".to_string()));
    }

    let input_name = session.inputs[0].name.clone();
    info!("模型加载完成, 输入: {}", input_name);

    Ok(Yolov8 {
      session: Mutex::new(session),
      input_name,
      nms_threshold: self.nms_threshold,
      _phantom: PhantomData,
    })
  }
}

impl<const W: u32, const H: u32> Model for Yolov8<RgbNchwFrame<W, H>> {
  type Input = RgbNchwFrame<W, H>;
  type Output = DetectResult<CocoLabel>;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let tensor = Array4::from_shape_vec(
      (1, input.channels(), H as usize, W as usize),
      input.as_nchw().to_vec(),
    )?;
    let value =
      Value::from_array(tensor).map_err(|e| Yolov8Error::ort("failed to create input tensor", e))?;

    debug!("执行模型推理");
    let mut session = self
      .session
      .lock()
      .map_err(|_| Yolov8Error::SessionPoisoned)?;
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => value])
      .map_err(|e| Yolov8Error::ort("inference failed", e))?;

    debug!("获取模型输出");
    let output = outputs[0]
      .try_extract_array::<f32>()
      .map_err(|e| Yolov8Error::ort("failed to extract output tensor", e))?;

    decode_output(output.view(), input.letterbox(), self.nms_threshold)
  }
}

/// 解码 YOLOv8 输出张量
///
/// 支持 `[1, 84, N]`（通道优先）与 `[1, N, 84]`（候选优先）两种布局，
/// 前 4 个通道为输入像素坐标下的 `cx, cy, w, h`，其余为 80 个类别得分。
pub fn decode_output(
  output: ArrayViewD<f32>,
  letterbox: &Letterbox,
  nms_threshold: f32,
) -> Result<DetectResult<CocoLabel>, Yolov8Error> {
  let shape = output.shape().to_vec();
  let channels = YOLOV8_BOX_CHANNELS + YOLOV8_CLASS_NUM;
  let (num_anchors, channel_major) = match shape.as_slice() {
    [1, c, n] if *c == channels => (*n, true),
    [1, n, c] if *c == channels => (*n, false),
    _ => {
      error!("模型输出形状不匹配: {:?}, 期望通道数 {}", shape, channels);
      return Err(Yolov8Error::OutputShape(shape));
    }
  };
  debug!(
    "模型输出形状: {:?} ({})",
    shape,
    if channel_major { "通道优先" } else { "候选优先" }
  );

  let output = output.into_dimensionality::<Ix3>()?;
  let at = |anchor: usize, channel: usize| -> f32 {
    if channel_major {
      output[[0, channel, anchor]]
    } else {
      output[[0, anchor, channel]]
    }
  };

  let mut candidates = Vec::new();
  for anchor in 0..num_anchors {
    let (class_id, score) = (0..YOLOV8_CLASS_NUM)
      .map(|c| (c, at(anchor, YOLOV8_BOX_CHANNELS + c)))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if score <= YOLOV8_OBJECT_THRESH {
      continue;
    }

    let cx = at(anchor, 0);
    let cy = at(anchor, 1);
    let w = at(anchor, 2);
    let h = at(anchor, 3);

    candidates.push(DetectItem {
      kind: CocoLabel::from_label_id(class_id as u32),
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  debug!("候选框数量: {}", candidates.len());

  let items: Vec<_> = non_max_suppression(candidates, nms_threshold, YOLOV8_MAX_DETECTIONS)
    .into_iter()
    .map(|item| DetectItem {
      bbox: letterbox.unmap_bbox(item.bbox),
      ..item
    })
    .collect();

  debug!("检测到 {} 个物体", items.len());
  Ok(DetectResult::from(items))
}

/// 按类别的非极大值抑制，结果按得分降序
fn non_max_suppression<T: PartialEq>(
  mut items: Vec<DetectItem<T>>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<DetectItem<T>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut keep: Vec<DetectItem<T>> = Vec::new();
  for item in items {
    if keep.len() >= max_detections {
      break;
    }
    let suppressed = keep
      .iter()
      .any(|k| k.kind == item.kind && iou(&k.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      keep.push(item);
    }
  }
  keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array3;

  const CHANNELS: usize = YOLOV8_BOX_CHANNELS + YOLOV8_CLASS_NUM;

  fn identity() -> Letterbox {
    Letterbox::fit(640, 640, 640, 640)
  }

  /// 通道优先布局下写入一个候选框
  fn put(out: &mut Array3<f32>, anchor: usize, b: [f32; 4], class: usize, score: f32) {
    for (i, v) in b.iter().enumerate() {
      out[[0, i, anchor]] = *v;
    }
    out[[0, YOLOV8_BOX_CHANNELS + class, anchor]] = score;
  }

  #[test]
  fn overlapping_boxes_of_same_class_are_suppressed() {
    let mut out = Array3::<f32>::zeros((1, CHANNELS, 3));
    put(&mut out, 0, [100.0, 100.0, 50.0, 100.0], 0, 0.9);
    put(&mut out, 1, [102.0, 101.0, 50.0, 100.0], 0, 0.8);
    put(&mut out, 2, [100.0, 100.0, 50.0, 100.0], 2, 0.6);

    let result = decode_output(out.into_dyn().view(), &identity(), YOLOV8_NMS_THRESH).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].kind, CocoLabel::PERSON);
    assert_eq!(result.items[0].score, 0.9);
    assert_eq!(
      result.items[0].bbox,
      [75.0 / 640.0, 50.0 / 640.0, 125.0 / 640.0, 150.0 / 640.0]
    );
    assert_eq!(result.items[1].kind.to_label_str(), "car");
  }

  #[test]
  fn disjoint_boxes_of_same_class_are_kept() {
    let mut out = Array3::<f32>::zeros((1, CHANNELS, 2));
    put(&mut out, 0, [100.0, 100.0, 40.0, 80.0], 0, 0.7);
    put(&mut out, 1, [400.0, 300.0, 40.0, 80.0], 0, 0.95);

    let result = decode_output(out.into_dyn().view(), &identity(), YOLOV8_NMS_THRESH).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].score, 0.95);
  }

  #[test]
  fn row_major_layout_and_low_scores() {
    let mut out = Array3::<f32>::zeros((1, 2, CHANNELS));
    out[[0, 0, 0]] = 320.0;
    out[[0, 0, 1]] = 320.0;
    out[[0, 0, 2]] = 64.0;
    out[[0, 0, 3]] = 64.0;
    out[[0, 0, YOLOV8_BOX_CHANNELS]] = 0.3;
    // 第二个候选得分低于检测下限
    out[[0, 1, 2]] = 10.0;
    out[[0, 1, 3]] = 10.0;
    out[[0, 1, YOLOV8_BOX_CHANNELS + 16]] = 0.2;

    let result = decode_output(out.into_dyn().view(), &identity(), YOLOV8_NMS_THRESH).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].kind, CocoLabel::PERSON);
    assert_eq!(result.items[0].score, 0.3);
  }

  #[test]
  fn boxes_are_mapped_through_letterbox() {
    // 1280x640 原图缩放到 640x320，上下各填充 160
    let letterbox = Letterbox::fit(1280, 640, 640, 640);
    let mut out = Array3::<f32>::zeros((1, CHANNELS, 1));
    put(&mut out, 0, [320.0, 320.0, 640.0, 320.0], 0, 0.8);

    let result = decode_output(out.into_dyn().view(), &letterbox, YOLOV8_NMS_THRESH).unwrap();
    assert_eq!(result.items[0].bbox, [0.0, 0.0, 1.0, 1.0]);
  }

  #[test]
  fn unexpected_shape_is_rejected() {
    let out = Array3::<f32>::zeros((1, 10, 5));
    let err = decode_output(out.into_dyn().view(), &identity(), YOLOV8_NMS_THRESH).unwrap_err();
    assert!(matches!(err, Yolov8Error::OutputShape(shape) if shape == vec![1, 10, 5]));
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    assert!((iou(&a, &[5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn builder_from_url() {
    let url = Url::parse("yolov8:///opt/models/yolov8n.onnx").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("/opt/models/yolov8n.onnx"));

    let url = Url::parse("yolov8:models/my%20model.onnx").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("models/my model.onnx"));
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("rknn:///opt/models/yolov8n.rknn").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::ModelPathError(_))
    ));
  }

  #[test]
  fn missing_model_file_fails_before_runtime_init() {
    let url = Url::parse("yolov8:///nonexistent/yolov8n.onnx").unwrap();
    let err = Yolov8Builder::from_url(&url)
      .unwrap()
      .build::<RgbNchwFrame<640, 640>>()
      .err()
      .unwrap();
    assert!(matches!(err, Yolov8Error::ModelNotFound(_)));
  }
}
