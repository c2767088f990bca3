// 该文件是 count-people （人数统计） 项目的一部分。
// src/task.rs - 推理任务
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

use tracing::{debug, info};

use crate::count::count_people;
use crate::model::{CocoLabel, DetectResult, Model, WithLabel};

#[cfg(feature = "read_image_file")]
pub use self::pipeline::count_path;

pub trait Task<I, M>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M) -> Result<Self::Output, Self::Error>;
}

/// 对第一帧做一次推理并统计人数
pub struct CountPeopleTask;

impl<F, ME, I, M> Task<I, M> for CountPeopleTask
where
  ME: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = DetectResult<CocoLabel>, Error = ME>,
{
  type Output = usize;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("no input frame"))?;
    info!("输入帧获取成功，开始推理...");
    let now = std::time::Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    for det in result.items.iter() {
      debug!(
        "  - {}: {:.2}% at ({:.3}, {:.3}, {:.3}, {:.3})",
        det.kind.to_label_str(),
        det.score * 100.0,
        det.bbox[0],
        det.bbox[1],
        det.bbox[2],
        det.bbox[3]
      );
    }

    let count = count_people(&result);
    info!("检测到 {} 个对象, 其中 {} 人", result.len(), count);
    Ok(count)
  }
}

#[cfg(feature = "read_image_file")]
mod pipeline {
  use std::path::Path;

  use anyhow::Context;
  use tracing::{info, warn};

  use super::{CountPeopleTask, Task};
  use crate::frame::RgbNchwFrame;
  use crate::input::{ImageFileInput, ResolvedInput};
  use crate::model::{CocoLabel, DetectResult, Model};
  use crate::output::Report;

  /// 统计一个图像路径（或 `.b64` 文件）中的人数，结果总是一份报告
  ///
  /// 检测器在图像读取成功之后才通过 `load_model` 加载，
  /// 解码出的临时文件在返回前释放，无论成功与否。
  pub fn count_path<const W: u32, const H: u32, M, L>(path: &Path, load_model: L) -> Report
  where
    M: Model<Input = RgbNchwFrame<W, H>, Output = DetectResult<CocoLabel>>,
    M::Error: std::error::Error + Send + Sync + 'static,
    L: FnOnce() -> anyhow::Result<M>,
  {
    match try_count_path(path, load_model) {
      Ok(count) => Report::counted(count),
      Err(e) => {
        warn!("统计失败: {:#}", e);
        Report::failed(format!("{:#}", e))
      }
    }
  }

  fn try_count_path<const W: u32, const H: u32, M, L>(
    path: &Path,
    load_model: L,
  ) -> anyhow::Result<usize>
  where
    M: Model<Input = RgbNchwFrame<W, H>, Output = DetectResult<CocoLabel>>,
    M::Error: std::error::Error + Send + Sync + 'static,
    L: FnOnce() -> anyhow::Result<M>,
  {
    info!("输入来源: {}", path.display());
    let resolved = ResolvedInput::resolve(path)?;
    let input = ImageFileInput::<W, H>::open(resolved.path())?;
    let model = load_model().context("failed to load detector")?;
    CountPeopleTask.run_task(input.into_nchw(), model)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  #[derive(Debug, thiserror::Error)]
  #[error("detector exploded")]
  struct Exploded;

  struct Canned(Vec<(u32, f32)>);

  impl Model for Canned {
    type Input = ();
    type Output = DetectResult<CocoLabel>;
    type Error = Exploded;

    fn infer(&self, _input: &()) -> Result<Self::Output, Self::Error> {
      Ok(DetectResult::from(
        self
          .0
          .iter()
          .map(|&(id, score)| DetectItem {
            kind: CocoLabel::from_label_id(id),
            score,
            bbox: [0.1, 0.1, 0.2, 0.2],
          })
          .collect::<Vec<_>>(),
      ))
    }
  }

  struct Broken;

  impl Model for Broken {
    type Input = ();
    type Output = DetectResult<CocoLabel>;
    type Error = Exploded;

    fn infer(&self, _input: &()) -> Result<Self::Output, Self::Error> {
      Err(Exploded)
    }
  }

  #[test]
  fn counts_people_from_first_frame() {
    let model = Canned(vec![(0, 0.9), (0, 0.7), (0, 0.6), (0, 0.5), (0, 0.3), (2, 0.9)]);
    let count = CountPeopleTask.run_task(std::iter::once(()), model).unwrap();
    assert_eq!(count, 3);
  }

  #[test]
  fn repeated_runs_are_identical() {
    let detections = vec![(0, 0.8), (0, 0.55), (15, 0.99)];
    let a = CountPeopleTask
      .run_task(std::iter::once(()), Canned(detections.clone()))
      .unwrap();
    let b = CountPeopleTask
      .run_task(std::iter::once(()), Canned(detections))
      .unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn empty_input_is_an_error() {
    let err = CountPeopleTask
      .run_task(std::iter::empty::<()>(), Canned(vec![]))
      .unwrap_err();
    assert_eq!(err.to_string(), "no input frame");
  }

  #[test]
  fn detector_errors_propagate() {
    let err = CountPeopleTask
      .run_task(std::iter::once(()), Broken)
      .unwrap_err();
    assert_eq!(err.to_string(), "detector exploded");
  }
}
