// 该文件是 count-people （人数统计） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use count_people::{
  FromUrl,
  frame::RgbNchwFrame,
  model::{YOLOV8_INPUT_H, YOLOV8_INPUT_W, Yolov8, Yolov8Builder},
  output::Report,
  task::count_path,
};

type DetectorFrame = RgbNchwFrame<YOLOV8_INPUT_W, YOLOV8_INPUT_H>;

fn main() -> ExitCode {
  init_tracing();

  let report = match args::Args::try_parse() {
    Ok(args) => run(&args),
    Err(e)
      if matches!(
        e.kind(),
        ErrorKind::DisplayHelp
          | ErrorKind::DisplayVersion
          | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
      ) =>
    {
      e.exit()
    }
    Err(e) => Report::failed(usage_message(&e)),
  };

  if let Err(e) = report.write_to(io::stdout().lock()) {
    error!("写入结果失败: {}", e);
    return ExitCode::FAILURE;
  }
  report.exit_code()
}

/// 日志输出到 stderr，stdout 只留给结果
fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn run(args: &args::Args) -> Report {
  let Some(input) = args.input.as_deref() else {
    warn!("未提供图像路径");
    return Report::no_input();
  };
  if !args.extra.is_empty() {
    debug!("忽略多余参数: {:?}", args.extra);
  }

  info!("模型位置: {}", args.model);
  info!("NMS 阈值: {}", args.nms_threshold);
  count_path::<YOLOV8_INPUT_W, YOLOV8_INPUT_H, _, _>(input, || load_detector(args))
}

fn load_detector(args: &args::Args) -> Result<Yolov8<DetectorFrame>> {
  let model = Yolov8Builder::from_url(&args.model).and_then(|builder| {
    builder
      .nms_threshold(args.nms_threshold)
      .intra_threads(args.intra_threads)
      .build()
  })?;
  Ok(model)
}

fn usage_message(err: &clap::Error) -> String {
  let rendered = err.to_string();
  rendered
    .lines()
    .next()
    .unwrap_or_default()
    .trim_start_matches("error: ")
    .to_string()
}
