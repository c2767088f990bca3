// 该文件是 count-people （人数统计） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use count_people::FromUrlWithScheme;
use count_people::model::Yolov8Builder;
use url::Url;

/// 统计图像中的人数，结果以一行 JSON 输出到标准输出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 图像文件路径；以 .b64 结尾时按 base64 文本解码
  #[arg(value_name = "PATH", allow_hyphen_values = true)]
  pub input: Option<PathBuf>,

  /// 路径之后的多余参数，忽略
  #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
  pub extra: Vec<OsString>,

  /// YOLOv8 ONNX 模型位置（yolov8:<路径> 或文件路径）
  #[arg(
    long,
    env = "COUNT_PEOPLE_MODEL",
    default_value = "yolov8:yolov8n.onnx",
    value_name = "MODEL",
    value_parser = parse_model_url
  )]
  pub model: Url,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(
    long,
    env = "COUNT_PEOPLE_NMS_THRESHOLD",
    default_value = "0.7",
    value_name = "THRESHOLD"
  )]
  pub nms_threshold: f32,

  /// 推理线程数（默认由 ONNX Runtime 决定）
  #[arg(long, env = "COUNT_PEOPLE_INTRA_THREADS", value_name = "COUNT")]
  pub intra_threads: Option<usize>,
}

/// 带协议的位置原样解析，裸路径映射为 `yolov8:` 协议
fn parse_model_url(value: &str) -> Result<Url, url::ParseError> {
  match Url::parse(value) {
    Ok(url) if url.scheme().len() > 1 => Ok(url),
    // 单字母协议视为 Windows 盘符
    Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => {
      let encoded = value
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
      Url::parse(&format!("{}:{}", Yolov8Builder::SCHEME, encoded))
    }
    Err(e) => Err(e),
  }
}
