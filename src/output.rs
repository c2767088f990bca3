// 该文件是 count-people （人数统计） 项目的一部分。
// src/output.rs - 结果输出
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

use std::io;
use std::process::ExitCode;

use serde::Serialize;
use serde_json::ser::Formatter;

pub const NO_INPUT_MESSAGE: &str = "No image path provided";

/// 一次运行的结果，固定输出一行 JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
  Counted { count: usize, error: Option<String> },
  Failed { error: String, count: usize },
}

impl Report {
  pub fn counted(count: usize) -> Self {
    Report::Counted { count, error: None }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Report::Failed {
      error: error.into(),
      count: 0,
    }
  }

  pub fn no_input() -> Self {
    Self::failed(NO_INPUT_MESSAGE)
  }

  pub fn exit_status(&self) -> u8 {
    match self {
      Report::Counted { .. } => 0,
      Report::Failed { .. } => 1,
    }
  }

  pub fn exit_code(&self) -> ExitCode {
    ExitCode::from(self.exit_status())
  }

  pub fn to_json_line(&self) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedAsciiFormatter);
    // 仅含字符串与整数，序列化到内存不会失败
    if self.serialize(&mut ser).is_err() {
      return String::from(r#"{"error": "failed to serialize report", "count": 0}"#);
    }
    String::from_utf8(buf).unwrap_or_default()
  }

  pub fn write_to<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
    writeln!(writer, "{}", self.to_json_line())?;
    writer.flush()
  }
}

/// `", "` / `": "` 分隔，非 ASCII 字符与 DEL 转义为 `\uXXXX`
struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
  fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
  where
    W: ?Sized + io::Write,
  {
    if first {
      Ok(())
    } else {
      writer.write_all(b", ")
    }
  }

  fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
  where
    W: ?Sized + io::Write,
  {
    if first {
      Ok(())
    } else {
      writer.write_all(b", ")
    }
  }

  fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
  where
    W: ?Sized + io::Write,
  {
    writer.write_all(b": ")
  }

  fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
  where
    W: ?Sized + io::Write,
  {
    for ch in fragment.chars() {
      if ch.is_ascii() && ch != '\x7f' {
        writer.write_all(&[ch as u8])?;
      } else {
        let mut units = [0u16; 2];
        for unit in ch.encode_utf16(&mut units) {
          write!(writer, "\\u{:04x}", unit)?;
        }
      }
    }
    Ok(())
  }
}
