// 该文件是 count-people （人数统计） 项目的一部分。
// src/input/resolve.rs - 输入路径解析（直接图像 / base64 文件）
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

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// base64 输入文件的路径后缀
pub const BASE64_SUFFIX: &str = ".b64";

const DECODED_PREFIX: &str = "count-people-";
const DECODED_SUFFIX: &str = ".png";

// 标准字母表，要求补齐 `=`，但容忍末尾多余的非零位
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
  &alphabet::STANDARD,
  GeneralPurposeConfig::new()
    .with_decode_allow_trailing_bits(true)
    .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

#[derive(Error, Debug)]
pub enum ResolveError {
  #[error("failed to read base64 input {path}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("invalid base64 content in {path}")]
  Decode {
    path: PathBuf,
    source: base64::DecodeError,
  },
  #[error("failed to write decoded image")]
  TempFile(#[from] std::io::Error),
}

/// 解析后的图像输入
///
/// base64 输入会被解码到临时文件中，临时文件随本值一同释放。
#[derive(Debug)]
pub enum ResolvedInput {
  Direct(PathBuf),
  Decoded(NamedTempFile),
}

impl ResolvedInput {
  pub fn resolve(path: impl AsRef<Path>) -> Result<Self, ResolveError> {
    let path = path.as_ref();
    if !is_base64_input(path) {
      debug!("直接图像输入: {}", path.display());
      return Ok(ResolvedInput::Direct(path.to_path_buf()));
    }

    info!("读取 base64 输入: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ResolveError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let bytes = decode_base64(&text).map_err(|source| ResolveError::Decode {
      path: path.to_path_buf(),
      source,
    })?;

    let mut file = tempfile::Builder::new()
      .prefix(DECODED_PREFIX)
      .suffix(DECODED_SUFFIX)
      .tempfile()?;
    file.write_all(&bytes)?;
    file.flush()?;
    debug!(
      "已解码 {} 字节到临时文件: {}",
      bytes.len(),
      file.path().display()
    );

    Ok(ResolvedInput::Decoded(file))
  }

  /// 可直接读取的图像路径
  pub fn path(&self) -> &Path {
    match self {
      ResolvedInput::Direct(path) => path,
      ResolvedInput::Decoded(file) => file.path(),
    }
  }

  pub fn is_decoded(&self) -> bool {
    matches!(self, ResolvedInput::Decoded(_))
  }
}

fn is_base64_input(path: &Path) -> bool {
  path.as_os_str().to_string_lossy().ends_with(BASE64_SUFFIX)
}

/// 丢弃字母表以外的字符（换行、空白、杂散符号）后解码
fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
  let compact: String = text
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
    .collect();
  LENIENT_STANDARD.decode(compact)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_path_is_returned_unchanged() {
    let resolved = ResolvedInput::resolve("photos/crowd.jpg").unwrap();
    assert!(!resolved.is_decoded());
    assert_eq!(resolved.path(), Path::new("photos/crowd.jpg"));
  }

  #[test]
  fn suffix_match_is_case_sensitive() {
    assert!(is_base64_input(Path::new("image.b64")));
    assert!(!is_base64_input(Path::new("image.B64")));
    assert!(!is_base64_input(Path::new("image.b64.png")));
  }

  #[test]
  fn base64_file_is_decoded_into_png_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("payload.b64");
    std::fs::write(&input, "aGVsbG8g\nd29ybGQ=\n").unwrap();

    let resolved = ResolvedInput::resolve(&input).unwrap();
    assert!(resolved.is_decoded());
    let decoded = resolved.path().to_path_buf();
    assert_eq!(decoded.extension().unwrap(), "png");
    assert_eq!(std::fs::read(&decoded).unwrap(), b"hello world");

    drop(resolved);
    assert!(!decoded.exists());
  }

  #[test]
  fn invalid_base64_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.b64");
    std::fs::write(&input, "this is *not* base64!").unwrap();

    let err = ResolvedInput::resolve(&input).unwrap_err();
    assert!(matches!(err, ResolveError::Decode { .. }));
    assert!(err.to_string().contains("invalid base64"));
  }

  #[test]
  fn characters_outside_the_alphabet_are_skipped() {
    assert_eq!(decode_base64("aGVs*bG8=").unwrap(), b"hello");
    assert_eq!(decode_base64("aGVs\r\nbG8=\n").unwrap(), b"hello");
  }

  #[test]
  fn non_zero_trailing_bits_are_accepted() {
    assert_eq!(decode_base64("aGl=").unwrap(), b"hi");
  }

  #[test]
  fn missing_padding_is_rejected() {
    assert!(decode_base64("aGk").is_err());
    assert!(decode_base64("aGVsbG8").is_err());
  }

  #[test]
  fn missing_base64_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ResolvedInput::resolve(dir.path().join("missing.b64")).unwrap_err();
    assert!(matches!(err, ResolveError::Read { .. }));
  }
}
