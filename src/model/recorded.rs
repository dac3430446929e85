// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/model/recorded.rs - 回放已导出的模型输出
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

use std::{fs::File, io::BufReader};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceProvider, InputTensor, RawTensor},
};

#[derive(Error, Debug)]
pub enum RecordedOutputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("张量文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 从 JSON 文件回放的模型输出，格式为 `{"dims": [...], "data": [...]}`
///
/// 无论输入是什么都返回同一份输出。
#[derive(Debug, Clone)]
pub struct RecordedOutput {
  output: RawTensor,
}

impl RecordedOutput {
  pub fn new(output: RawTensor) -> Self {
    Self { output }
  }
}

impl FromUrlWithScheme for RecordedOutput {
  const SCHEME: &'static str = "tensor";
}

impl FromUrl for RecordedOutput {
  type Error = RecordedOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordedOutputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    info!("加载模型输出文件: {}", url.path());
    let reader = BufReader::new(File::open(url.path())?);
    let output: RawTensor = serde_json::from_reader(reader)?;
    debug!(
      "模型输出形状: {:?}, 数据长度: {}",
      output.dims,
      output.data.len()
    );

    Ok(Self { output })
  }
}

impl InferenceProvider for RecordedOutput {
  type Error = std::convert::Infallible;

  fn infer(&self, input: &InputTensor) -> Result<RawTensor, Self::Error> {
    debug!("回放模型输出，输入形状: {:?}", input.dims());
    Ok(self.output.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_foreign_scheme() {
    let url = Url::parse("image:///tmp/output.json").unwrap();
    let err = RecordedOutput::from_url(&url).unwrap_err();
    assert!(matches!(err, RecordedOutputError::SchemeMismatch { .. }));
  }

  #[test]
  fn loads_dumped_tensor() {
    let path = std::env::temp_dir().join(format!("kapian-recorded-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"dims": [1, 5, 1], "data": [1, 2, 3, 4, 0.5]}"#).unwrap();

    let url = Url::parse(&format!("tensor://{}", path.display())).unwrap();
    let recorded = RecordedOutput::from_url(&url).unwrap();

    let input = InputTensor::from(&image::RgbImage::new(1, 1));
    let output = recorded.infer(&input).unwrap();
    assert_eq!(output.dims, vec![1, 5, 1]);
    assert_eq!(output.data, vec![1.0, 2.0, 3.0, 4.0, 0.5]);

    std::fs::remove_file(path).ok();
  }
}
