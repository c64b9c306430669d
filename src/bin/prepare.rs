// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/prepare.rs - 图像预处理工具
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use qianli::{
  FromUrl,
  anchor::{AnchorTable, DEFAULT_STRIDES},
  input::ImageFileInput,
  preprocess::{Preprocessor, ResizeMode},
  utils::parse_size,
};

/// Qianli 图像预处理：生成推理引擎的输入张量
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像，例如 image:///frame.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出张量文件（小端 f32，NCHW）
  #[arg(long, value_name = "FILE")]
  pub output: PathBuf,
  /// 模型输入尺寸 WxH
  #[arg(long, value_name = "WxH", default_value = "640x640")]
  pub size: String,
  /// 等比缩放并填充
  #[arg(long)]
  pub letterbox: bool,
  /// 同时保存对应输入尺寸的锚点表（JSON）
  #[arg(long, value_name = "FILE")]
  pub anchors: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output.display());

  let (width, height) = parse_size(&args.size)?;
  let mode = if args.letterbox {
    ResizeMode::Letterbox
  } else {
    ResizeMode::Stretch
  };
  let preprocessor = Preprocessor::new(width, height)?.mode(mode);

  for frame in ImageFileInput::from_url(&args.input)?.into_tensor(preprocessor) {
    let (tensor, info) = frame?;
    tensor.write_raw(&args.output)?;
    info!(
      "已写入 {:?} 张量；后处理时使用 --source-size {}x{} --input-size {}{}",
      tensor.shape(),
      info.source_width,
      info.source_height,
      args.size,
      if args.letterbox { " --letterbox" } else { "" }
    );
  }

  if let Some(path) = &args.anchors {
    let table = AnchorTable::for_input(width, height, &DEFAULT_STRIDES)?;
    table.save(path)?;
    info!("已保存 {} 个锚点到 {}", table.len(), path.display());
  }

  Ok(())
}
