// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/decode.rs - 检测头张量后处理工具
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use qianli::{
  FromUrl,
  anchor::AnchorTable,
  input::TensorInput,
  model::{CocoLabel, DetectResult, Yolov8, Yolov8Builder},
  output::{OutputError, OutputWrapper, Render, RescaleOutput},
  preprocess::{ResizeInfo, ResizeMode},
  task::{OneShotTask, RepeatShotTask, Task},
  tensor::HeadOutput,
  utils::parse_size,
};

/// Qianli 检测头后处理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型参数，例如 yolov8:?conf=0.25&iou=0.7&max_det=300&classes=0,2&agnostic
  #[arg(long, value_name = "MODEL", default_value = "yolov8:")]
  pub model: Url,
  /// 锚点表：grid:?size=640x640&strides=8,16,32 或 table:///anchors.json
  #[arg(long, value_name = "ANCHORS", default_value = "grid:")]
  pub anchors: Url,
  /// 检测头张量，按层级顺序给出，例如 raw:///p3.bin?shape=1,144,80,80
  #[arg(long, value_name = "TENSOR", required = true, num_args = 1..)]
  pub input: Vec<Url>,
  /// 输出：json:- / json:///out.jsonl / record:///out.txt?label=name
  #[arg(long, value_name = "OUTPUT", default_value = "json:-")]
  pub output: Url,
  /// 源图像尺寸 WxH；给出时把框映射回源图像
  #[arg(long, value_name = "WxH")]
  pub source_size: Option<String>,
  /// 模型输入尺寸 WxH
  #[arg(long, value_name = "WxH", default_value = "640x640")]
  pub input_size: String,
  /// 预处理使用了 letterbox
  #[arg(long)]
  pub letterbox: bool,
  /// 重复次数（用于测量耗时）
  #[arg(long, value_name = "COUNT", default_value_t = 1)]
  pub repeat: usize,
}

fn run<O>(
  args: &Args,
  input: TensorInput,
  model: Yolov8<CocoLabel>,
  output: O,
) -> Result<()>
where
  O: Render<HeadOutput, Vec<DetectResult<CocoLabel>>, Error = OutputError>,
{
  if args.repeat > 1 {
    RepeatShotTask::new(args.repeat).run_task(input, model, output)
  } else {
    OneShotTask.run_task(input, model, output)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型参数: {}", args.model);
  info!("锚点表: {}", args.anchors);
  info!("输出路径: {}", args.output);

  let anchors = AnchorTable::from_url(&args.anchors)?;
  let input_size = parse_size(&args.input_size)?;
  let anchors_match_input = anchors.matches_input(input_size.0, input_size.1);
  let model = Yolov8Builder::from_url(&args.model)?
    .anchors(anchors)
    .build::<CocoLabel>()?;
  let input = TensorInput::from_urls(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  match &args.source_size {
    Some(source_size) => {
      let mode = if args.letterbox {
        ResizeMode::Letterbox
      } else {
        ResizeMode::Stretch
      };
      if !anchors_match_input {
        warn!(
          "锚点表与输入尺寸 {} 不一致，映射回源图像的框可能有误",
          args.input_size
        );
      }
      let info = ResizeInfo::new(parse_size(source_size)?, input_size, mode)?;
      info!("框将映射回 {} ({:?})", source_size, mode);
      run(&args, input, model, RescaleOutput::new(output, info))
    }
    None => run(&args, input, model, output),
  }
}
