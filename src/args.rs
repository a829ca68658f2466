// 该文件是 Tanzhen （探针） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use url::Url;

use tanzhen::strategy::StrategyKind;

/// Tanzhen 视频画面检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - 单张图片: image:///path/to/frame.png
  /// - 图片序列: frames:///path/to/dir?fps=1
  /// - GStreamer: gst:///path/to/video.mp4
  /// - 屏幕录制: screen://
  #[arg(long, value_name = "SOURCE", required_unless_present = "list")]
  pub input: Option<Url>,

  /// 检测策略
  #[arg(long, value_enum, required_unless_present = "list")]
  pub strategy: Option<StrategyKind>,

  /// 模板图像目录，文件名为 <name>.png
  #[arg(long, value_name = "DIR", default_value = "logos")]
  pub logos: PathBuf,

  /// 标注图像输出，null: 表示丢弃，folder:///out/dir 写入目录
  #[arg(long, value_name = "OUTPUT", default_value = "null:")]
  pub export: Url,

  /// JSON 报告路径，缺省时写到标准输出
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,

  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 采样帧率，覆盖配置文件
  #[arg(long, value_name = "FPS")]
  pub fps: Option<f64>,

  /// 检测模型文件，覆盖配置文件
  #[arg(long, value_name = "FILE")]
  pub model: Option<PathBuf>,

  /// 标注文字使用的字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// tesseract 可执行文件，覆盖配置文件
  #[arg(long, value_name = "BIN")]
  pub tesseract: Option<PathBuf>,

  /// 列出所有策略后退出
  #[arg(long)]
  pub list: bool,
}
