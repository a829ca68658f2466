// 该文件是 Tanzhen （探针） 项目的一部分。
// src/task.rs - 一次完整的分析任务
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

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::{
  input::Media,
  report::Report,
  strategy::{AnalysisError, Strategy},
};

/// 按需初始化，然后分析
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalysisTask;

impl AnalysisTask {
  pub fn run(
    &self,
    strategy: &mut dyn Strategy,
    media: &mut dyn Media,
  ) -> Result<Report, AnalysisError> {
    info!("开始任务: {}", strategy.name());
    if strategy.requires_initialization() {
      let now = std::time::Instant::now();
      strategy.initialize()?;
      info!("初始化完成，耗时: {:.2?}", now.elapsed());
    }

    let now = std::time::Instant::now();
    let report = strategy.analyze(media)?;
    info!("分析完成，耗时: {:.2?}", now.elapsed());
    summarize(&report);
    Ok(report)
  }
}

fn summarize(report: &Report) {
  let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
  for record in report.iter() {
    *counts.entry(record.found.as_str()).or_default() += 1;
  }
  info!("共 {} 条记录", report.len());
  for (found, count) in counts {
    info!("  - {}: {}", found, count);
  }
  if !report.skipped_frames.is_empty() {
    warn!("跳过 {} 帧", report.skipped_frames.len());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{input::MemoryMedia, report::DetectionRecord};

  #[derive(Default)]
  struct Probe {
    needs_init: bool,
    initialized: usize,
  }

  impl Strategy for Probe {
    fn name(&self) -> &'static str {
      "Probe"
    }

    fn requires_initialization(&self) -> bool {
      self.needs_init
    }

    fn initialize(&mut self) -> Result<(), AnalysisError> {
      self.initialized += 1;
      Ok(())
    }

    fn analyze(&mut self, _media: &mut dyn Media) -> Result<Report, AnalysisError> {
      if self.needs_init && self.initialized == 0 {
        return Err(AnalysisError::ModelNotLoaded);
      }
      Ok(Report {
        records: vec![DetectionRecord::new("x", 0.0)],
        skipped_frames: Vec::new(),
      })
    }
  }

  #[test]
  fn initializes_only_when_required() {
    let mut media = MemoryMedia::new(Some(1.0));
    let mut plain = Probe::default();
    AnalysisTask.run(&mut plain, &mut media).unwrap();
    assert_eq!(plain.initialized, 0);

    let mut model = Probe {
      needs_init: true,
      ..Probe::default()
    };
    let report = AnalysisTask.run(&mut model, &mut media).unwrap();
    assert_eq!(model.initialized, 1);
    assert_eq!(report.len(), 1);
  }
}
