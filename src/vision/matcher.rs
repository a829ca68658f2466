// 该文件是 Tanzhen （探针） 项目的一部分。
// src/vision/matcher.rs - 汉明距离暴力匹配
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

use rayon::prelude::*;

use crate::vision::orb::Descriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DMatch {
  pub query: usize,
  pub train: usize,
  pub distance: u32,
}

/// 每个查询描述子的 k 个最近邻，按距离升序，同距离按训练集下标
pub fn knn_match(query: &[Descriptor], train: &[Descriptor], k: usize) -> Vec<Vec<DMatch>> {
  query
    .par_iter()
    .enumerate()
    .map(|(qi, q)| {
      let mut best: Vec<DMatch> = Vec::with_capacity(k + 1);
      for (ti, t) in train.iter().enumerate() {
        let distance = q.hamming(t);
        if best.len() == k && best.last().map(|m| distance >= m.distance).unwrap_or(false) {
          continue;
        }
        let at = best.partition_point(|m| m.distance <= distance);
        best.insert(
          at,
          DMatch {
            query: qi,
            train: ti,
            distance,
          },
        );
        best.truncate(k);
      }
      best
    })
    .collect()
}

/// 交叉验证：正向最近邻的反向最近邻必须指回自己
pub fn cross_check_match(query: &[Descriptor], train: &[Descriptor]) -> Vec<DMatch> {
  let forward = knn_match(query, train, 1);
  let reverse = knn_match(train, query, 1);
  forward
    .into_iter()
    .filter_map(|mut candidates| candidates.pop())
    .filter(|m| {
      reverse[m.train]
        .first()
        .map(|back| back.train == m.query)
        .unwrap_or(false)
    })
    .collect()
}

/// 比率检验：最近距离小于 ratio 倍次近距离，且可选地小于 max_distance
pub fn ratio_test(knn: &[Vec<DMatch>], ratio: f32, max_distance: Option<u32>) -> Vec<DMatch> {
  knn
    .iter()
    .filter_map(|candidates| match candidates.as_slice() {
      [best, second, ..] => {
        let passes_ratio = (best.distance as f32) < ratio * second.distance as f32;
        let passes_max = max_distance.map(|d| best.distance < d).unwrap_or(true);
        (passes_ratio && passes_max).then_some(*best)
      }
      _ => None,
    })
    .collect()
}

/// 对称检验：反向最近邻必须指回同一个查询点
pub fn symmetric_matches(forward: &[DMatch], reverse_knn: &[Vec<DMatch>]) -> Vec<DMatch> {
  forward
    .iter()
    .filter(|m| {
      reverse_knn
        .get(m.train)
        .and_then(|candidates| candidates.first())
        .map(|back| back.train == m.query)
        .unwrap_or(false)
    })
    .copied()
    .collect()
}
