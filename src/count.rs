// 该文件是 count-people （人数统计） 项目的一部分。
// src/count.rs - 人数统计
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

use crate::model::{CocoLabel, DetectItem, DetectResult};

/// 计入人数的最低置信度（不含）
pub const PERSON_CONFIDENCE_THRESHOLD: f32 = 0.5;

pub fn is_counted_person(item: &DetectItem<CocoLabel>) -> bool {
  item.kind == CocoLabel::PERSON && item.score > PERSON_CONFIDENCE_THRESHOLD
}

/// 统计置信度严格大于阈值的 person 检测
pub fn count_people(result: &DetectResult<CocoLabel>) -> usize {
  result.items.iter().filter(|item| is_counted_person(item)).count()
}
