//! 阶段路由：纯函数 (current_stage, need_planning, need_evaluation) → 下一阶段
//!
//! 阶段标签去首尾空白后不区分大小写比较；空串视为 recommendation；未知标签一律 Terminal。

use crate::core::state::Stage;

pub fn parse_stage(tag: &str) -> Option<Stage> {
    let tag = tag.trim();
    if tag.is_empty() || tag.eq_ignore_ascii_case("recommendation") {
        Some(Stage::Recommendation)
    } else if tag.eq_ignore_ascii_case("planner") {
        Some(Stage::Planner)
    } else if tag.eq_ignore_ascii_case("evaluator") {
        Some(Stage::Evaluator)
    } else if tag.eq_ignore_ascii_case("terminal") {
        Some(Stage::Terminal)
    } else {
        None
    }
}

pub fn route(current_stage: &str, need_planning: bool, need_evaluation: bool) -> Stage {
    match parse_stage(current_stage) {
        Some(Stage::Recommendation) if need_planning => Stage::Planner,
        Some(Stage::Planner) if need_evaluation => Stage::Evaluator,
        _ => Stage::Terminal,
    }
}
