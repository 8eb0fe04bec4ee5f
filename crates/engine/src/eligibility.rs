//! 指派资格校验
//!
//! assign、reassign 与队列工作者共用同一套校验规则，
//! 保证三条路径对同一工单/操作员组合给出一致的结论。

use shopfloor_core::errors::{EligibilityReason, SchedulingError, SchedulingResult};
use shopfloor_core::models::{Operator, WorkItem};

/// 校验工单是否可以接受新的指派
pub fn check_item_assignable(item: &WorkItem) -> SchedulingResult<()> {
    if item.status.is_terminal() {
        return Err(SchedulingError::Validation(format!(
            "工单 {} 已处于终态 ({:?})，不能指派",
            item.id, item.status
        )));
    }
    if !item.is_assignable() {
        return Err(SchedulingError::AlreadyAssigned {
            work_item_id: item.id.clone(),
        });
    }
    Ok(())
}

/// 校验操作员对目标工单的承接资格
///
/// 依次检查：在线状态、剩余容量、机器类别兼容、工序技能等级。
/// 任一不满足即返回对应的终态资格错误。
pub fn check_operator_eligibility(item: &WorkItem, operator: &Operator) -> SchedulingResult<()> {
    if operator.is_offline() {
        return Err(SchedulingError::Ineligible {
            reason: EligibilityReason::OperatorOffline,
        });
    }
    if !operator.has_spare_capacity() {
        return Err(SchedulingError::Ineligible {
            reason: EligibilityReason::CapacityExceeded,
        });
    }
    if !operator.operates(item.machine) {
        return Err(SchedulingError::Ineligible {
            reason: EligibilityReason::MachineMismatch,
        });
    }
    if operator.skill_for(&item.operation) < item.required_tier {
        return Err(SchedulingError::Ineligible {
            reason: EligibilityReason::SkillMismatch,
        });
    }
    Ok(())
}
