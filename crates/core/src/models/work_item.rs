use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 机器类别
///
/// 按类别而非机器名称字符串进行匹配；平缝（单针）与包缝（拷边）
/// 互斥，任何技能等级都不能跨这两类指派。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MachineFamily {
    #[serde(rename = "SINGLE_NEEDLE")]
    SingleNeedle,
    #[serde(rename = "OVERLOCK")]
    Overlock,
    #[serde(rename = "COVERSTITCH")]
    Coverstitch,
    #[serde(rename = "BUTTONHOLE")]
    Buttonhole,
    #[serde(rename = "BUTTON_ATTACH")]
    ButtonAttach,
    #[serde(rename = "BAR_TACK")]
    BarTack,
    #[serde(rename = "CUTTING")]
    Cutting,
    #[serde(rename = "PRESSING")]
    Pressing,
}

impl MachineFamily {
    /// 判断本类别的机器能否承接目标类别的工单
    ///
    /// 兼容表：同类别兼容；单针与包缝显式互斥，其余跨类别一律不兼容。
    pub fn can_operate(&self, work: MachineFamily) -> bool {
        match (*self, work) {
            (MachineFamily::SingleNeedle, MachineFamily::Overlock) => false,
            (MachineFamily::Overlock, MachineFamily::SingleNeedle) => false,
            (mine, target) => mine == target,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MachineFamily::SingleNeedle => "单针平缝",
            MachineFamily::Overlock => "包缝",
            MachineFamily::Coverstitch => "绷缝",
            MachineFamily::Buttonhole => "锁眼",
            MachineFamily::ButtonAttach => "钉扣",
            MachineFamily::BarTack => "套结",
            MachineFamily::Cutting => "裁剪",
            MachineFamily::Pressing => "整烫",
        }
    }
}

/// 技能等级，按序比较：初级 < 中级 < 高级 < 专家
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum SkillTier {
    #[serde(rename = "BEGINNER")]
    Beginner,
    #[serde(rename = "INTERMEDIATE")]
    Intermediate,
    #[serde(rename = "ADVANCED")]
    Advanced,
    #[serde(rename = "EXPERT")]
    Expert,
}

impl SkillTier {
    /// 按工艺复杂度(1-10)推导要求的技能等级
    pub fn required_for_complexity(complexity: u8) -> SkillTier {
        match complexity {
            0..=3 => SkillTier::Beginner,
            4..=5 => SkillTier::Intermediate,
            6..=7 => SkillTier::Advanced,
            _ => SkillTier::Expert,
        }
    }
}

/// 紧急程度，同时作为队列优先级的基础权重
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Urgency {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "URGENT")]
    Urgent,
}

impl Urgency {
    /// 队列优先级基础权重
    pub fn weight(&self) -> f64 {
        match self {
            Urgency::Low => 25.0,
            Urgency::Medium => 50.0,
            Urgency::High => 75.0,
            Urgency::Urgent => 100.0,
        }
    }
}

/// 工单状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkItemStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl WorkItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Completed | WorkItemStatus::Cancelled)
    }
}

/// 工单
///
/// 一个可指派的生产工作单元。不变式：任意时刻至多有一条非终态的
/// 指派记录引用它，`assigned_operator_id` 与该指派保持一致。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub machine: MachineFamily,
    /// 工序名称，如 "attach_collar"
    pub operation: String,
    pub required_tier: SkillTier,
    /// 工艺复杂度 1-10
    pub complexity: u8,
    pub urgency: Urgency,
    pub target_quantity: u32,
    pub completed_quantity: u32,
    pub rejected_quantity: u32,
    /// 最低质量合格率要求（百分比）
    pub min_quality_pct: f64,
    /// 标准工时估计（分钟）
    pub estimated_minutes: u32,
    pub status: WorkItemStatus,
    pub assigned_operator_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        id: impl Into<String>,
        machine: MachineFamily,
        operation: impl Into<String>,
        required_tier: SkillTier,
        target_quantity: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            machine,
            operation: operation.into(),
            required_tier,
            complexity: 5,
            urgency: Urgency::Medium,
            target_quantity,
            completed_quantity: 0,
            rejected_quantity: 0,
            min_quality_pct: 90.0,
            estimated_minutes: 60,
            status: WorkItemStatus::Pending,
            assigned_operator_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 是否可以接受新的指派
    pub fn is_assignable(&self) -> bool {
        matches!(self.status, WorkItemStatus::Pending) && self.assigned_operator_id.is_none()
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.target_quantity.saturating_sub(self.completed_quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_family_exclusion() {
        // 单针与包缝双向互斥
        assert!(!MachineFamily::SingleNeedle.can_operate(MachineFamily::Overlock));
        assert!(!MachineFamily::Overlock.can_operate(MachineFamily::SingleNeedle));
        // 同类别兼容
        assert!(MachineFamily::Overlock.can_operate(MachineFamily::Overlock));
        // 其他跨类别不兼容
        assert!(!MachineFamily::Cutting.can_operate(MachineFamily::Pressing));
    }

    #[test]
    fn test_skill_tier_ordering() {
        assert!(SkillTier::Beginner < SkillTier::Intermediate);
        assert!(SkillTier::Intermediate < SkillTier::Advanced);
        assert!(SkillTier::Advanced < SkillTier::Expert);
    }

    #[test]
    fn test_required_tier_from_complexity() {
        assert_eq!(SkillTier::required_for_complexity(1), SkillTier::Beginner);
        assert_eq!(SkillTier::required_for_complexity(3), SkillTier::Beginner);
        assert_eq!(
            SkillTier::required_for_complexity(5),
            SkillTier::Intermediate
        );
        assert_eq!(SkillTier::required_for_complexity(7), SkillTier::Advanced);
        assert_eq!(SkillTier::required_for_complexity(10), SkillTier::Expert);
    }

    #[test]
    fn test_urgency_weights() {
        assert_eq!(Urgency::Low.weight(), 25.0);
        assert_eq!(Urgency::Medium.weight(), 50.0);
        assert_eq!(Urgency::High.weight(), 75.0);
        assert_eq!(Urgency::Urgent.weight(), 100.0);
    }
}
