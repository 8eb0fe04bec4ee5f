use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::work_item::{MachineFamily, SkillTier};

/// 操作员状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperatorStatus {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "WORKING")]
    Working,
    #[serde(rename = "BREAK")]
    Break,
    #[serde(rename = "OFFLINE")]
    Offline,
}

/// 操作员
///
/// 不变式：`current_assignments <= capacity`，该字段只在持锁事务内变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    /// 工序 -> 技能等级
    pub skills: HashMap<String, SkillTier>,
    /// 可操作的机器类别集合
    pub machines: Vec<MachineFamily>,
    pub primary_machine: MachineFamily,
    pub status: OperatorStatus,
    pub current_assignments: u32,
    pub capacity: u32,
    /// 滚动效率比，1.0 表示与标准工时持平
    pub efficiency_ratio: f64,
    /// 滚动质量合格率（百分比）
    pub quality_pct: f64,
    pub hired_at: DateTime<Utc>,
    pub completed_count: u64,
    pub working_minutes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operator {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        primary_machine: MachineFamily,
        capacity: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            skills: HashMap::new(),
            machines: vec![primary_machine],
            primary_machine,
            status: OperatorStatus::Idle,
            current_assignments: 0,
            capacity,
            efficiency_ratio: 1.0,
            quality_pct: 95.0,
            hired_at: now,
            completed_count: 0,
            working_minutes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.status, OperatorStatus::Offline)
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.current_assignments < self.capacity
    }

    /// 能否操作目标机器类别（主机或机器集合中任一兼容即可）
    pub fn operates(&self, machine: MachineFamily) -> bool {
        self.primary_machine.can_operate(machine)
            || self.machines.iter().any(|m| m.can_operate(machine))
    }

    /// 指定工序的技能等级，未登记的工序按初级处理
    pub fn skill_for(&self, operation: &str) -> SkillTier {
        self.skills
            .get(operation)
            .copied()
            .unwrap_or(SkillTier::Beginner)
    }

    /// 当前负载率（百分比）
    pub fn utilization_pct(&self) -> f64 {
        if self.capacity == 0 {
            100.0
        } else {
            (self.current_assignments as f64 / self.capacity as f64) * 100.0
        }
    }

    /// 在岗月数，用于评分中的资历档位
    pub fn tenure_months(&self, now: DateTime<Utc>) -> i64 {
        (now - self.hired_at).num_days() / 30
    }
}

/// 单次完工记录，滚动绩效窗口的元素
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub assignment_id: String,
    pub machine: MachineFamily,
    pub operation: String,
    pub completed_quantity: u32,
    pub rejected_quantity: u32,
    pub quality_score: f64,
    pub efficiency_ratio: f64,
    pub completed_at: DateTime<Utc>,
}

/// 每个操作员最近完工记录的滚动窗口上限
pub const PERFORMANCE_WINDOW: usize = 100;

/// 操作员滚动绩效窗口
///
/// 可重建的派生缓存，供评分引擎使用，不是事实记录；
/// 丢失后由后续完工记录重新累积。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceHistory {
    pub operator_id: String,
    pub records: Vec<CompletionRecord>,
}

impl PerformanceHistory {
    pub fn new(operator_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            records: Vec::new(),
        }
    }

    /// 追加一条完工记录，窗口满时淘汰最旧的记录
    pub fn push(&mut self, record: CompletionRecord) {
        self.records.push(record);
        if self.records.len() > PERFORMANCE_WINDOW {
            let overflow = self.records.len() - PERFORMANCE_WINDOW;
            self.records.drain(0..overflow);
        }
    }

    /// 目标机器类别上的完工次数
    pub fn completions_on(&self, machine: MachineFamily) -> usize {
        self.records.iter().filter(|r| r.machine == machine).count()
    }

    /// 目标机器类别上的平均质量分，窗口内无记录时返回 None
    pub fn avg_quality_on(&self, machine: MachineFamily) -> Option<f64> {
        let scores: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.machine == machine)
            .map(|r| r.quality_score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator() -> Operator {
        Operator::new("op-1", "张师傅", MachineFamily::Overlock, 3, Utc::now())
    }

    #[test]
    fn test_operates_by_family() {
        let mut op = operator();
        assert!(op.operates(MachineFamily::Overlock));
        assert!(!op.operates(MachineFamily::SingleNeedle));
        op.machines.push(MachineFamily::Coverstitch);
        assert!(op.operates(MachineFamily::Coverstitch));
    }

    #[test]
    fn test_skill_for_defaults_to_beginner() {
        let mut op = operator();
        assert_eq!(op.skill_for("attach_collar"), SkillTier::Beginner);
        op.skills
            .insert("attach_collar".to_string(), SkillTier::Expert);
        assert_eq!(op.skill_for("attach_collar"), SkillTier::Expert);
    }

    #[test]
    fn test_utilization() {
        let mut op = operator();
        op.current_assignments = 2;
        assert!((op.utilization_pct() - 66.666).abs() < 0.1);
        op.capacity = 0;
        assert_eq!(op.utilization_pct(), 100.0);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let mut history = PerformanceHistory::new("op-1");
        for i in 0..(PERFORMANCE_WINDOW + 10) {
            history.push(CompletionRecord {
                assignment_id: format!("a-{i}"),
                machine: MachineFamily::Overlock,
                operation: "seam".to_string(),
                completed_quantity: 10,
                rejected_quantity: 0,
                quality_score: 95.0,
                efficiency_ratio: 1.0,
                completed_at: Utc::now(),
            });
        }
        assert_eq!(history.records.len(), PERFORMANCE_WINDOW);
        // 最旧的记录被淘汰
        assert_eq!(history.records[0].assignment_id, "a-10");
        assert_eq!(history.completions_on(MachineFamily::Overlock), 100);
        assert_eq!(history.completions_on(MachineFamily::Cutting), 0);
    }
}
