use serde::{Deserialize, Serialize};

use super::work_item::{MachineFamily, Urgency, WorkItem};

/// 工单的指派要求，评分引擎的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequirements {
    pub machine: MachineFamily,
    pub operation: String,
    /// 工艺复杂度 1-10
    pub complexity: u8,
    pub urgency: Urgency,
    pub estimated_minutes: u32,
    pub min_quality_pct: f64,
}

impl WorkRequirements {
    pub fn from_work_item(item: &WorkItem) -> Self {
        Self {
            machine: item.machine,
            operation: item.operation.clone(),
            complexity: item.complexity,
            urgency: item.urgency,
            estimated_minutes: item.estimated_minutes,
            min_quality_pct: item.min_quality_pct,
        }
    }
}

/// 指派推荐
///
/// 瞬态结果，按需重算，从不持久化。`confidence` 为 0-100 的确定性
/// 综合置信度；`auto_approvable` 表示可免人工复核自动指派。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub operator_id: String,
    pub confidence: u8,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    /// 按操作员效率折算的预计完成时长（分钟）
    pub predicted_completion_minutes: u32,
    pub expected_efficiency: f64,
    pub expected_quality_pct: f64,
    /// 阻止自动批准的风险因素，为空且置信度达标才可自动指派
    pub risk_factors: Vec<String>,
    pub auto_approvable: bool,
}
