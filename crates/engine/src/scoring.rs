//! 操作员评分引擎
//!
//! 纯函数：给定工单要求与候选操作员，输出 0-100 的确定性置信度与
//! 理由/警示。六个子分数加权求和（权重之和为 1.0），再做最终调整。
//! 同一输入永远得到同一输出，结果从不持久化。

use chrono::{DateTime, Utc};

use shopfloor_core::config::ScoringConfig;
use shopfloor_core::models::{
    MachineFamily, Operator, OperatorStatus, PerformanceHistory, Recommendation, SkillTier,
    Urgency, WorkRequirements,
};

/// 主力机位匹配的技能基础分
const PRIMARY_MACHINE_BASE: f64 = 90.0;
/// 副机位匹配的技能基础分
const SECONDARY_MACHINE_BASE: f64 = 75.0;
/// 技能等级每相差一档的分数调整
const TIER_STEP: f64 = 10.0;
/// 历史表现加成上限
const HISTORY_BOOST_CAP: f64 = 5.0;

pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// 对单个候选操作员评分
    pub fn evaluate(
        &self,
        requirements: &WorkRequirements,
        operator: &Operator,
        history: &PerformanceHistory,
        now: DateTime<Utc>,
    ) -> Recommendation {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let required_tier = SkillTier::required_for_complexity(requirements.complexity);
        let tier = operator.skill_for(&requirements.operation);
        let utilization = operator.utilization_pct();

        let skill = skill_match_score(requirements, operator, history);
        let efficiency = (operator.efficiency_ratio * 100.0).clamp(0.0, 100.0);
        let quality = quality_score(requirements, operator);
        let availability = availability_score(operator);
        let workload = workload_score(utilization);
        let experience = experience_score(requirements.machine, operator, history, now);

        let w = &self.config.weights;
        let mut composite = skill * w.skill_match
            + efficiency * w.efficiency
            + quality * w.quality
            + availability * w.availability
            + workload * w.workload
            + experience * w.machine_experience;

        // 最终调整
        if requirements.complexity >= 4 && skill < 60.0 {
            composite -= 20.0;
            warnings.push("高复杂度工序但技能储备不足".to_string());
        }
        if requirements.urgency == Urgency::Urgent && utilization > 70.0 {
            composite -= 15.0;
            warnings.push("紧急工单但操作员负载偏高".to_string());
        }
        if tier == required_tier && operator.operates(requirements.machine) {
            composite += 10.0;
            reasons.push("技能等级与工单要求完全匹配".to_string());
        }
        let confidence = composite.clamp(0.0, 100.0).round() as u8;

        if tier > required_tier {
            reasons.push("技能等级高于工单要求".to_string());
        }
        if operator.primary_machine.can_operate(requirements.machine) {
            reasons.push(format!("主力机位为{}", requirements.machine.label()));
        }
        if operator.efficiency_ratio >= 1.1 {
            reasons.push("历史效率高于标准工时".to_string());
        }
        if history.completions_on(requirements.machine) >= 10 {
            reasons.push("该机位完工经验丰富".to_string());
        }
        if operator.status == OperatorStatus::Break {
            warnings.push("操作员正在休息".to_string());
        }

        // 风险因素独立于置信度判定，任意一项存在即不可自动批准
        let mut risk_factors = Vec::new();
        if tier < required_tier {
            risk_factors.push("技能等级低于工单要求".to_string());
        }
        if utilization > 85.0 {
            risk_factors.push("当前负载超过85%".to_string());
        }
        if requirements.urgency == Urgency::Urgent && operator.efficiency_ratio < 1.0 {
            risk_factors.push("紧急工单但历史速度低于平均".to_string());
        }
        if operator.quality_pct < requirements.min_quality_pct {
            risk_factors.push("历史质量低于工单最低要求".to_string());
        }

        let auto_approvable = f64::from(confidence) > self.config.auto_approve_threshold
            && risk_factors.is_empty();

        let predicted_completion_minutes = (requirements.estimated_minutes as f64
            / operator.efficiency_ratio.max(0.1))
        .round() as u32;

        Recommendation {
            operator_id: operator.id.clone(),
            confidence,
            reasons,
            warnings,
            predicted_completion_minutes,
            expected_efficiency: operator.efficiency_ratio,
            expected_quality_pct: operator.quality_pct,
            risk_factors,
            auto_approvable,
        }
    }

    /// 对候选集合评分并按置信度降序排列，截断到 limit
    ///
    /// 置信度相同时按操作员 id 升序，保证结果顺序确定。
    pub fn rank(
        &self,
        requirements: &WorkRequirements,
        candidates: &[(Operator, PerformanceHistory)],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = candidates
            .iter()
            .map(|(operator, history)| self.evaluate(requirements, operator, history, now))
            .collect();
        recommendations.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.operator_id.cmp(&b.operator_id))
        });
        recommendations.truncate(limit);
        recommendations
    }
}

/// 技能匹配子分数
///
/// 机器类别不兼容为硬性 0 分；兼容时按主/副机位取基础分，
/// 技能与复杂度要求的档位差每档 ±10，再叠加该机位的历史质量加成。
fn skill_match_score(
    requirements: &WorkRequirements,
    operator: &Operator,
    history: &PerformanceHistory,
) -> f64 {
    if !operator.operates(requirements.machine) {
        return 0.0;
    }
    let base = if operator.primary_machine.can_operate(requirements.machine) {
        PRIMARY_MACHINE_BASE
    } else {
        SECONDARY_MACHINE_BASE
    };

    let required = SkillTier::required_for_complexity(requirements.complexity);
    let tier = operator.skill_for(&requirements.operation);
    let tier_delta = tier as i32 - required as i32;
    let mut score = base + f64::from(tier_delta) * TIER_STEP;

    if let Some(avg_quality) = history.avg_quality_on(requirements.machine) {
        score += ((avg_quality - 80.0) * 0.25).clamp(0.0, HISTORY_BOOST_CAP);
    }
    score.clamp(0.0, 100.0)
}

/// 质量子分数：达标即取原值，不达标按差距线性加罚
fn quality_score(requirements: &WorkRequirements, operator: &Operator) -> f64 {
    if operator.quality_pct >= requirements.min_quality_pct {
        operator.quality_pct.clamp(0.0, 100.0)
    } else {
        let shortfall = requirements.min_quality_pct - operator.quality_pct;
        (operator.quality_pct - shortfall * 2.0).clamp(0.0, 100.0)
    }
}

fn availability_score(operator: &Operator) -> f64 {
    match operator.status {
        OperatorStatus::Idle => 100.0,
        OperatorStatus::Working => {
            if operator.has_spare_capacity() {
                80.0
            } else {
                60.0
            }
        }
        OperatorStatus::Break => 40.0,
        OperatorStatus::Offline => 0.0,
    }
}

/// 负载子分数：四档负载率区间
fn workload_score(utilization_pct: f64) -> f64 {
    if utilization_pct <= 50.0 {
        100.0
    } else if utilization_pct <= 70.0 {
        80.0
    } else if utilization_pct <= 90.0 {
        50.0
    } else {
        20.0
    }
}

/// 经验子分数：机位匹配加成 + 资历档位 + 封顶的该机位完工次数
fn experience_score(
    machine: MachineFamily,
    operator: &Operator,
    history: &PerformanceHistory,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = if operator.primary_machine.can_operate(machine) {
        40.0
    } else if operator.operates(machine) {
        25.0
    } else {
        0.0
    };

    score += match operator.tenure_months(now) {
        m if m >= 36 => 30.0,
        m if m >= 12 => 20.0,
        m if m >= 6 => 10.0,
        _ => 5.0,
    };

    score += (history.completions_on(machine) as f64 * 3.0).min(30.0);
    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shopfloor_core::models::CompletionRecord;

    fn requirements(machine: MachineFamily, complexity: u8, urgency: Urgency) -> WorkRequirements {
        WorkRequirements {
            machine,
            operation: "attach_collar".to_string(),
            complexity,
            urgency,
            estimated_minutes: 120,
            min_quality_pct: 90.0,
        }
    }

    fn veteran(now: DateTime<Utc>) -> (Operator, PerformanceHistory) {
        let mut op = Operator::new(
            "op-1",
            "王师傅",
            MachineFamily::SingleNeedle,
            3,
            now - Duration::days(365 * 4),
        );
        op.skills
            .insert("attach_collar".to_string(), SkillTier::Advanced);
        op.efficiency_ratio = 1.15;
        op.quality_pct = 97.0;
        let mut history = PerformanceHistory::new("op-1");
        for i in 0..20 {
            history.push(CompletionRecord {
                assignment_id: format!("a-{i}"),
                machine: MachineFamily::SingleNeedle,
                operation: "attach_collar".to_string(),
                completed_quantity: 50,
                rejected_quantity: 1,
                quality_score: 96.0,
                efficiency_ratio: 1.1,
                completed_at: now,
            });
        }
        (op, history)
    }

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringConfig {
            weights: Default::default(),
            auto_approve_threshold: 85.0,
        })
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let now = Utc::now();
        let (op, history) = veteran(now);
        let req = requirements(MachineFamily::SingleNeedle, 6, Urgency::Medium);
        let engine = engine();
        let a = engine.evaluate(&req, &op, &history, now);
        let b = engine.evaluate(&req, &op, &history, now);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reasons, b.reasons);
        assert_eq!(a.risk_factors, b.risk_factors);
    }

    #[test]
    fn test_incompatible_machine_zeroes_skill_match() {
        let req = requirements(MachineFamily::Overlock, 5, Urgency::Medium);
        let now = Utc::now();
        let (op, history) = veteran(now);
        assert_eq!(skill_match_score(&req, &op, &history), 0.0);
    }

    #[test]
    fn test_strong_match_is_auto_approvable() {
        let now = Utc::now();
        let (op, history) = veteran(now);
        // 复杂度 6 要求高级，与操作员等级完全匹配
        let req = requirements(MachineFamily::SingleNeedle, 6, Urgency::Medium);
        let rec = engine().evaluate(&req, &op, &history, now);
        assert!(rec.confidence > 85, "置信度 {} 应超过85", rec.confidence);
        assert!(rec.risk_factors.is_empty(), "{:?}", rec.risk_factors);
        assert!(rec.auto_approvable);
    }

    #[test]
    fn test_skill_shortfall_blocks_auto_approval() {
        let now = Utc::now();
        let (mut op, history) = veteran(now);
        op.skills
            .insert("attach_collar".to_string(), SkillTier::Beginner);
        // 复杂度 9 要求专家
        let req = requirements(MachineFamily::SingleNeedle, 9, Urgency::Medium);
        let rec = engine().evaluate(&req, &op, &history, now);
        assert!(!rec.risk_factors.is_empty());
        assert!(!rec.auto_approvable);
    }

    #[test]
    fn test_high_confidence_with_risk_is_not_auto_approvable() {
        let now = Utc::now();
        let (mut op, history) = veteran(now);
        // 质量历史低于工单最低要求构成风险因素
        op.quality_pct = 88.0;
        let req = requirements(MachineFamily::SingleNeedle, 6, Urgency::Medium);
        let rec = engine().evaluate(&req, &op, &history, now);
        assert!(rec
            .risk_factors
            .iter()
            .any(|r| r.contains("历史质量")));
        assert!(!rec.auto_approvable);
    }

    #[test]
    fn test_urgent_with_high_workload_is_penalized() {
        let now = Utc::now();
        let (mut op, history) = veteran(now);
        let req = requirements(MachineFamily::SingleNeedle, 6, Urgency::Urgent);
        let baseline = engine().evaluate(&req, &op, &history, now).confidence;
        op.current_assignments = 3;
        op.status = OperatorStatus::Working;
        let loaded = engine().evaluate(&req, &op, &history, now).confidence;
        assert!(loaded < baseline);
    }

    #[test]
    fn test_workload_bands() {
        assert_eq!(workload_score(30.0), 100.0);
        assert_eq!(workload_score(50.0), 100.0);
        assert_eq!(workload_score(66.6), 80.0);
        assert_eq!(workload_score(80.0), 50.0);
        assert_eq!(workload_score(95.0), 20.0);
    }

    #[test]
    fn test_availability_ladder() {
        let now = Utc::now();
        let mut op = Operator::new("op-1", "王师傅", MachineFamily::Cutting, 2, now);
        assert_eq!(availability_score(&op), 100.0);
        op.status = OperatorStatus::Working;
        op.current_assignments = 1;
        assert_eq!(availability_score(&op), 80.0);
        op.current_assignments = 2;
        assert_eq!(availability_score(&op), 60.0);
        op.status = OperatorStatus::Break;
        assert_eq!(availability_score(&op), 40.0);
        op.status = OperatorStatus::Offline;
        assert_eq!(availability_score(&op), 0.0);
    }

    #[test]
    fn test_rank_orders_by_confidence_desc() {
        let now = Utc::now();
        let (strong, strong_history) = veteran(now);
        let mut weak = Operator::new("op-2", "小刘", MachineFamily::SingleNeedle, 3, now);
        weak.efficiency_ratio = 0.8;
        weak.quality_pct = 85.0;
        let req = requirements(MachineFamily::SingleNeedle, 6, Urgency::Medium);

        let ranked = engine().rank(
            &req,
            &[
                (weak, PerformanceHistory::new("op-2")),
                (strong, strong_history),
            ],
            5,
            now,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].operator_id, "op-1");
        assert!(ranked[0].confidence >= ranked[1].confidence);
    }

    #[test]
    fn test_predicted_completion_scales_with_efficiency() {
        let now = Utc::now();
        let (mut op, history) = veteran(now);
        op.efficiency_ratio = 1.2;
        let req = requirements(MachineFamily::SingleNeedle, 6, Urgency::Medium);
        let rec = engine().evaluate(&req, &op, &history, now);
        assert_eq!(rec.predicted_completion_minutes, 100);
    }
}
