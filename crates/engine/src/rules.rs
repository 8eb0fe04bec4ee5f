//! 业务规则评估器
//!
//! 对进行中的生产会话做巡检并产生告警。规则用带类型参数的枚举
//! 表达，按优先级顺序逐条评估；单条规则出错只记录日志并跳过，
//! 不影响其余规则。告警只是下游消费的提示，与指派正确性无关。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use shopfloor_core::errors::{SchedulingError, SchedulingResult};

/// 规则巡检的输入：一次进行中指派的实时快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub assignment_id: String,
    pub operator_id: String,
    pub work_item_id: String,
    /// 截至当前的实际效率比
    pub efficiency_ratio: f64,
    /// 截至当前的质量合格率（百分比）
    pub quality_pct: f64,
    /// 实际进度相对计划进度的完成比（1.0 为按计划）
    pub progress_ratio: f64,
    /// 操作员当前负载率（百分比）
    pub utilization_pct: f64,
    pub observed_at: DateTime<Utc>,
}

/// 告警级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "CRITICAL")]
    Critical,
}

/// 规则命中产生的告警
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub rule: String,
    pub severity: AlertSeverity,
    pub assignment_id: String,
    pub operator_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// 业务规则：带类型参数的枚举变体，不是闭包数组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuleKind {
    /// 效率比低于阈值
    EfficiencyBelow { threshold: f64, severity: AlertSeverity },
    /// 质量合格率低于阈值
    QualityBelow { threshold_pct: f64, severity: AlertSeverity },
    /// 实际进度落后计划超过容差
    ProgressBehind { tolerance: f64, severity: AlertSeverity },
    /// 负载率高于阈值
    WorkloadAbove { threshold_pct: f64, severity: AlertSeverity },
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::EfficiencyBelow { .. } => "efficiency_below",
            RuleKind::QualityBelow { .. } => "quality_below",
            RuleKind::ProgressBehind { .. } => "progress_behind",
            RuleKind::WorkloadAbove { .. } => "workload_above",
        }
    }

    /// 评估单条规则，命中返回告警
    fn evaluate(&self, snapshot: &SessionSnapshot) -> SchedulingResult<Option<Alert>> {
        let hit = match self {
            RuleKind::EfficiencyBelow { threshold, severity } => {
                if !threshold.is_finite() {
                    return Err(SchedulingError::Configuration(format!(
                        "效率阈值非法: {threshold}"
                    )));
                }
                (snapshot.efficiency_ratio < *threshold).then(|| {
                    (
                        *severity,
                        format!(
                            "效率比 {:.2} 低于阈值 {:.2}",
                            snapshot.efficiency_ratio, threshold
                        ),
                    )
                })
            }
            RuleKind::QualityBelow {
                threshold_pct,
                severity,
            } => (snapshot.quality_pct < *threshold_pct).then(|| {
                (
                    *severity,
                    format!(
                        "质量合格率 {:.1}% 低于阈值 {:.1}%",
                        snapshot.quality_pct, threshold_pct
                    ),
                )
            }),
            RuleKind::ProgressBehind { tolerance, severity } => {
                (snapshot.progress_ratio < 1.0 - tolerance).then(|| {
                    (
                        *severity,
                        format!(
                            "实际进度 {:.0}% 落后计划超过容差 {:.0}%",
                            snapshot.progress_ratio * 100.0,
                            tolerance * 100.0
                        ),
                    )
                })
            }
            RuleKind::WorkloadAbove {
                threshold_pct,
                severity,
            } => (snapshot.utilization_pct > *threshold_pct).then(|| {
                (
                    *severity,
                    format!(
                        "负载率 {:.0}% 高于阈值 {:.0}%",
                        snapshot.utilization_pct, threshold_pct
                    ),
                )
            }),
        };

        Ok(hit.map(|(severity, message)| Alert {
            rule: self.name().to_string(),
            severity,
            assignment_id: snapshot.assignment_id.clone(),
            operator_id: snapshot.operator_id.clone(),
            message,
            at: snapshot.observed_at,
        }))
    }
}

/// 带优先级的规则条目，数值越小越先评估
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub priority: u32,
    pub kind: RuleKind,
}

/// 按优先级排序的规则评估器
pub struct RuleEvaluator {
    rules: Vec<Rule>,
}

impl RuleEvaluator {
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    /// 默认规则集
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Rule {
                priority: 10,
                kind: RuleKind::QualityBelow {
                    threshold_pct: 85.0,
                    severity: AlertSeverity::Critical,
                },
            },
            Rule {
                priority: 20,
                kind: RuleKind::ProgressBehind {
                    tolerance: 0.2,
                    severity: AlertSeverity::Warning,
                },
            },
            Rule {
                priority: 30,
                kind: RuleKind::EfficiencyBelow {
                    threshold: 0.8,
                    severity: AlertSeverity::Warning,
                },
            },
            Rule {
                priority: 40,
                kind: RuleKind::WorkloadAbove {
                    threshold_pct: 90.0,
                    severity: AlertSeverity::Info,
                },
            },
        ])
    }

    /// 按优先级顺序评估全部规则
    ///
    /// 单条规则失败只记录告警日志，继续评估后续规则。
    pub fn evaluate(&self, snapshot: &SessionSnapshot) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for rule in &self.rules {
            match rule.kind.evaluate(snapshot) {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => {}
                Err(e) => {
                    warn!(rule = rule.kind.name(), "规则评估失败，跳过: {e}");
                }
            }
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            assignment_id: "a-1".to_string(),
            operator_id: "op-1".to_string(),
            work_item_id: "wi-1".to_string(),
            efficiency_ratio: 1.0,
            quality_pct: 95.0,
            progress_ratio: 1.0,
            utilization_pct: 50.0,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_healthy_session_raises_no_alerts() {
        let alerts = RuleEvaluator::with_defaults().evaluate(&snapshot());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_alerts_follow_priority_order() {
        let mut s = snapshot();
        s.quality_pct = 80.0;
        s.efficiency_ratio = 0.6;
        s.progress_ratio = 0.7;
        let alerts = RuleEvaluator::with_defaults().evaluate(&s);
        assert_eq!(alerts.len(), 3);
        // 质量（优先级10）在进度（20）与效率（30）之前
        assert_eq!(alerts[0].rule, "quality_below");
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[1].rule, "progress_behind");
        assert_eq!(alerts[2].rule, "efficiency_below");
    }

    #[test]
    fn test_bad_rule_is_isolated() {
        let evaluator = RuleEvaluator::new(vec![
            Rule {
                priority: 1,
                kind: RuleKind::EfficiencyBelow {
                    threshold: f64::NAN,
                    severity: AlertSeverity::Warning,
                },
            },
            Rule {
                priority: 2,
                kind: RuleKind::WorkloadAbove {
                    threshold_pct: 40.0,
                    severity: AlertSeverity::Info,
                },
            },
        ]);
        // 第一条规则配置非法，评估失败但不影响第二条
        let alerts = evaluator.evaluate(&snapshot());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, "workload_above");
    }

    #[test]
    fn test_progress_within_tolerance_is_quiet() {
        let mut s = snapshot();
        s.progress_ratio = 0.85;
        let alerts = RuleEvaluator::with_defaults().evaluate(&s);
        assert!(alerts.is_empty());
    }
}
