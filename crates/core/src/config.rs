use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 系统配置
///
/// 所有数值默认值均为可调策略参数，不是结构性不变式。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub lock: LockConfig,
    pub queue: QueueConfig,
    pub scoring: ScoringConfig,
    pub observability: ObservabilityConfig,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// "memory" 或 SQLite 连接串（如 "sqlite://shopfloor.db"）
    pub url: String,
    pub max_connections: u32,
}

/// 分布式锁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// 锁租约时长（毫秒），限制持有者崩溃后的最大阻塞时间
    pub ttl_ms: i64,
}

/// 请求队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 队列工作者扫描间隔（秒）
    pub tick_seconds: u64,
    /// 单轮并发处理的请求上限
    pub max_concurrent_processing: usize,
    /// 可重试失败的最大尝试次数，超过后置为 failed
    pub max_retry_attempts: u32,
    /// 退避基础间隔（秒）
    pub base_retry_interval_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 退避间隔的非负随机抖动比例（0.0-1.0）
    pub jitter_factor: f64,
    /// 队列批准所需的最低置信度
    pub min_confidence: f64,
    /// 请求过期时长（小时），独立于重试计数
    pub request_ttl_hours: i64,
    /// processing 状态滞留超过该时长视为失联并回收（秒）
    pub stale_claim_timeout_seconds: i64,
}

/// 评分权重，六项之和必须为 1.0
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub skill_match: f64,
    pub efficiency: f64,
    pub quality: f64,
    pub availability: f64,
    pub workload: f64,
    pub machine_experience: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.skill_match
            + self.efficiency
            + self.quality
            + self.availability
            + self.workload
            + self.machine_experience
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            skill_match: 0.25,
            efficiency: 0.20,
            quality: 0.20,
            availability: 0.15,
            workload: 0.10,
            machine_experience: 0.10,
        }
    }
}

/// 评分引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// 免人工复核自动指派的置信度门槛（需同时无风险因素）
    pub auto_approve_threshold: f64,
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// "json" 或 "pretty"
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "memory".to_string(),
                max_connections: 1,
            },
            lock: LockConfig { ttl_ms: 30_000 },
            queue: QueueConfig {
                tick_seconds: 10,
                max_concurrent_processing: 5,
                max_retry_attempts: 3,
                base_retry_interval_seconds: 60,
                backoff_multiplier: 2.0,
                jitter_factor: 0.1,
                min_confidence: 50.0,
                request_ttl_hours: 24,
                stale_claim_timeout_seconds: 300,
            },
            scoring: ScoringConfig {
                weights: ScoringWeights::default(),
                auto_approve_threshold: 85.0,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 从配置文件与环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 内置默认值
    /// 2. TOML 配置文件
    /// 3. 环境变量覆盖（前缀 SHOPFLOOR_，分隔符 __）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default())
            .context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {path}"));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            // 尝试默认路径，不存在则跳过
            for default_path in ["config/shopfloor.toml", "shopfloor.toml"] {
                if Path::new(default_path).exists() {
                    builder = builder.add_source(File::new(default_path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SHOPFLOOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 配置有效性校验
    pub fn validate(&self) -> Result<()> {
        if self.lock.ttl_ms <= 0 {
            return Err(anyhow::anyhow!("锁TTL必须为正数: {}", self.lock.ttl_ms));
        }
        if self.queue.tick_seconds == 0 {
            return Err(anyhow::anyhow!("队列扫描间隔不能为0"));
        }
        if self.queue.max_concurrent_processing == 0 {
            return Err(anyhow::anyhow!("队列并发上限不能为0"));
        }
        if self.queue.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!(
                "退避倍数必须不小于1.0: {}",
                self.queue.backoff_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.queue.jitter_factor) {
            return Err(anyhow::anyhow!(
                "抖动比例必须在0.0-1.0之间: {}",
                self.queue.jitter_factor
            ));
        }
        let weight_sum = self.scoring.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(anyhow::anyhow!("评分权重之和必须为1.0，当前为 {weight_sum}"));
        }
        if !(0.0..=100.0).contains(&self.scoring.auto_approve_threshold) {
            return Err(anyhow::anyhow!(
                "自动批准门槛必须在0-100之间: {}",
                self.scoring.auto_approve_threshold
            ));
        }
        if !(0.0..=100.0).contains(&self.queue.min_confidence) {
            return Err(anyhow::anyhow!(
                "队列最低置信度必须在0-100之间: {}",
                self.queue.min_confidence
            ));
        }
        Ok(())
    }
}
