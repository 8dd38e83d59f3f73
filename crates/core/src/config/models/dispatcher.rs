use serde::{Deserialize, Serialize};

/// 退避上限的最大允许值（一年）
pub const MAX_BACKOFF_LIMIT_SECONDS: f64 = 365.0 * 86_400.0;

/// 逻辑优先级到broker消息优先级的映射表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PriorityMapConfig {
    pub critical: u8,
    pub high: u8,
    pub normal: u8,
    pub low: u8,
}

impl Default for PriorityMapConfig {
    fn default() -> Self {
        Self {
            critical: 10,
            high: 7,
            normal: 4,
            low: 1,
        }
    }
}

impl PriorityMapConfig {
    /// 映射必须严格单调，且落在broker支持的优先级范围内
    pub fn validate(&self, max_priority: u8) -> anyhow::Result<()> {
        if !(self.critical > self.high && self.high > self.normal && self.normal > self.low) {
            return Err(anyhow::anyhow!(
                "优先级映射必须严格递增: low={} normal={} high={} critical={}",
                self.low,
                self.normal,
                self.high,
                self.critical
            ));
        }

        if self.low == 0 {
            return Err(anyhow::anyhow!("优先级映射的最小值必须大于0"));
        }

        if self.critical > max_priority {
            return Err(anyhow::anyhow!(
                "优先级映射超出队列最大优先级: {} > {}",
                self.critical,
                max_priority
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 未配置时使用主机名
    pub instance_id: Option<String>,
    pub schedule_interval_seconds: u64,
    pub scan_batch_size: i64,
    pub max_scan_pages: u32,
    pub dispatch_timeout_seconds: i64,
    pub reconcile_interval_seconds: u64,
    pub default_attempt_timeout_seconds: i64,
    pub max_backoff_seconds: f64,
    pub ingest_poll_interval_millis: u64,
    pub priority_map: PriorityMapConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_id: None,
            schedule_interval_seconds: 5,
            scan_batch_size: 100,
            max_scan_pages: 5,
            dispatch_timeout_seconds: 300,
            reconcile_interval_seconds: 60,
            default_attempt_timeout_seconds: 3600,
            max_backoff_seconds: 86_400.0,
            ingest_poll_interval_millis: 500,
            priority_map: PriorityMapConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schedule_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.scan_batch_size <= 0 {
            return Err(anyhow::anyhow!("扫描批量大小必须大于0"));
        }

        if self.max_scan_pages == 0 {
            return Err(anyhow::anyhow!("单次扫描页数必须大于0"));
        }

        if self.dispatch_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("派发超时时间必须大于0"));
        }

        if self.reconcile_interval_seconds == 0 {
            return Err(anyhow::anyhow!("对账间隔必须大于0"));
        }

        if self.default_attempt_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("默认执行超时时间必须大于0"));
        }

        if !self.max_backoff_seconds.is_finite()
            || self.max_backoff_seconds < 0.0
            || self.max_backoff_seconds > MAX_BACKOFF_LIMIT_SECONDS
        {
            return Err(anyhow::anyhow!(
                "最大退避时间必须在 0 到 {} 秒之间: {}",
                MAX_BACKOFF_LIMIT_SECONDS,
                self.max_backoff_seconds
            ));
        }

        if self.ingest_poll_interval_millis == 0 {
            return Err(anyhow::anyhow!("日志消费轮询间隔必须大于0"));
        }

        if let Some(id) = &self.instance_id {
            if id.trim().is_empty() {
                return Err(anyhow::anyhow!("调度实例ID不能为空字符串"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_backoff_bounds() {
        let mut config = DispatcherConfig::default();
        assert!(config.validate().is_ok());

        config.max_backoff_seconds = MAX_BACKOFF_LIMIT_SECONDS;
        assert!(config.validate().is_ok());

        config.max_backoff_seconds = 1.0e15;
        assert!(config.validate().is_err());

        config.max_backoff_seconds = -1.0;
        assert!(config.validate().is_err());
    }
}
