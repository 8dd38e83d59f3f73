use smart_queue_core::{config::PriorityMapConfig, JobPriority, SchedulerError, SchedulerResult};

/// 逻辑优先级到broker消息优先级的映射
///
/// 同一优先级内的先后顺序由broker的FIFO保证，这里不做区分。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityMapper {
    table: PriorityMapConfig,
}

impl PriorityMapper {
    pub fn new(table: PriorityMapConfig, max_priority: u8) -> SchedulerResult<Self> {
        table
            .validate(max_priority)
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?;
        Ok(Self { table })
    }

    pub fn map(&self, priority: JobPriority) -> u8 {
        match priority {
            JobPriority::Critical => self.table.critical,
            JobPriority::High => self.table.high,
            JobPriority::Normal => self.table.normal,
            JobPriority::Low => self.table.low,
        }
    }
}

impl Default for PriorityMapper {
    fn default() -> Self {
        Self {
            table: PriorityMapConfig::default(),
        }
    }
}
