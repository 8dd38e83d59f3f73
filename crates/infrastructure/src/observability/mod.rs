//! Observability module
//!
//! 指标采集、结构化事件日志和日志/指标导出器初始化。

pub mod metrics_collector;
pub mod structured_logger;
pub mod telemetry_setup;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
pub use telemetry_setup::{init_logging, init_metrics_exporter};
