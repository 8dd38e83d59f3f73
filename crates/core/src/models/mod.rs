//! 数据模型
//!
//! 作业、依赖边与执行日志之间只通过标识符相互引用：依赖边持有两端作业的内部主键，
//! 执行日志持有作业内部主键与外部UUID，内存中不保留反向指针。

pub mod dependency;
pub mod execution_log;
pub mod job;
pub mod message;

pub use dependency::*;
pub use execution_log::*;
pub use job::*;
pub use message::*;
