//! 配置模型与加载
//!
//! 配置按 默认值 -> TOML文件 -> 环境变量 的顺序合并，最后整体校验。

pub mod models;

pub use models::*;
