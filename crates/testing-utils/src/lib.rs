//! # Smart Queue Testing Utils
//!
//! 调度引擎测试共用的构造器、消息队列替身和测试夹具。
//!
//! ```toml
//! [dev-dependencies]
//! smart-queue-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
