//! SQLLuck 公共模块
//!
//! 各服务共享的配置、错误类型、数据模型、响应封装与 MySQL 方言工具。

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
