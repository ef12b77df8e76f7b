//! twinguard-bootstrap - 统一服务启动骨架
//!
//! 运行时初始化、基础设施装配与优雅关闭

mod infrastructure;
mod runtime;
mod shutdown;

pub use infrastructure::*;
pub use runtime::*;
pub use shutdown::*;
