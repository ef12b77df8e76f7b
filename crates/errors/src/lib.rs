//! twinguard-errors - 统一错误处理
//!
//! 所有 crate 共用的错误分类，`Clone` 以便 single-flight 的所有等待者拿到同一个失败

use std::time::Duration;

use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// 乐观并发冲突：期望的版本与存储中的当前版本不一致
    #[error(
        "Concurrent modification of {aggregate_id}: expected revision {expected}, actual {actual}"
    )]
    ConcurrentModification {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },

    /// 快照文档损坏或结构不兼容
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// 缓存加载超时（只影响超时的调用方）
    #[error("Load of '{key}' timed out after {timeout:?}")]
    LoadTimeout { key: String, timeout: Duration },

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn concurrent_modification(
        aggregate_id: impl Into<String>,
        expected: u64,
        actual: u64,
    ) -> Self {
        Self::ConcurrentModification {
            aggregate_id: aggregate_id.into(),
            expected,
            actual,
        }
    }

    pub fn malformed_snapshot(msg: impl Into<String>) -> Self {
        Self::MalformedSnapshot(msg.into())
    }

    pub fn load_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::LoadTimeout {
            key: key.into(),
            timeout,
        }
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// 是否值得在协作方边界重试（持久化、消息总线）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::ExternalService(_) | Self::LoadTimeout { .. }
        )
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::ConcurrentModification { .. } => 412,
            Self::MalformedSnapshot(_) => 500,
            Self::LoadTimeout { .. } => 504,
            Self::Database(_) => 500,
            Self::ExternalService(_) => 502,
            Self::Internal(_) => 500,
            Self::ResourceExhausted(_) => 429,
        }
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_modification_message() {
        let err = AppError::concurrent_modification("policy:org.acme:p1", 3, 4);
        assert_eq!(
            err.to_string(),
            "Concurrent modification of policy:org.acme:p1: expected revision 3, actual 4"
        );
        assert!(err.is_concurrent_modification());
        assert_eq!(err.status_code(), 412);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::database("connection reset").is_retryable());
        assert!(AppError::external_service("redis down").is_retryable());
        assert!(!AppError::not_found("policy").is_retryable());
        assert!(!AppError::malformed_snapshot("missing entries").is_retryable());
    }

    #[test]
    fn test_clone_preserves_variant() {
        let err = AppError::load_timeout("policy:p1", Duration::from_millis(250));
        let cloned = err.clone();
        assert_eq!(err, cloned);
        assert_eq!(cloned.status_code(), 504);
    }
}
