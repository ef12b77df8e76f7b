//! 通用类型定义

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use twinguard_errors::{AppError, AppResult};

/// 实体标识
///
/// `(resource_type, identifier)` 在同一资源类型内全局唯一，既是缓存键也是事件路由键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{resource_type}:{identifier}")]
pub struct EntityId {
    resource_type: String,
    identifier: String,
}

impl EntityId {
    pub fn new(
        resource_type: impl Into<String>,
        identifier: impl Into<String>,
    ) -> AppResult<Self> {
        let resource_type = resource_type.into();
        let identifier = identifier.into();
        if resource_type.is_empty() || resource_type.contains(':') {
            return Err(AppError::validation(format!(
                "Invalid resource type '{}'",
                resource_type
            )));
        }
        if identifier.is_empty() {
            return Err(AppError::validation("Entity identifier must not be empty"));
        }
        Ok(Self {
            resource_type,
            identifier,
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// 解析 `resource_type:identifier` 形式（identifier 本身可以包含冒号）
    pub fn parse(s: &str) -> AppResult<Self> {
        let (resource_type, identifier) = s
            .split_once(':')
            .ok_or_else(|| AppError::validation(format!("Invalid entity id '{}'", s)))?;
        Self::new(resource_type, identifier)
    }
}

/// 修订号
///
/// 每个实体单调递增，0 表示从未写入
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct Revision(pub u64);

impl Revision {
    pub const ZERO: Revision = Revision(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个修订号
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// 上一个修订号（0 保持为 0）
    pub fn previous(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_display_and_parse() {
        let id = EntityId::new("policy", "org.acme:p1").unwrap();
        assert_eq!(id.to_string(), "policy:org.acme:p1");

        let parsed = EntityId::parse("policy:org.acme:p1").unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.identifier(), "org.acme:p1");
    }

    #[test]
    fn test_entity_id_rejects_empty_parts() {
        assert!(EntityId::new("", "p1").is_err());
        assert!(EntityId::new("policy", "").is_err());
        assert!(EntityId::parse("no-separator").is_err());
    }

    #[test]
    fn test_revision_arithmetic() {
        let rev = Revision::ZERO;
        assert!(rev.is_initial());
        assert_eq!(rev.next(), Revision(1));
        assert_eq!(Revision(1).previous(), Revision::ZERO);
        assert_eq!(Revision::ZERO.previous(), Revision::ZERO);
    }

    #[test]
    fn test_revision_serializes_as_number() {
        let json = serde_json::to_string(&Revision(7)).unwrap();
        assert_eq!(json, "7");
    }
}
