//! 缓存条目

use twinguard_common::Revision;

/// 缓存条目：存在的值或检查时的“不存在”
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry<V> {
    Present { value: V, revision: Revision },
    /// `revision` 为检查时的修订号，从未创建过的实体为 0
    Absent { revision: Revision },
}

impl<V> Entry<V> {
    pub fn present(value: V, revision: Revision) -> Self {
        Self::Present { value, revision }
    }

    pub fn absent(revision: Revision) -> Self {
        Self::Absent { revision }
    }

    pub fn nonexistent() -> Self {
        Self::Absent {
            revision: Revision::ZERO,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    pub fn revision(&self) -> Revision {
        match self {
            Self::Present { revision, .. } | Self::Absent { revision } => *revision,
        }
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Present { value, .. } => Some(value),
            Self::Absent { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Present { value, .. } => Some(value),
            Self::Absent { .. } => None,
        }
    }

    /// 转换值，保持修订号与存在性不变
    pub fn map<U, F>(self, f: F) -> Entry<U>
    where
        F: FnOnce(V) -> U,
    {
        match self {
            Self::Present { value, revision } => Entry::Present {
                value: f(value),
                revision,
            },
            Self::Absent { revision } => Entry::Absent { revision },
        }
    }
}
