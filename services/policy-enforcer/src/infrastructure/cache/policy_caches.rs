//! 策略缓存与执行器缓存
//!
//! 两个缓存共用 EntityId 作为 key，并且总是一起失效：先策略，后执行器。
//! 执行器由缓存中的策略编译，策略缺失时执行器同样缺失。
//! 两个缓存的过期和容量各自配置，执行器只有在策略条目仍在且修订一致时才算命中

use std::sync::Arc;

use tracing::debug;
use twinguard_cache_core::{AsyncCache, CacheConfig, Entry, PutTicket};
use twinguard_common::EntityId;
use twinguard_domain_core::{AggregateRoot, Entity};
use twinguard_errors::AppResult;

use crate::domain::policy::{Policy, PolicyEnforcer, PolicyId};
use crate::domain::thing::ThingPolicyCreated;
use crate::infrastructure::persistence::PolicyAggregateStore;

pub const POLICY_CACHE: &str = "policy";
pub const ENFORCER_CACHE: &str = "enforcer";

/// 写路径在提交前取得的凭证
#[derive(Debug, Clone, Copy)]
pub struct PolicyCacheTicket {
    policies: PutTicket,
    enforcers: PutTicket,
}

#[derive(Clone)]
pub struct PolicyCaches {
    policies: AsyncCache<EntityId, Arc<Policy>>,
    enforcers: AsyncCache<EntityId, Arc<PolicyEnforcer>>,
    store: Arc<PolicyAggregateStore>,
}

impl PolicyCaches {
    pub fn new(
        store: Arc<PolicyAggregateStore>,
        policy_config: CacheConfig,
        enforcer_config: CacheConfig,
    ) -> AppResult<Self> {
        Ok(Self {
            policies: AsyncCache::new(policy_config)?,
            enforcers: AsyncCache::new(enforcer_config)?,
            store,
        })
    }

    /// 读取策略条目，未命中时从聚合存储恢复
    pub async fn policy_entry(&self, id: &EntityId) -> AppResult<Entry<Arc<Policy>>> {
        let store = self.store.clone();
        let key = id.clone();
        self.policies
            .get(id, move || load_policy(store, key))
            .await
    }

    /// 读取执行器条目，未命中时编译缓存中的策略
    ///
    /// 策略条目已过期、被淘汰或修订不同时，执行器条目视为陈旧，失效后重新编译
    pub async fn enforcer_entry(&self, id: &EntityId) -> AppResult<Entry<Arc<PolicyEnforcer>>> {
        if let Some(enforcer) = self.enforcers.get_if_present(id) {
            if self.matches_policy(id, &enforcer) {
                return Ok(enforcer);
            }
            debug!(
                key = %id,
                revision = %enforcer.revision(),
                "Enforcer outlived its policy entry, recompiling"
            );
            self.enforcers.invalidate(id);
        }

        let caches = self.clone();
        let key = id.clone();
        self.enforcers
            .get(id, move || async move {
                let policy = caches.policy_entry(&key).await?;
                Ok(policy.map(|p| Arc::new(PolicyEnforcer::compile(&p))))
            })
            .await
    }

    pub async fn policy(&self, id: &PolicyId) -> AppResult<Option<Arc<Policy>>> {
        Ok(self.policy_entry(id.entity_id()).await?.into_value())
    }

    pub async fn enforcer(&self, id: &PolicyId) -> AppResult<Option<Arc<PolicyEnforcer>>> {
        Ok(self.enforcer_entry(id.entity_id()).await?.into_value())
    }

    pub fn cached_policy(&self, id: &EntityId) -> Option<Entry<Arc<Policy>>> {
        self.policies.get_if_present(id)
    }

    /// 只返回与缓存中策略修订一致的执行器
    pub fn cached_enforcer(&self, id: &EntityId) -> Option<Entry<Arc<PolicyEnforcer>>> {
        self.enforcers
            .get_if_present(id)
            .filter(|enforcer| self.matches_policy(id, enforcer))
    }

    fn matches_policy(&self, id: &EntityId, enforcer: &Entry<Arc<PolicyEnforcer>>) -> bool {
        self.policies
            .get_if_present(id)
            .is_some_and(|policy| policy.revision() == enforcer.revision())
    }

    /// 同时失效两个缓存，返回前两个 key 都已移除
    pub fn invalidate(&self, id: &EntityId) {
        self.policies.invalidate(id);
        self.enforcers.invalidate(id);
    }

    /// 写路径在追加事件之前取得凭证
    pub fn ticket(&self) -> PolicyCacheTicket {
        PolicyCacheTicket {
            policies: self.policies.ticket(),
            enforcers: self.enforcers.ticket(),
        }
    }

    /// 写路径提交后放入新值，执行器同步重新编译
    ///
    /// 取得凭证之后本地发生过失效时放弃写入，返回是否写入
    pub fn put_policy(&self, ticket: PolicyCacheTicket, policy: &Policy) -> bool {
        let key = policy.id().entity_id().clone();
        let revision = policy.revision();

        let (policy_entry, enforcer_entry) = if policy.is_active() {
            let enforcer = PolicyEnforcer::compile(policy);
            (
                Entry::present(Arc::new(policy.clone()), revision),
                Entry::present(Arc::new(enforcer), revision),
            )
        } else {
            (Entry::absent(revision), Entry::absent(revision))
        };

        let stored = self
            .policies
            .put_if_unchanged(ticket.policies, key.clone(), policy_entry)
            && self
                .enforcers
                .put_if_unchanged(ticket.enforcers, key.clone(), enforcer_entry);
        if !stored {
            debug!(key = %key, revision = %revision, "Invalidated during commit, put skipped");
        }
        stored
    }

    /// Thing 内联创建了策略：本地可能缓存了负条目
    pub fn on_thing_policy_created(&self, signal: &ThingPolicyCreated) {
        debug!(
            thing_id = %signal.thing_id(),
            policy_id = %signal.policy_id(),
            correlation_id = ?signal.headers().correlation_id,
            "Thing policy created inline, invalidating"
        );
        self.invalidate(signal.policy_id().entity_id());
    }
}

async fn load_policy(
    store: Arc<PolicyAggregateStore>,
    id: EntityId,
) -> AppResult<Entry<Arc<Policy>>> {
    let policy_id = PolicyId::from_entity_id(&id)?;

    let entry = match store.recover(&policy_id).await? {
        Some(policy) if policy.is_active() => {
            let revision = policy.revision();
            Entry::present(Arc::new(policy), revision)
        }
        Some(deleted) => Entry::absent(deleted.revision()),
        None => Entry::nonexistent(),
    };
    debug!(
        policy_id = %policy_id,
        present = entry.is_present(),
        revision = %entry.revision(),
        "Policy loaded"
    );
    Ok(entry)
}
