//! 集成测试共用的装配

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use policy_enforcer::application::policy::{CreatePolicyCommand, PolicyCommandHandler};
use policy_enforcer::domain::policy::{PolicyEntry, PolicyId, ResourcePermissions};
use policy_enforcer::infrastructure::cache::{ENFORCER_CACHE, POLICY_CACHE, PolicyCaches};
use policy_enforcer::infrastructure::persistence::PolicyAggregateStore;
use twinguard_adapter_memory::{InMemoryDocumentStore, InMemoryEventStore, InMemoryFabric};
use twinguard_cache_core::CacheConfig;
use twinguard_event_core::EventMetadata;

pub const TOPIC: &str = "policy-events";
pub const POLICY: &str = "org.acme:lamp";

/// 共享同一份存储和总线的一组组件，相当于集群里的一个实例
pub struct Instance {
    pub caches: PolicyCaches,
    pub commands: PolicyCommandHandler,
}

pub struct Cluster {
    pub events: Arc<InMemoryEventStore>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub fabric: InMemoryFabric,
    pub store: Arc<PolicyAggregateStore>,
}

impl Cluster {
    pub fn new(snapshot_interval: u64) -> Self {
        let events = Arc::new(InMemoryEventStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let store = Arc::new(PolicyAggregateStore::new(
            events.clone(),
            documents.clone(),
            snapshot_interval,
        ));
        Self {
            events,
            documents,
            fabric: InMemoryFabric::recording(),
            store,
        }
    }

    pub fn instance(&self) -> Instance {
        self.instance_with(
            CacheConfig::new(POLICY_CACHE, Duration::from_secs(300)),
            CacheConfig::new(ENFORCER_CACHE, Duration::from_secs(300)),
        )
    }

    /// 两个缓存使用各自的配置
    pub fn instance_with(&self, policy_config: CacheConfig, enforcer_config: CacheConfig) -> Instance {
        let caches = PolicyCaches::new(self.store.clone(), policy_config, enforcer_config).unwrap();
        let commands = PolicyCommandHandler::new(
            self.store.clone(),
            caches.clone(),
            Arc::new(self.fabric.clone()),
            TOPIC,
        );
        Instance { caches, commands }
    }
}

pub fn policy_id() -> PolicyId {
    PolicyId::new(POLICY).unwrap()
}

pub fn owner_entry() -> PolicyEntry {
    PolicyEntry::new("owner", ["user:alice"])
        .with_resource("thing:/", ResourcePermissions::grant(["READ", "WRITE"]))
}

pub fn guest_entry() -> PolicyEntry {
    PolicyEntry::new("guests", ["user:*"])
        .with_resource("thing:/features", ResourcePermissions::grant(["READ"]))
}

pub fn create_command(entries: Vec<PolicyEntry>) -> CreatePolicyCommand {
    CreatePolicyCommand {
        policy_id: POLICY.to_string(),
        entries,
        expected_revision: None,
        metadata: EventMetadata::new().with_user("admin"),
    }
}

/// 轮询直到条件成立
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
