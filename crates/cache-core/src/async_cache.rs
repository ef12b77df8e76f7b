//! single-flight 异步缓存

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use moka::sync::Cache;
use tracing::{debug, warn};
use twinguard_errors::{AppError, AppResult};

use crate::{CacheConfig, Entry};

type SharedLoad<V> = Shared<BoxFuture<'static, AppResult<Entry<V>>>>;

/// 写入凭证，记录取得时的失效序号
///
/// 配合 [`AsyncCache::put_if_unchanged`] 使用：取得凭证之后发生过任何失效，写入就会放弃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutTicket(u64);

/// 正在进行的一次加载
struct Flight<V> {
    id: u64,
    load: SharedLoad<V>,
}

struct Inner<K, V> {
    name: String,
    entries: Cache<K, Entry<V>>,
    /// 加载完成时只有 id 仍匹配才会写回 `entries`；失效会移除 flight
    in_flight: DashMap<K, Flight<V>>,
    next_flight_id: AtomicU64,
    /// 每次失效加一，在对应 key 的分片锁内修改
    invalidations: AtomicU64,
    load_timeout: Duration,
}

/// 异步缓存
///
/// 克隆共享同一份底层存储
pub struct AsyncCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for AsyncCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> AsyncCache<K, V>
where
    K: Hash + Eq + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> AppResult<Self> {
        config.validate()?;

        let mut builder = Cache::builder()
            .name(&config.name)
            .max_capacity(config.max_capacity)
            .time_to_live(config.time_to_live);
        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name,
                entries: builder.build(),
                in_flight: DashMap::new(),
                next_flight_id: AtomicU64::new(1),
                invalidations: AtomicU64::new(0),
                load_timeout: config.load_timeout,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 使用默认加载超时读取
    pub async fn get<F, Fut>(&self, key: &K, loader: F) -> AppResult<Entry<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<Entry<V>>> + Send + 'static,
    {
        self.get_with_timeout(key, self.inner.load_timeout, loader)
            .await
    }

    /// 读取缓存，未命中时加载
    ///
    /// 同一个 key 的并发未命中共享一次 loader 调用；loader 返回 `NotFound`
    /// 时缓存为 `Absent(0)`，其他错误原样返回给所有等待者且不缓存。
    /// 超时只影响当前调用方，加载在后台继续，完成后仍会写回。
    pub async fn get_with_timeout<F, Fut>(
        &self,
        key: &K,
        timeout: Duration,
        loader: F,
    ) -> AppResult<Entry<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<Entry<V>>> + Send + 'static,
    {
        if let Some(entry) = self.inner.entries.get(key) {
            self.record_request("hit");
            return Ok(entry);
        }

        let load = match self.inner.in_flight.entry(key.clone()) {
            MapEntry::Occupied(flight) => {
                self.record_request("miss");
                debug!(cache = %self.inner.name, key = %key, "Joining in-flight load");
                flight.get().load.clone()
            }
            MapEntry::Vacant(slot) => {
                // 加载完成时在同一个分片锁内写回并移除 flight，这里需要再查一次
                if let Some(entry) = self.inner.entries.get(key) {
                    self.record_request("hit");
                    return Ok(entry);
                }
                self.record_request("miss");

                let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                let guard = FlightGuard {
                    inner: self.inner.clone(),
                    key: key.clone(),
                    id,
                };
                let handle = tokio::spawn(async move {
                    let result = loader().await;
                    guard.complete(result)
                });

                let cache_name = self.inner.name.clone();
                let load = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(AppError::internal(format!(
                            "Loader of cache '{}' aborted: {}",
                            cache_name, e
                        ))),
                    }
                }
                .boxed()
                .shared();

                slot.insert(Flight {
                    id,
                    load: load.clone(),
                });
                load
            }
        };

        match tokio::time::timeout(timeout, load).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    cache = %self.inner.name,
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Cache load timed out"
                );
                Err(AppError::load_timeout(key.to_string(), timeout))
            }
        }
    }

    /// 只读缓存，不触发加载
    pub fn get_if_present(&self, key: &K) -> Option<Entry<V>> {
        self.inner.entries.get(key)
    }

    /// 移除条目并分离正在进行的加载
    ///
    /// 幂等，不阻塞，不触发重新加载
    pub fn invalidate(&self, key: &K) {
        let detached = match self.inner.in_flight.entry(key.clone()) {
            MapEntry::Occupied(flight) => {
                self.inner.invalidations.fetch_add(1, Ordering::AcqRel);
                self.inner.entries.invalidate(key);
                flight.remove();
                true
            }
            MapEntry::Vacant(_) => {
                self.inner.invalidations.fetch_add(1, Ordering::AcqRel);
                self.inner.entries.invalidate(key);
                false
            }
        };

        metrics::counter!("cache_invalidations_total", "cache" => self.inner.name.clone())
            .increment(1);
        debug!(cache = %self.inner.name, key = %key, detached, "Cache entry invalidated");
    }

    /// 显式写入，同时分离正在进行的加载
    pub fn put(&self, key: K, entry: Entry<V>) {
        match self.inner.in_flight.entry(key.clone()) {
            MapEntry::Occupied(flight) => {
                self.inner.entries.insert(key, entry);
                flight.remove();
            }
            MapEntry::Vacant(_) => {
                self.inner.entries.insert(key, entry);
            }
        }
    }

    /// 取得写入凭证
    pub fn ticket(&self) -> PutTicket {
        PutTicket(self.inner.invalidations.load(Ordering::Acquire))
    }

    /// 取得凭证之后没有发生过失效时才写入，返回是否写入
    ///
    /// 写路径在提交前取凭证，提交后再写入：期间到达的失效可能对应更新的修订，
    /// 这时放弃写入，由下一次读取重新加载
    pub fn put_if_unchanged(&self, ticket: PutTicket, key: K, entry: Entry<V>) -> bool {
        let slot = self.inner.in_flight.entry(key.clone());
        if self.inner.invalidations.load(Ordering::Acquire) != ticket.0 {
            debug!(cache = %self.inner.name, key = %key, "Invalidated since ticket, put skipped");
            return false;
        }
        self.inner.entries.insert(key, entry);
        if let MapEntry::Occupied(flight) = slot {
            flight.remove();
        }
        true
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidations.fetch_add(1, Ordering::AcqRel);
        self.inner.in_flight.clear();
        self.inner.entries.invalidate_all();
        debug!(cache = %self.inner.name, "Cache cleared");
    }

    /// 当前条目数（先处理 moka 的挂起任务，结果才准确）
    pub fn entry_count(&self) -> u64 {
        self.inner.entries.run_pending_tasks();
        self.inner.entries.entry_count()
    }

    fn record_request(&self, result: &'static str) {
        metrics::counter!(
            "cache_requests_total",
            "cache" => self.inner.name.clone(),
            "result" => result
        )
        .increment(1);
    }
}

/// 加载任务持有的守卫
///
/// loader panic 或任务被取消时也会移除自己的 flight，后续请求可以重新加载
struct FlightGuard<K, V>
where
    K: Hash + Eq,
{
    inner: Arc<Inner<K, V>>,
    key: K,
    id: u64,
}

impl<K, V> FlightGuard<K, V>
where
    K: Hash + Eq + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn complete(self, result: AppResult<Entry<V>>) -> AppResult<Entry<V>> {
        let result = match result {
            Err(e) if e.is_not_found() => Ok(Entry::nonexistent()),
            other => other,
        };

        let outcome = match &result {
            Ok(Entry::Present { .. }) => "present",
            Ok(Entry::Absent { .. }) => "absent",
            Err(_) => "error",
        };
        metrics::counter!(
            "cache_loads_total",
            "cache" => self.inner.name.clone(),
            "outcome" => outcome
        )
        .increment(1);

        let mut stored = false;
        if let MapEntry::Occupied(flight) = self.inner.in_flight.entry(self.key.clone()) {
            if flight.get().id == self.id {
                if let Ok(entry) = &result {
                    self.inner.entries.insert(self.key.clone(), entry.clone());
                    stored = true;
                }
                flight.remove();
            }
        }

        match &result {
            Ok(_) if !stored => {
                debug!(
                    cache = %self.inner.name,
                    key = %self.key,
                    "Load finished after invalidation, result discarded"
                );
            }
            Err(e) => {
                warn!(cache = %self.inner.name, key = %self.key, error = %e, "Cache load failed");
            }
            Ok(_) => {}
        }
        result
    }
}

impl<K, V> Drop for FlightGuard<K, V>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        let id = self.id;
        self.inner.in_flight.remove_if(&self.key, |_, flight| flight.id == id);
    }
}
