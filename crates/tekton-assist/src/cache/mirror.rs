//! Locally indexed replica of one kind of cluster object.
//!
//! A mirror lists its kind, indexes the result, then follows the watch
//! stream until it closes, errors, expires, or the resync interval elapses,
//! at which point it lists again and reconciles the index. Reconnects after
//! a closed, expired or failed watch wait out a doubling backoff; a resync
//! relists right away.

use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::StreamExt;
use kube::api::WatchEvent;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::namespace::allow_namespace;
use super::selector::Selector;
use super::source::ListWatch;
use super::store::{ObjectKey, Store};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry delay for failed list/watch calls, doubling up to a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// Why a watch session ended
enum WatchEnd {
    Closed,
    Expired,
    Resync,
    Cancelled,
}

pub struct Mirror<K> {
    source: Arc<dyn ListWatch<K>>,
    label_selector: Option<String>,
    resync: Duration,
    backoff: Backoff,
    store: RwLock<Store<K>>,
    synced: watch::Sender<bool>,
}

impl<K> Mirror<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn ListWatch<K>>,
        label_selector: Option<String>,
        resync: Duration,
    ) -> Self {
        Self {
            source,
            label_selector,
            resync,
            backoff: Backoff::default(),
            store: RwLock::new(Store::default()),
            synced: watch::Sender::new(false),
        }
    }

    /// Overrides the retry schedule for list/watch failures
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn kind(&self) -> String {
        K::kind(&()).to_string()
    }

    /// Runs list+watch cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let kind = self.kind();
        let mut backoff = self.backoff.clone();
        info!(kind = %kind, selector = ?self.label_selector, "Starting mirror");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = match self.list_and_watch(&cancel, &mut backoff).await {
                Ok(WatchEnd::Cancelled) => break,
                Ok(WatchEnd::Resync) => {
                    debug!(kind = %kind, "Resync interval elapsed, relisting");
                    continue;
                }
                Ok(WatchEnd::Closed) => {
                    let delay = backoff.next_delay();
                    debug!(kind = %kind, retry_in = ?delay, "Watch closed, relisting");
                    delay
                }
                Ok(WatchEnd::Expired) => {
                    let delay = backoff.next_delay();
                    info!(kind = %kind, retry_in = ?delay, "Watch expired, relisting");
                    delay
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(kind = %kind, error = %e, retry_in = ?delay, "List/watch failed");
                    delay
                }
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        info!(kind = %kind, "Mirror stopped");
    }

    async fn list_and_watch(
        &self,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> kube::Result<WatchEnd> {
        let selector = self.label_selector.as_deref();

        let page = tokio::select! {
            () = cancel.cancelled() => return Ok(WatchEnd::Cancelled),
            page = self.source.list(selector) => page?,
        };

        let listed = page.items.len();
        let items: Vec<K> = page
            .items
            .into_iter()
            .filter(|obj| allow_namespace(&obj.namespace().unwrap_or_default()))
            .collect();
        let kept = items.len();
        let removed = self.write().replace(items);
        self.synced.send_if_modified(|synced| !std::mem::replace(synced, true));
        debug!(
            kind = %self.kind(),
            listed,
            kept,
            removed,
            resource_version = %page.resource_version,
            "Indexed listing"
        );

        let mut stream = tokio::select! {
            () = cancel.cancelled() => return Ok(WatchEnd::Cancelled),
            stream = self.source.watch(selector, &page.resource_version) => stream?,
        };

        let resync = tokio::time::sleep(self.resync);
        tokio::pin!(resync);

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return Ok(WatchEnd::Cancelled),
                () = &mut resync => {
                    backoff.reset();
                    return Ok(WatchEnd::Resync);
                }
                event = stream.next() => event,
            };
            // Backoff resets only once a watch has delivered an event.
            if matches!(&event, Some(Ok(ev)) if !matches!(ev, WatchEvent::Error(_))) {
                backoff.reset();
            }
            match event {
                None => return Ok(WatchEnd::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(WatchEvent::Added(obj) | WatchEvent::Modified(obj))) => {
                    if allow_namespace(&obj.namespace().unwrap_or_default()) {
                        self.write().upsert(obj);
                    }
                }
                Some(Ok(WatchEvent::Deleted(obj))) => {
                    if allow_namespace(&obj.namespace().unwrap_or_default()) {
                        self.write().remove(&ObjectKey::of(&obj));
                    }
                }
                Some(Ok(WatchEvent::Bookmark(_))) => {}
                Some(Ok(WatchEvent::Error(resp))) if resp.code == 410 => {
                    return Ok(WatchEnd::Expired);
                }
                Some(Ok(WatchEvent::Error(resp))) => return Err(kube::Error::Api(resp)),
            }
        }
    }

    /// True once the first listing has been indexed. Never reverts.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolves once `has_synced` is true
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so this only errs on drop.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.read().get(&ObjectKey::new(namespace, name))
    }

    pub fn list(&self, namespace: &str, selector: &Selector) -> Vec<Arc<K>> {
        self.read().list(namespace, selector)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Store<K>> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store<K>> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}
