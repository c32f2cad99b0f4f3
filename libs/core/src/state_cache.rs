//! State Cache: a read-through mirror of the last `ConfigValidated`, `CredentialsUpdated`, and
//! `TemplateRendered` events, plus webhook lifecycle stats. All mutation happens on event
//! receipt; all reads go through one RW lock. Getters return a clear error before the first
//! corresponding event has arrived.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::config::{Config, Credentials};
use crate::event::{ConfigValidated, CredentialsUpdated, Event, EventKind, TemplateRendered};
use crate::watch::store::{Store, StoreSnapshot};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0} not available yet")]
pub struct NotAvailableYet(pub &'static str);

#[derive(Debug, Clone, Default)]
pub struct WebhookStats {
    pub requests_total: u64,
    pub rejections_total: u64,
}

#[derive(Default)]
struct CacheState {
    config: Option<ConfigValidated>,
    credentials: Option<CredentialsUpdated>,
    rendered: Option<TemplateRendered>,
    webhook_stats: WebhookStats,
}

pub struct StateCache {
    state: RwLock<CacheState>,
    stores: BTreeMap<String, Arc<dyn Store>>,
}

impl StateCache {
    pub fn new(stores: BTreeMap<String, Arc<dyn Store>>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            stores,
        }
    }

    pub fn config(&self) -> Result<Config, NotAvailableYet> {
        self.state
            .read()
            .unwrap()
            .config
            .as_ref()
            .map(|c| c.config.clone())
            .ok_or(NotAvailableYet("config"))
    }

    pub fn credentials(&self) -> Result<Credentials, NotAvailableYet> {
        self.state
            .read()
            .unwrap()
            .credentials
            .as_ref()
            .map(|c| c.credentials.clone())
            .ok_or(NotAvailableYet("credentials"))
    }

    pub fn rendered_config(&self) -> Result<Vec<u8>, NotAvailableYet> {
        self.state
            .read()
            .unwrap()
            .rendered
            .as_ref()
            .map(|r| r.config_bytes.clone())
            .ok_or(NotAvailableYet("rendered config"))
    }

    pub fn aux_files(&self) -> Result<BTreeMap<String, Vec<u8>>, NotAvailableYet> {
        self.state
            .read()
            .unwrap()
            .rendered
            .as_ref()
            .map(|r| r.aux_files.clone())
            .ok_or(NotAvailableYet("rendered config"))
    }

    pub fn webhook_stats(&self) -> WebhookStats {
        self.state.read().unwrap().webhook_stats.clone()
    }

    pub fn record_webhook_request(&self, rejected: bool) {
        let mut state = self.state.write().unwrap();
        state.webhook_stats.requests_total += 1;
        if rejected {
            state.webhook_stats.rejections_total += 1;
        }
    }

    /// Delegates to each watcher's store; matches `GetAllStores().List()`.
    pub async fn resource_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (name, store) in &self.stores {
            counts.insert(name.clone(), store.len());
        }
        counts
    }

    pub async fn store_snapshot(&self, resource_type: &str) -> Option<StoreSnapshot> {
        match self.stores.get(resource_type) {
            Some(store) => Some(store.list().await),
            None => None,
        }
    }

    pub fn apply(&self, event: &Event) {
        let mut state = self.state.write().unwrap();
        match &event.kind {
            EventKind::ConfigValidated(c) => state.config = Some(c.clone()),
            EventKind::CredentialsUpdated(c) => state.credentials = Some(c.clone()),
            EventKind::TemplateRendered(r) => state.rendered = Some(r.clone()),
            _ => {}
        }
    }

    pub async fn run(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            self.apply(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters_error_before_first_event() {
        let cache = StateCache::new(BTreeMap::new());
        assert!(cache.config().is_err());
        assert!(cache.credentials().is_err());
        assert!(cache.rendered_config().is_err());
    }

    #[test]
    fn apply_config_validated_makes_config_available() {
        let cache = StateCache::new(BTreeMap::new());
        cache.apply(&Event::new(EventKind::ConfigValidated(ConfigValidated {
            config: Config::default_for_test(),
            version: "v1".to_string(),
            secret_version: None,
        })));
        assert!(cache.config().is_ok());
    }
}
