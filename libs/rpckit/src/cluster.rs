//! Client-side aggregation of discovered providers.
//!
//! A [`ClusterSupport`] subscribes to every registry it was built with and
//! keeps one referer list per registry. The merged list is published through
//! `arc-swap`, so calls never wait on a notification in progress. Calls are
//! spread round-robin over available referers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::address::{Address, param};
use crate::capability::CapabilityHub;
use crate::contract::{InterfaceContract, Request};
use crate::error::RpcError;
use crate::protocol::{FilteredProtocol, Protocol, Referer};
use crate::registry::{NotifyListener, Registry, RegistryFactory};

pub struct ClusterSupport {
    inner: Arc<ClusterInner>,
    listener: Arc<dyn NotifyListener>,
    registries: Vec<Address>,
    subscriptions: Mutex<Vec<(Arc<dyn Registry>, Address)>>,
}

struct ClusterInner {
    contract: InterfaceContract,
    hub: Weak<CapabilityHub>,
    per_registry: Mutex<HashMap<String, Vec<Arc<dyn Referer>>>>,
    referers: ArcSwap<Vec<Arc<dyn Referer>>>,
    cursor: AtomicUsize,
}

/// Registry callbacks reach the cluster through a weak handle so a registry
/// never keeps a destroyed cluster alive.
struct ClusterListener {
    inner: Weak<ClusterInner>,
    reference: Address,
}

impl NotifyListener for ClusterListener {
    fn notify(&self, registry: &Address, providers: &[Address]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.refresh(registry, &self.reference, providers);
        }
    }
}

impl ClusterSupport {
    /// `registries` are registry Addresses carrying the embedded reference Address.
    ///
    /// # Errors
    /// [`RpcError::MissingRegistry`] when `registries` is empty, or
    /// [`RpcError::MalformedAddress`] when no reference Address is embedded.
    pub fn new(
        hub: Weak<CapabilityHub>,
        contract: InterfaceContract,
        registries: Vec<Address>,
    ) -> Result<Self, RpcError> {
        let first = registries.first().ok_or_else(|| RpcError::MissingRegistry {
            interface: contract.name().to_owned(),
        })?;
        let reference = first.embedded()?;
        let inner = Arc::new(ClusterInner {
            contract,
            hub,
            per_registry: Mutex::new(HashMap::new()),
            referers: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
        });
        let listener: Arc<dyn NotifyListener> = Arc::new(ClusterListener {
            inner: Arc::downgrade(&inner),
            reference,
        });
        Ok(Self {
            inner,
            listener,
            registries,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Subscribes to every registry; succeeds if at least one subscription does.
    ///
    /// # Errors
    /// [`RpcError::RegistryUnreachable`] when no registry could be subscribed.
    pub fn init(&self) -> Result<(), RpcError> {
        let hub = self.inner.hub.upgrade().ok_or(RpcError::RuntimeClosed)?;
        let mut failures = Vec::new();

        for registry_address in &self.registries {
            match subscribe_one(&hub, registry_address, &self.listener) {
                Ok(subscription) => self.subscriptions.lock().push(subscription),
                Err(e) => {
                    tracing::warn!(
                        interface = self.inner.contract.name(),
                        registry = %registry_address.uri(),
                        error = %e,
                        "registry subscription failed"
                    );
                    failures.push(format!("{}: {e}", registry_address.uri()));
                }
            }
        }

        if self.subscriptions.lock().is_empty() {
            return Err(RpcError::RegistryUnreachable {
                interface: self.inner.contract.name().to_owned(),
                reason: failures.join("; "),
            });
        }
        tracing::info!(
            interface = self.inner.contract.name(),
            subscribed = self.subscriptions.lock().len(),
            providers = self.inner.referers.load().len(),
            "cluster initialized"
        );
        Ok(())
    }

    #[must_use]
    pub fn contract(&self) -> &InterfaceContract {
        &self.inner.contract
    }

    /// Registry Addresses this cluster subscribes to.
    #[must_use]
    pub fn registries(&self) -> &[Address] {
        &self.registries
    }

    /// Snapshot of every referer currently known.
    #[must_use]
    pub fn referers(&self) -> Arc<Vec<Arc<dyn Referer>>> {
        self.inner.referers.load_full()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.referers.load().iter().any(|r| r.is_available())
    }

    /// Dispatches to the next available referer.
    ///
    /// # Errors
    /// [`RpcError::NoAvailableProvider`] when no referer is available, or
    /// whatever the chosen referer reports.
    pub fn call(&self, request: &Request) -> Result<Value, RpcError> {
        let snapshot = self.inner.referers.load();
        let available: Vec<&Arc<dyn Referer>> =
            snapshot.iter().filter(|r| r.is_available()).collect();
        if available.is_empty() {
            return Err(RpcError::NoAvailableProvider {
                interface: self.inner.contract.name().to_owned(),
            });
        }
        let index = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % available.len();
        available[index].call(request)
    }

    /// Unsubscribes from every registry and destroys all referers.
    pub fn destroy(&self) {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for (registry, reference) in subscriptions {
            if let Err(e) = registry.unsubscribe(&reference, &self.listener) {
                tracing::warn!(
                    interface = self.inner.contract.name(),
                    registry = %registry.address().uri(),
                    error = %e,
                    "registry unsubscribe failed"
                );
            }
        }
        let lists: Vec<_> = self.inner.per_registry.lock().drain().collect();
        for referer in lists.into_iter().flat_map(|(_, list)| list) {
            referer.destroy();
        }
        self.inner.referers.store(Arc::new(Vec::new()));
        tracing::debug!(interface = self.inner.contract.name(), "cluster destroyed");
    }
}

impl std::fmt::Debug for ClusterSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSupport")
            .field("interface", &self.inner.contract.name())
            .field("registries", &self.registries.len())
            .field("referers", &self.inner.referers.load().len())
            .finish_non_exhaustive()
    }
}

fn subscribe_one(
    hub: &CapabilityHub,
    registry_address: &Address,
    listener: &Arc<dyn NotifyListener>,
) -> Result<(Arc<dyn Registry>, Address), RpcError> {
    let reference = registry_address.embedded()?;
    let factory = hub.resolve::<dyn RegistryFactory>(registry_address.scheme())?;
    let registry = factory.get_registry(registry_address)?;
    registry.subscribe(&reference, listener.clone())?;
    Ok((registry, reference))
}

impl ClusterInner {
    fn refresh(&self, registry: &Address, reference: &Address, providers: &[Address]) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let key = registry.uri();

        let mut per_registry = self.per_registry.lock();
        let previous = per_registry.remove(&key).unwrap_or_default();
        let mut next: Vec<Arc<dyn Referer>> = Vec::with_capacity(providers.len());

        for provider in providers {
            if let Some(existing) = previous
                .iter()
                .find(|r| r.address().same_target(provider))
            {
                next.push(existing.clone());
                continue;
            }
            match self.refer(&hub, reference, provider) {
                Ok(referer) => next.push(referer),
                Err(e) if e.is_config_error() => tracing::error!(
                    interface = self.contract.name(),
                    provider = %provider.uri(),
                    error = %e,
                    "reference configuration rejects provider"
                ),
                Err(e) => tracing::warn!(
                    interface = self.contract.name(),
                    provider = %provider.uri(),
                    error = %e,
                    "cannot refer provider"
                ),
            }
        }

        for stale in previous
            .iter()
            .filter(|old| !next.iter().any(|n| Arc::ptr_eq(n, old)))
        {
            stale.destroy();
        }

        per_registry.insert(key, next);
        let merged: Vec<Arc<dyn Referer>> = per_registry.values().flatten().cloned().collect();
        tracing::debug!(
            interface = self.contract.name(),
            registry = %registry.uri(),
            providers = merged.len(),
            "cluster providers refreshed"
        );
        self.referers.store(Arc::new(merged));
    }

    /// Refers one provider through the filtered protocol named by its scheme,
    /// with the client's own filters in place of the provider's.
    fn refer(
        &self,
        hub: &Arc<CapabilityHub>,
        reference: &Address,
        provider: &Address,
    ) -> Result<Arc<dyn Referer>, RpcError> {
        let protocol = hub.resolve::<dyn Protocol>(provider.scheme())?;
        let protocol = FilteredProtocol::new(protocol, hub.clone());
        protocol.refer(&self.contract, &referer_target(reference, provider))
    }
}

/// Provider Address as seen by the client-side filter chain: the reference's
/// `filter` list, and for every listed filter its `<name>.*` settings taken
/// from the reference instead of the provider.
fn referer_target(reference: &Address, provider: &Address) -> Address {
    let filters = reference.parameter(param::FILTER).unwrap_or_default();
    let mut target = if filters.trim().is_empty() {
        provider.without_parameter(param::FILTER)
    } else {
        provider.with_parameter(param::FILTER, filters)
    };

    for name in filters.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let prefix = format!("{name}.");
        let inherited: Vec<String> = target
            .parameters()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in inherited {
            target = target.without_parameter(&key);
        }
        for (key, value) in reference
            .parameters()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
        {
            target = target.with_parameter(key.as_str(), value.as_str());
        }
    }
    target.with_parameter(param::NODE_TYPE, param::NODE_TYPE_REFERER)
}
