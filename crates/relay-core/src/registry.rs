//! Type-keyed container of long-lived services with deferred dependency
//! resolution.
//!
//! Registered features aggregate behind `Arc<dyn Feature>` with an
//! `add`/`require`/`start`/`close` lifecycle. Stable string keys (not
//! `TypeId`) so an alternative implementation can register under the
//! same key as the one it replaces.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{codes, CoreError, ErrorCategory};

/// Stable identifier for a feature type. Conventionally a reverse-DNS-ish
/// string such as `"relay.transport.raw_tcp"`.
pub type FeatureKey = &'static str;

/// A long-lived, process-wide service. Exactly one instance is registered
/// per key in a running core.
pub trait Feature: Any + Send + Sync {
    fn type_key(&self) -> FeatureKey;

    fn start(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn close(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn Feature {
    pub fn downcast_ref<T: Feature>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

type ResolveCallback = Box<dyn FnOnce(Vec<Arc<dyn Feature>>) + Send>;

struct PendingRequire {
    keys: Vec<FeatureKey>,
    callback: Option<ResolveCallback>,
    optional: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegistryState {
    Building,
    Running,
    Closed,
}

struct Inner {
    state: RegistryState,
    order: Vec<FeatureKey>,
    features: HashMap<FeatureKey, Arc<dyn Feature>>,
    pending: Vec<PendingRequire>,
}

/// Container driving the `Building -> Running -> Closed` lifecycle.
/// Cheap to clone; every clone shares the same underlying state.
#[derive(Clone)]
pub struct FeatureRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: RegistryState::Building,
                order: Vec::new(),
                features: HashMap::new(),
                pending: Vec::new(),
            })),
        }
    }

    /// Installs a feature. Starts it immediately if the registry is
    /// already running; otherwise the feature waits for `start()`.
    /// Installing may also satisfy pending `require` callbacks, which run
    /// synchronously, inline, before this call returns.
    pub fn add(&self, feature: Arc<dyn Feature>) -> Result<(), CoreError> {
        let key = feature.type_key();
        let mut guard = self.inner.lock();
        guard.features.insert(key, Arc::clone(&feature));
        guard.order.push(key);

        if guard.state == RegistryState::Running {
            feature.start().map_err(|e| {
                CoreError::wrap(codes::REGISTRY_UNRESOLVED, ErrorCategory::Internal, format!("starting feature {key}"), e)
            })?;
        }

        self.fire_satisfied_pending(&mut guard);
        Ok(())
    }

    pub fn get(&self, key: FeatureKey) -> Option<Arc<dyn Feature>> {
        self.inner.lock().features.get(key).cloned()
    }

    /// Registers a dependency on `keys`. If every key is already present,
    /// `callback` runs synchronously before this call returns. Otherwise
    /// it runs later, inline inside whichever `add` call satisfies the
    /// last missing key. `optional` dependencies may never resolve
    /// without blocking `start()`.
    pub fn require(
        &self,
        keys: Vec<FeatureKey>,
        callback: impl FnOnce(Vec<Arc<dyn Feature>>) + Send + 'static,
        optional: bool,
    ) {
        let mut guard = self.inner.lock();
        if let Some(resolved) = try_resolve(&guard.features, &keys) {
            drop(guard);
            callback(resolved);
            return;
        }
        guard.pending.push(PendingRequire {
            keys,
            callback: Some(Box::new(callback)),
            optional,
        });
    }

    fn fire_satisfied_pending(&self, guard: &mut Inner) {
        let mut i = 0;
        while i < guard.pending.len() {
            if let Some(resolved) = try_resolve(&guard.features, &guard.pending[i].keys) {
                let mut entry = guard.pending.remove(i);
                let callback = entry.callback.take().expect("callback taken at most once");
                callback(resolved);
            } else {
                i += 1;
            }
        }
    }

    /// Transitions to running, starting every installed feature in
    /// insertion order. Fails, leaving the registry in `Building`, if any
    /// non-optional `require` is still pending.
    pub fn start(&self) -> Result<(), CoreError> {
        let mut guard = self.inner.lock();
        if let Some(unresolved) = guard.pending.iter().find(|p| !p.optional) {
            return Err(CoreError::new(
                codes::REGISTRY_UNRESOLVED,
                ErrorCategory::ResolveDependency,
                format!("required dependency on {:?} never resolved", unresolved.keys),
            ));
        }

        let order = guard.order.clone();
        for key in &order {
            let feature = Arc::clone(&guard.features[key]);
            feature.start().map_err(|e| {
                CoreError::wrap(codes::REGISTRY_UNRESOLVED, ErrorCategory::Internal, format!("starting feature {key}"), e)
            })?;
        }
        guard.state = RegistryState::Running;
        Ok(())
    }

    /// Closes every installed feature, in insertion order, continuing
    /// past individual failures and returning every error collected.
    pub fn close(&self) -> Result<(), Vec<CoreError>> {
        let mut guard = self.inner.lock();
        let order = guard.order.clone();
        let mut errors = Vec::new();
        for key in &order {
            if let Some(feature) = guard.features.get(key).cloned() {
                if let Err(e) = feature.close() {
                    tracing::warn!(feature = key, error = %e, "feature close failed");
                    errors.push(e);
                }
            }
        }
        guard.state = RegistryState::Closed;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn try_resolve(
    features: &HashMap<FeatureKey, Arc<dyn Feature>>,
    keys: &[FeatureKey],
) -> Option<Vec<Arc<dyn Feature>>> {
    keys.iter()
        .map(|k| features.get(k).cloned())
        .collect::<Option<Vec<_>>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Probe {
        key: FeatureKey,
        closed: Arc<AtomicBool>,
    }

    impl Feature for Probe {
        fn type_key(&self) -> FeatureKey {
            self.key
        }

        fn close(&self) -> Result<(), CoreError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn require_fires_immediately_when_already_satisfied() {
        let registry = FeatureRegistry::new();
        registry
            .add(Arc::new(Probe {
                key: "a",
                closed: Arc::new(AtomicBool::new(false)),
            }))
            .unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        registry.require(vec!["a"], move |_| fired2.store(true, Ordering::SeqCst), false);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn require_fires_on_satisfying_add() {
        let registry = FeatureRegistry::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        registry.require(vec!["b"], move |_| fired2.store(true, Ordering::SeqCst), false);
        assert!(!fired.load(Ordering::SeqCst));

        registry
            .add(Arc::new(Probe {
                key: "b",
                closed: Arc::new(AtomicBool::new(false)),
            }))
            .unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn start_fails_when_required_dependency_unresolved() {
        let registry = FeatureRegistry::new();
        registry.require(vec!["missing"], |_| {}, false);
        assert!(registry.start().is_err());
    }

    #[test]
    fn start_succeeds_when_only_optional_dependency_unresolved() {
        let registry = FeatureRegistry::new();
        registry.require(vec!["missing"], |_| {}, true);
        assert!(registry.start().is_ok());
    }

    #[test]
    fn close_visits_every_feature_even_after_error() {
        struct Failing {
            closed: Arc<AtomicBool>,
        }
        impl Feature for Failing {
            fn type_key(&self) -> FeatureKey {
                "failing"
            }
            fn close(&self) -> Result<(), CoreError> {
                Err(CoreError::new(codes::CONFIG_INVALID, ErrorCategory::Internal, "boom"))
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let registry = FeatureRegistry::new();
        let closed = Arc::new(AtomicBool::new(false));
        registry.add(Arc::new(Failing { closed: Arc::clone(&closed) })).unwrap();
        registry
            .add(Arc::new(Probe {
                key: "ok",
                closed: Arc::clone(&closed),
            }))
            .unwrap();

        let errors = registry.close().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(closed.load(Ordering::SeqCst));
    }
}
