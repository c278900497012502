//! Named host objects shared across the process.
//!
//! Every long-lived subsystem of the host (heaters, toolhead, fans, the
//! template environment) registers itself in the [`ObjectRegistry`] under a
//! unique name at load time. Consumers resolve objects by name and probe for
//! capabilities at runtime; the one capability this crate cares about is
//! [`StatusSource`], "produces a status snapshot at time T". Objects without
//! it are still valid registry entries.
//!
//! The registry also owns the [`Reactor`] monotonic clock, the single time
//! source for status snapshots.

use crate::error::{HostError, HostResult};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// One subsystem status snapshot: field name to value.
pub type StatusMap = serde_json::Map<String, serde_json::Value>;

/// Capability: produces a status snapshot at a given time.
pub trait StatusSource: Send + Sync {
    /// Report the subsystem's queryable fields as of `eventtime`.
    fn status(&self, eventtime: f64) -> StatusMap;
}

/// An object that can be registered under a name.
pub trait HostObject: Send + Sync + 'static {
    /// The status capability, if this object has one.
    fn status_source(&self) -> Option<&dyn StatusSource> {
        None
    }

    /// Upcast for typed recovery of registry entries.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Monotonic clock for the command-processing loop.
#[derive(Debug)]
pub struct Reactor {
    origin: Instant,
}

impl Reactor {
    fn new() -> Self {
        Reactor {
            origin: Instant::now(),
        }
    }

    /// Seconds since host startup. Never goes backwards.
    pub fn monotonic(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Central name-to-object map with a shared clock.
///
/// Registration is write-once per name at load time; lookups are the hot
/// path and take the read lock only.
pub struct ObjectRegistry {
    objects: RwLock<HashMap<String, Arc<dyn HostObject>>>,
    reactor: Reactor,
}

impl ObjectRegistry {
    /// Create an empty registry with a fresh clock.
    pub fn new() -> Self {
        ObjectRegistry {
            objects: RwLock::new(HashMap::new()),
            reactor: Reactor::new(),
        }
    }

    /// Register `object` under `name`. Names are write-once.
    pub fn add_object(&self, name: &str, object: Arc<dyn HostObject>) -> HostResult<()> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        if objects.contains_key(name) {
            return Err(HostError::Config(format!(
                "Host object '{name}' already created"
            )));
        }
        objects.insert(name.to_string(), object);
        Ok(())
    }

    /// Resolve an object by name.
    pub fn lookup_object(&self, name: &str) -> Option<Arc<dyn HostObject>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// The host's monotonic clock.
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
