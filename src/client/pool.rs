use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use super::connect::{BoxTransport, Scheme};

/// Identifies which idle transports are interchangeable.
///
/// Transports negotiated under different TLS contexts never mix, so the
/// context identity is part of the key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    pub(crate) scheme: Scheme,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls_identity: Option<usize>,
}

/// A shared pool of idle transports, keyed by destination.
///
/// Transports are leased exclusively: checkout removes the transport, and
/// only a drained, keep-alive-eligible connection is ever checked back in.
/// The pool is created by the client that owns it; there is no process-wide
/// instance.
#[derive(Clone)]
pub(crate) struct Pool {
    inner: Arc<Mutex<HashMap<PoolKey, Vec<BoxTransport>>>>,
    max_idle_per_key: usize,
}

impl Pool {
    pub(crate) fn new(max_idle_per_key: usize) -> Pool {
        Pool {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_idle_per_key,
        }
    }

    /// Takes an idle transport for `key`, if one is available.
    pub(crate) fn checkout(&self, key: &PoolKey) -> Option<BoxTransport> {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let idle = inner.get_mut(key)?;
        let transport = idle.pop();
        if idle.is_empty() {
            inner.remove(key);
        }
        if transport.is_some() {
            trace!("reusing idle transport for {:?}", key);
        }
        transport
    }

    /// Returns a reusable transport to the pool.
    ///
    /// Dropped instead when the per-key cap is reached (or pooling is
    /// disabled with a cap of zero), which closes the transport.
    pub(crate) fn checkin(&self, key: PoolKey, transport: BoxTransport) {
        if self.max_idle_per_key == 0 {
            return;
        }
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let idle = inner.entry(key).or_default();
        if idle.len() < self.max_idle_per_key {
            idle.push(transport);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self, key: &PoolKey) -> usize {
        self.inner
            .lock()
            .expect("pool lock poisoned")
            .get(key)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_idle_per_key", &self.max_idle_per_key)
            .finish()
    }
}
