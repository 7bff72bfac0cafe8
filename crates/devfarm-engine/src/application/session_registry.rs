//! Identity-keyed registry of live device streams.
//!
//! Two locks are involved and neither is ever held across the other:
//!
//! - the map lock (`std::sync::Mutex`) guards the identity → stream table
//!   and is held only for a lookup, insert, or remove;
//! - a per-identity gate ([`KeyedGates`]) serialises *starting* and
//!   *stopping* one device, so two concurrent start calls for the same
//!   identity yield one stream.  Other identities are never blocked.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use devfarm_core::DeviceIdentity;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::device_stream::DeviceStream;
use crate::error::EngineError;

/// One async gate per identity.
#[derive(Default)]
pub struct KeyedGates {
    gates: Mutex<HashMap<DeviceIdentity, Arc<AsyncMutex<()>>>>,
}

impl KeyedGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `identity`.
    pub async fn lock(&self, identity: &DeviceIdentity) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(gates.entry(identity.clone()).or_default())
        };
        gate.lock_owned().await
    }
}

/// A stream handed out by [`SessionRegistry::get_or_try_start`].
#[derive(Clone)]
pub struct SessionHandle {
    pub identity: DeviceIdentity,
    pub stream: Arc<dyn DeviceStream>,
    /// `true` when an already-running stream was returned.
    pub reused: bool,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .field("reused", &self.reused)
            .field("alive", &self.stream.is_alive())
            .finish()
    }
}

/// At most one live stream per device.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<DeviceIdentity, Arc<dyn DeviceStream>>>,
    gates: KeyedGates,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live stream for `identity`, starting one with `start` if
    /// there is none.
    ///
    /// An existing stream that is still alive is reused as is.  One that has
    /// ended is shut down and replaced.
    ///
    /// # Errors
    ///
    /// Whatever `start` returns; nothing is registered in that case.
    pub async fn get_or_try_start<F, Fut>(
        &self,
        identity: &DeviceIdentity,
        start: F,
    ) -> Result<SessionHandle, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn DeviceStream>, EngineError>>,
    {
        let _gate = self.gates.lock(identity).await;

        if let Some(existing) = self.get(identity) {
            if existing.is_alive() {
                debug!(device = %identity, "reusing live session");
                return Ok(SessionHandle {
                    identity: identity.clone(),
                    stream: existing,
                    reused: true,
                });
            }
            info!(device = %identity, "previous session ended, replacing it");
            self.take(identity);
            existing.shutdown().await;
        }

        let stream = start().await?;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.clone(), Arc::clone(&stream));
        info!(device = %identity, "session registered");
        Ok(SessionHandle {
            identity: identity.clone(),
            stream,
            reused: false,
        })
    }

    pub fn get(&self, identity: &DeviceIdentity) -> Option<Arc<dyn DeviceStream>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    fn take(&self, identity: &DeviceIdentity) -> Option<Arc<dyn DeviceStream>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    /// Shuts down and forgets the stream for `identity`.
    ///
    /// Returns `false` when there was nothing to stop.
    pub async fn stop(&self, identity: &DeviceIdentity) -> bool {
        let _gate = self.gates.lock(identity).await;
        match self.take(identity) {
            Some(stream) => {
                stream.shutdown().await;
                info!(device = %identity, "session stopped");
                true
            }
            None => false,
        }
    }

    /// Identities with a registered stream.
    pub fn active(&self) -> Vec<DeviceIdentity> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn stop_all(&self) {
        for identity in self.active() {
            self.stop(&identity).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::mock::FakeStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn start_counter(
        starts: &Arc<AtomicUsize>,
        identity: &DeviceIdentity,
    ) -> impl Future<Output = Result<Arc<dyn DeviceStream>, EngineError>> {
        let starts = Arc::clone(starts);
        let identity = identity.clone();
        async move {
            starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Arc::new(FakeStream::new(identity)) as Arc<dyn DeviceStream>)
        }
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_session() {
        // Arrange
        let registry = Arc::new(SessionRegistry::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let id = DeviceIdentity::android("Pixel_7");

        // Act
        let (a, b) = tokio::join!(
            registry.get_or_try_start(&id, || start_counter(&starts, &id)),
            registry.get_or_try_start(&id, || start_counter(&starts, &id)),
        );

        // Assert
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.stream, &b.stream));
        assert_ne!(a.reused, b.reused);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_different_identities_start_independently() {
        let registry = SessionRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let a = DeviceIdentity::android("A");
        let b = DeviceIdentity::ios("A");

        registry.get_or_try_start(&a, || start_counter(&starts, &a)).await.unwrap();
        registry.get_or_try_start(&b, || start_counter(&starts, &b)).await.unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_start_registers_nothing() {
        let registry = SessionRegistry::new();
        let id = DeviceIdentity::android("Broken");

        let result = registry
            .get_or_try_start(&id, || async { Err(EngineError::HandshakeFailed("no byte".into())) })
            .await;

        assert!(matches!(result, Err(EngineError::HandshakeFailed(_))));
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_ended_session_is_replaced() {
        // Arrange: a registered stream that has since died
        let registry = SessionRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let id = DeviceIdentity::android("Pixel");
        let first = registry.get_or_try_start(&id, || start_counter(&starts, &id)).await.unwrap();
        first.stream.shutdown().await;

        // Act
        let second = registry.get_or_try_start(&id, || start_counter(&starts, &id)).await.unwrap();

        // Assert
        assert!(!second.reused);
        assert!(second.stream.is_alive());
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_live_session_reused_even_if_screen_changed() {
        // A reused session keeps its cached metrics; callers must stop and
        // restart to pick up a rotation or resize.
        let registry = SessionRegistry::new();
        let id = DeviceIdentity::android("Pixel");
        let fake = Arc::new(FakeStream::new(id.clone()));
        let stream: Arc<dyn DeviceStream> = fake.clone();
        registry
            .get_or_try_start(&id, || async move { Ok(stream) })
            .await
            .unwrap();

        fake.set_pixels(1600, 720);
        let again = registry
            .get_or_try_start(&id, || async { Err(EngineError::StreamTerminated) })
            .await
            .unwrap();

        assert!(again.reused);
        assert_eq!(again.stream.metrics().pixel_size(), (1600, 720));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let registry = SessionRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let id = DeviceIdentity::ios("UDID");
        let handle = registry.get_or_try_start(&id, || start_counter(&starts, &id)).await.unwrap();

        assert!(registry.stop(&id).await);
        assert!(!registry.stop(&id).await);
        assert!(!handle.stream.is_alive());
        assert!(registry.is_empty());
    }
}
