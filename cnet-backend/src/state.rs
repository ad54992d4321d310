use std::sync::{Arc, RwLock};

use cnet_auth::{AuthenticatorTrait, SecretCipher};
use cnet_db::Store;
use cnet_job_queue::JobQueueClient;
use cnet_jobs::ServiceProbe;

/// Shared application state passed to every route handler.
pub struct AppState {
    pub store: Arc<dyn Store>,
    // swappable so a reloaded secret takes effect without a restart
    authenticator: Arc<RwLock<Arc<dyn AuthenticatorTrait>>>,
    pub job_queue: JobQueueClient,
    pub cipher: Arc<dyn SecretCipher>,
    pub probe: Arc<dyn ServiceProbe>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            authenticator: Arc::clone(&self.authenticator),
            job_queue: self.job_queue.clone(),
            cipher: Arc::clone(&self.cipher),
            probe: Arc::clone(&self.probe),
        }
    }
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        authenticator: Arc<dyn AuthenticatorTrait>,
        job_queue: JobQueueClient,
        cipher: Arc<dyn SecretCipher>,
        probe: Arc<dyn ServiceProbe>,
    ) -> Self {
        Self {
            store,
            authenticator: Arc::new(RwLock::new(authenticator)),
            job_queue,
            cipher,
            probe,
        }
    }

    /// Current authenticator. A poisoned lock still yields the last value.
    pub fn authenticator(&self) -> Arc<dyn AuthenticatorTrait> {
        match self.authenticator.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap the authenticator, returning the previous one.
    pub fn swap_authenticator(
        &self,
        new: Arc<dyn AuthenticatorTrait>,
    ) -> Arc<dyn AuthenticatorTrait> {
        let mut guard = match self.authenticator.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, new)
    }
}
