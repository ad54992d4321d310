//! Collaborators shared by every handler.

use std::sync::Arc;

use cnet_auth::{decrypt_blocking, PrincipalSource, SecretCipher};
use cnet_db::{NewAuditLogEntry, ServiceCredential, Store};
use cnet_job_queue::JobQueueClient;
use tracing::warn;

use crate::backup::BackupRunner;
use crate::error::JobError;
use crate::infra::InfrastructureClient;
use crate::integrations::ServiceActions;
use crate::notifier::Notifier;
use crate::probe::{ProbeTarget, ServiceProbe};

/// Everything a handler may call out to. Built once per process and shared
/// by all workers.
pub struct JobContext {
    pub store: Arc<dyn Store>,
    pub queue: JobQueueClient,
    pub cipher: Arc<dyn SecretCipher>,
    pub probe: Arc<dyn ServiceProbe>,
    pub infra: Arc<dyn InfrastructureClient>,
    pub notifier: Arc<dyn Notifier>,
    pub backups: Arc<dyn BackupRunner>,
    pub actions: Arc<dyn ServiceActions>,
    pub principal: Arc<dyn PrincipalSource>,
    /// Recipient for notifications that name none.
    pub operator_email: String,
}

impl JobContext {
    /// Write an audit entry. Failures are logged and never returned.
    pub async fn audit(&self, entry: NewAuditLogEntry) {
        if let Err(e) = self.store.insert_audit_log(&entry).await {
            warn!(
                action = %entry.action,
                resource_type = %entry.resource_type,
                error = %e,
                "failed to write audit log"
            );
        }
    }

    /// Probe target for a stored credential, with the API key decrypted.
    pub async fn probe_target(&self, credential: &ServiceCredential) -> Result<ProbeTarget, JobError> {
        let api_key = match credential.api_key_encrypted.clone() {
            Some(sealed) => Some(decrypt_blocking(self.cipher.clone(), sealed).await?),
            None => None,
        };
        Ok(ProbeTarget {
            service: credential.service,
            hostname: credential.hostname.clone(),
            port: credential.port,
            api_key,
        })
    }
}
