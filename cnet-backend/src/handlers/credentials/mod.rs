pub mod create;
pub mod delete;
pub mod list;

use cnet_db::ServiceCredential;
use serde_json::{json, Value};

/// Public view of a credential. Never includes the key, encrypted or not.
pub(crate) fn credential_payload(credential: &ServiceCredential) -> Value {
    json!({
        "id": credential.id,
        "service": credential.service,
        "hostname": credential.hostname,
        "port": credential.port,
        "createdAt": credential.created_at.to_rfc3339(),
    })
}
