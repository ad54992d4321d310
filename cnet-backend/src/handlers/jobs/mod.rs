pub mod metrics;
pub mod status;
pub mod trigger;

use cnet_job_queue::JobCounts;
use serde_json::{json, Value};

pub(crate) fn stats_payload(counts: &JobCounts) -> Value {
    json!({
        "waiting": counts.waiting,
        "active": counts.active,
        "completed": counts.completed,
        "failed": counts.failed,
        "delayed": counts.delayed,
        "total": counts.total(),
    })
}
