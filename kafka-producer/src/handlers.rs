use std::sync::Arc;

use tracing::{error, info};

use crate::record::{DeliveryError, OutboundRecord};

pub type SuccessCallback = Arc<dyn Fn(&OutboundRecord) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&DeliveryError) + Send + Sync>;

/// Used when successes are reported but no success callback was given.
pub fn log_success() -> SuccessCallback {
    Arc::new(|record: &OutboundRecord| {
        info!(
            topic = %record.topic,
            bytes = record.value.len(),
            "message delivered"
        );
    })
}

/// Used when errors are reported but no error callback was given.
pub fn log_error() -> ErrorCallback {
    Arc::new(|e: &DeliveryError| {
        error!(topic = %e.record.topic, error = %e.error, "failed to deliver message");
    })
}
