use kafka_consumer::{DecodeError, Event, RawMessage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub id: u64,
    pub url: String,
    pub product_id: u64,
    /// Unix seconds.
    pub time_write: i64,
}

/// A payload together with where it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadEvent {
    pub payload: Payload,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Event for PayloadEvent {
    fn time(&self) -> i64 {
        self.payload.time_write
    }
}

pub fn decode(message: &RawMessage) -> Result<PayloadEvent, DecodeError> {
    let raw = message.value.as_deref().ok_or("empty payload")?;
    Ok(PayloadEvent {
        payload: serde_json::from_slice(raw)?,
        topic: message.topic.clone(),
        partition: message.partition,
        offset: message.offset,
    })
}
