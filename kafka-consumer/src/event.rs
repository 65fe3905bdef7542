use crate::broker::RawMessage;

pub type DecodeError = Box<dyn std::error::Error + Send + Sync>;

/// A decoded message, carrying the logical time used for read-since filtering.
pub trait Event: Send + 'static {
    /// Unix timestamp in seconds.
    fn time(&self) -> i64;
}

/// Turns a raw broker message into an application event.
///
/// Any `Fn(&RawMessage) -> Result<E, DecodeError>` closure is a builder.
pub trait MessageBuilder<E>: Send + Sync {
    fn build(&self, message: &RawMessage) -> Result<E, DecodeError>;
}

impl<E, F> MessageBuilder<E> for F
where
    F: Fn(&RawMessage) -> Result<E, DecodeError> + Send + Sync,
{
    fn build(&self, message: &RawMessage) -> Result<E, DecodeError> {
        self(message)
    }
}
