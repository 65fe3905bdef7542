use bytes::{BufMut, BytesMut};
use serde::Serialize;

pub type EncodeError = Box<dyn std::error::Error + Send + Sync>;

/// Writes a value into a buffer borrowed from the pool.
///
/// Closures with the same signature are encoders too.
pub trait Encoder<T: ?Sized>: Send + Sync {
    fn encode(&self, value: &T, buffer: &mut BytesMut) -> Result<(), EncodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl<T: Serialize + ?Sized> Encoder<T> for JsonEncoder {
    fn encode(&self, value: &T, buffer: &mut BytesMut) -> Result<(), EncodeError> {
        serde_json::to_writer(buffer.writer(), value)?;
        Ok(())
    }
}

impl<T: ?Sized, F> Encoder<T> for F
where
    F: Fn(&T, &mut BytesMut) -> Result<(), EncodeError> + Send + Sync,
{
    fn encode(&self, value: &T, buffer: &mut BytesMut) -> Result<(), EncodeError> {
        self(value, buffer)
    }
}
