//! Payload decoding policy for inbound stream events.

use crate::error::ParseError;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Turns one text payload into a cache item.
///
/// The decoder is a per-deployment choice handed to the
/// [`StreamAdapter`](crate::adapter::StreamAdapter). A failure drops that one
/// event; the stream keeps going.
pub trait Decode: Send + 'static {
    type Item: Clone + Send + Sync + 'static;

    fn decode(&self, payload: &str) -> Result<Self::Item, ParseError>;
}

/// Keeps every payload as an opaque string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl Decode for TextDecoder {
    type Item = String;

    fn decode(&self, payload: &str) -> Result<String, ParseError> {
        Ok(payload.to_string())
    }
}

/// Decodes each payload as a JSON document of type `T`.
pub struct JsonDecoder<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonDecoder")
            .field("item", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Decode for JsonDecoder<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Item = T;

    fn decode(&self, payload: &str) -> Result<T, ParseError> {
        Ok(serde_json::from_str(payload)?)
    }
}
