//! Record codecs
//!
//! Deserializers turn pulled log groups into the consumer's output type;
//! serializers turn producer input into log groups.
//!
//! # Built-in codecs
//!
//! - **RawLogGroupListDeserializer**: Passes pulled groups through unchanged
//! - **JsonLogDeserializer**: Flattens every log into a JSON object
//! - **JsonLogSerializer**: Writes a JSON object as a single log

mod codecs;
mod types;

pub use codecs::{JsonLogDeserializer, JsonLogSerializer, RawLogGroupListDeserializer};
pub use types::{LogDeserializer, LogSerializer};
