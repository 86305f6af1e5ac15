//! Codec traits

use crate::error::Result;
use crate::record::{RawLogGroup, RawLogGroupList};
use crate::shard::ShardMeta;

/// Turns the groups of one pull into an output element
pub trait LogDeserializer: Send + Sync + 'static {
    /// Element type handed to the host
    type Output: Send + 'static;

    /// Deserialize one pull; `None` emits nothing for this pull
    fn deserialize(&self, shard: &ShardMeta, groups: RawLogGroupList) -> Result<Option<Self::Output>>;

    /// Name of the output type, for host-side wiring
    fn produced_type(&self) -> &'static str {
        std::any::type_name::<Self::Output>()
    }
}

/// Turns one input element into a log group
pub trait LogSerializer<T>: Send + Sync {
    /// Serialize a value; `None` sends nothing
    fn serialize(&self, value: &T) -> Result<Option<RawLogGroup>>;
}

impl<T, F> LogSerializer<T> for F
where
    F: Fn(&T) -> Result<Option<RawLogGroup>> + Send + Sync,
{
    fn serialize(&self, value: &T) -> Result<Option<RawLogGroup>> {
        self(value)
    }
}
