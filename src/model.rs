//! The event-provider object graph.
//!
//! Entities live in per-provider vectors and refer to each other through typed indices
//! ([`LevelId`], [`TemplateId`], ...), never through embedded copies. The writer turns those
//! indices into byte offsets; the reader turns offsets back into indices.

mod event;
mod map;
mod message;
mod provider;
mod template;
mod validate;

use serde::Serialize;

pub use self::event::Event;
pub use self::map::{Map, MapItem, MapKind};
pub use self::message::{Message, MessageTable};
pub use self::provider::{Channel, Filter, Keyword, Level, NamedQuery, NamedQueryItem, Opcode, Provider, Task};
pub use self::template::{DataProperty, Extent, Property, StructProperty, Template, in_type, out_type};
pub use self::validate::{ModelError, validate_providers};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                $name(u32::try_from(index).unwrap_or(u32::MAX))
            }
        }
    };
}

entity_id!(
    /// Index into [`Provider::channels`].
    ChannelId
);
entity_id!(
    /// Index into [`Provider::levels`].
    LevelId
);
entity_id!(
    /// Index into [`Provider::tasks`].
    TaskId
);
entity_id!(
    /// Index into [`Provider::opcodes`].
    OpcodeId
);
entity_id!(
    /// Index into [`Provider::keywords`].
    KeywordId
);
entity_id!(
    /// Index into [`Provider::maps`].
    MapId
);
entity_id!(
    /// Index into [`Provider::templates`].
    TemplateId
);
entity_id!(
    /// Index into [`Provider::filters`].
    FilterId
);
entity_id!(
    /// Index into [`Provider::named_queries`].
    NamedQueryId
);
