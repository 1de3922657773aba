//! The offset index shared by the writer and the reader.
//!
//! Every referenceable record is registered exactly once under the absolute offset of its first
//! byte. The writer asks "where was this object written?", the reader asks "what lives at this
//! offset?". Offset 0 is the "absent" sentinel and can never be registered.

use std::fmt;

use hashbrown::HashMap;
use thiserror::Error;

use crate::model::{
    ChannelId, FilterId, KeywordId, LevelId, MapId, NamedQueryId, OpcodeId, TaskId, TemplateId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Channel,
    Level,
    Task,
    Opcode,
    Keyword,
    Map,
    Template,
    Filter,
    NamedQuery,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Channel => "channel",
            ObjectKind::Level => "level",
            ObjectKind::Task => "task",
            ObjectKind::Opcode => "opcode",
            ObjectKind::Keyword => "keyword",
            ObjectKind::Map => "map",
            ObjectKind::Template => "template",
            ObjectKind::Filter => "filter",
            ObjectKind::NamedQuery => "named query",
        };
        f.write_str(name)
    }
}

/// A provider-local reference to one referenceable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Channel(ChannelId),
    Level(LevelId),
    Task(TaskId),
    Opcode(OpcodeId),
    Keyword(KeywordId),
    Map(MapId),
    Template(TemplateId),
    Filter(FilterId),
    NamedQuery(NamedQueryId),
}

impl ObjectRef {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectRef::Channel(_) => ObjectKind::Channel,
            ObjectRef::Level(_) => ObjectKind::Level,
            ObjectRef::Task(_) => ObjectKind::Task,
            ObjectRef::Opcode(_) => ObjectKind::Opcode,
            ObjectRef::Keyword(_) => ObjectKind::Keyword,
            ObjectRef::Map(_) => ObjectKind::Map,
            ObjectRef::Template(_) => ObjectKind::Template,
            ObjectRef::Filter(_) => ObjectKind::Filter,
            ObjectRef::NamedQuery(_) => ObjectKind::NamedQuery,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = match self {
            ObjectRef::Channel(id) => id.index(),
            ObjectRef::Level(id) => id.index(),
            ObjectRef::Task(id) => id.index(),
            ObjectRef::Opcode(id) => id.index(),
            ObjectRef::Keyword(id) => id.index(),
            ObjectRef::Map(id) => id.index(),
            ObjectRef::Template(id) => id.index(),
            ObjectRef::Filter(id) => id.index(),
            ObjectRef::NamedQuery(id) => id.index(),
        };
        write!(f, "{} #{}", self.kind(), index)
    }
}

/// Typed ids that can be stored in and recovered from an [`ObjectRef`].
pub trait Referent: Copy {
    const KIND: ObjectKind;

    fn to_ref(self) -> ObjectRef;
    fn from_ref(object: ObjectRef) -> Option<Self>;
}

macro_rules! referent {
    ($id:ident, $variant:ident) => {
        impl Referent for $id {
            const KIND: ObjectKind = ObjectKind::$variant;

            fn to_ref(self) -> ObjectRef {
                ObjectRef::$variant(self)
            }

            fn from_ref(object: ObjectRef) -> Option<Self> {
                match object {
                    ObjectRef::$variant(id) => Some(id),
                    _ => None,
                }
            }
        }
    };
}

referent!(ChannelId, Channel);
referent!(LevelId, Level);
referent!(TaskId, Task);
referent!(OpcodeId, Opcode);
referent!(KeywordId, Keyword);
referent!(MapId, Map);
referent!(TemplateId, Template);
referent!(FilterId, Filter);
referent!(NamedQueryId, NamedQuery);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetIndexError {
    #[error("{object} cannot be registered at offset 0")]
    ZeroOffset { object: ObjectRef },

    #[error("offset {offset} already holds {existing}, cannot register {object}")]
    OffsetTaken {
        offset: u32,
        existing: ObjectRef,
        object: ObjectRef,
    },

    #[error("{object} is already registered at offset {offset}")]
    AlreadyRegistered { object: ObjectRef, offset: u32 },
}

#[derive(Debug, Default, Clone)]
pub struct OffsetIndex {
    by_offset: HashMap<u32, ObjectRef>,
    by_object: HashMap<ObjectRef, u32>,
}

impl OffsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, offset: u32, object: ObjectRef) -> Result<(), OffsetIndexError> {
        if offset == 0 {
            return Err(OffsetIndexError::ZeroOffset { object });
        }
        if let Some(&existing) = self.by_offset.get(&offset) {
            return Err(OffsetIndexError::OffsetTaken {
                offset,
                existing,
                object,
            });
        }
        if let Some(&offset) = self.by_object.get(&object) {
            return Err(OffsetIndexError::AlreadyRegistered { object, offset });
        }

        self.by_offset.insert(offset, object);
        self.by_object.insert(object, offset);
        Ok(())
    }

    pub fn offset_of(&self, object: ObjectRef) -> Option<u32> {
        self.by_object.get(&object).copied()
    }

    pub fn object_at(&self, offset: u32) -> Option<ObjectRef> {
        self.by_offset.get(&offset).copied()
    }

    pub fn len(&self) -> usize {
        self.by_offset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_offset.is_empty()
    }

    /// All registrations, in ascending offset order.
    pub fn entries(&self) -> Vec<(u32, ObjectRef)> {
        let mut entries: Vec<(u32, ObjectRef)> =
            self.by_offset.iter().map(|(&o, &r)| (o, r)).collect();
        entries.sort_by_key(|&(offset, _)| offset);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup_both_ways() {
        let mut index = OffsetIndex::new();
        index.register(64, ObjectRef::Level(LevelId(0))).unwrap();
        index.register(76, ObjectRef::Level(LevelId(1))).unwrap();

        assert_eq!(index.object_at(76), Some(ObjectRef::Level(LevelId(1))));
        assert_eq!(index.offset_of(ObjectRef::Level(LevelId(0))), Some(64));
        assert_eq!(index.object_at(70), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_zero_offset_is_never_registered() {
        let mut index = OffsetIndex::new();
        assert!(matches!(
            index.register(0, ObjectRef::Task(TaskId(0))),
            Err(OffsetIndexError::ZeroOffset { .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let mut index = OffsetIndex::new();
        index.register(16, ObjectRef::Map(MapId(0))).unwrap();
        assert!(matches!(
            index.register(16, ObjectRef::Map(MapId(1))),
            Err(OffsetIndexError::OffsetTaken { offset: 16, .. })
        ));
        assert!(matches!(
            index.register(32, ObjectRef::Map(MapId(0))),
            Err(OffsetIndexError::AlreadyRegistered { offset: 16, .. })
        ));
    }

    #[test]
    fn test_referent_conversion_checks_kind() {
        let object = LevelId(2).to_ref();
        assert_eq!(LevelId::from_ref(object), Some(LevelId(2)));
        assert_eq!(TaskId::from_ref(object), None);
        assert_eq!(<TaskId as Referent>::KIND, ObjectKind::Task);
    }
}
