use serde::Serialize;

use super::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MapKind {
    /// `VMAP`: each item names one exact value.
    Value,
    /// `BMAP`: each item names one bit (or bit group) of a flags value.
    Bit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapItem {
    pub value: u32,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Map {
    pub kind: MapKind,
    pub name: String,
    pub items: Vec<MapItem>,
}

impl Map {
    pub fn new(kind: MapKind, name: impl Into<String>) -> Self {
        Map {
            kind,
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, value: u32, message: Option<Message>) -> Self {
        self.items.push(MapItem { value, message });
        self
    }
}
