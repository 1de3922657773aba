use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Provider;

/// Message id stored on the wire when an entity has no message.
pub const NO_MESSAGE: u32 = 0xffff_ffff;

/// A localized message: the numeric id written to the blob plus its resolved text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Message {
    pub id: u32,
    pub text: String,
}

impl Message {
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Message {
            id,
            text: text.into(),
        }
    }

    pub(crate) fn wire_id(message: Option<&Message>) -> u32 {
        message.map_or(NO_MESSAGE, |m| m.id)
    }
}

/// The per-compile `id -> text` lookup that message ids are resolved against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTable {
    entries: BTreeMap<u32, String>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32, text: impl Into<String>) -> Option<String> {
        self.entries.insert(id, text.into())
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a wire message id. `NO_MESSAGE` means "absent"; unknown ids keep an empty text.
    pub fn resolve(&self, id: u32) -> Option<Message> {
        if id == NO_MESSAGE {
            return None;
        }
        let text = match self.get(id) {
            Some(text) => text.to_string(),
            None => {
                log::debug!("message id {id:#x} has no text in the message table");
                String::new()
            }
        };
        Some(Message { id, text })
    }

    /// Collect every message referenced anywhere in `providers`.
    pub fn from_providers(providers: &[Provider]) -> Self {
        let mut table = MessageTable::new();
        for provider in providers {
            for message in provider.messages() {
                table.insert(message.id, message.text.clone());
            }
        }
        table
    }
}

impl FromIterator<(u32, String)> for MessageTable {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        MessageTable {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_treats_sentinel_as_absent() {
        let table: MessageTable = [(7, "Started".to_string())].into_iter().collect();
        assert_eq!(table.resolve(NO_MESSAGE), None);
        assert_eq!(table.resolve(7), Some(Message::new(7, "Started")));
        assert_eq!(table.resolve(8), Some(Message::new(8, "")));
    }
}
