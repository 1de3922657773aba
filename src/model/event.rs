use serde::Serialize;

use super::{ChannelId, KeywordId, LevelId, Message, OpcodeId, Provider, TaskId, TemplateId};

/// An event definition. `(id, version)` is unique within its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub id: u16,
    pub version: u8,
    pub channel: Option<ChannelId>,
    pub level: Option<LevelId>,
    pub task: Option<TaskId>,
    pub opcode: Option<OpcodeId>,
    pub keywords: Vec<KeywordId>,
    pub template: Option<TemplateId>,
    pub message: Option<Message>,
}

impl Event {
    pub fn new(id: u16, version: u8) -> Self {
        Event {
            id,
            version,
            channel: None,
            level: None,
            task: None,
            opcode: None,
            keywords: Vec::new(),
            template: None,
            message: None,
        }
    }

    /// The 64-bit keyword mask of the event descriptor: the union of all keyword masks.
    pub fn keyword_mask(&self, provider: &Provider) -> u64 {
        self.keywords
            .iter()
            .filter_map(|&k| provider.keyword(k))
            .fold(0, |mask, k| mask | k.mask)
    }
}
