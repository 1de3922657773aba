use serde::Serialize;

use super::{
    ChannelId, Event, FilterId, KeywordId, LevelId, Map, MapId, Message, NamedQueryId, OpcodeId,
    TaskId, Template, TemplateId,
};
use crate::guid::Guid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub name: String,
    pub value: u8,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Level {
    pub name: String,
    pub value: u8,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub name: String,
    pub value: u16,
    pub guid: Option<Guid>,
    pub message: Option<Message>,
}

/// An opcode, either provider-global (`task == None`) or scoped to one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Opcode {
    pub name: String,
    pub value: u8,
    pub task: Option<TaskId>,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keyword {
    pub name: String,
    pub mask: u64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub name: String,
    pub value: u32,
    pub version: u8,
    pub message: Option<Message>,
    pub template: Option<TemplateId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedQueryItem {
    pub name: String,
    pub value: String,
}

/// A named query ("pattern map"): a format string plus `(name, value)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedQuery {
    pub name: String,
    pub format: String,
    pub items: Vec<NamedQueryItem>,
}

/// One event provider and everything it defines.
///
/// `name` and `symbol` are compile-time only: the blob keeps the provider GUID and message, and
/// the reader fills `name` from the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provider {
    pub guid: Guid,
    pub name: String,
    pub symbol: String,
    pub message: Option<Message>,
    pub channels: Vec<Channel>,
    pub levels: Vec<Level>,
    pub tasks: Vec<Task>,
    pub opcodes: Vec<Opcode>,
    pub keywords: Vec<Keyword>,
    pub maps: Vec<Map>,
    pub templates: Vec<Template>,
    pub events: Vec<Event>,
    pub filters: Vec<Filter>,
    pub named_queries: Vec<NamedQuery>,
}

impl Provider {
    pub fn new(guid: Guid, name: impl Into<String>) -> Self {
        Provider {
            guid,
            name: name.into(),
            symbol: String::new(),
            message: None,
            channels: Vec::new(),
            levels: Vec::new(),
            tasks: Vec::new(),
            opcodes: Vec::new(),
            keywords: Vec::new(),
            maps: Vec::new(),
            templates: Vec::new(),
            events: Vec::new(),
            filters: Vec::new(),
            named_queries: Vec::new(),
        }
    }

    pub fn add_channel(&mut self, channel: Channel) -> ChannelId {
        self.channels.push(channel);
        ChannelId::from_index(self.channels.len() - 1)
    }

    pub fn add_level(&mut self, level: Level) -> LevelId {
        self.levels.push(level);
        LevelId::from_index(self.levels.len() - 1)
    }

    pub fn add_task(&mut self, task: Task) -> TaskId {
        self.tasks.push(task);
        TaskId::from_index(self.tasks.len() - 1)
    }

    pub fn add_opcode(&mut self, opcode: Opcode) -> OpcodeId {
        self.opcodes.push(opcode);
        OpcodeId::from_index(self.opcodes.len() - 1)
    }

    pub fn add_keyword(&mut self, keyword: Keyword) -> KeywordId {
        self.keywords.push(keyword);
        KeywordId::from_index(self.keywords.len() - 1)
    }

    pub fn add_map(&mut self, map: Map) -> MapId {
        self.maps.push(map);
        MapId::from_index(self.maps.len() - 1)
    }

    /// Templates are not interned here; structurally equal templates are merged when encoding.
    pub fn add_template(&mut self, template: Template) -> TemplateId {
        self.templates.push(template);
        TemplateId::from_index(self.templates.len() - 1)
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn add_filter(&mut self, filter: Filter) -> FilterId {
        self.filters.push(filter);
        FilterId::from_index(self.filters.len() - 1)
    }

    pub fn add_named_query(&mut self, query: NamedQuery) -> NamedQueryId {
        self.named_queries.push(query);
        NamedQueryId::from_index(self.named_queries.len() - 1)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.index())
    }

    pub fn level(&self, id: LevelId) -> Option<&Level> {
        self.levels.get(id.index())
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.index())
    }

    pub fn opcode(&self, id: OpcodeId) -> Option<&Opcode> {
        self.opcodes.get(id.index())
    }

    pub fn keyword(&self, id: KeywordId) -> Option<&Keyword> {
        self.keywords.get(id.index())
    }

    pub fn map(&self, id: MapId) -> Option<&Map> {
        self.maps.get(id.index())
    }

    pub fn template(&self, id: TemplateId) -> Option<&Template> {
        self.templates.get(id.index())
    }

    /// Look up an event by its `(id, version)` identity.
    pub fn event(&self, id: u16, version: u8) -> Option<&Event> {
        self.events
            .iter()
            .find(|e| e.id == id && e.version == version)
    }

    /// Every message attached to this provider or one of its entities.
    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        let definitions = self
            .channels
            .iter()
            .filter_map(|c| c.message.as_ref())
            .chain(self.levels.iter().filter_map(|l| l.message.as_ref()))
            .chain(self.tasks.iter().filter_map(|t| t.message.as_ref()))
            .chain(self.opcodes.iter().filter_map(|o| o.message.as_ref()))
            .chain(self.keywords.iter().filter_map(|k| k.message.as_ref()));

        let map_items = self
            .maps
            .iter()
            .flat_map(|m| m.items.iter().filter_map(|i| i.message.as_ref()));

        self.message
            .iter()
            .chain(definitions)
            .chain(map_items)
            .chain(self.events.iter().filter_map(|e| e.message.as_ref()))
            .chain(self.filters.iter().filter_map(|f| f.message.as_ref()))
    }
}
