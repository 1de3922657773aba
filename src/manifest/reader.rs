//! `CRIM` blob to object graph.
//!
//! Each provider block is decoded into a fresh [`Provider`]. Records are registered in an
//! [`OffsetIndex`] as they are read and every reference field is resolved through it, so the
//! sub-lists are visited in dependency order (definitions, then templates, then events and
//! filters) rather than in table order.

use std::fmt;
use std::ops::Range;

use hashbrown::HashSet;
use log::{debug, trace, warn};

use super::error::{ManifestReadError, Result, SchemaError};
use super::format::*;
use super::offsets::{OffsetIndex, Referent};
use super::util::*;
use crate::binxml::{BinXmlCodec, InlineNameCodec, XmlElement};
use crate::guid::Guid;
use crate::model::{
    Channel, ChannelId, DataProperty, Event, Extent, Filter, FilterId, Keyword, KeywordId, Level,
    LevelId, Map, MapId, MapItem, MapKind, Message, MessageTable, NamedQuery, NamedQueryId,
    NamedQueryItem, Opcode, OpcodeId, Property, Provider, StructProperty, Task, TaskId, Template,
    TemplateId,
};
use crate::template_id::TemplateIdScheme;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSettings {
    messages: MessageTable,
    validate_lengths: bool,
    verify_template_ids: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        ReaderSettings {
            messages: MessageTable::default(),
            validate_lengths: true,
            verify_template_ids: true,
        }
    }
}

impl ReaderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table used to resolve message ids to text.
    pub fn messages(mut self, messages: MessageTable) -> Self {
        self.messages = messages;
        self
    }

    /// Require every block's recorded length to match the bytes it actually spans.
    pub fn validate_lengths(mut self, validate: bool) -> Self {
        self.validate_lengths = validate;
        self
    }

    /// Recompute template identities and report the ones matching no scheme.
    pub fn verify_template_ids(mut self, verify: bool) -> Self {
        self.verify_template_ids = verify;
        self
    }

    pub fn get_messages(&self) -> &MessageTable {
        &self.messages
    }

    pub fn should_validate_lengths(&self) -> bool {
        self.validate_lengths
    }

    pub fn should_verify_template_ids(&self) -> bool {
        self.verify_template_ids
    }
}

/// A recoverable problem found while reading, with the offset of the record it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub offset: u32,
    pub error: SchemaError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset {}: {}", self.offset, self.error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadManifest {
    pub major_version: u16,
    pub minor_version: u16,
    pub providers: Vec<Provider>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReadManifest {
    pub fn provider(&self, guid: &Guid) -> Option<&Provider> {
        self.providers.iter().find(|p| &p.guid == guid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManifestReader<C = InlineNameCodec> {
    settings: ReaderSettings,
    codec: C,
}

impl ManifestReader {
    pub fn new(settings: ReaderSettings) -> Self {
        Self::with_codec(settings, InlineNameCodec)
    }
}

impl<C: BinXmlCodec> ManifestReader<C> {
    pub fn with_codec(settings: ReaderSettings, codec: C) -> Self {
        ManifestReader { settings, codec }
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Decode a complete `CRIM` blob.
    pub fn read(&self, blob: &[u8]) -> Result<ReadManifest> {
        expect_sig(blob, 0, SIG_CRIM, "CRIM")?;
        let size = read_u32_named(blob, 4, "CRIM.size")?;
        let major_version = read_u16_named(blob, 8, "CRIM.major_version")?;
        let minor_version = read_u16_named(blob, 10, "CRIM.minor_version")?;
        let provider_count = read_u32_named(blob, 12, "CRIM.provider_count")?;

        let end = checked_end(blob.len(), 0, size, "CRIM")?;
        if self.settings.validate_lengths && end != blob.len() {
            return Err(ManifestReadError::LengthMismatch {
                what: "CRIM",
                offset: 0,
                recorded: size,
                consumed: blob.len() as u64,
            });
        }
        let buf = &blob[..end];

        let bad_count = || ManifestReadError::CountOutOfBounds {
            what: "CRIM.provider_count",
            offset: 12,
            count: provider_count,
        };
        let count = usize::try_from(provider_count).map_err(|_| bad_count())?;
        let descriptors_end = count
            .checked_mul(PROVIDER_DESCRIPTOR_SIZE)
            .and_then(|n| n.checked_add(CRIM_HEADER_SIZE))
            .ok_or_else(bad_count)?;
        if descriptors_end > buf.len() {
            return Err(ManifestReadError::Truncated {
                what: "CRIM provider descriptor array",
                offset: CRIM_HEADER_SIZE as u32,
                need: descriptors_end - CRIM_HEADER_SIZE,
                have: buf.len().saturating_sub(CRIM_HEADER_SIZE),
            });
        }

        debug!(
            "reading CRIM {}.{} with {} providers ({} bytes)",
            major_version, minor_version, count, size
        );

        let mut providers = Vec::with_capacity(count);
        let mut diagnostics = Vec::new();
        for i in 0..count {
            let desc_off = CRIM_HEADER_SIZE + i * PROVIDER_DESCRIPTOR_SIZE;
            let guid = read_guid_named(buf, desc_off, "CRIM.provider.guid")?;
            let offset = read_u32_named(buf, desc_off + 16, "CRIM.provider.offset")?;

            let (provider, mut found) =
                ProviderDecoder::new(buf, offset, guid, &self.settings, &self.codec).decode()?;
            providers.push(provider);
            diagnostics.append(&mut found);
        }

        Ok(ReadManifest {
            major_version,
            minor_version,
            providers,
            diagnostics,
        })
    }
}

/// Decode `blob`, resolving message ids against `messages`.
pub fn read_manifest(blob: &[u8], messages: &MessageTable) -> Result<ReadManifest> {
    ManifestReader::new(ReaderSettings::new().messages(messages.clone())).read(blob)
}

/// A `TEMP` property entry before sibling references are resolved.
struct RawProperty {
    offset: usize,
    flags: PropertyFlags,
    /// The 8-byte union, as data (`in`, `out`, map offset) or as struct (`start`, `count`).
    in_type: u8,
    out_type: u8,
    map_offset: u32,
    first_member: u16,
    member_count: u16,
    count: u16,
    length: u16,
    name: String,
}

impl RawProperty {
    fn is_struct(&self) -> bool {
        self.flags.contains(PropertyFlags::STRUCT)
    }
}

struct ProviderDecoder<'a, C> {
    buf: &'a [u8],
    offset: u32,
    settings: &'a ReaderSettings,
    codec: &'a C,
    index: OffsetIndex,
    provider: Provider,
    /// Task-scoped opcodes: `(opcode index, task value, entry offset)`.
    pending_opcode_tasks: Vec<(usize, u16, u32)>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, C: BinXmlCodec> ProviderDecoder<'a, C> {
    fn new(
        buf: &'a [u8],
        offset: u32,
        guid: Guid,
        settings: &'a ReaderSettings,
        codec: &'a C,
    ) -> Self {
        ProviderDecoder {
            buf,
            offset,
            settings,
            codec,
            index: OffsetIndex::new(),
            provider: Provider::new(guid, String::new()),
            pending_opcode_tasks: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn decode(mut self) -> Result<(Provider, Vec<Diagnostic>)> {
        let buf = self.buf;
        let off = u32_to_usize(self.offset, "WEVT", buf.len())?;
        expect_sig(buf, off, SIG_WEVT, "WEVT")?;
        let size = read_u32_named(buf, off + 4, "WEVT.size")?;
        let message_id = read_u32_named(buf, off + 8, "WEVT.message_identifier")?;
        let count = read_u32_named(buf, off + 12, "WEVT.count")?;
        let end = checked_end(buf.len(), self.offset, size, "WEVT")?;

        let bad_count = || ManifestReadError::CountOutOfBounds {
            what: "WEVT.count",
            offset: self.offset,
            count,
        };
        let table_start = off + WEVT_HEADER_SIZE;
        let table_end = usize::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(ELEMENT_DESCRIPTOR_SIZE))
            .and_then(|n| n.checked_add(table_start))
            .filter(|&n| n <= end)
            .ok_or_else(bad_count)?;

        self.provider.message = self.settings.messages.resolve(message_id);
        self.provider.name = self
            .provider
            .message
            .as_ref()
            .map(|m| m.text.clone())
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();
        for at in (table_start..table_end).step_by(ELEMENT_DESCRIPTOR_SIZE) {
            let tag = read_u32_named(buf, at, "WEVT element tag")?;
            let block = read_u32_named(buf, at + 4, "WEVT element offset")?;
            let kind = ElementKind::from_tag(tag).ok_or(ManifestReadError::UnknownElementKind {
                offset: usize_to_u32(at),
                tag,
            })?;
            if !seen.insert(kind) {
                return Err(ManifestReadError::DuplicateElement {
                    offset: self.offset,
                    signature: Signature(kind.signature()),
                });
            }
            descriptors.push((kind, block));
        }
        descriptors.sort_by_key(|&(kind, _)| kind.read_rank());

        let mut consumed = table_end;
        for (kind, block) in descriptors {
            trace!("provider {}: {:?} at offset {}", self.provider.guid, kind, block);
            let block_end = match kind {
                ElementKind::Channel => self.read_channels(block)?,
                ElementKind::Level => self.read_levels(block)?,
                ElementKind::Task => self.read_tasks(block)?,
                ElementKind::Opcode => self.read_opcodes(block)?,
                ElementKind::Keyword => self.read_keywords(block)?,
                ElementKind::Maps => self.read_maps(block)?,
                ElementKind::NamedQueries => self.read_named_queries(block)?,
                ElementKind::Template => self.read_templates(block)?,
                ElementKind::Event => self.read_events(block)?,
                ElementKind::Filter => self.read_filters(block)?,
            };
            consumed = consumed.max(block_end);
        }
        self.check_length("WEVT", self.offset, size, consumed)?;
        self.attach_opcode_tasks()?;

        debug!(
            "provider {} decoded: {} events, {} templates, {} diagnostics",
            self.provider.guid,
            self.provider.events.len(),
            self.provider.templates.len(),
            self.diagnostics.len()
        );
        Ok((self.provider, self.diagnostics))
    }

    fn check_length(
        &self,
        what: &'static str,
        offset: u32,
        recorded: u32,
        consumed_end: usize,
    ) -> Result<()> {
        if !self.settings.validate_lengths {
            return Ok(());
        }
        let consumed = consumed_end.saturating_sub(offset as usize);
        if consumed != recorded as usize {
            return Err(ManifestReadError::LengthMismatch {
                what,
                offset,
                recorded,
                consumed: consumed as u64,
            });
        }
        Ok(())
    }

    fn diagnose(&mut self, offset: usize, error: SchemaError) {
        let diagnostic = Diagnostic {
            offset: usize_to_u32(offset),
            error,
        };
        warn!("provider {}: {}", self.provider.guid, diagnostic);
        self.diagnostics.push(diagnostic);
    }

    fn register<T: Referent>(&mut self, offset: usize, id: T) -> Result<()> {
        self.index.register(usize_to_u32(offset), id.to_ref())?;
        Ok(())
    }

    /// Resolve a reference field read at `at`. Offset 0 is "absent".
    fn resolve_as<T: Referent>(&self, target: u32, what: &'static str, at: usize) -> Result<Option<T>> {
        if target == 0 {
            return Ok(None);
        }
        let offset = usize_to_u32(at);
        let object = self
            .index
            .object_at(target)
            .ok_or(ManifestReadError::UnresolvedReference {
                what,
                offset,
                target,
            })?;
        T::from_ref(object)
            .map(Some)
            .ok_or(ManifestReadError::UnexpectedReferenceKind {
                what,
                offset,
                target,
                expected: T::KIND,
                found: object.kind(),
            })
    }

    fn resolve_message(&self, at: usize, what: &'static str) -> Result<Option<Message>> {
        let id = read_u32_named(self.buf, at, what)?;
        Ok(self.settings.messages.resolve(id))
    }

    /// Read a name string, extending `consumed` to cover it.
    fn read_name(&self, at: usize, what: &'static str, consumed: &mut usize) -> Result<String> {
        let name_offset = read_u32_named(self.buf, at, what)?;
        let (name, end) = read_sized_utf16_string(self.buf, name_offset, what)?;
        *consumed = (*consumed).max(end);
        Ok(name)
    }

    /// Read a list header, check its entry array fits and return the entry offsets.
    fn list(
        &self,
        offset: u32,
        kind: ElementKind,
        entry_size: usize,
        what: &'static str,
    ) -> Result<(ListHeader, Vec<usize>)> {
        let header = ListHeader::read(self.buf, offset, kind.signature(), what)?;
        let entries_end = header.entries_end(entry_size, what)?;
        let entries = (header.body..entries_end).step_by(entry_size).collect();
        Ok((header, entries))
    }

    fn read_channels(&mut self, offset: u32) -> Result<usize> {
        let (header, entries) = self.list(offset, ElementKind::Channel, CHANNEL_ENTRY_SIZE, "CHAN")?;
        let mut consumed = header.body + entries.len() * CHANNEL_ENTRY_SIZE;
        for at in entries {
            let value = read_u32_named(self.buf, at, "CHAN.value")?;
            let name = self.read_name(at + 4, "CHAN name", &mut consumed)?;
            let message = self.resolve_message(at + 12, "CHAN.message_identifier")?;

            self.register(at, ChannelId::from_index(self.provider.channels.len()))?;
            self.provider.channels.push(Channel {
                name,
                value: narrow(u64::from(value), "CHAN.value", at)?,
                message,
            });
        }
        self.check_length("CHAN", offset, header.size, consumed)?;
        Ok(header.end)
    }

    fn read_levels(&mut self, offset: u32) -> Result<usize> {
        let (header, entries) = self.list(offset, ElementKind::Level, LEVEL_ENTRY_SIZE, "LEVL")?;
        let mut consumed = header.body + entries.len() * LEVEL_ENTRY_SIZE;
        for at in entries {
            let value = read_u32_named(self.buf, at, "LEVL.value")?;
            let message = self.resolve_message(at + 4, "LEVL.message_identifier")?;
            let name = self.read_name(at + 8, "LEVL name", &mut consumed)?;

            self.register(at, LevelId::from_index(self.provider.levels.len()))?;
            self.provider.levels.push(Level {
                name,
                value: narrow(u64::from(value), "LEVL.value", at)?,
                message,
            });
        }
        self.check_length("LEVL", offset, header.size, consumed)?;
        Ok(header.end)
    }

    fn read_tasks(&mut self, offset: u32) -> Result<usize> {
        let (header, entries) = self.list(offset, ElementKind::Task, TASK_ENTRY_SIZE, "TASK")?;
        let mut consumed = header.body + entries.len() * TASK_ENTRY_SIZE;
        for at in entries {
            let value = read_u32_named(self.buf, at, "TASK.value")?;
            let message = self.resolve_message(at + 4, "TASK.message_identifier")?;
            let guid = read_guid_named(self.buf, at + 8, "TASK.mui_identifier")?;
            let name = self.read_name(at + 24, "TASK name", &mut consumed)?;

            self.register(at, TaskId::from_index(self.provider.tasks.len()))?;
            self.provider.tasks.push(Task {
                name,
                value: narrow(u64::from(value), "TASK.value", at)?,
                guid: (!guid.is_nil()).then_some(guid),
                message,
            });
        }
        self.check_length("TASK", offset, header.size, consumed)?;
        Ok(header.end)
    }

    /// Task scoping is recorded by task value and resolved once every block has been read.
    fn read_opcodes(&mut self, offset: u32) -> Result<usize> {
        let (header, entries) = self.list(offset, ElementKind::Opcode, OPCODE_ENTRY_SIZE, "OPCO")?;
        let mut consumed = header.body + entries.len() * OPCODE_ENTRY_SIZE;
        for at in entries {
            let identifier = read_u32_named(self.buf, at, "OPCO.identifier")?;
            let message = self.resolve_message(at + 4, "OPCO.message_identifier")?;
            let name = self.read_name(at + 8, "OPCO name", &mut consumed)?;

            let index = self.provider.opcodes.len();
            let task_value = (identifier & 0xffff) as u16;
            if task_value != 0 {
                self.pending_opcode_tasks
                    .push((index, task_value, usize_to_u32(at)));
            }

            self.register(at, OpcodeId::from_index(index))?;
            self.provider.opcodes.push(Opcode {
                name,
                value: narrow(u64::from(identifier >> 16), "OPCO.value", at)?,
                task: None,
                message,
            });
        }
        self.check_length("OPCO", offset, header.size, consumed)?;
        Ok(header.end)
    }

    fn read_keywords(&mut self, offset: u32) -> Result<usize> {
        let (header, entries) =
            self.list(offset, ElementKind::Keyword, KEYWORD_ENTRY_SIZE, "KEYW")?;
        let mut consumed = header.body + entries.len() * KEYWORD_ENTRY_SIZE;
        for at in entries {
            let mask = read_u64_named(self.buf, at, "KEYW.mask")?;
            let message = self.resolve_message(at + 8, "KEYW.message_identifier")?;
            let name = self.read_name(at + 12, "KEYW name", &mut consumed)?;

            self.register(at, KeywordId::from_index(self.provider.keywords.len()))?;
            self.provider.keywords.push(Keyword {
                name,
                mask,
                message,
            });
        }
        self.check_length("KEYW", offset, header.size, consumed)?;
        Ok(header.end)
    }

    fn read_filters(&mut self, offset: u32) -> Result<usize> {
        let (header, entries) = self.list(offset, ElementKind::Filter, FILTER_ENTRY_SIZE, "FLTR")?;
        let mut consumed = header.body + entries.len() * FILTER_ENTRY_SIZE;
        for at in entries {
            let value = read_u32_named(self.buf, at, "FLTR.value")?;
            let version = read_u32_named(self.buf, at + 4, "FLTR.version")?;
            let message = self.resolve_message(at + 8, "FLTR.message_identifier")?;
            let template_offset = read_u32_named(self.buf, at + 12, "FLTR.template_offset")?;
            let template = self.resolve_as::<TemplateId>(template_offset, "filter template", at)?;
            let name = self.read_name(at + 16, "FLTR name", &mut consumed)?;

            self.register(at, FilterId::from_index(self.provider.filters.len()))?;
            self.provider.filters.push(Filter {
                name,
                value,
                version: narrow(u64::from(version), "FLTR.version", at)?,
                message,
                template,
            });
        }
        self.check_length("FLTR", offset, header.size, consumed)?;
        Ok(header.end)
    }

    /// `count` offsets into records placed after the table, possibly in another order.
    fn offset_table(&self, header: &ListHeader, what: &'static str) -> Result<Vec<u32>> {
        let table_end = header.entries_end(4, what)?;
        (header.body..table_end)
            .step_by(4)
            .map(|at| read_u32_named(self.buf, at, what))
            .collect()
    }

    fn read_maps(&mut self, offset: u32) -> Result<usize> {
        let header = ListHeader::read(self.buf, offset, ElementKind::Maps.signature(), "MAPS")?;
        let map_offsets = self.offset_table(&header, "MAPS offsets")?;

        let mut consumed = header.body + map_offsets.len() * 4;
        for map_offset in map_offsets {
            let end = self.read_map(map_offset)?;
            consumed = consumed.max(end);
        }
        self.check_length("MAPS", offset, header.size, consumed)?;
        Ok(header.end)
    }

    fn read_map(&mut self, offset: u32) -> Result<usize> {
        let buf = self.buf;
        let off = u32_to_usize(offset, "map", buf.len())?;
        let sig = read_sig_named(buf, off, "map signature")?;
        let kind = match sig {
            SIG_VMAP => MapKind::Value,
            SIG_BMAP => MapKind::Bit,
            found => {
                return Err(ManifestReadError::InvalidSignature {
                    offset,
                    expected: Signature(SIG_VMAP),
                    found: Signature(found),
                });
            }
        };
        let size = read_u32_named(buf, off + 4, "map.size")?;
        let item_count = read_u32_named(buf, off + 16, "map.item_count")?;
        let end = checked_end(buf.len(), offset, size, "map")?;

        let items_start = off + MAP_HEADER_SIZE;
        let items_end = usize::try_from(item_count)
            .ok()
            .and_then(|n| n.checked_mul(MAP_ITEM_SIZE))
            .and_then(|n| n.checked_add(items_start))
            .filter(|&n| n <= end)
            .ok_or(ManifestReadError::CountOutOfBounds {
                what: "map.item_count",
                offset,
                count: item_count,
            })?;

        let mut consumed = items_end;
        let name = self.read_name(off + 8, "map name", &mut consumed)?;

        let mut items = Vec::new();
        for at in (items_start..items_end).step_by(MAP_ITEM_SIZE) {
            items.push(MapItem {
                value: read_u32_named(buf, at, "map item value")?,
                message: self.resolve_message(at + 4, "map item message_identifier")?,
            });
        }
        self.check_length("map", offset, size, consumed)?;

        self.register(off, MapId::from_index(self.provider.maps.len()))?;
        self.provider.maps.push(Map { kind, name, items });
        Ok(end)
    }

    fn read_named_queries(&mut self, offset: u32) -> Result<usize> {
        let header =
            ListHeader::read(self.buf, offset, ElementKind::NamedQueries.signature(), "QTAB")?;
        let query_offsets = self.offset_table(&header, "QTAB offsets")?;

        let mut consumed = header.body + query_offsets.len() * 4;
        for query_offset in query_offsets {
            let end = self.read_named_query(query_offset)?;
            consumed = consumed.max(end);
        }
        self.check_length("QTAB", offset, header.size, consumed)?;
        Ok(header.end)
    }

    fn read_named_query(&mut self, offset: u32) -> Result<usize> {
        let buf = self.buf;
        let off = u32_to_usize(offset, "QUER", buf.len())?;
        expect_sig(buf, off, SIG_QUER, "QUER")?;
        let size = read_u32_named(buf, off + 4, "QUER.size")?;
        let item_count = read_u32_named(buf, off + 16, "QUER.item_count")?;
        let end = checked_end(buf.len(), offset, size, "QUER")?;

        let items_start = off + QUERY_HEADER_SIZE;
        let items_end = usize::try_from(item_count)
            .ok()
            .and_then(|n| n.checked_mul(QUERY_ITEM_SIZE))
            .and_then(|n| n.checked_add(items_start))
            .filter(|&n| n <= end)
            .ok_or(ManifestReadError::CountOutOfBounds {
                what: "QUER.item_count",
                offset,
                count: item_count,
            })?;

        let mut consumed = items_end;
        let name = self.read_name(off + 8, "QUER name", &mut consumed)?;
        let format = self.read_name(off + 12, "QUER format", &mut consumed)?;

        let mut items = Vec::new();
        for at in (items_start..items_end).step_by(QUERY_ITEM_SIZE) {
            items.push(NamedQueryItem {
                name: self.read_name(at, "QUER item name", &mut consumed)?,
                value: self.read_name(at + 4, "QUER item value", &mut consumed)?,
            });
        }
        self.check_length("QUER", offset, size, consumed)?;

        self.register(
            off,
            NamedQueryId::from_index(self.provider.named_queries.len()),
        )?;
        self.provider.named_queries.push(NamedQuery {
            name,
            format,
            items,
        });
        Ok(end)
    }

    /// `TEMP` records follow the header back to back.
    fn read_templates(&mut self, offset: u32) -> Result<usize> {
        let header =
            ListHeader::read(self.buf, offset, ElementKind::Template.signature(), "TTBL")?;
        let mut cursor = header.body;
        for _ in 0..header.count {
            if cursor >= header.end {
                return Err(header.bad_count("TTBL"));
            }
            cursor = self.read_template(cursor)?;
        }
        self.check_length("TTBL", offset, header.size, cursor)?;
        Ok(header.end)
    }

    fn read_template(&mut self, off: usize) -> Result<usize> {
        let buf = self.buf;
        let offset = usize_to_u32(off);
        expect_sig(buf, off, SIG_TEMP, "TEMP")?;
        let size = read_u32_named(buf, off + 4, "TEMP.size")?;
        let param_count = read_u32_named(buf, off + 8, "TEMP.item_descriptor_count")?;
        let total_count = read_u32_named(buf, off + 12, "TEMP.item_name_count")?;
        let property_offset = read_u32_named(buf, off + 16, "TEMP.template_items_offset")?;
        let flags = TemplateFlags::from_bits_retain(read_u32_named(buf, off + 20, "TEMP.flags")?);
        let stored_guid = read_guid_named(buf, off + 24, "TEMP.guid")?;

        if (size as usize) < TEMPLATE_HEADER_SIZE {
            return Err(ManifestReadError::SizeOutOfBounds {
                what: "TEMP",
                offset,
                size,
            });
        }
        let end = checked_end(buf.len(), offset, size, "TEMP")?;

        let binxml_start = off + TEMPLATE_HEADER_SIZE;
        let properties_start = u32_to_usize(property_offset, "TEMP.template_items_offset", end)?;
        if properties_start < binxml_start {
            return Err(ManifestReadError::OffsetOutOfBounds {
                what: "TEMP.template_items_offset",
                offset: property_offset,
                len: end,
            });
        }

        let bad_count = |what, count| ManifestReadError::CountOutOfBounds {
            what,
            offset,
            count,
        };
        if param_count > total_count {
            return Err(bad_count("TEMP.item_descriptor_count", param_count));
        }
        let total = usize::try_from(total_count)
            .map_err(|_| bad_count("TEMP.item_name_count", total_count))?;
        let entries_end = total
            .checked_mul(PROPERTY_ENTRY_SIZE)
            .and_then(|n| n.checked_add(properties_start))
            .filter(|&n| n <= end)
            .ok_or_else(|| bad_count("TEMP.item_name_count", total_count))?;

        let mut consumed = entries_end;
        let mut raw = Vec::with_capacity(total);
        for at in (properties_start..entries_end).step_by(PROPERTY_ENTRY_SIZE) {
            raw.push(RawProperty {
                offset: at,
                flags: PropertyFlags::from_bits_retain(read_u32_named(buf, at, "property.flags")?),
                in_type: read_u8_named(buf, at + 4, "property.in_type")?,
                out_type: read_u8_named(buf, at + 5, "property.out_type")?,
                map_offset: read_u32_named(buf, at + 8, "property.map_offset")?,
                first_member: read_u16_named(buf, at + 4, "property.struct_start")?,
                member_count: read_u16_named(buf, at + 6, "property.struct_count")?,
                count: read_u16_named(buf, at + 12, "property.count")?,
                length: read_u16_named(buf, at + 14, "property.length")?,
                name: self.read_name(at + 16, "property name", &mut consumed)?,
            });
        }
        self.check_length("TEMP", offset, size, consumed)?;

        let properties = self.build_properties(off, &raw, param_count as usize)?;
        let document = self
            .codec
            .decode(&buf[binxml_start..properties_start])
            .map_err(|source| ManifestReadError::BinXml { offset, source })?;

        let mut template = Template::new(properties);
        if flags.contains(TemplateFlags::USER_DATA) {
            template.user_data = Some(document);
        } else {
            self.check_event_data_shape(off, &template, &document);
        }

        if self.settings.verify_template_ids {
            self.verify_identity(off, &template, stored_guid)?;
        }

        trace!(
            "template {} at offset {}: {} entries",
            stored_guid, offset, total
        );
        self.register(off, TemplateId::from_index(self.provider.templates.len()))?;
        self.provider.templates.push(template);
        Ok(end)
    }

    /// Top-level entries first; struct members are claimed in order by a separate cursor.
    fn build_properties(
        &mut self,
        template_offset: usize,
        raw: &[RawProperty],
        param_count: usize,
    ) -> Result<Vec<Property>> {
        let top_level = 0..param_count;
        let mut member_cursor = param_count;
        let mut properties = Vec::with_capacity(param_count);

        for entry in &raw[top_level.clone()] {
            if !entry.is_struct() {
                let data = self.data_property(entry, raw, top_level.clone())?;
                properties.push(Property::Data(data));
                continue;
            }

            let start = usize::from(entry.first_member);
            let end = start + usize::from(entry.member_count);
            if start != member_cursor || end > raw.len() {
                return Err(ManifestReadError::InvalidStructMembers {
                    offset: usize_to_u32(entry.offset),
                });
            }

            let mut members = Vec::with_capacity(end - start);
            for member in &raw[start..end] {
                if member.is_struct() {
                    return Err(ManifestReadError::NestedStruct {
                        offset: usize_to_u32(member.offset),
                    });
                }
                members.push(self.data_property(member, raw, start..end)?);
            }
            member_cursor = end;

            let count = self.resolve_extent(entry, "count", raw, top_level.clone());
            let length = self.resolve_extent(entry, "length", raw, top_level.clone());
            properties.push(Property::Struct(StructProperty {
                name: entry.name.clone(),
                members,
                count,
                length,
            }));
        }

        if member_cursor != raw.len() {
            return Err(ManifestReadError::InvalidStructMembers {
                offset: usize_to_u32(template_offset),
            });
        }
        Ok(properties)
    }

    fn data_property(
        &mut self,
        entry: &RawProperty,
        raw: &[RawProperty],
        siblings: Range<usize>,
    ) -> Result<DataProperty> {
        let map = self.resolve_as::<MapId>(entry.map_offset, "property map", entry.offset + 8)?;
        Ok(DataProperty {
            name: entry.name.clone(),
            in_type: entry.in_type,
            out_type: entry.out_type,
            count: self.resolve_extent(entry, "count", raw, siblings.clone()),
            length: self.resolve_extent(entry, "length", raw, siblings),
            map,
        })
    }

    /// Variable extents are stored as absolute entry indices. They are turned back into sibling
    /// indices by looking the target's name up among `siblings`.
    fn resolve_extent(
        &mut self,
        entry: &RawProperty,
        field: &'static str,
        raw: &[RawProperty],
        siblings: Range<usize>,
    ) -> Option<Extent> {
        let (value, fixed, variable) = match field {
            "count" => (
                entry.count,
                PropertyFlags::FIXED_COUNT,
                PropertyFlags::PARAM_COUNT,
            ),
            _ => (
                entry.length,
                PropertyFlags::FIXED_LENGTH,
                PropertyFlags::PARAM_LENGTH,
            ),
        };

        if entry.flags.contains(variable) {
            let position = raw
                .get(usize::from(value))
                .filter(|target| !target.is_struct())
                .and_then(|target| {
                    raw[siblings]
                        .iter()
                        .position(|s| !s.is_struct() && s.name == target.name)
                })
                .and_then(|p| u16::try_from(p).ok());

            if position.is_none() {
                self.diagnose(
                    entry.offset,
                    SchemaError::InvalidPropertyReference {
                        property: entry.name.clone(),
                        field,
                        target: value,
                    },
                );
            }
            position.map(Extent::Variable)
        } else if entry.flags.contains(fixed) {
            Some(Extent::Fixed(value))
        } else {
            None
        }
    }

    /// A synthesized payload is `<EventData>` with one `<Data Name=..>` per top-level property.
    fn check_event_data_shape(&mut self, offset: usize, template: &Template, document: &XmlElement) {
        let detail = if document.name != "EventData" {
            Some(format!(
                "root element is <{}>, expected <EventData>",
                document.name
            ))
        } else {
            let names: Vec<String> = document
                .child_elements()
                .map(|e| match e.name.as_str() {
                    "Data" => e.attribute_text("Name").unwrap_or_default(),
                    other => format!("<{other}>"),
                })
                .collect();
            let expected: Vec<&str> = template.properties.iter().map(Property::name).collect();
            (names != expected)
                .then(|| format!("payload fields {names:?}, properties {expected:?}"))
        };

        if let Some(detail) = detail {
            self.diagnose(offset, SchemaError::TemplateShapeMismatch { detail });
        }
    }

    fn verify_identity(&mut self, offset: usize, template: &Template, stored: Guid) -> Result<()> {
        for scheme in TemplateIdScheme::ALL {
            let computed = template
                .identity(scheme)
                .map_err(|source| ManifestReadError::BinXml {
                    offset: usize_to_u32(offset),
                    source,
                })?;
            if computed == stored {
                return Ok(());
            }
        }
        self.diagnose(offset, SchemaError::TemplateIdentityMismatch { stored });
        Ok(())
    }

    /// The fixed entries sit at the end of the block; keyword arrays fill the space before them.
    fn read_events(&mut self, offset: u32) -> Result<usize> {
        let header = ListHeader::read(self.buf, offset, ElementKind::Event.signature(), "EVNT")?;
        let entries_start = usize::try_from(header.count)
            .ok()
            .and_then(|n| n.checked_mul(EVENT_ENTRY_SIZE))
            .and_then(|n| header.end.checked_sub(n))
            .filter(|&start| start >= header.body)
            .ok_or_else(|| header.bad_count("EVNT"))?;

        let mut consumed = header.body + (header.end - entries_start);
        for at in (entries_start..header.end).step_by(EVENT_ENTRY_SIZE) {
            let event = self.read_event(at, header.body..entries_start)?;
            consumed += event.keywords.len() * 4;
            self.provider.events.push(event);
        }
        self.check_length("EVNT", offset, header.size, consumed)?;
        Ok(header.end)
    }

    /// Keyword arrays must lie in `keyword_area`, between the header and the entry array.
    fn read_event(&self, at: usize, keyword_area: Range<usize>) -> Result<Event> {
        let buf = self.buf;
        let mut event = Event::new(
            read_u16_named(buf, at, "EVNT.identifier")?,
            read_u8_named(buf, at + 2, "EVNT.version")?,
        );
        let mask = read_u64_named(buf, at + 8, "EVNT.keywords")?;
        event.message = self.resolve_message(at + 16, "EVNT.message_identifier")?;

        let field = |rel: usize, what| read_u32_named(buf, at + rel, what);
        event.template = self.resolve_as(field(20, "EVNT.template_offset")?, "event template", at)?;
        event.opcode = self.resolve_as(field(24, "EVNT.opcode_offset")?, "event opcode", at)?;
        event.level = self.resolve_as(field(28, "EVNT.level_offset")?, "event level", at)?;
        event.task = self.resolve_as(field(32, "EVNT.task_offset")?, "event task", at)?;
        event.channel = self.resolve_as(field(44, "EVNT.channel_offset")?, "event channel", at)?;

        let keyword_count = field(36, "EVNT.keyword_count")?;
        if keyword_count > 0 {
            let keywords_offset = field(40, "EVNT.keywords_offset")?;
            let array = u32_to_usize(keywords_offset, "EVNT.keywords_offset", keyword_area.end)?;
            if array < keyword_area.start {
                return Err(ManifestReadError::OffsetOutOfBounds {
                    what: "EVNT.keywords_offset",
                    offset: keywords_offset,
                    len: keyword_area.end,
                });
            }
            let array_end = usize::try_from(keyword_count)
                .ok()
                .and_then(|n| n.checked_mul(4))
                .and_then(|n| n.checked_add(array))
                .filter(|&n| n <= keyword_area.end)
                .ok_or(ManifestReadError::CountOutOfBounds {
                    what: "EVNT.keyword_count",
                    offset: usize_to_u32(at),
                    count: keyword_count,
                })?;

            for slot in (array..array_end).step_by(4) {
                let target = read_u32_named(buf, slot, "EVNT keyword offset")?;
                let keyword = self
                    .resolve_as::<KeywordId>(target, "event keyword", slot)?
                    .ok_or(ManifestReadError::UnresolvedReference {
                        what: "event keyword",
                        offset: usize_to_u32(slot),
                        target,
                    })?;
                event.keywords.push(keyword);
            }
        }

        if event.keyword_mask(&self.provider) != mask {
            debug!(
                "event {} v{}: stored keyword mask {:#x} differs from its keywords",
                event.id, event.version, mask
            );
        }
        Ok(event)
    }

    fn attach_opcode_tasks(&mut self) -> Result<()> {
        for (index, task_value, offset) in std::mem::take(&mut self.pending_opcode_tasks) {
            let task = self
                .provider
                .tasks
                .iter()
                .position(|t| t.value == task_value)
                .ok_or(ManifestReadError::UnknownOpcodeTask {
                    offset,
                    task: task_value,
                })?;
            self.provider.opcodes[index].task = Some(TaskId::from_index(task));
        }
        Ok(())
    }
}
