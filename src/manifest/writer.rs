//! Object graph to `CRIM` blob.
//!
//! Encoding is a single forward pass. Every header, offset table and entry array is reserved
//! before its contents are known and patched once they are. Each referenceable record is
//! registered in an [`OffsetIndex`] as it is written, and every cross-reference field is taken
//! from that index, so a record is always written before anything that points at it.

use std::cmp::Ordering;

use hashbrown::HashMap;
use log::{debug, trace};

use super::buffer::{BlobBuffer, Reservation, SlotWriter, to_offset};
use super::error::ManifestWriteError;
use super::format::*;
use super::offsets::{OffsetIndex, Referent};
use crate::binxml::{BinXmlCodec, InlineNameCodec};
use crate::model::{
    ChannelId, DataProperty, Extent, FilterId, KeywordId, LevelId, MapId, MapKind, Message,
    NamedQueryId, OpcodeId, Property, Provider, StructProperty, TaskId, Template, TemplateId,
    validate_providers,
};
use crate::template_id::{TemplateIdScheme, template_identity};

pub type Result<T> = std::result::Result<T, ManifestWriteError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSettings {
    template_id_scheme: TemplateIdScheme,
    major_version: u16,
    minor_version: u16,
}

impl Default for WriterSettings {
    fn default() -> Self {
        WriterSettings {
            template_id_scheme: TemplateIdScheme::default(),
            major_version: DEFAULT_MAJOR_VERSION,
            minor_version: DEFAULT_MINOR_VERSION,
        }
    }
}

impl WriterSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme used to derive template identities.
    pub fn template_id_scheme(mut self, scheme: TemplateIdScheme) -> Self {
        self.template_id_scheme = scheme;
        self
    }

    /// Format version stamped into the `CRIM` header.
    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn get_template_id_scheme(&self) -> TemplateIdScheme {
        self.template_id_scheme
    }

    pub fn get_version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }
}

/// Encodes providers into a `CRIM` blob.
#[derive(Debug, Clone, Default)]
pub struct ManifestWriter<C = InlineNameCodec> {
    settings: WriterSettings,
    codec: C,
}

impl ManifestWriter {
    pub fn new(settings: WriterSettings) -> Self {
        Self::with_codec(settings, InlineNameCodec)
    }
}

impl<C: BinXmlCodec> ManifestWriter<C> {
    pub fn with_codec(settings: WriterSettings, codec: C) -> Self {
        ManifestWriter { settings, codec }
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// Validate and encode `providers`, in order.
    pub fn write(&self, providers: &[Provider]) -> Result<Vec<u8>> {
        validate_providers(providers)?;

        let mut out = BlobBuffer::new();
        let header = out.reserve(CRIM_HEADER_SIZE + PROVIDER_DESCRIPTOR_SIZE * providers.len());

        let mut provider_offsets = Vec::with_capacity(providers.len());
        for provider in providers {
            let offset = out.position()?;
            debug!("encoding provider {} at offset {}", provider.guid, offset);
            ProviderEncoder::new(&mut out, provider, &self.settings, &self.codec).encode()?;
            provider_offsets.push(offset);
        }

        let total = out.position()?;
        let (major, minor) = self.settings.get_version();
        let mut w = SlotWriter::new(out.patch(header));
        w.sig(SIG_CRIM)
            .u32(total)
            .u16(major)
            .u16(minor)
            .u32(to_offset(providers.len())?);
        for (provider, offset) in providers.iter().zip(provider_offsets) {
            w.guid(&provider.guid).u32(offset);
        }

        debug!("encoded {} providers into {} bytes", providers.len(), total);
        Ok(out.into_inner())
    }
}

/// Encode `providers` with default settings and the inline-name BinXml codec.
pub fn write_manifest(providers: &[Provider]) -> Result<Vec<u8>> {
    ManifestWriter::new(WriterSettings::default()).write(providers)
}

/// Indices of `items` in stable sorted order.
fn stable_order<T>(items: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| cmp(&items[a], &items[b]));
    order
}

fn narrow_u16(value: usize, what: &'static str) -> Result<u16> {
    u16::try_from(value).map_err(|_| ManifestWriteError::ValueOutOfRange { what, value })
}

/// A list block whose header is final and whose entries still need to be filled in.
struct NamedList {
    offset: u32,
    entries: Reservation,
    name_offsets: Vec<u32>,
}

impl NamedList {
    fn entry_offset(&self, index: usize, entry_size: usize) -> Result<u32> {
        to_offset(self.entries.start() + index * entry_size)
    }
}

/// One 20-byte property entry in a `TEMP` record.
enum FlatEntry<'t> {
    /// `base` is added to variable references: 0 for top-level properties, the first member
    /// index of the owning struct for members.
    Data { property: &'t DataProperty, base: u16 },
    Struct {
        property: &'t StructProperty,
        first_member: u16,
    },
}

impl FlatEntry<'_> {
    fn name(&self) -> &str {
        match self {
            FlatEntry::Data { property, .. } => &property.name,
            FlatEntry::Struct { property, .. } => &property.name,
        }
    }
}

/// Top-level properties first, then the members of each struct in order.
fn flatten(template: &Template) -> Result<Vec<FlatEntry<'_>>> {
    let mut entries = Vec::with_capacity(template.total_property_count());
    let mut next_member = template.properties.len();
    let mut member_ranges = Vec::new();

    for property in &template.properties {
        match property {
            Property::Data(data) => entries.push(FlatEntry::Data {
                property: data,
                base: 0,
            }),
            Property::Struct(s) => {
                let first_member = narrow_u16(next_member, "struct member index")?;
                entries.push(FlatEntry::Struct {
                    property: s,
                    first_member,
                });
                member_ranges.push((s, first_member));
                next_member += s.members.len();
            }
        }
    }

    for (s, first_member) in member_ranges {
        for member in &s.members {
            entries.push(FlatEntry::Data {
                property: member,
                base: first_member,
            });
        }
    }

    Ok(entries)
}

/// Returns the flag to set and the value of the `u16` count or length field.
fn encode_extent(
    extent: Option<Extent>,
    base: u16,
    fixed: PropertyFlags,
    variable: PropertyFlags,
    default: u16,
) -> Result<(PropertyFlags, u16)> {
    match extent {
        None => Ok((PropertyFlags::empty(), default)),
        Some(Extent::Fixed(n)) => Ok((fixed, n)),
        Some(Extent::Variable(sibling)) => {
            let index = usize::from(base) + usize::from(sibling);
            Ok((variable, narrow_u16(index, "property reference")?))
        }
    }
}

struct ProviderEncoder<'a, C> {
    out: &'a mut BlobBuffer,
    provider: &'a Provider,
    settings: &'a WriterSettings,
    codec: &'a C,
    index: OffsetIndex,
    /// For each template, the index of the first structurally equal template (itself if unique).
    template_alias: Vec<usize>,
}

impl<'a, C: BinXmlCodec> ProviderEncoder<'a, C> {
    fn new(
        out: &'a mut BlobBuffer,
        provider: &'a Provider,
        settings: &'a WriterSettings,
        codec: &'a C,
    ) -> Self {
        ProviderEncoder {
            out,
            provider,
            settings,
            codec,
            index: OffsetIndex::new(),
            template_alias: Vec::new(),
        }
    }

    fn has_entries(&self, kind: ElementKind) -> bool {
        let p = self.provider;
        match kind {
            ElementKind::Channel => !p.channels.is_empty(),
            ElementKind::Level => !p.levels.is_empty(),
            ElementKind::Task => !p.tasks.is_empty(),
            ElementKind::Opcode => !p.opcodes.is_empty(),
            ElementKind::Keyword => !p.keywords.is_empty(),
            ElementKind::Maps => !p.maps.is_empty(),
            ElementKind::Template => !p.templates.is_empty(),
            ElementKind::Event => !p.events.is_empty(),
            ElementKind::Filter => !p.filters.is_empty(),
            ElementKind::NamedQueries => !p.named_queries.is_empty(),
        }
    }

    fn encode(mut self) -> Result<()> {
        let start = self.out.position()?;
        let kinds: Vec<ElementKind> = ElementKind::WRITE_ORDER
            .into_iter()
            .filter(|&kind| kind.always_written() || self.has_entries(kind))
            .collect();

        let header = self
            .out
            .reserve(WEVT_HEADER_SIZE + ELEMENT_DESCRIPTOR_SIZE * kinds.len());

        let mut table = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let offset = match kind {
                ElementKind::Channel => self.write_channels()?,
                ElementKind::Maps => self.write_maps()?,
                ElementKind::NamedQueries => self.write_named_queries()?,
                ElementKind::Template => self.write_templates()?,
                ElementKind::Opcode => self.write_opcodes()?,
                ElementKind::Level => self.write_levels()?,
                ElementKind::Task => self.write_tasks()?,
                ElementKind::Keyword => self.write_keywords()?,
                ElementKind::Event => self.write_events()?,
                ElementKind::Filter => self.write_filters()?,
            };
            trace!("{:?} list at offset {}", kind, offset);
            table.push((kind, offset));
        }

        let size = self.out.position()? - start;
        let message = Message::wire_id(self.provider.message.as_ref());
        let mut w = SlotWriter::new(self.out.patch(header));
        w.sig(SIG_WEVT)
            .u32(size)
            .u32(message)
            .u32(to_offset(table.len())?);
        for (kind, offset) in table {
            w.u32(kind.tag()).u32(offset);
        }

        trace!(
            "provider {}: {} bytes, {} registered records",
            self.provider.guid,
            size,
            self.index.len()
        );
        Ok(())
    }

    fn offset_of<T: Referent>(&self, id: Option<T>) -> Result<u32> {
        match id {
            None => Ok(0),
            Some(id) => self
                .index
                .offset_of(id.to_ref())
                .ok_or(ManifestWriteError::UnwrittenObject {
                    object: id.to_ref(),
                }),
        }
    }

    fn template_offset(&self, id: Option<TemplateId>) -> Result<u32> {
        let canonical = id.map(|t| {
            let first = self
                .template_alias
                .get(t.index())
                .copied()
                .unwrap_or(t.index());
            TemplateId::from_index(first)
        });
        self.offset_of(canonical)
    }

    /// Write `header, entries (zeroed), names` and finalize the header.
    fn named_list(
        &mut self,
        kind: ElementKind,
        entry_size: usize,
        names: &[&str],
    ) -> Result<NamedList> {
        let offset = self.out.position()?;
        let header = self.out.reserve(LIST_HEADER_SIZE);
        let entries = self.out.reserve(entry_size * names.len());

        let mut name_offsets = Vec::with_capacity(names.len());
        for name in names {
            name_offsets.push(self.out.put_sized_utf16(name)?);
        }

        let size = self.out.position()? - offset;
        SlotWriter::new(self.out.patch(header))
            .sig(kind.signature())
            .u32(size)
            .u32(to_offset(names.len())?);

        Ok(NamedList {
            offset,
            entries,
            name_offsets,
        })
    }

    fn write_channels(&mut self) -> Result<u32> {
        let p = self.provider;
        let names: Vec<&str> = p.channels.iter().map(|c| c.name.as_str()).collect();
        let list = self.named_list(ElementKind::Channel, CHANNEL_ENTRY_SIZE, &names)?;

        for (i, channel) in p.channels.iter().enumerate() {
            let at = list.entry_offset(i, CHANNEL_ENTRY_SIZE)?;
            self.index.register(at, ChannelId::from_index(i).to_ref())?;
            SlotWriter::at(self.out.patch(list.entries), i * CHANNEL_ENTRY_SIZE)
                .u32(u32::from(channel.value))
                .u32(list.name_offsets[i])
                // Reserved flags.
                .u32(0)
                .u32(Message::wire_id(channel.message.as_ref()));
        }
        Ok(list.offset)
    }

    fn write_levels(&mut self) -> Result<u32> {
        let p = self.provider;
        let order = stable_order(&p.levels, |a, b| a.value.cmp(&b.value));
        let names: Vec<&str> = order.iter().map(|&i| p.levels[i].name.as_str()).collect();
        let list = self.named_list(ElementKind::Level, LEVEL_ENTRY_SIZE, &names)?;

        for (slot, &i) in order.iter().enumerate() {
            let level = &p.levels[i];
            let at = list.entry_offset(slot, LEVEL_ENTRY_SIZE)?;
            self.index.register(at, LevelId::from_index(i).to_ref())?;
            SlotWriter::at(self.out.patch(list.entries), slot * LEVEL_ENTRY_SIZE)
                .u32(u32::from(level.value))
                .u32(Message::wire_id(level.message.as_ref()))
                .u32(list.name_offsets[slot]);
        }
        Ok(list.offset)
    }

    fn write_tasks(&mut self) -> Result<u32> {
        let p = self.provider;
        let names: Vec<&str> = p.tasks.iter().map(|t| t.name.as_str()).collect();
        let list = self.named_list(ElementKind::Task, TASK_ENTRY_SIZE, &names)?;

        for (i, task) in p.tasks.iter().enumerate() {
            let at = list.entry_offset(i, TASK_ENTRY_SIZE)?;
            self.index.register(at, TaskId::from_index(i).to_ref())?;
            SlotWriter::at(self.out.patch(list.entries), i * TASK_ENTRY_SIZE)
                .u32(u32::from(task.value))
                .u32(Message::wire_id(task.message.as_ref()))
                .guid(&task.guid.unwrap_or_default())
                .u32(list.name_offsets[i]);
        }
        Ok(list.offset)
    }

    /// The opcode identifier: value in the high half, owning task value in the low half.
    fn opcode_key(&self, id: OpcodeId) -> u32 {
        let p = self.provider;
        let opcode = &p.opcodes[id.index()];
        let task_value = opcode
            .task
            .and_then(|t| p.task(t))
            .map_or(0, |t| u32::from(t.value));
        (u32::from(opcode.value) << 16) | task_value
    }

    fn write_opcodes(&mut self) -> Result<u32> {
        let p = self.provider;
        let keys: Vec<u32> = (0..p.opcodes.len())
            .map(|i| self.opcode_key(OpcodeId::from_index(i)))
            .collect();
        let order = stable_order(&keys, |a, b| a.cmp(b));
        let names: Vec<&str> = order.iter().map(|&i| p.opcodes[i].name.as_str()).collect();
        let list = self.named_list(ElementKind::Opcode, OPCODE_ENTRY_SIZE, &names)?;

        for (slot, &i) in order.iter().enumerate() {
            let at = list.entry_offset(slot, OPCODE_ENTRY_SIZE)?;
            self.index.register(at, OpcodeId::from_index(i).to_ref())?;
            SlotWriter::at(self.out.patch(list.entries), slot * OPCODE_ENTRY_SIZE)
                .u32(keys[i])
                .u32(Message::wire_id(p.opcodes[i].message.as_ref()))
                .u32(list.name_offsets[slot]);
        }
        Ok(list.offset)
    }

    fn write_keywords(&mut self) -> Result<u32> {
        let p = self.provider;
        let order = stable_order(&p.keywords, |a, b| a.mask.cmp(&b.mask));
        let names: Vec<&str> = order.iter().map(|&i| p.keywords[i].name.as_str()).collect();
        let list = self.named_list(ElementKind::Keyword, KEYWORD_ENTRY_SIZE, &names)?;

        for (slot, &i) in order.iter().enumerate() {
            let keyword = &p.keywords[i];
            let at = list.entry_offset(slot, KEYWORD_ENTRY_SIZE)?;
            self.index.register(at, KeywordId::from_index(i).to_ref())?;
            SlotWriter::at(self.out.patch(list.entries), slot * KEYWORD_ENTRY_SIZE)
                .u64(keyword.mask)
                .u32(Message::wire_id(keyword.message.as_ref()))
                .u32(list.name_offsets[slot]);
        }
        Ok(list.offset)
    }

    fn write_filters(&mut self) -> Result<u32> {
        let p = self.provider;
        let names: Vec<&str> = p.filters.iter().map(|f| f.name.as_str()).collect();
        let list = self.named_list(ElementKind::Filter, FILTER_ENTRY_SIZE, &names)?;

        for (i, filter) in p.filters.iter().enumerate() {
            let at = list.entry_offset(i, FILTER_ENTRY_SIZE)?;
            self.index.register(at, FilterId::from_index(i).to_ref())?;
            let template = self.template_offset(filter.template)?;
            SlotWriter::at(self.out.patch(list.entries), i * FILTER_ENTRY_SIZE)
                .u32(filter.value)
                .u32(u32::from(filter.version))
                .u32(Message::wire_id(filter.message.as_ref()))
                .u32(template)
                .u32(list.name_offsets[i]);
        }
        Ok(list.offset)
    }

    /// Map records are placed in name order; the offset array keeps the author order.
    fn write_maps(&mut self) -> Result<u32> {
        let p = self.provider;
        let offset = self.out.position()?;
        let header = self.out.reserve(LIST_HEADER_SIZE);
        let table = self.out.reserve(4 * p.maps.len());

        let mut map_offsets = vec![0u32; p.maps.len()];
        for i in stable_order(&p.maps, |a, b| a.name.cmp(&b.name)) {
            let map = &p.maps[i];
            let map_offset = self.out.position()?;
            self.index.register(map_offset, MapId::from_index(i).to_ref())?;

            let map_header = self.out.reserve(MAP_HEADER_SIZE);
            for j in stable_order(&map.items, |a, b| a.value.cmp(&b.value)) {
                let item = &map.items[j];
                self.out.put_u32(item.value);
                self.out.put_u32(Message::wire_id(item.message.as_ref()));
            }
            let name_offset = self.out.put_sized_utf16(&map.name)?;

            let size = self.out.position()? - map_offset;
            let sig = match map.kind {
                MapKind::Value => SIG_VMAP,
                MapKind::Bit => SIG_BMAP,
            };
            SlotWriter::new(self.out.patch(map_header))
                .sig(sig)
                .u32(size)
                .u32(name_offset)
                // Reserved flags.
                .u32(0)
                .u32(to_offset(map.items.len())?);
            map_offsets[i] = map_offset;
        }

        let mut w = SlotWriter::new(self.out.patch(table));
        for map_offset in map_offsets {
            w.u32(map_offset);
        }

        let size = self.out.position()? - offset;
        SlotWriter::new(self.out.patch(header))
            .sig(ElementKind::Maps.signature())
            .u32(size)
            .u32(to_offset(p.maps.len())?);
        Ok(offset)
    }

    fn write_named_queries(&mut self) -> Result<u32> {
        let p = self.provider;
        let offset = self.out.position()?;
        let header = self.out.reserve(LIST_HEADER_SIZE);
        let table = self.out.reserve(4 * p.named_queries.len());

        let mut query_offsets = Vec::with_capacity(p.named_queries.len());
        for (i, query) in p.named_queries.iter().enumerate() {
            let query_offset = self.out.position()?;
            self.index
                .register(query_offset, NamedQueryId::from_index(i).to_ref())?;

            let query_header = self.out.reserve(QUERY_HEADER_SIZE);
            let items = self.out.reserve(QUERY_ITEM_SIZE * query.items.len());
            let name_offset = self.out.put_sized_utf16(&query.name)?;
            let format_offset = self.out.put_sized_utf16(&query.format)?;

            let mut item_offsets = Vec::with_capacity(query.items.len());
            for item in &query.items {
                let name = self.out.put_sized_utf16(&item.name)?;
                let value = self.out.put_sized_utf16(&item.value)?;
                item_offsets.push((name, value));
            }

            let mut w = SlotWriter::new(self.out.patch(items));
            for (name, value) in item_offsets {
                w.u32(name).u32(value);
            }

            let size = self.out.position()? - query_offset;
            SlotWriter::new(self.out.patch(query_header))
                .sig(SIG_QUER)
                .u32(size)
                .u32(name_offset)
                .u32(format_offset)
                .u32(to_offset(query.items.len())?);
            query_offsets.push(query_offset);
        }

        let mut w = SlotWriter::new(self.out.patch(table));
        for query_offset in query_offsets {
            w.u32(query_offset);
        }

        let size = self.out.position()? - offset;
        SlotWriter::new(self.out.patch(header))
            .sig(ElementKind::NamedQueries.signature())
            .u32(size)
            .u32(to_offset(p.named_queries.len())?);
        Ok(offset)
    }

    /// Structurally equal templates are written once and share its offset.
    fn write_templates(&mut self) -> Result<u32> {
        let p = self.provider;
        let offset = self.out.position()?;
        let header = self.out.reserve(LIST_HEADER_SIZE);

        let mut first_by_shape: HashMap<&Template, usize> = HashMap::new();
        self.template_alias = Vec::with_capacity(p.templates.len());
        for (i, template) in p.templates.iter().enumerate() {
            if let Some(&first) = first_by_shape.get(template) {
                debug!("template {i} is identical to template {first}, sharing its record");
                self.template_alias.push(first);
                continue;
            }
            first_by_shape.insert(template, i);
            self.template_alias.push(i);

            let template_offset = self.write_template(template)?;
            self.index
                .register(template_offset, TemplateId::from_index(i).to_ref())?;
        }

        let size = self.out.position()? - offset;
        SlotWriter::new(self.out.patch(header))
            .sig(ElementKind::Template.signature())
            .u32(size)
            .u32(to_offset(first_by_shape.len())?);
        Ok(offset)
    }

    fn write_template(&mut self, template: &Template) -> Result<u32> {
        let offset = self.out.position()?;
        let header = self.out.reserve(TEMPLATE_HEADER_SIZE);

        let document = template.document();
        let type_tags = template.type_tags();
        let identity = template_identity(
            self.settings.get_template_id_scheme(),
            &document.to_canonical_xml()?,
            &type_tags,
        );
        let binxml = self.codec.encode(&document, &type_tags)?;
        self.out.put_bytes(&binxml);

        let entries = flatten(template)?;
        let items_offset = self.out.position()?;
        let slots = self.out.reserve(PROPERTY_ENTRY_SIZE * entries.len());

        let mut name_offsets = Vec::with_capacity(entries.len());
        for entry in &entries {
            name_offsets.push(self.out.put_sized_utf16(entry.name())?);
        }
        for (i, entry) in entries.iter().enumerate() {
            self.write_property_entry(slots, i, entry, name_offsets[i])?;
        }

        let size = self.out.position()? - offset;
        let flags = if template.user_data.is_some() {
            TemplateFlags::USER_DATA
        } else {
            TemplateFlags::EVENT_DATA
        };
        SlotWriter::new(self.out.patch(header))
            .sig(SIG_TEMP)
            .u32(size)
            .u32(to_offset(template.properties.len())?)
            .u32(to_offset(entries.len())?)
            .u32(items_offset)
            .u32(flags.bits())
            .guid(&identity);

        trace!(
            "template {} at offset {}: {} properties, {} bytes of BinXml",
            identity,
            offset,
            entries.len(),
            binxml.len()
        );
        Ok(offset)
    }

    fn write_property_entry(
        &mut self,
        slots: Reservation,
        index: usize,
        entry: &FlatEntry<'_>,
        name_offset: u32,
    ) -> Result<()> {
        let (count, length, base) = match entry {
            FlatEntry::Data { property, base } => (property.count, property.length, *base),
            FlatEntry::Struct { property, .. } => (property.count, property.length, 0),
        };
        let (count_flag, count_value) = encode_extent(
            count,
            base,
            PropertyFlags::FIXED_COUNT,
            PropertyFlags::PARAM_COUNT,
            1,
        )?;
        let (length_flag, length_value) = encode_extent(
            length,
            base,
            PropertyFlags::FIXED_LENGTH,
            PropertyFlags::PARAM_LENGTH,
            0,
        )?;
        let mut flags = count_flag | length_flag;

        let mut union = [0u8; 8];
        match entry {
            FlatEntry::Data { property, .. } => {
                let map_offset = self.offset_of(property.map)?;
                SlotWriter::new(&mut union)
                    .u8(property.in_type)
                    .u8(property.out_type)
                    .u16(0)
                    .u32(map_offset);
            }
            FlatEntry::Struct {
                property,
                first_member,
            } => {
                flags |= PropertyFlags::STRUCT;
                let member_count = narrow_u16(property.members.len(), "struct member count")?;
                SlotWriter::new(&mut union)
                    .u16(*first_member)
                    .u16(member_count)
                    .u32(0);
            }
        }

        SlotWriter::at(self.out.patch(slots), index * PROPERTY_ENTRY_SIZE)
            .u32(flags.bits())
            .bytes(&union)
            .u16(count_value)
            .u16(length_value)
            .u32(name_offset);
        Ok(())
    }

    /// Keyword offset arrays come first, then the fixed-size entries sorted by event id.
    fn write_events(&mut self) -> Result<u32> {
        let p = self.provider;
        self.out.align(EVENT_ALIGNMENT);
        let offset = self.out.position()?;
        let header = self.out.reserve(LIST_HEADER_SIZE);

        let order = stable_order(&p.events, |a, b| a.id.cmp(&b.id));

        let mut keyword_arrays = vec![(0u32, 0u32); order.len()];
        for (slot, &i) in order.iter().enumerate() {
            let event = &p.events[i];
            if event.keywords.is_empty() {
                continue;
            }
            let mut keywords = event.keywords.clone();
            keywords.sort_by_key(|k| p.keywords[k.index()].mask);

            let array_offset = self.out.position()?;
            for keyword in &keywords {
                let keyword_offset = self.offset_of(Some(*keyword))?;
                self.out.put_u32(keyword_offset);
            }
            keyword_arrays[slot] = (to_offset(keywords.len())?, array_offset);
        }

        let entries = self.out.reserve(EVENT_ENTRY_SIZE * order.len());
        for (slot, &i) in order.iter().enumerate() {
            let event = &p.events[i];
            let channel = event.channel.and_then(|id| p.channel(id));
            let level = event.level.and_then(|id| p.level(id));
            let opcode = event.opcode.and_then(|id| p.opcode(id));
            let task = event.task.and_then(|id| p.task(id));

            let template_offset = self.template_offset(event.template)?;
            let opcode_offset = self.offset_of(event.opcode)?;
            let level_offset = self.offset_of(event.level)?;
            let task_offset = self.offset_of(event.task)?;
            let channel_offset = self.offset_of(event.channel)?;
            let (keyword_count, keywords_offset) = keyword_arrays[slot];

            SlotWriter::at(self.out.patch(entries), slot * EVENT_ENTRY_SIZE)
                .u16(event.id)
                .u8(event.version)
                .u8(channel.map_or(0, |c| c.value))
                .u8(level.map_or(0, |l| l.value))
                .u8(opcode.map_or(0, |o| o.value))
                .u16(task.map_or(0, |t| t.value))
                .u64(event.keyword_mask(p))
                .u32(Message::wire_id(event.message.as_ref()))
                .u32(template_offset)
                .u32(opcode_offset)
                .u32(level_offset)
                .u32(task_offset)
                .u32(keyword_count)
                .u32(keywords_offset)
                .u32(channel_offset);
        }

        let size = self.out.position()? - offset;
        SlotWriter::new(self.out.patch(header))
            .sig(ElementKind::Event.signature())
            .u32(size)
            .u32(to_offset(order.len())?);
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Event, Keyword, Level, Opcode, Task, in_type, out_type,
    };
    use crate::utils::bytes::{read_u16_le, read_u32_le};
    use pretty_assertions::assert_eq;

    fn provider() -> Provider {
        Provider::new(
            "{4F2E3A10-9B1C-4D7E-8A5F-0C6B2D9E1F30}".parse().unwrap(),
            "Writer-Test",
        )
    }

    fn find(blob: &[u8], sig: &[u8; 4]) -> usize {
        blob.windows(4)
            .position(|w| w == sig)
            .unwrap_or_else(|| panic!("{} block present", String::from_utf8_lossy(sig)))
    }

    fn u32_at(blob: &[u8], offset: usize) -> u32 {
        read_u32_le(blob, offset).unwrap()
    }

    #[test]
    fn test_crim_header_and_provider_table() {
        let p = provider();
        let blob = write_manifest(std::slice::from_ref(&p)).unwrap();

        assert_eq!(&blob[0..4], b"CRIM");
        assert_eq!(u32_at(&blob, 4) as usize, blob.len());
        assert_eq!(read_u16_le(&blob, 8), Some(3));
        assert_eq!(read_u16_le(&blob, 10), Some(1));
        assert_eq!(u32_at(&blob, 12), 1);
        assert_eq!(&blob[16..32], &p.guid.to_bytes());
        assert_eq!(u32_at(&blob, 32), 36);
        assert_eq!(&blob[36..40], b"WEVT");
    }

    #[test]
    fn test_empty_provider_still_writes_definition_lists() {
        let blob = write_manifest(&[provider()]).unwrap();
        // Provider block: header + four descriptors.
        assert_eq!(u32_at(&blob, 36 + 12), 4);
        let tags: Vec<u32> = (0..4).map(|i| u32_at(&blob, 36 + 16 + i * 8)).collect();
        assert_eq!(
            tags,
            vec![
                ElementKind::Opcode.tag(),
                ElementKind::Level.tag(),
                ElementKind::Task.tag(),
                ElementKind::Keyword.tag()
            ]
        );
        for sig in [b"OPCO", b"LEVL", b"TASK", b"KEYW"] {
            let at = find(&blob, sig);
            assert_eq!(u32_at(&blob, at + 4), 12);
            assert_eq!(u32_at(&blob, at + 8), 0);
        }
        assert!(!blob.windows(4).any(|w| w == b"EVNT"));
    }

    #[test]
    fn test_opcodes_sorted_by_value_then_task() {
        let mut p = provider();
        let task = p.add_task(Task {
            name: "Connect".to_string(),
            value: 2,
            guid: None,
            message: None,
        });
        for (name, value, task) in [("Stop", 2, None), ("Start", 1, Some(task)), ("Info", 1, None)] {
            p.add_opcode(Opcode {
                name: name.to_string(),
                value,
                task,
                message: None,
            });
        }
        let blob = write_manifest(&[p]).unwrap();
        let opco = find(&blob, b"OPCO");
        let ids: Vec<u32> = (0..3).map(|i| u32_at(&blob, opco + 12 + i * 12)).collect();
        assert_eq!(ids, vec![0x0001_0000, 0x0001_0002, 0x0002_0000]);
    }

    #[test]
    fn test_events_are_aligned_and_sorted() {
        let mut p = provider();
        let kw_b = p.add_keyword(Keyword {
            name: "B".to_string(),
            mask: 0x2,
            message: None,
        });
        let kw_a = p.add_keyword(Keyword {
            name: "A".to_string(),
            mask: 0x1,
            message: None,
        });
        let level = p.add_level(Level {
            name: "win:Informational".to_string(),
            value: 4,
            message: None,
        });
        let mut second = Event::new(2, 0);
        second.keywords = vec![kw_b, kw_a];
        second.level = Some(level);
        p.add_event(second);
        p.add_event(Event::new(1, 0));

        let blob = write_manifest(&[p]).unwrap();
        let evnt = find(&blob, b"EVNT");
        assert_eq!(evnt % EVENT_ALIGNMENT, 0);
        assert_eq!(u32_at(&blob, evnt + 8), 2);

        // Two keyword offsets precede the entries.
        let entries = evnt + LIST_HEADER_SIZE + 8;
        assert_eq!(read_u16_le(&blob, entries), Some(1));
        let second = entries + EVENT_ENTRY_SIZE;
        assert_eq!(read_u16_le(&blob, second), Some(2));
        assert_eq!(blob[second + 4], 4);
        assert_eq!(read_u32_le(&blob, second + 8), Some(0x3));
        assert_eq!(u32_at(&blob, second + 36), 2);

        let keywords_offset = u32_at(&blob, second + 40) as usize;
        assert_eq!(keywords_offset, evnt + LIST_HEADER_SIZE);
        let keyw = find(&blob, b"KEYW");
        // Mask 0x1 sorts first both in KEYW and in the event's array.
        assert_eq!(u32_at(&blob, keywords_offset) as usize, keyw + 12);
        assert_eq!(u32_at(&blob, keywords_offset + 4) as usize, keyw + 12 + 16);
    }

    #[test]
    fn test_struct_members_use_absolute_references() {
        let mut p = provider();
        let template = p.add_template(Template::new(vec![
            DataProperty::new("Flags", in_type::UINT32, out_type::HEX_INT32).into(),
            StructProperty::new(
                "Blob",
                vec![
                    DataProperty::new("Size", in_type::UINT16, out_type::NULL),
                    DataProperty::new("Bytes", in_type::BINARY, out_type::NULL)
                        .with_length(Extent::Variable(0)),
                ],
            )
            .into(),
        ]));
        let mut event = Event::new(7, 0);
        event.template = Some(template);
        p.add_event(event);

        let blob = write_manifest(&[p]).unwrap();
        let temp = find(&blob, b"TEMP");
        assert_eq!(u32_at(&blob, temp + 8), 2);
        assert_eq!(u32_at(&blob, temp + 12), 4);

        let items = u32_at(&blob, temp + 16) as usize;
        let entry = |i: usize| items + i * PROPERTY_ENTRY_SIZE;

        assert_eq!(u32_at(&blob, entry(1)), PropertyFlags::STRUCT.bits());
        assert_eq!(read_u16_le(&blob, entry(1) + 4), Some(2));
        assert_eq!(read_u16_le(&blob, entry(1) + 6), Some(2));

        assert_eq!(u32_at(&blob, entry(3)), PropertyFlags::PARAM_LENGTH.bits());
        // Member 0 of a struct whose members start at entry 2.
        assert_eq!(read_u16_le(&blob, entry(3) + 14), Some(2));
    }

    #[test]
    fn test_identical_templates_are_written_once() {
        let mut p = provider();
        let shape = Template::new(vec![
            DataProperty::new("Value", in_type::UINT32, out_type::NULL).into(),
        ]);
        let first = p.add_template(shape.clone());
        let second = p.add_template(shape);
        for (id, template) in [(1, first), (2, second)] {
            let mut event = Event::new(id, 0);
            event.template = Some(template);
            p.add_event(event);
        }

        let blob = write_manifest(&[p]).unwrap();
        let ttbl = find(&blob, b"TTBL");
        assert_eq!(u32_at(&blob, ttbl + 8), 1);

        let evnt = find(&blob, b"EVNT");
        let entries = evnt + LIST_HEADER_SIZE;
        let t1 = u32_at(&blob, entries + 20);
        let t2 = u32_at(&blob, entries + EVENT_ENTRY_SIZE + 20);
        assert_eq!(t1, t2);
        assert_eq!(t1 as usize, ttbl + LIST_HEADER_SIZE);
    }

    #[test]
    fn test_invalid_model_is_rejected_before_encoding() {
        let mut p = provider();
        p.add_event(Event::new(1, 0));
        p.add_event(Event::new(1, 0));
        assert!(matches!(
            write_manifest(&[p]),
            Err(ManifestWriteError::Model(_))
        ));
    }
}
