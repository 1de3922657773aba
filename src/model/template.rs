use serde::Serialize;

use super::MapId;
use crate::binxml::{BinXmlError, XmlElement, XmlNode};
use crate::guid::Guid;
use crate::template_id::{TemplateIdScheme, template_identity};

/// Input types (TDH `InType` values) stored in a data property entry.
pub mod in_type {
    pub const NULL: u8 = 0x00;
    pub const UNICODE_STRING: u8 = 0x01;
    pub const ANSI_STRING: u8 = 0x02;
    pub const INT8: u8 = 0x03;
    pub const UINT8: u8 = 0x04;
    pub const INT16: u8 = 0x05;
    pub const UINT16: u8 = 0x06;
    pub const INT32: u8 = 0x07;
    pub const UINT32: u8 = 0x08;
    pub const INT64: u8 = 0x09;
    pub const UINT64: u8 = 0x0a;
    pub const FLOAT: u8 = 0x0b;
    pub const DOUBLE: u8 = 0x0c;
    pub const BOOLEAN: u8 = 0x0d;
    pub const BINARY: u8 = 0x0e;
    pub const GUID: u8 = 0x0f;
    pub const POINTER: u8 = 0x10;
    pub const FILETIME: u8 = 0x11;
    pub const SYSTEMTIME: u8 = 0x12;
    pub const SID: u8 = 0x13;
    pub const HEX_INT32: u8 = 0x14;
    pub const HEX_INT64: u8 = 0x15;
}

/// Output types (TDH `OutType` values).
pub mod out_type {
    pub const NULL: u8 = 0x00;
    pub const STRING: u8 = 0x01;
    pub const DATETIME: u8 = 0x02;
    pub const BYTE: u8 = 0x03;
    pub const UNSIGNED_BYTE: u8 = 0x04;
    pub const SHORT: u8 = 0x05;
    pub const UNSIGNED_SHORT: u8 = 0x06;
    pub const INT: u8 = 0x07;
    pub const UNSIGNED_INT: u8 = 0x08;
    pub const LONG: u8 = 0x09;
    pub const UNSIGNED_LONG: u8 = 0x0a;
    pub const FLOAT: u8 = 0x0b;
    pub const DOUBLE: u8 = 0x0c;
    pub const BOOLEAN: u8 = 0x0d;
    pub const GUID: u8 = 0x0e;
    pub const HEX_BINARY: u8 = 0x0f;
    pub const HEX_INT8: u8 = 0x10;
    pub const HEX_INT16: u8 = 0x11;
    pub const HEX_INT32: u8 = 0x12;
    pub const HEX_INT64: u8 = 0x13;
    pub const PID: u8 = 0x14;
    pub const TID: u8 = 0x15;
    pub const XML: u8 = 0x1c;
    pub const WIN32_ERROR: u8 = 0x1e;
    pub const NTSTATUS: u8 = 0x1f;
    pub const HRESULT: u8 = 0x20;
}

/// How many elements (count) or bytes (length) a property carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Extent {
    /// A literal known at compile time.
    Fixed(u16),
    /// Taken at runtime from an earlier sibling property, by index in the sibling list.
    Variable(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DataProperty {
    pub name: String,
    pub in_type: u8,
    pub out_type: u8,
    pub count: Option<Extent>,
    pub length: Option<Extent>,
    pub map: Option<MapId>,
}

impl DataProperty {
    pub fn new(name: impl Into<String>, in_type: u8, out_type: u8) -> Self {
        DataProperty {
            name: name.into(),
            in_type,
            out_type,
            count: None,
            length: None,
            map: None,
        }
    }

    pub fn with_count(mut self, count: Extent) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_length(mut self, length: Extent) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_map(mut self, map: MapId) -> Self {
        self.map = Some(map);
        self
    }
}

/// A struct property. Members are data properties and form their own index space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StructProperty {
    pub name: String,
    pub members: Vec<DataProperty>,
    pub count: Option<Extent>,
    pub length: Option<Extent>,
}

impl StructProperty {
    pub fn new(name: impl Into<String>, members: Vec<DataProperty>) -> Self {
        StructProperty {
            name: name.into(),
            members,
            count: None,
            length: None,
        }
    }

    pub fn with_count(mut self, count: Extent) -> Self {
        self.count = Some(count);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Property {
    Data(DataProperty),
    Struct(StructProperty),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Property::Data(d) => &d.name,
            Property::Struct(s) => &s.name,
        }
    }

    pub fn count(&self) -> Option<Extent> {
        match self {
            Property::Data(d) => d.count,
            Property::Struct(s) => s.count,
        }
    }

    pub fn length(&self) -> Option<Extent> {
        match self {
            Property::Data(d) => d.length,
            Property::Struct(s) => s.length,
        }
    }

    pub fn as_data(&self) -> Option<&DataProperty> {
        match self {
            Property::Data(d) => Some(d),
            Property::Struct(_) => None,
        }
    }

    /// The value type used for this property's substitution and identity hash.
    ///
    /// Structs are carried as opaque binary payloads.
    pub fn type_tag(&self) -> u8 {
        match self {
            Property::Data(d) => d.in_type,
            Property::Struct(_) => in_type::BINARY,
        }
    }
}

impl From<DataProperty> for Property {
    fn from(value: DataProperty) -> Self {
        Property::Data(value)
    }
}

impl From<StructProperty> for Property {
    fn from(value: StructProperty) -> Self {
        Property::Struct(value)
    }
}

/// A reusable parameter schema shared by any number of events.
///
/// Two templates are the same physical template when they compare equal; the identity GUID is
/// derived from the canonical XML and property type tags and is never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Template {
    pub properties: Vec<Property>,
    /// Author-supplied payload shape. When absent an `<EventData>` element is synthesized.
    pub user_data: Option<XmlElement>,
}

impl Template {
    pub fn new(properties: Vec<Property>) -> Self {
        Template {
            properties,
            user_data: None,
        }
    }

    pub fn with_user_data(mut self, document: XmlElement) -> Self {
        self.user_data = Some(document);
        self
    }

    /// Number of flattened struct members (entries after the top-level properties).
    pub fn member_count(&self) -> usize {
        self.properties
            .iter()
            .map(|p| match p {
                Property::Data(_) => 0,
                Property::Struct(s) => s.members.len(),
            })
            .sum()
    }

    pub fn total_property_count(&self) -> usize {
        self.properties.len() + self.member_count()
    }

    pub fn type_tags(&self) -> Vec<u8> {
        self.properties.iter().map(Property::type_tag).collect()
    }

    /// The document whose shape is encoded as BinXml and hashed into the identity.
    pub fn document(&self) -> XmlElement {
        if let Some(document) = &self.user_data {
            return document.clone();
        }

        let children = self
            .properties
            .iter()
            .enumerate()
            .map(|(index, property)| {
                XmlNode::Element(
                    XmlElement::new("Data")
                        .with_attribute("Name", property.name())
                        .with_child(XmlNode::Substitution {
                            index: u16::try_from(index).unwrap_or(u16::MAX),
                            optional: false,
                        }),
                )
            })
            .collect();

        XmlElement {
            name: "EventData".to_string(),
            attributes: Vec::new(),
            children,
        }
    }

    pub fn canonical_xml(&self) -> Result<String, BinXmlError> {
        self.document().to_canonical_xml()
    }

    pub fn identity(&self, scheme: TemplateIdScheme) -> Result<Guid, BinXmlError> {
        Ok(template_identity(
            scheme,
            &self.canonical_xml()?,
            &self.type_tags(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn count_and_name() -> Template {
        Template::new(vec![
            DataProperty::new("count", in_type::UINT32, out_type::UNSIGNED_INT)
                .with_count(Extent::Fixed(1))
                .into(),
            DataProperty::new("name", in_type::UNICODE_STRING, out_type::STRING)
                .with_length(Extent::Variable(0))
                .into(),
        ])
    }

    #[test]
    fn test_synthesized_document_names_each_property() {
        assert_eq!(
            count_and_name().canonical_xml().unwrap(),
            r#"<EventData><Data Name="count">%1</Data><Data Name="name">%2</Data></EventData>"#
        );
    }

    #[test]
    fn test_member_counts() {
        let template = Template::new(vec![
            DataProperty::new("n", in_type::UINT16, out_type::NULL).into(),
            StructProperty::new(
                "pair",
                vec![
                    DataProperty::new("a", in_type::UINT8, out_type::NULL),
                    DataProperty::new("b", in_type::UINT8, out_type::NULL),
                ],
            )
            .into(),
        ]);
        assert_eq!(template.member_count(), 2);
        assert_eq!(template.total_property_count(), 4);
        assert_eq!(template.type_tags(), vec![in_type::UINT16, in_type::BINARY]);
    }

    #[test]
    fn test_identity_depends_on_property_names() {
        let a = count_and_name();
        let mut b = count_and_name();
        if let Property::Data(d) = &mut b.properties[1] {
            d.name = "label".to_string();
        }
        assert_ne!(
            a.identity(TemplateIdScheme::NameBased).unwrap(),
            b.identity(TemplateIdScheme::NameBased).unwrap()
        );
    }
}
