use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;

use super::BinXmlError;

/// A node of a template payload document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    /// A placeholder for the value of property `index` (zero-based).
    Substitution { index: u16, optional: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct XmlAttribute {
    pub name: String,
    /// Text and substitution nodes, concatenated.
    pub value: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(XmlAttribute {
            name: name.into(),
            value: vec![XmlNode::Text(value.into())],
        });
        self
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    /// The value of attribute `name` if it is plain text.
    pub fn attribute_text(&self, name: &str) -> Option<String> {
        let attr = self.attributes.iter().find(|a| a.name == name)?;
        let mut out = String::new();
        for node in &attr.value {
            match node {
                XmlNode::Text(text) => out.push_str(text),
                _ => return None,
            }
        }
        Some(out)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Render compact XML text; substitutions appear as `%N` with `N` one-based.
    ///
    /// This text is the input of the template identity hash, so its output must stay stable.
    pub fn to_canonical_xml(&self) -> Result<String, BinXmlError> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner()).map_err(|e| BinXmlError::Render(e.to_string()))
    }
}

fn substitution_text(index: u16) -> String {
    format!("%{}", u32::from(index) + 1)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> Result<(), BinXmlError> {
    let mut start = BytesStart::new(element.name.as_str());
    for attr in &element.attributes {
        let mut value = String::new();
        for node in &attr.value {
            match node {
                XmlNode::Text(text) => value.push_str(text),
                XmlNode::Substitution { index, .. } => value.push_str(&substitution_text(*index)),
                XmlNode::Element(_) => {
                    return Err(BinXmlError::ElementInAttribute {
                        name: attr.name.clone(),
                    });
                }
            }
        }
        start.push_attribute((attr.name.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e)?,
            XmlNode::Text(text) => emit(writer, Event::Text(BytesText::new(text)))?,
            XmlNode::Substitution { index, .. } => {
                let text = substitution_text(*index);
                emit(writer, Event::Text(BytesText::new(&text)))?
            }
        }
    }
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), BinXmlError> {
    writer
        .write_event(event)
        .map_err(|e| BinXmlError::Render(e.to_string()))
}
