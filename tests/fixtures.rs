#![allow(dead_code)]
use std::sync::Once;

use crimson::binxml::{XmlElement, XmlNode};
use crimson::model::{
    Channel, DataProperty, Event, Extent, Filter, Keyword, Level, Map, MapKind, Message,
    NamedQuery, NamedQueryItem, Opcode, Provider, StructProperty, Task, Template, in_type,
    out_type,
};
use crimson::{Guid, MessageTable, ReadManifest, read_manifest, write_manifest};

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

pub fn guid(s: &str) -> Guid {
    s.parse().unwrap()
}

pub fn level(name: &str, value: u8) -> Level {
    Level {
        name: name.to_string(),
        value,
        message: None,
    }
}

pub fn keyword(name: &str, mask: u64) -> Keyword {
    Keyword {
        name: name.to_string(),
        mask,
        message: None,
    }
}

pub fn opcode(name: &str, value: u8) -> Opcode {
    Opcode {
        name: name.to_string(),
        value,
        task: None,
        message: None,
    }
}

pub fn task(name: &str, value: u16) -> Task {
    Task {
        name: name.to_string(),
        value,
        guid: None,
        message: None,
    }
}

/// `count` (fixed 1) followed by `name`, whose length is taken from `count`.
pub fn count_and_name_template() -> Template {
    Template::new(vec![
        DataProperty::new("count", in_type::UINT32, out_type::UNSIGNED_INT)
            .with_count(Extent::Fixed(1))
            .into(),
        DataProperty::new("name", in_type::UNICODE_STRING, out_type::STRING)
            .with_length(Extent::Variable(0))
            .into(),
    ])
}

/// A provider exercising every block kind.
///
/// Every list is authored in its wire order so that a decoded copy compares equal to it once
/// the compile-time-only fields are normalized (see [`persisted`]).
pub fn sample_provider() -> Provider {
    let mut p = Provider::new(
        guid("{8E598056-8993-11D2-819E-0000F875A064}"),
        "Crimson-Sample-Provider",
    );
    p.symbol = "CRIMSON_SAMPLE_PROVIDER".to_string();
    p.message = Some(Message::new(0x9000_0001, "Crimson-Sample-Provider"));

    let operational = p.add_channel(Channel {
        name: "Crimson-Sample/Operational".to_string(),
        value: 16,
        message: Some(Message::new(0x9000_0010, "Operational")),
    });
    p.add_channel(Channel {
        name: "Crimson-Sample/Debug".to_string(),
        value: 17,
        message: None,
    });

    let error = p.add_level(Level {
        message: Some(Message::new(0x5000_0002, "Error")),
        ..level("win:Error", 2)
    });
    let info = p.add_level(level("win:Informational", 4));

    let connect = p.add_task(Task {
        guid: Some(guid("{3F1A2B4C-5D6E-4F70-8192-A3B4C5D6E7F8}")),
        message: Some(Message::new(0x7000_0001, "Connect")),
        ..task("Connect", 1)
    });
    p.add_task(task("Disconnect", 2));

    let start = p.add_opcode(opcode("win:Start", 1));
    p.add_opcode(Opcode {
        task: Some(connect),
        ..opcode("Handshake", 1)
    });
    p.add_opcode(opcode("win:Stop", 2));

    let network = p.add_keyword(keyword("Network", 0x1));
    let storage = p.add_keyword(Keyword {
        message: Some(Message::new(0x1000_0002, "Storage")),
        ..keyword("Storage", 0x2)
    });

    let status = p.add_map(
        Map::new(MapKind::Value, "StatusMap")
            .with_item(0, Some(Message::new(0x3000_0000, "Success")))
            .with_item(5, Some(Message::new(0x3000_0005, "Access denied"))),
    );
    p.add_map(
        Map::new(MapKind::Bit, "AccessMask")
            .with_item(0x1, Some(Message::new(0x3000_0101, "Read")))
            .with_item(0x2, None),
    );

    let simple = p.add_template(count_and_name_template());
    let with_struct = p.add_template(Template::new(vec![
        DataProperty::new("Status", in_type::UINT32, out_type::HEX_INT32)
            .with_map(status)
            .into(),
        DataProperty::new("PeerCount", in_type::UINT16, out_type::NULL).into(),
        StructProperty::new(
            "Peers",
            vec![
                DataProperty::new("AddressLength", in_type::UINT16, out_type::NULL),
                DataProperty::new("Address", in_type::BINARY, out_type::HEX_BINARY)
                    .with_length(Extent::Variable(0)),
            ],
        )
        .with_count(Extent::Variable(1))
        .into(),
    ]));
    let user_data = p.add_template(
        Template::new(vec![
            DataProperty::new("Path", in_type::UNICODE_STRING, out_type::STRING).into(),
        ])
        .with_user_data(
            XmlElement::new("FileEvent")
                .with_attribute("xmlns", "http://example.com/crimson")
                .with_child(XmlNode::Element(XmlElement::new("Path").with_child(
                    XmlNode::Substitution {
                        index: 0,
                        optional: true,
                    },
                )))
                .with_child(XmlNode::Element(XmlElement::new("Marker"))),
        ),
    );

    let mut connected = Event::new(100, 0);
    connected.channel = Some(operational);
    connected.level = Some(info);
    connected.task = Some(connect);
    connected.opcode = Some(start);
    connected.keywords = vec![network, storage];
    connected.template = Some(simple);
    connected.message = Some(Message::new(0xB000_0064, "Connected to %2"));
    p.add_event(connected);

    let mut peers = Event::new(101, 1);
    peers.level = Some(error);
    peers.template = Some(with_struct);
    p.add_event(peers);

    let mut file = Event::new(200, 0);
    file.keywords = vec![storage];
    file.template = Some(user_data);
    p.add_event(file);

    p.add_filter(Filter {
        name: "ByStatus".to_string(),
        value: 7,
        version: 1,
        message: Some(Message::new(0xD000_0007, "Filter by status")),
        template: Some(simple),
    });

    p.add_named_query(NamedQuery {
        name: "Errors".to_string(),
        format: "Level = %1".to_string(),
        items: vec![
            NamedQueryItem {
                name: "Level".to_string(),
                value: "2".to_string(),
            },
            NamedQueryItem {
                name: "Channel".to_string(),
                value: "Crimson-Sample/Operational".to_string(),
            },
        ],
    });

    p
}

/// A second, minimal provider.
pub fn other_provider() -> Provider {
    let mut p = Provider::new(
        guid("{A1B2C3D4-E5F6-4711-8899-AABBCCDDEEFF}"),
        "Crimson-Other-Provider",
    );
    p.message = Some(Message::new(0x9000_0002, "Crimson-Other-Provider"));
    let warning = p.add_level(level("win:Warning", 3));
    let mut event = Event::new(1, 0);
    event.level = Some(warning);
    p.add_event(event);
    p
}

/// The provider as it reads back: the symbol is not stored and the name comes from the message.
pub fn persisted(provider: &Provider) -> Provider {
    let mut p = provider.clone();
    p.symbol.clear();
    p.name = p.message.as_ref().map(|m| m.text.clone()).unwrap_or_default();
    p
}

pub fn roundtrip(providers: &[Provider]) -> ReadManifest {
    ensure_env_logger_initialized();
    let blob = write_manifest(providers).unwrap();
    read_manifest(&blob, &MessageTable::from_providers(providers)).unwrap()
}

/// Absolute offset of the first occurrence of a block signature.
pub fn find_block(blob: &[u8], sig: &[u8; 4]) -> usize {
    blob.windows(4)
        .position(|w| w == sig)
        .unwrap_or_else(|| panic!("no {} block", String::from_utf8_lossy(sig)))
}
