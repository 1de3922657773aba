mod fixtures;

use fixtures::*;

use crimson::model::{
    DataProperty, Event, Extent, Property, Template, TemplateId, in_type, out_type,
};
use crimson::{
    ManifestReader, ManifestWriter, MessageTable, ReaderSettings, TemplateIdScheme,
    WriterSettings, template_identity, write_manifest,
};
use pretty_assertions::assert_eq;

#[test]
fn test_sample_provider_roundtrips() {
    let provider = sample_provider();
    let read = roundtrip(std::slice::from_ref(&provider));

    assert_eq!(read.major_version, 3);
    assert_eq!(read.minor_version, 1);
    assert!(read.diagnostics.is_empty(), "{:?}", read.diagnostics);
    assert_eq!(read.providers, vec![persisted(&provider)]);
}

#[test]
fn test_multiple_providers_keep_their_order() {
    let providers = vec![sample_provider(), other_provider()];
    let read = roundtrip(&providers);

    let expected: Vec<_> = providers.iter().map(persisted).collect();
    assert_eq!(read.providers, expected);
    assert!(read.provider(&providers[1].guid).is_some());
}

#[test]
fn test_count_and_name_resolves_length_to_first_sibling() {
    let mut p = other_provider();
    let template = p.add_template(count_and_name_template());
    p.events[0].template = Some(template);

    let read = roundtrip(&[p]);
    let back = &read.providers[0].templates[0];
    match &back.properties[1] {
        Property::Data(name) => {
            assert_eq!(name.name, "name");
            assert_eq!(name.length, Some(Extent::Variable(0)));
            assert_eq!(name.count, None);
        }
        other => panic!("expected a data property, got {other:?}"),
    }
    assert_eq!(back.properties[0].count(), Some(Extent::Fixed(1)));
}

#[test]
fn test_struct_members_roundtrip_with_member_relative_references() {
    let read = roundtrip(&[sample_provider()]);
    let template = &read.providers[0].templates[1];

    let Property::Struct(peers) = &template.properties[2] else {
        panic!("expected a struct property");
    };
    assert_eq!(peers.members.len(), 2);
    assert_eq!(peers.count, Some(Extent::Variable(1)));
    assert_eq!(peers.members[1].length, Some(Extent::Variable(0)));
    assert_eq!(template.total_property_count(), 5);
}

#[test]
fn test_identical_templates_share_one_record() {
    let mut p = other_provider();
    let first = p.add_template(count_and_name_template());
    let second = p.add_template(count_and_name_template());
    p.events[0].template = Some(first);
    let mut event = Event::new(2, 0);
    event.template = Some(second);
    p.add_event(event);

    let read = roundtrip(&[p]);
    let back = &read.providers[0];
    assert_eq!(back.templates.len(), 1);
    assert_eq!(back.events[0].template, Some(TemplateId(0)));
    assert_eq!(back.events[1].template, Some(TemplateId(0)));
}

#[test]
fn test_template_identity_is_deterministic() {
    let template = count_and_name_template();
    let xml = template.canonical_xml().unwrap();
    for scheme in TemplateIdScheme::ALL {
        let a = template_identity(scheme, &xml, &template.type_tags());
        let b = template.identity(scheme).unwrap();
        assert_eq!(a, b);
    }

    let mut reordered = template.type_tags();
    reordered.reverse();
    assert_ne!(
        template_identity(TemplateIdScheme::NameBased, &xml, &template.type_tags()),
        template_identity(TemplateIdScheme::NameBased, &xml, &reordered)
    );
}

#[test]
fn test_blobs_are_byte_identical_across_writes() {
    let providers = vec![sample_provider(), other_provider()];
    assert_eq!(
        write_manifest(&providers).unwrap(),
        write_manifest(&providers).unwrap()
    );
}

#[test]
fn test_legacy_scheme_is_accepted_by_the_reader() {
    ensure_env_logger_initialized();
    let providers = vec![sample_provider()];
    let writer = ManifestWriter::new(
        WriterSettings::new()
            .template_id_scheme(TemplateIdScheme::Legacy)
            .version(3, 2),
    );
    let blob = writer.write(&providers).unwrap();

    let reader = ManifestReader::new(
        ReaderSettings::new().messages(MessageTable::from_providers(&providers)),
    );
    let read = reader.read(&blob).unwrap();
    assert_eq!(read.minor_version, 2);
    assert!(read.diagnostics.is_empty());
}

#[test]
fn test_opcodes_are_sorted_stably() {
    let mut p = other_provider();
    let connect = p.add_task(task("Connect", 4));
    for (name, value) in [("b", 3), ("a", 1), ("c", 3), ("d", 1)] {
        p.add_opcode(opcode(name, value));
    }
    p.add_opcode(crimson::model::Opcode {
        task: Some(connect),
        ..opcode("scoped", 1)
    });

    let read = roundtrip(&[p]);
    let names: Vec<&str> = read.providers[0]
        .opcodes
        .iter()
        .map(|o| o.name.as_str())
        .collect();
    assert_eq!(names, vec!["a", "d", "scoped", "b", "c"]);
    assert_eq!(read.providers[0].opcodes[2].task.map(|t| t.index()), Some(0));
}

#[test]
fn test_keywords_and_events_are_sorted_stably() {
    let mut p = other_provider();
    for (name, mask) in [("high", 0x80), ("low-1", 0x1), ("low-2", 0x1)] {
        p.add_keyword(keyword(name, mask));
    }
    p.events.clear();
    for (id, version) in [(9, 0), (3, 2), (3, 1), (5, 0)] {
        p.add_event(Event::new(id, version));
    }

    let read = roundtrip(&[p]);
    let back = &read.providers[0];
    let keywords: Vec<&str> = back.keywords.iter().map(|k| k.name.as_str()).collect();
    assert_eq!(keywords, vec!["low-1", "low-2", "high"]);
    let events: Vec<(u16, u8)> = back.events.iter().map(|e| (e.id, e.version)).collect();
    assert_eq!(events, vec![(3, 2), (3, 1), (5, 0), (9, 0)]);
}

#[test]
fn test_levels_and_map_items_are_sorted_by_value() {
    let mut p = other_provider();
    p.add_level(level("win:Critical", 1));
    let map = p.add_map(
        crimson::model::Map::new(crimson::model::MapKind::Value, "Codes")
            .with_item(9, None)
            .with_item(2, None),
    );
    let template = p.add_template(Template::new(vec![
        DataProperty::new("Code", in_type::UINT32, out_type::NULL)
            .with_map(map)
            .into(),
    ]));
    p.events[0].template = Some(template);

    let read = roundtrip(&[p]);
    let back = &read.providers[0];
    let levels: Vec<u8> = back.levels.iter().map(|l| l.value).collect();
    assert_eq!(levels, vec![1, 3]);
    let items: Vec<u32> = back.maps[0].items.iter().map(|i| i.value).collect();
    assert_eq!(items, vec![2, 9]);
    // The event's level still points at "win:Warning" after reordering.
    let level = back.events[0].level.and_then(|l| back.level(l)).unwrap();
    assert_eq!(level.name, "win:Warning");
    assert_eq!(
        back.templates[0].properties[0].as_data().and_then(|d| d.map),
        Some(map)
    );
}

#[test]
fn test_user_data_template_keeps_its_payload() {
    let provider = sample_provider();
    let read = roundtrip(std::slice::from_ref(&provider));
    let template = &read.providers[0].templates[2];
    assert_eq!(template.user_data, provider.templates[2].user_data);
    assert_eq!(
        template.canonical_xml().unwrap(),
        provider.templates[2].canonical_xml().unwrap()
    );
}

#[test]
fn test_maps_filters_and_queries_roundtrip() {
    let provider = sample_provider();
    let read = roundtrip(std::slice::from_ref(&provider));
    let back = &read.providers[0];

    assert_eq!(back.maps, provider.maps);
    assert_eq!(back.filters, provider.filters);
    assert_eq!(back.named_queries, provider.named_queries);
    assert_eq!(back.filters[0].template, Some(TemplateId(0)));
}

#[test]
fn test_every_event_reference_points_at_the_right_kind() {
    let provider = sample_provider();
    let read = roundtrip(std::slice::from_ref(&provider));
    let back = &read.providers[0];

    let connected = back.event(100, 0).unwrap();
    assert_eq!(
        back.channel(connected.channel.unwrap()).unwrap().name,
        "Crimson-Sample/Operational"
    );
    assert_eq!(back.task(connected.task.unwrap()).unwrap().name, "Connect");
    assert_eq!(back.opcode(connected.opcode.unwrap()).unwrap().name, "win:Start");
    assert_eq!(connected.keyword_mask(back), 0x3);
    assert_eq!(
        back.template(connected.template.unwrap()),
        provider.template(provider.event(100, 0).unwrap().template.unwrap())
    );
}
