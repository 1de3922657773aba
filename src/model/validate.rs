use hashbrown::HashSet;
use thiserror::Error;

use super::{DataProperty, Extent, Property, Provider, Template};
use crate::guid::Guid;

/// An object graph that cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("provider {guid} is defined more than once")]
    DuplicateProvider { guid: Guid },

    #[error("provider {provider}: event {id} version {version} is defined more than once")]
    DuplicateEvent { provider: Guid, id: u16, version: u8 },

    #[error("provider {provider}: map name `{name}` is used more than once")]
    DuplicateMapName { provider: Guid, name: String },

    #[error("provider {provider}: {what} refers to missing index {index}")]
    DanglingReference {
        provider: Guid,
        what: &'static str,
        index: usize,
    },

    #[error("provider {provider}: task value {value} is used more than once")]
    DuplicateTaskValue { provider: Guid, value: u16 },

    #[error("provider {provider}: task `{task}` has a nil GUID")]
    NilTaskGuid { provider: Guid, task: String },

    #[error("provider {provider}: opcode `{opcode}` is scoped to a task with value 0")]
    OpcodeTaskValueZero { provider: Guid, opcode: String },

    #[error(
        "provider {provider}: template {template} property `{property}` has a variable {field} \
         referring to sibling {target}, which is not an earlier data property"
    )]
    InvalidPropertyReference {
        provider: Guid,
        template: usize,
        property: String,
        field: &'static str,
        target: u16,
    },

    #[error("provider {provider}: template {template} has two sibling properties named `{name}`")]
    DuplicatePropertyName {
        provider: Guid,
        template: usize,
        name: String,
    },

    #[error("provider {provider}: template {template} has {count} property entries")]
    TooManyProperties {
        provider: Guid,
        template: usize,
        count: usize,
    },
}

/// Check every invariant the encoder relies on.
pub fn validate_providers(providers: &[Provider]) -> Result<(), ModelError> {
    let mut guids = HashSet::new();
    for provider in providers {
        if !guids.insert(provider.guid) {
            return Err(ModelError::DuplicateProvider {
                guid: provider.guid,
            });
        }
        validate_provider(provider)?;
    }
    Ok(())
}

fn validate_provider(p: &Provider) -> Result<(), ModelError> {
    let dangling = |what: &'static str, index: usize| ModelError::DanglingReference {
        provider: p.guid,
        what,
        index,
    };
    let check = |what: &'static str, index: usize, len: usize| {
        if index < len {
            Ok(())
        } else {
            Err(dangling(what, index))
        }
    };

    // Opcodes refer to their task by value.
    let mut task_values = HashSet::new();
    for task in &p.tasks {
        if !task_values.insert(task.value) {
            return Err(ModelError::DuplicateTaskValue {
                provider: p.guid,
                value: task.value,
            });
        }
        if task.guid.is_some_and(|guid| guid.is_nil()) {
            return Err(ModelError::NilTaskGuid {
                provider: p.guid,
                task: task.name.clone(),
            });
        }
    }

    for opcode in &p.opcodes {
        if let Some(task) = opcode.task {
            check("opcode task", task.index(), p.tasks.len())?;
            if p.tasks[task.index()].value == 0 {
                return Err(ModelError::OpcodeTaskValueZero {
                    provider: p.guid,
                    opcode: opcode.name.clone(),
                });
            }
        }
    }

    let mut map_names = HashSet::new();
    for map in &p.maps {
        if !map_names.insert(map.name.as_str()) {
            return Err(ModelError::DuplicateMapName {
                provider: p.guid,
                name: map.name.clone(),
            });
        }
    }

    for (index, template) in p.templates.iter().enumerate() {
        validate_template(p, index, template)?;
    }

    let mut identities = HashSet::new();
    for event in &p.events {
        if !identities.insert((event.id, event.version)) {
            return Err(ModelError::DuplicateEvent {
                provider: p.guid,
                id: event.id,
                version: event.version,
            });
        }
        if let Some(id) = event.channel {
            check("event channel", id.index(), p.channels.len())?;
        }
        if let Some(id) = event.level {
            check("event level", id.index(), p.levels.len())?;
        }
        if let Some(id) = event.task {
            check("event task", id.index(), p.tasks.len())?;
        }
        if let Some(id) = event.opcode {
            check("event opcode", id.index(), p.opcodes.len())?;
        }
        if let Some(id) = event.template {
            check("event template", id.index(), p.templates.len())?;
        }
        for id in &event.keywords {
            check("event keyword", id.index(), p.keywords.len())?;
        }
    }

    for filter in &p.filters {
        if let Some(id) = filter.template {
            check("filter template", id.index(), p.templates.len())?;
        }
    }

    Ok(())
}

fn validate_template(p: &Provider, index: usize, template: &Template) -> Result<(), ModelError> {
    let total = template.total_property_count();
    if total > usize::from(u16::MAX) {
        return Err(ModelError::TooManyProperties {
            provider: p.guid,
            template: index,
            count: total,
        });
    }

    let top: Vec<(&str, bool)> = template
        .properties
        .iter()
        .map(|prop| (prop.name(), prop.as_data().is_some()))
        .collect();
    check_siblings(p, index, &top)?;

    for (position, property) in template.properties.iter().enumerate() {
        for (field, extent) in [("count", property.count()), ("length", property.length())] {
            check_extent(p, index, property.name(), field, extent, position, &top)?;
        }

        match property {
            Property::Data(data) => check_map(p, data)?,
            Property::Struct(s) => {
                let members: Vec<(&str, bool)> =
                    s.members.iter().map(|m| (m.name.as_str(), true)).collect();
                check_siblings(p, index, &members)?;
                for (member_position, member) in s.members.iter().enumerate() {
                    check_map(p, member)?;
                    for (field, extent) in [("count", member.count), ("length", member.length)] {
                        check_extent(
                            p,
                            index,
                            &member.name,
                            field,
                            extent,
                            member_position,
                            &members,
                        )?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn check_map(p: &Provider, data: &DataProperty) -> Result<(), ModelError> {
    match data.map {
        Some(map) if map.index() >= p.maps.len() => Err(ModelError::DanglingReference {
            provider: p.guid,
            what: "property map",
            index: map.index(),
        }),
        _ => Ok(()),
    }
}

fn check_siblings(p: &Provider, template: usize, siblings: &[(&str, bool)]) -> Result<(), ModelError> {
    let mut names = HashSet::new();
    for (name, _) in siblings {
        if !names.insert(*name) {
            return Err(ModelError::DuplicatePropertyName {
                provider: p.guid,
                template,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Siblings are `(name, is_data)` pairs in index order.
fn check_extent(
    p: &Provider,
    template: usize,
    property: &str,
    field: &'static str,
    extent: Option<Extent>,
    position: usize,
    siblings: &[(&str, bool)],
) -> Result<(), ModelError> {
    let Some(Extent::Variable(target)) = extent else {
        return Ok(());
    };
    let valid = usize::from(target) < position && siblings[usize::from(target)].1;
    if valid {
        Ok(())
    } else {
        Err(ModelError::InvalidPropertyReference {
            provider: p.guid,
            template,
            property: property.to_string(),
            field,
            target,
        })
    }
}
