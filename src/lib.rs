//! `crimson` compiles event-provider definitions into the Crimson (`CRIM`) manifest blob loaded by
//! ETW, and parses such blobs back into the same object graph.
//!
//! ```
//! use crimson::model::{Event, Level, Provider};
//! use crimson::{MessageTable, read_manifest, write_manifest};
//!
//! let mut provider = Provider::new(
//!     "{1C3B5E7A-2D4F-4A6B-8C0D-E1F2A3B4C5D6}".parse().unwrap(),
//!     "Example-Provider",
//! );
//! let level = provider.add_level(Level {
//!     name: "win:Informational".to_string(),
//!     value: 4,
//!     message: None,
//! });
//! let mut event = Event::new(1, 0);
//! event.level = Some(level);
//! provider.add_event(event);
//!
//! let blob = write_manifest(&[provider]).unwrap();
//! let manifest = read_manifest(&blob, &MessageTable::new()).unwrap();
//! assert_eq!(manifest.providers[0].events[0].level, Some(level));
//! ```

pub mod binxml;
pub mod guid;
pub mod manifest;
pub mod model;
pub mod template_id;

mod utils;

pub use crate::binxml::{BinXmlCodec, InlineNameCodec};
pub use crate::guid::Guid;
pub use crate::manifest::{
    Diagnostic, ManifestReadError, ManifestReader, ManifestWriteError, ManifestWriter,
    ReadManifest, ReaderSettings, SchemaError, WriterSettings, read_manifest, write_manifest,
};
pub use crate::model::{MessageTable, ModelError, Provider};
pub use crate::template_id::{TemplateIdScheme, template_identity};
