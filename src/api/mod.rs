//! The novel authoring API: domain types, cache bindings and transports.

pub mod cache;
pub mod client;
pub mod library;
pub mod memory;
pub mod types;

pub use cache::ApiKey;
pub use client::HttpTransport;
pub use library::Library;
pub use memory::{MemoryTransport, Operation};
pub use types::{
  Chapter, ChapterDraft, ChapterPatch, Character, CharacterDraft, CharacterPatch, CharacterRole, Coordinates, Culture,
  Location, Novel, NovelDraft, NovelMetadata, NovelMetadataPatch, NovelPatch, NovelStatus, NovelTemplate,
  Relationship, RelationshipRequest, World, WorldDraft, WorldPatch,
};
