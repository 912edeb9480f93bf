//! Cache bindings for the novel authoring types.

use url::form_urlencoded;

use crate::cache::{Draft, Entity, Patch, ResourceKey};
use crate::error::ResourceResult;

use super::types::{
  Chapter, ChapterDraft, ChapterPatch, Character, CharacterDraft, CharacterPatch, Novel, NovelDraft, NovelPatch,
  NovelTemplate, World, WorldDraft, WorldPatch,
};

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for Novel {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "novel"
  }
}

impl Entity for Chapter {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "chapter"
  }
}

impl Entity for Character {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "character"
  }
}

impl Entity for World {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "world"
  }
}

impl Entity for NovelTemplate {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "template"
  }
}

// ============================================================================
// Optimistic placeholders and patches
// ============================================================================

impl Draft<Novel> for NovelDraft {
  fn validate(&self) -> ResourceResult<()> {
    NovelDraft::validate(self)
  }

  fn draft(&self, provisional_id: &str) -> Novel {
    Novel {
      id: provisional_id.to_string(),
      title: self.title.clone(),
      description: self.description.clone(),
      author: self.author.clone(),
      status: self.status,
      genre: self.genre.clone(),
      word_count: None,
      created_at: None,
      updated_at: None,
    }
  }
}

impl Patch<Novel> for NovelPatch {
  fn validate(&self) -> ResourceResult<()> {
    NovelPatch::validate(self)
  }

  fn apply(&self, novel: &Novel) -> Novel {
    let mut novel = novel.clone();
    if let Some(title) = &self.title {
      novel.title = title.clone();
    }
    if let Some(description) = &self.description {
      novel.description = description.clone();
    }
    if let Some(author) = &self.author {
      novel.author = Some(author.clone());
    }
    if let Some(status) = self.status {
      novel.status = status;
    }
    if let Some(genre) = &self.genre {
      novel.genre = Some(genre.clone());
    }
    novel
  }
}

impl Draft<Chapter> for ChapterDraft {
  fn validate(&self) -> ResourceResult<()> {
    ChapterDraft::validate(self)
  }

  fn draft(&self, provisional_id: &str) -> Chapter {
    Chapter {
      id: provisional_id.to_string(),
      novel_id: self.novel_id.clone(),
      title: self.title.clone(),
      content: self.content.clone(),
      order: self.order,
      created_at: None,
      updated_at: None,
    }
  }
}

impl Patch<Chapter> for ChapterPatch {
  fn validate(&self) -> ResourceResult<()> {
    ChapterPatch::validate(self)
  }

  fn apply(&self, chapter: &Chapter) -> Chapter {
    let mut chapter = chapter.clone();
    if let Some(title) = &self.title {
      chapter.title = title.clone();
    }
    if let Some(content) = &self.content {
      chapter.content = content.clone();
    }
    if let Some(order) = self.order {
      chapter.order = order;
    }
    chapter
  }
}

impl Draft<Character> for CharacterDraft {
  fn validate(&self) -> ResourceResult<()> {
    CharacterDraft::validate(self)
  }

  fn draft(&self, provisional_id: &str) -> Character {
    Character {
      id: provisional_id.to_string(),
      novel_id: self.novel_id.clone(),
      name: self.name.clone(),
      description: self.description.clone(),
      age: self.age,
      gender: self.gender.clone(),
      role: self.role,
      personality: self.personality.clone(),
      background: self.background.clone(),
      relationships: Vec::new(),
      created_at: None,
      updated_at: None,
    }
  }
}

impl Patch<Character> for CharacterPatch {
  fn validate(&self) -> ResourceResult<()> {
    CharacterPatch::validate(self)
  }

  fn apply(&self, character: &Character) -> Character {
    let mut character = character.clone();
    if let Some(name) = &self.name {
      character.name = name.clone();
    }
    if let Some(description) = &self.description {
      character.description = description.clone();
    }
    if self.age.is_some() {
      character.age = self.age;
    }
    if let Some(gender) = &self.gender {
      character.gender = Some(gender.clone());
    }
    if self.role.is_some() {
      character.role = self.role;
    }
    if let Some(personality) = &self.personality {
      character.personality = personality.clone();
    }
    if let Some(background) = &self.background {
      character.background = Some(background.clone());
    }
    character
  }
}

impl Draft<World> for WorldDraft {
  fn validate(&self) -> ResourceResult<()> {
    WorldDraft::validate(self)
  }

  fn draft(&self, provisional_id: &str) -> World {
    World {
      id: provisional_id.to_string(),
      name: self.name.clone(),
      description: self.description.clone(),
      rules: self.rules.clone(),
      locations: self.locations.clone(),
      cultures: self.cultures.clone(),
      created_at: None,
      updated_at: None,
    }
  }
}

impl Patch<World> for WorldPatch {
  fn validate(&self) -> ResourceResult<()> {
    WorldPatch::validate(self)
  }

  fn apply(&self, world: &World) -> World {
    let mut world = world.clone();
    if let Some(name) = &self.name {
      world.name = name.clone();
    }
    if let Some(description) = &self.description {
      world.description = description.clone();
    }
    if let Some(rules) = &self.rules {
      world.rules = rules.clone();
    }
    world
  }
}

// ============================================================================
// Resource keys
// ============================================================================

/// Resource keys for the novel authoring API.
///
/// Each variant maps to the API path it is fetched from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApiKey {
  /// All novels
  Novels,
  /// A single novel by id
  Novel { id: String },
  /// Publishing metadata of a novel
  NovelMetadata { novel_id: String },
  /// Templates offered for new novels
  Templates,
  /// Chapters of a novel
  Chapters { novel_id: String },
  /// Characters of a novel
  Characters { novel_id: String },
  /// A single character by id, whichever novel it belongs to
  Character { id: String },
  /// Relationships of a character; only ever posted to
  CharacterRelationships { character_id: String },
  /// Characters across all novels whose name or description matches
  CharacterSearch { query: String },
  /// All worldbuilding settings
  Worlds,
  /// A single world by id
  World { id: String },
  /// Locations of a world; only ever posted to
  WorldLocations { world_id: String },
  /// Cultures of a world; only ever posted to
  WorldCultures { world_id: String },
}

impl ApiKey {
  pub fn path(&self) -> String {
    match self {
      Self::Novels => "/api/novels".to_string(),
      Self::Novel { id } => format!("/api/novels/{}", id),
      Self::NovelMetadata { novel_id } => format!("/api/novels/{}/metadata", novel_id),
      Self::Templates => "/api/novels/templates".to_string(),
      Self::Chapters { novel_id } => format!("/api/novels/{}/chapters", novel_id),
      Self::Characters { novel_id } => format!("/api/novels/{}/characters", novel_id),
      Self::Character { id } => format!("/api/characters/{}", id),
      Self::CharacterRelationships { character_id } => format!("/api/characters/{}/relationships", character_id),
      Self::CharacterSearch { query } => {
        let encoded: String = form_urlencoded::Serializer::new(String::new())
          .append_pair("q", query.trim())
          .finish();
        format!("/api/characters/search?{}", encoded)
      }
      Self::Worlds => "/api/worldbuilding".to_string(),
      Self::World { id } => format!("/api/worldbuilding/{}", id),
      Self::WorldLocations { world_id } => format!("/api/worldbuilding/{}/locations", world_id),
      Self::WorldCultures { world_id } => format!("/api/worldbuilding/{}/cultures", world_id),
    }
  }

  /// Human-readable description for logs and the CLI
  pub fn description(&self) -> String {
    match self {
      Self::Novels => "all novels".to_string(),
      Self::Novel { id } => format!("novel {}", id),
      Self::NovelMetadata { novel_id } => format!("metadata of novel {}", novel_id),
      Self::Templates => "novel templates".to_string(),
      Self::Chapters { novel_id } => format!("chapters of novel {}", novel_id),
      Self::Characters { novel_id } => format!("characters of novel {}", novel_id),
      Self::Character { id } => format!("character {}", id),
      Self::CharacterRelationships { character_id } => format!("relationships of character {}", character_id),
      Self::CharacterSearch { query } => format!("characters matching \"{}\"", query.trim()),
      Self::Worlds => "all worlds".to_string(),
      Self::World { id } => format!("world {}", id),
      Self::WorldLocations { world_id } => format!("locations of world {}", world_id),
      Self::WorldCultures { world_id } => format!("cultures of world {}", world_id),
    }
  }
}

impl From<ApiKey> for ResourceKey {
  fn from(key: ApiKey) -> Self {
    ResourceKey::new(key.path())
  }
}

impl From<&ApiKey> for ResourceKey {
  fn from(key: &ApiKey) -> Self {
    ResourceKey::new(key.path())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{CharacterRole, NovelStatus};

  fn novel() -> Novel {
    Novel {
      id: "1".into(),
      title: "Dune".into(),
      description: "Spice".into(),
      author: Some("Frank".into()),
      status: NovelStatus::Draft,
      genre: None,
      word_count: Some(1000),
      created_at: None,
      updated_at: None,
    }
  }

  #[test]
  fn test_api_key_paths() {
    assert_eq!(ResourceKey::from(ApiKey::Novels).as_str(), "/api/novels");
    assert_eq!(
      ResourceKey::from(ApiKey::Novel { id: "3".into() }).as_str(),
      "/api/novels/3"
    );
    assert_eq!(
      ResourceKey::from(&ApiKey::Chapters { novel_id: "3".into() }).as_str(),
      "/api/novels/3/chapters"
    );
    assert_eq!(ApiKey::Worlds.path(), "/api/worldbuilding");
    assert_eq!(
      ApiKey::NovelMetadata { novel_id: "3".into() }.path(),
      "/api/novels/3/metadata"
    );
    assert_eq!(ApiKey::Templates.path(), "/api/novels/templates");
    assert_eq!(ApiKey::Character { id: "5".into() }.path(), "/api/characters/5");
    assert_eq!(
      ApiKey::CharacterRelationships { character_id: "5".into() }.path(),
      "/api/characters/5/relationships"
    );
    assert_eq!(
      ApiKey::WorldCultures { world_id: "2".into() }.path(),
      "/api/worldbuilding/2/cultures"
    );
  }

  #[test]
  fn test_search_key_is_encoded_and_normalized() {
    let a = ApiKey::CharacterSearch { query: " Paul Atreides ".into() };
    let b = ApiKey::CharacterSearch { query: "Paul Atreides".into() };
    assert_eq!(a.path(), "/api/characters/search?q=Paul+Atreides");
    assert_eq!(ResourceKey::from(a), ResourceKey::from(b));

    let c = ApiKey::CharacterSearch { query: "a&b".into() };
    assert_eq!(c.path(), "/api/characters/search?q=a%26b");
  }

  #[test]
  fn test_description() {
    assert_eq!(ApiKey::Novels.description(), "all novels");
    assert_eq!(
      ApiKey::Characters { novel_id: "9".into() }.description(),
      "characters of novel 9"
    );
  }

  #[test]
  fn test_novel_patch_apply_keeps_untouched_fields() {
    let patch = NovelPatch {
      title: Some("Dune Messiah".into()),
      status: Some(NovelStatus::Published),
      ..NovelPatch::default()
    };
    let updated = patch.apply(&novel());
    assert_eq!(updated.title, "Dune Messiah");
    assert_eq!(updated.status, NovelStatus::Published);
    assert_eq!(updated.description, "Spice");
    assert_eq!(updated.word_count, Some(1000));
  }

  #[test]
  fn test_draft_builds_placeholder() {
    let draft = CharacterDraft {
      name: "Paul".into(),
      description: "Heir".into(),
      role: Some(CharacterRole::Protagonist),
      ..CharacterDraft::default()
    };
    let placeholder = draft.draft("pending-1");
    assert_eq!(placeholder.id(), "pending-1");
    assert_eq!(placeholder.role, Some(CharacterRole::Protagonist));
    assert_eq!(Character::entity_type(), "character");
  }

  #[test]
  fn test_trait_validate_delegates() {
    let draft = NovelDraft::new("");
    assert!(<NovelDraft as Draft<Novel>>::validate(&draft).is_err());
  }
}
