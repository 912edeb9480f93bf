//! Domain types for the novel authoring API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ResourceError, ResourceResult};

// ============================================================================
// Novels
// ============================================================================

/// Publication state of a novel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NovelStatus {
  #[default]
  Draft,
  Published,
  Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Novel {
  #[serde(deserialize_with = "id_from_any")]
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub status: NovelStatus,
  #[serde(default)]
  pub genre: Option<String>,
  #[serde(default, alias = "wordCount")]
  pub word_count: Option<u64>,
  #[serde(default, deserialize_with = "timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NovelDraft {
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
  #[serde(default)]
  pub status: NovelStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub genre: Option<String>,
}

impl NovelDraft {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      ..Self::default()
    }
  }

  pub fn validate(&self) -> ResourceResult<()> {
    check_len("title", &self.title, 1, 200)?;
    check_len("description", &self.description, 0, 2000)
  }
}

/// Changed fields of a novel; `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NovelPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<NovelStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub genre: Option<String>,
}

impl NovelPatch {
  pub fn validate(&self) -> ResourceResult<()> {
    if let Some(title) = &self.title {
      check_len("title", title, 1, 200)?;
    }
    if let Some(description) = &self.description {
      check_len("description", description, 0, 2000)?;
    }
    Ok(())
  }
}

/// Publishing metadata kept alongside a novel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NovelMetadata {
  #[serde(default)]
  pub genre: Vec<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub status: NovelStatus,
  #[serde(default)]
  pub target_audience: String,
  #[serde(default)]
  pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NovelMetadataPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub genre: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tags: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<NovelStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_audience: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,
}

impl NovelMetadataPatch {
  pub fn validate(&self) -> ResourceResult<()> {
    if let Some(tags) = &self.tags {
      for tag in tags {
        check_len("tag", tag, 1, 50)?;
      }
    }
    match &self.language {
      Some(language) => check_len("language", language, 1, 20),
      None => Ok(()),
    }
  }

  pub fn apply(&self, metadata: &NovelMetadata) -> NovelMetadata {
    let mut metadata = metadata.clone();
    if let Some(genre) = &self.genre {
      metadata.genre = genre.clone();
    }
    if let Some(tags) = &self.tags {
      metadata.tags = tags.clone();
    }
    if let Some(status) = self.status {
      metadata.status = status;
    }
    if let Some(audience) = &self.target_audience {
      metadata.target_audience = audience.clone();
    }
    if let Some(language) = &self.language {
      metadata.language = language.clone();
    }
    metadata
  }
}

/// A starting structure offered when creating a novel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelTemplate {
  #[serde(deserialize_with = "id_from_any")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub genre: Option<String>,
  /// Suggested chapter outline
  #[serde(default)]
  pub structure: Vec<String>,
}

// ============================================================================
// Chapters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
  #[serde(deserialize_with = "id_from_any")]
  pub id: String,
  #[serde(deserialize_with = "id_from_any")]
  pub novel_id: String,
  pub title: String,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub order: u32,
  #[serde(default, deserialize_with = "timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterDraft {
  pub novel_id: String,
  pub title: String,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub order: u32,
}

impl ChapterDraft {
  pub fn validate(&self) -> ResourceResult<()> {
    check_len("title", &self.title, 1, 200)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub order: Option<u32>,
}

impl ChapterPatch {
  pub fn validate(&self) -> ResourceResult<()> {
    match &self.title {
      Some(title) => check_len("title", title, 1, 200),
      None => Ok(()),
    }
  }
}

// ============================================================================
// Characters
// ============================================================================

/// A directed tie from one character to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
  #[serde(rename = "characterId", alias = "relatedCharacterId", deserialize_with = "id_from_any")]
  pub character_id: String,
  pub relationship: String,
}

impl Relationship {
  pub fn new(character_id: impl Into<String>, relationship: impl Into<String>) -> Self {
    Self {
      character_id: character_id.into(),
      relationship: relationship.into(),
    }
  }

  pub fn validate(&self, owner: &str) -> ResourceResult<()> {
    if self.character_id == owner {
      return Err(ResourceError::invalid("a character cannot be related to itself"));
    }
    check_len("relationship", &self.relationship, 1, 100)
  }
}

/// Request body for setting a relationship
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipRequest<'a> {
  #[serde(rename = "relatedCharacterId")]
  pub related_character_id: &'a str,
  pub relationship: &'a str,
}

/// Narrative role of a character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterRole {
  Protagonist,
  Antagonist,
  Supporting,
  Minor,
  #[serde(other)]
  Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
  #[serde(deserialize_with = "id_from_any")]
  pub id: String,
  #[serde(default, deserialize_with = "opt_id_from_any")]
  pub novel_id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub age: Option<u32>,
  #[serde(default)]
  pub gender: Option<String>,
  #[serde(default)]
  pub role: Option<CharacterRole>,
  #[serde(default)]
  pub personality: Vec<String>,
  #[serde(default)]
  pub background: Option<String>,
  #[serde(default)]
  pub relationships: Vec<Relationship>,
  #[serde(default, deserialize_with = "timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

impl Character {
  /// This character with `relationship` set, replacing any earlier tie to
  /// the same character.
  pub fn with_relationship(&self, relationship: &Relationship) -> Character {
    let mut character = self.clone();
    character
      .relationships
      .retain(|r| r.character_id != relationship.character_id);
    character.relationships.push(relationship.clone());
    character
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterDraft {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub novel_id: Option<String>,
  pub name: String,
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub age: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gender: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<CharacterRole>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub personality: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub background: Option<String>,
}

impl CharacterDraft {
  pub fn validate(&self) -> ResourceResult<()> {
    check_len("name", &self.name, 1, 100)?;
    check_len("description", &self.description, 1, 2000)?;
    check_age(self.age)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub age: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gender: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<CharacterRole>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub personality: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub background: Option<String>,
}

impl CharacterPatch {
  pub fn validate(&self) -> ResourceResult<()> {
    if let Some(name) = &self.name {
      check_len("name", name, 1, 100)?;
    }
    if let Some(description) = &self.description {
      check_len("description", description, 1, 2000)?;
    }
    check_age(self.age)
  }
}

// ============================================================================
// Worlds
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
  pub x: f64,
  pub y: f64,
}

/// A place in a world. Unsaved locations have no id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
  #[serde(default, deserialize_with = "opt_id_from_any", skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub coordinates: Option<Coordinates>,
}

impl Location {
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      ..Self::default()
    }
  }

  pub fn validate(&self) -> ResourceResult<()> {
    check_len("name", &self.name, 1, 200)
  }
}

/// A culture of a world. Unsaved cultures have no id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Culture {
  #[serde(default, deserialize_with = "opt_id_from_any", skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub customs: Vec<String>,
}

impl Culture {
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      ..Self::default()
    }
  }

  pub fn validate(&self) -> ResourceResult<()> {
    check_len("name", &self.name, 1, 200)
  }
}

/// A worldbuilding setting shared by novels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
  #[serde(deserialize_with = "id_from_any")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub rules: Vec<String>,
  #[serde(default)]
  pub locations: Vec<Location>,
  #[serde(default)]
  pub cultures: Vec<Culture>,
  #[serde(default, deserialize_with = "timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldDraft {
  pub name: String,
  pub description: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub rules: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub locations: Vec<Location>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub cultures: Vec<Culture>,
}

impl WorldDraft {
  pub fn validate(&self) -> ResourceResult<()> {
    check_len("name", &self.name, 1, 200)?;
    check_len("description", &self.description, 1, usize::MAX)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rules: Option<Vec<String>>,
}

impl WorldPatch {
  pub fn validate(&self) -> ResourceResult<()> {
    if let Some(name) = &self.name {
      check_len("name", name, 1, 200)?;
    }
    if let Some(description) = &self.description {
      check_len("description", description, 1, usize::MAX)?;
    }
    Ok(())
  }
}

// ============================================================================
// Helpers
// ============================================================================

/// Length check in characters; blank strings count as empty.
fn check_len(field: &str, value: &str, min: usize, max: usize) -> ResourceResult<()> {
  let len = value.chars().count();
  if min > 0 && value.trim().is_empty() {
    return Err(ResourceError::invalid(format!("{} is required", field)));
  }
  if len < min {
    return Err(ResourceError::invalid(format!(
      "{} must be at least {} characters",
      field, min
    )));
  }
  if len > max {
    return Err(ResourceError::invalid(format!(
      "{} must be at most {} characters",
      field, max
    )));
  }
  Ok(())
}

fn check_age(age: Option<u32>) -> ResourceResult<()> {
  match age {
    Some(age) if age > 1000 => Err(ResourceError::invalid("age must be at most 1000")),
    _ => Ok(()),
  }
}

/// Ids arrive as strings from some endpoints and integers from others
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
  Text(String),
  Number(u64),
}

impl From<RawId> for String {
  fn from(raw: RawId) -> Self {
    match raw {
      RawId::Text(s) => s,
      RawId::Number(n) => n.to_string(),
    }
  }
}

fn id_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
  RawId::deserialize(deserializer).map(String::from)
}

fn opt_id_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
  Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Accept RFC 3339 as well as the naive ISO format the backend emits.
fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
  let Some(raw) = Option::<String>::deserialize(deserializer)? else {
    return Ok(None);
  };
  parse_timestamp(&raw)
    .map(Some)
    .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
    .or_else(|| {
      NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_novel_accepts_numeric_id_and_naive_timestamp() {
    let novel: Novel = serde_json::from_str(
      r#"{"id": 7, "title": "Dune", "created_at": "2024-03-01T10:20:30.123456", "status": "published"}"#,
    )
    .unwrap();

    assert_eq!(novel.id, "7");
    assert_eq!(novel.status, NovelStatus::Published);
    assert_eq!(novel.description, "");
    assert_eq!(
      novel.created_at.unwrap().to_rfc3339(),
      "2024-03-01T10:20:30.123456+00:00"
    );
    assert_eq!(novel.updated_at, None);
  }

  #[test]
  fn test_novel_round_trips_through_json() {
    let novel: Novel = serde_json::from_str(
      r#"{"id": "n1", "title": "Dune", "updated_at": "2024-03-01T10:20:30Z", "wordCount": 1200}"#,
    )
    .unwrap();
    assert_eq!(novel.word_count, Some(1200));

    let json = serde_json::to_string(&novel).unwrap();
    let back: Novel = serde_json::from_str(&json).unwrap();
    assert_eq!(back, novel);
  }

  #[test]
  fn test_invalid_timestamp_is_rejected() {
    let result: Result<Novel, _> =
      serde_json::from_str(r#"{"id": "n1", "title": "Dune", "created_at": "yesterday"}"#);
    assert!(result.is_err());
  }

  #[test]
  fn test_unknown_character_role() {
    let character: Character =
      serde_json::from_str(r#"{"id": 1, "name": "Paul", "role": "mentor", "novel_id": 3}"#).unwrap();
    assert_eq!(character.role, Some(CharacterRole::Other));
    assert_eq!(character.novel_id.as_deref(), Some("3"));
  }

  #[test]
  fn test_novel_draft_validation() {
    assert!(NovelDraft::new("Dune").validate().is_ok());
    assert_eq!(
      NovelDraft::new("   ").validate(),
      Err(ResourceError::invalid("title is required"))
    );
    assert!(NovelDraft::new("x".repeat(201)).validate().is_err());
    assert!(NovelDraft::new("x".repeat(200)).validate().is_ok());

    let draft = NovelDraft {
      description: "d".repeat(2001),
      ..NovelDraft::new("Dune")
    };
    assert!(draft.validate().is_err());
  }

  #[test]
  fn test_title_length_counts_characters() {
    // 200 multi-byte characters are still within the limit
    assert!(NovelDraft::new("物".repeat(200)).validate().is_ok());
  }

  #[test]
  fn test_character_draft_validation() {
    let draft = CharacterDraft {
      name: "Paul".into(),
      description: "Heir of House Atreides".into(),
      age: Some(15),
      ..CharacterDraft::default()
    };
    assert!(draft.validate().is_ok());

    let too_old = CharacterDraft {
      age: Some(1001),
      ..draft.clone()
    };
    assert_eq!(
      too_old.validate(),
      Err(ResourceError::invalid("age must be at most 1000"))
    );

    let no_description = CharacterDraft {
      description: String::new(),
      ..draft
    };
    assert!(no_description.validate().is_err());
  }

  #[test]
  fn test_patch_validation_only_checks_present_fields() {
    assert!(NovelPatch::default().validate().is_ok());
    assert!(CharacterPatch::default().validate().is_ok());
    assert!(WorldPatch {
      name: Some(String::new()),
      ..WorldPatch::default()
    }
    .validate()
    .is_err());
    assert!(ChapterPatch {
      content: Some(String::new()),
      ..ChapterPatch::default()
    }
    .validate()
    .is_ok());
  }

  #[test]
  fn test_patch_serializes_only_changed_fields() {
    let patch = NovelPatch {
      title: Some("Dune Messiah".into()),
      ..NovelPatch::default()
    };
    assert_eq!(
      serde_json::to_value(&patch).unwrap(),
      serde_json::json!({"title": "Dune Messiah"})
    );
  }

  #[test]
  fn test_relationships_accept_either_id_field() {
    let character: Character = serde_json::from_str(
      r#"{"id": 1, "name": "Paul", "relationships": [
        {"characterId": "2", "relationship": "mother"},
        {"relatedCharacterId": 3, "relationship": "rival"}
      ]}"#,
    )
    .unwrap();
    assert_eq!(
      character.relationships,
      vec![Relationship::new("2", "mother"), Relationship::new("3", "rival")]
    );

    let updated = character.with_relationship(&Relationship::new("3", "ally"));
    assert_eq!(updated.relationships.len(), 2);
    assert_eq!(updated.relationships[1], Relationship::new("3", "ally"));
  }

  #[test]
  fn test_relationship_validation() {
    assert!(Relationship::new("2", "mother").validate("1").is_ok());
    assert_eq!(
      Relationship::new("1", "self").validate("1"),
      Err(ResourceError::invalid("a character cannot be related to itself"))
    );
    assert!(Relationship::new("2", " ").validate("1").is_err());
  }

  #[test]
  fn test_metadata_patch_applies_present_fields() {
    let metadata = NovelMetadata {
      language: "ja".into(),
      tags: vec!["space".into()],
      ..NovelMetadata::default()
    };
    let patch = NovelMetadataPatch {
      status: Some(NovelStatus::Published),
      tags: Some(vec![]),
      ..NovelMetadataPatch::default()
    };
    let updated = patch.apply(&metadata);
    assert_eq!(updated.status, NovelStatus::Published);
    assert!(updated.tags.is_empty());
    assert_eq!(updated.language, "ja");

    let blank_tag = NovelMetadataPatch {
      tags: Some(vec!["".into()]),
      ..NovelMetadataPatch::default()
    };
    assert_eq!(blank_tag.validate(), Err(ResourceError::invalid("tag is required")));
  }

  #[test]
  fn test_unsaved_location_serializes_without_id() {
    let location = Location::new("Arrakeen", "Capital");
    assert_eq!(
      serde_json::to_value(&location).unwrap(),
      serde_json::json!({"name": "Arrakeen", "description": "Capital"})
    );
    let stored: Location = serde_json::from_str(r#"{"id": 4, "name": "Arrakeen"}"#).unwrap();
    assert_eq!(stored.id.as_deref(), Some("4"));
  }

  #[test]
  fn test_world_draft_requires_description() {
    let draft = WorldDraft {
      name: "Arrakis".into(),
      ..WorldDraft::default()
    };
    assert_eq!(
      draft.validate(),
      Err(ResourceError::invalid("description is required"))
    );
  }
}
