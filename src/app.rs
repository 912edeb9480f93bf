use crate::commands::Kind;
use color_eyre::{eyre::eyre, Result};
use quill::api::{
  ApiKey, ChapterDraft, ChapterPatch, CharacterDraft, CharacterPatch, Library, NovelDraft, NovelMetadataPatch,
  NovelPatch, Relationship, WorldDraft, WorldPatch,
};
use quill::cache::{CacheEntry, Collection, Draft, Entity, GcHandle, Patch, ResourceCache, ResourceKey, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// A single CLI action
#[derive(Debug, Clone)]
pub enum Action {
  List { kind: Kind, novel: Option<String> },
  Show { kind: Kind, id: String, novel: Option<String> },
  Create { kind: Kind, novel: Option<String>, json: String },
  Update { kind: Kind, id: String, novel: Option<String>, json: String },
  Delete { kind: Kind, id: String, novel: Option<String> },
  Watch { kind: Kind, novel: Option<String> },
  Search { query: String },
  Metadata { novel: String, json: Option<String> },
  Templates,
  Relate { novel: String, character: String, related: String, relationship: String },
}

/// Runs CLI actions against a library
pub struct App<Tr: Transport> {
  library: Library<Tr>,
  /// Background eviction, stopped when the app is dropped
  _gc: Vec<GcHandle>,
}

impl<Tr: Transport> App<Tr> {
  pub fn new(library: Library<Tr>) -> Self {
    let gc = library.spawn_gc();
    Self { library, _gc: gc }
  }

  pub async fn run(&self, action: Action) -> Result<()> {
    info!(?action, "running");
    match action {
      Action::List { kind, novel } => {
        let key = kind.key(novel.as_deref()).map_err(|e| eyre!(e))?;
        match kind {
          Kind::Novels => print_list(self.library.novels(), key).await,
          Kind::Chapters => print_list(self.library.chapters(), key).await,
          Kind::Characters => print_list(self.library.characters(), key).await,
          Kind::Worlds => print_list(self.library.worlds(), key).await,
        }
      }
      Action::Show { kind, id, novel } => self.show(kind, &id, novel.as_deref()).await,
      Action::Create { kind, novel, json } => {
        let key = kind.key(novel.as_deref()).map_err(|e| eyre!(e))?;
        let nested_in = if kind.is_nested() { novel.as_deref() } else { None };
        let payload = payload(&json, nested_in)?;
        match kind {
          Kind::Novels => create::<_, NovelDraft, _>(self.library.novels(), key, payload).await,
          Kind::Chapters => create::<_, ChapterDraft, _>(self.library.chapters(), key, payload).await,
          Kind::Characters => create::<_, CharacterDraft, _>(self.library.characters(), key, payload).await,
          Kind::Worlds => create::<_, WorldDraft, _>(self.library.worlds(), key, payload).await,
        }
      }
      Action::Update { kind, id, novel, json } => {
        let key = kind.key(novel.as_deref()).map_err(|e| eyre!(e))?;
        let payload = payload(&json, None)?;
        match kind {
          Kind::Novels => update::<_, NovelPatch, _>(self.library.novels(), key, &id, payload).await,
          Kind::Chapters => update::<_, ChapterPatch, _>(self.library.chapters(), key, &id, payload).await,
          Kind::Characters => update::<_, CharacterPatch, _>(self.library.characters(), key, &id, payload).await,
          Kind::Worlds => update::<_, WorldPatch, _>(self.library.worlds(), key, &id, payload).await,
        }
      }
      Action::Delete { kind, id, novel } => {
        let key = kind.key(novel.as_deref()).map_err(|e| eyre!(e))?;
        match kind {
          Kind::Novels => {
            load(self.library.novels(), key).await?;
            self.library.delete_novel(&id).await?;
          }
          Kind::Chapters => remove(self.library.chapters(), key, &id).await?,
          Kind::Characters => remove(self.library.characters(), key, &id).await?,
          Kind::Worlds => remove(self.library.worlds(), key, &id).await?,
        }
        println!("deleted {} {}", kind, id);
        Ok(())
      }
      Action::Watch { kind, novel } => {
        let key = kind.key(novel.as_deref()).map_err(|e| eyre!(e))?;
        match kind {
          Kind::Novels => watch(self.library.novels(), key).await,
          Kind::Chapters => watch(self.library.chapters(), key).await,
          Kind::Characters => watch(self.library.characters(), key).await,
          Kind::Worlds => watch(self.library.worlds(), key).await,
        }
      }
      Action::Search { query } => {
        let key = ApiKey::CharacterSearch { query };
        print_list(self.library.characters(), key).await
      }
      Action::Metadata { novel, json: None } => {
        print_detail(self.library.metadata(), ApiKey::NovelMetadata { novel_id: novel }).await
      }
      Action::Metadata { novel, json: Some(json) } => {
        let patch: NovelMetadataPatch = decode(payload(&json, None)?)?;
        load_detail(self.library.metadata(), ApiKey::NovelMetadata { novel_id: novel.clone() }).await?;
        let stored = self.library.update_metadata(&novel, patch).await?;
        info!(%novel, "metadata updated");
        print_json(&stored)
      }
      Action::Templates => print_detail(self.library.templates(), ApiKey::Templates).await,
      Action::Relate {
        novel,
        character,
        related,
        relationship,
      } => {
        load(self.library.characters(), ApiKey::Characters { novel_id: novel.clone() }).await?;
        self
          .library
          .set_relationship(&novel, &character, Relationship::new(related.clone(), relationship.clone()))
          .await?;
        println!("character {} is now {} of {}", character, relationship, related);
        Ok(())
      }
    }
  }

  async fn show(&self, kind: Kind, id: &str, novel: Option<&str>) -> Result<()> {
    let id = id.to_string();
    match kind {
      Kind::Novels => print_detail(self.library.novel_detail(), ApiKey::Novel { id }).await,
      Kind::Characters => print_detail(self.library.character_detail(), ApiKey::Character { id }).await,
      Kind::Worlds => print_detail(self.library.world_detail(), ApiKey::World { id }).await,
      Kind::Chapters => {
        let key = kind.key(novel).map_err(|e| eyre!(e))?;
        print_member(self.library.chapters(), key, &id).await
      }
    }
  }
}

/// Parse a JSON payload, filling in `novel_id` for nested kinds.
fn payload(json: &str, novel: Option<&str>) -> Result<Value> {
  let mut value: Value = serde_json::from_str(json).map_err(|e| eyre!("Invalid --json payload: {}", e))?;
  if let (Some(novel), Value::Object(fields)) = (novel, &mut value) {
    fields
      .entry("novel_id")
      .or_insert_with(|| Value::String(novel.to_string()));
  }
  Ok(value)
}

fn decode<P: DeserializeOwned>(value: Value) -> Result<P> {
  serde_json::from_value(value).map_err(|e| eyre!("Invalid --json payload: {}", e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Fetch the collection at `key` and return what the cache holds.
async fn load<E, Tr>(collection: &Collection<E, Tr>, key: impl Into<ResourceKey>) -> Result<Vec<E>>
where
  E: Entity,
  Tr: Transport,
{
  let key = key.into();
  collection.revalidate(key.clone()).await?;
  Ok(collection.read(key).data.unwrap_or_default())
}

/// Fetch a single resource and return what the cache holds.
async fn load_detail<T>(cache: &ResourceCache<T>, key: ApiKey) -> Result<Option<T>>
where
  T: Clone + Send + Sync + 'static,
{
  cache.revalidate(key.clone()).await?;
  Ok(cache.read(key).data)
}

async fn print_detail<T>(cache: &ResourceCache<T>, key: ApiKey) -> Result<()>
where
  T: Clone + Send + Sync + Serialize + 'static,
{
  let description = key.description();
  let value = load_detail(cache, key)
    .await?
    .ok_or_else(|| eyre!("{} not found", description))?;
  print_json(&value)
}

async fn print_list<E, Tr>(collection: &Collection<E, Tr>, key: impl Into<ResourceKey>) -> Result<()>
where
  E: Entity,
  Tr: Transport,
{
  let items = load(collection, key).await?;
  info!(count = items.len(), entity = E::entity_type(), "listed");
  print_json(&items)
}

async fn print_member<E, Tr>(collection: &Collection<E, Tr>, key: impl Into<ResourceKey>, id: &str) -> Result<()>
where
  E: Entity,
  Tr: Transport,
{
  let items = load(collection, key).await?;
  let item = items
    .iter()
    .find(|item| item.id() == id)
    .ok_or_else(|| eyre!("{} {} not found", E::entity_type(), id))?;
  print_json(item)
}

async fn create<E, D, Tr>(collection: &Collection<E, Tr>, key: ApiKey, payload: Value) -> Result<()>
where
  E: Entity,
  D: Draft<E> + DeserializeOwned,
  Tr: Transport,
{
  let draft: D = decode(payload)?;
  let created = collection.create(key, draft).await?;
  info!(entity = E::entity_type(), id = created.id(), "created");
  print_json(&created)
}

async fn update<E, P, Tr>(collection: &Collection<E, Tr>, key: ApiKey, id: &str, payload: Value) -> Result<()>
where
  E: Entity,
  P: Patch<E> + DeserializeOwned,
  Tr: Transport,
{
  let patch: P = decode(payload)?;
  load(collection, key.clone()).await?;
  let updated = collection.update(key, id, patch).await?;
  info!(entity = E::entity_type(), id = updated.id(), "updated");
  print_json(&updated)
}

async fn remove<E, Tr>(collection: &Collection<E, Tr>, key: ApiKey, id: &str) -> Result<()>
where
  E: Entity,
  Tr: Transport,
{
  load(collection, key.clone()).await?;
  collection.remove(key, id).await?;
  info!(entity = E::entity_type(), id, "deleted");
  Ok(())
}

/// Print every notification for `key` until Ctrl-C.
async fn watch<E, Tr>(collection: &Collection<E, Tr>, key: ApiKey) -> Result<()>
where
  E: Entity,
  Tr: Transport,
{
  println!("watching {} (Ctrl-C to stop)", key.description());
  let _subscription = collection.subscribe(key, |entry: &CacheEntry<Vec<E>>| println!("{}", describe(entry)));
  tokio::signal::ctrl_c().await?;
  info!("watch stopped");
  Ok(())
}

fn describe<T>(entry: &CacheEntry<Vec<T>>) -> String {
  let mut line = format!("[v{}] {:?}", entry.version, entry.status);
  if let Some(items) = &entry.data {
    line.push_str(&format!(" {} item(s)", items.len()));
  }
  if entry.is_saving() {
    line.push_str(&format!(" saving {}", entry.pending_mutations));
  }
  if let Some(error) = &entry.error {
    line.push_str(&format!(" error: {}", error));
  }
  line
}
