//! One cache per entity kind, sharing a transport.

use std::sync::Arc;

use color_eyre::Result;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheConfig, Collection, Entity, GcHandle, ResourceCache, ResourceKey, Transport};
use crate::config::Config;
use crate::error::{ResourceError, ResourceResult};

use super::cache::ApiKey;
use super::client::HttpTransport;
use super::types::{
  Chapter, Character, Culture, Location, Novel, NovelMetadata, NovelMetadataPatch, NovelTemplate, Relationship,
  RelationshipRequest, World,
};

/// The authoring client's data layer.
///
/// Novels, chapters, characters and worlds each get a [`Collection`]. Single
/// novels, characters and worlds fetched by id live in their own caches, as
/// do novel metadata and the template list.
pub struct Library<Tr: Transport> {
  transport: Arc<Tr>,
  novels: Collection<Novel, Tr>,
  novel_detail: ResourceCache<Novel>,
  metadata: ResourceCache<NovelMetadata>,
  templates: ResourceCache<Vec<NovelTemplate>>,
  chapters: Collection<Chapter, Tr>,
  characters: Collection<Character, Tr>,
  character_detail: ResourceCache<Character>,
  worlds: Collection<World, Tr>,
  world_detail: ResourceCache<World>,
}

impl<Tr: Transport> Clone for Library<Tr> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      novels: self.novels.clone(),
      novel_detail: self.novel_detail.clone(),
      metadata: self.metadata.clone(),
      templates: self.templates.clone(),
      chapters: self.chapters.clone(),
      characters: self.characters.clone(),
      character_detail: self.character_detail.clone(),
      worlds: self.worlds.clone(),
      world_detail: self.world_detail.clone(),
    }
  }
}

impl Library<HttpTransport> {
  /// Library talking to the API named in `config`.
  pub fn new(config: &Config) -> Result<Self> {
    let transport = HttpTransport::new(config)?;
    info!(url = %config.api.url, "using http transport");
    Ok(Self::with_transport(Arc::new(transport), config.cache_config()))
  }
}

impl<Tr: Transport> Library<Tr> {
  pub fn with_transport(transport: Arc<Tr>, config: CacheConfig) -> Self {
    Self {
      novels: Collection::new(Arc::clone(&transport), config.clone()),
      novel_detail: ResourceCache::from_transport(Arc::clone(&transport), config.clone()),
      metadata: ResourceCache::from_transport(Arc::clone(&transport), config.clone()),
      templates: ResourceCache::from_transport(Arc::clone(&transport), config.clone()),
      chapters: Collection::new(Arc::clone(&transport), config.clone()),
      characters: Collection::new(Arc::clone(&transport), config.clone()),
      character_detail: ResourceCache::from_transport(Arc::clone(&transport), config.clone()),
      worlds: Collection::new(Arc::clone(&transport), config.clone()),
      world_detail: ResourceCache::from_transport(Arc::clone(&transport), config),
      transport,
    }
  }

  pub fn novels(&self) -> &Collection<Novel, Tr> {
    &self.novels
  }

  /// Single novels, keyed by [`ApiKey::Novel`].
  pub fn novel_detail(&self) -> &ResourceCache<Novel> {
    &self.novel_detail
  }

  /// Novel metadata, keyed by [`ApiKey::NovelMetadata`].
  pub fn metadata(&self) -> &ResourceCache<NovelMetadata> {
    &self.metadata
  }

  /// Templates for new novels, under [`ApiKey::Templates`].
  pub fn templates(&self) -> &ResourceCache<Vec<NovelTemplate>> {
    &self.templates
  }

  pub fn chapters(&self) -> &Collection<Chapter, Tr> {
    &self.chapters
  }

  /// Characters per novel and character search results.
  pub fn characters(&self) -> &Collection<Character, Tr> {
    &self.characters
  }

  /// Single characters, keyed by [`ApiKey::Character`].
  pub fn character_detail(&self) -> &ResourceCache<Character> {
    &self.character_detail
  }

  pub fn worlds(&self) -> &Collection<World, Tr> {
    &self.worlds
  }

  /// Single worlds, keyed by [`ApiKey::World`].
  pub fn world_detail(&self) -> &ResourceCache<World> {
    &self.world_detail
  }

  /// Delete a novel and drop everything cached under it.
  ///
  /// The novel leaves the list optimistically; once the server confirms, the
  /// novel's own entry, its metadata, its chapters and characters and every
  /// character search are invalidated.
  pub async fn delete_novel(&self, id: &str) -> ResourceResult<()> {
    self.novels.remove(ApiKey::Novels, id).await?;

    let id = id.to_string();
    self.novel_detail.invalidate(ApiKey::Novel { id: id.clone() });
    self.metadata.invalidate(ApiKey::NovelMetadata { novel_id: id.clone() });
    self.chapters.invalidate(ApiKey::Chapters { novel_id: id.clone() });
    self.characters.invalidate(ApiKey::Characters { novel_id: id.clone() });

    let search_prefix = ApiKey::CharacterSearch { query: String::new() }.path();
    let search_prefix = search_prefix.trim_end_matches("q=");
    for key in self.characters.cache().keys() {
      if key.as_str().starts_with(search_prefix) {
        self.characters.invalidate(key);
      }
    }

    info!(novel = %id, "novel deleted");
    Ok(())
  }

  /// Change a novel's metadata. The patch shows at once and is replaced by
  /// what the server stored.
  pub fn update_metadata(
    &self,
    novel_id: &str,
    patch: NovelMetadataPatch,
  ) -> BoxFuture<'static, ResourceResult<NovelMetadata>> {
    if let Err(e) = patch.validate() {
      return future::ready(Err(e)).boxed();
    }

    let key: ResourceKey = ApiKey::NovelMetadata {
      novel_id: novel_id.to_string(),
    }
    .into();
    debug!(%key, "updating metadata");

    let patch = Arc::new(patch);
    let sent = Arc::clone(&patch);
    let transport = Arc::clone(&self.transport);
    let commit_key = key.clone();
    let commit = async move { transport.put_resource::<_, NovelMetadata>(&commit_key, sent.as_ref()).await };

    self
      .metadata
      .mutate(
        key,
        move |current: Option<&NovelMetadata>| patch.apply(&current.cloned().unwrap_or_default()),
        commit,
      )
      .boxed()
  }

  /// Relate `character_id` to another character of novel `novel_id`.
  ///
  /// The relationship shows on the novel's character list at once; a cached
  /// copy of the single character is refetched after the server accepts it.
  pub fn set_relationship(
    &self,
    novel_id: &str,
    character_id: &str,
    relationship: Relationship,
  ) -> BoxFuture<'static, ResourceResult<()>> {
    if let Err(e) = relationship.validate(character_id) {
      return future::ready(Err(e)).boxed();
    }

    let owner = character_id.to_string();
    debug!(character = %owner, related = %relationship.character_id, "setting relationship");

    let transport = Arc::clone(&self.transport);
    let commit_key: ResourceKey = ApiKey::CharacterRelationships {
      character_id: owner.clone(),
    }
    .into();
    let sent = relationship.clone();
    let commit = async move {
      let request = RelationshipRequest {
        related_character_id: &sent.character_id,
        relationship: &sent.relationship,
      };
      transport
        .post_resource::<_, Relationship>(&commit_key, &request)
        .await
        .map(|_| ())
    };

    let relationship = Arc::new(relationship);
    let shown = Arc::clone(&relationship);
    let shown_owner = owner.clone();
    let saving = self.characters.cache().mutate_with(
      ApiKey::Characters {
        novel_id: novel_id.to_string(),
      },
      move |list: Option<&Vec<Character>>| edit_member(list, &shown_owner, |c| c.with_relationship(&shown)),
      commit,
      {
        let owner = owner.clone();
        move |base: Option<&Vec<Character>>, _: &()| edit_member(base, &owner, |c| c.with_relationship(&relationship))
      },
    );

    let detail = self.character_detail.clone();
    async move {
      saving.await?;
      detail.invalidate(ApiKey::Character { id: owner });
      Ok(())
    }
    .boxed()
  }

  /// Add a location to world `world_id`, returning it as stored.
  pub fn add_location(&self, world_id: &str, location: Location) -> BoxFuture<'static, ResourceResult<Location>> {
    if let Err(e) = location.validate() {
      return future::ready(Err(e)).boxed();
    }
    let key = ApiKey::WorldLocations {
      world_id: world_id.to_string(),
    };
    self.add_to_world(world_id, key, location, |world, location| {
      let mut world = world.clone();
      world.locations.push(location.clone());
      world
    })
  }

  /// Add a culture to world `world_id`, returning it as stored.
  pub fn add_culture(&self, world_id: &str, culture: Culture) -> BoxFuture<'static, ResourceResult<Culture>> {
    if let Err(e) = culture.validate() {
      return future::ready(Err(e)).boxed();
    }
    let key = ApiKey::WorldCultures {
      world_id: world_id.to_string(),
    };
    self.add_to_world(world_id, key, culture, |world, culture| {
      let mut world = world.clone();
      world.cultures.push(culture.clone());
      world
    })
  }

  /// Post `item` to `key` and attach it to the world in the world list, first
  /// as sent and then as stored. A server that answers without a body keeps
  /// the item as sent.
  fn add_to_world<I>(
    &self,
    world_id: &str,
    key: ApiKey,
    item: I,
    attach: fn(&World, &I) -> World,
  ) -> BoxFuture<'static, ResourceResult<I>>
  where
    I: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
  {
    let id = world_id.to_string();
    debug!(world = %id, target = %key.description(), "adding to world");

    let transport = Arc::clone(&self.transport);
    let commit_key: ResourceKey = key.into();
    let sent = item.clone();
    let commit = async move {
      let stored: Option<I> = transport.post_resource(&commit_key, &sent).await?;
      Ok::<_, ResourceError>(stored.unwrap_or(sent))
    };

    let shown_id = id.clone();
    let stored_id = id.clone();
    let saving = self.worlds.cache().mutate_with(
      ApiKey::Worlds,
      move |list: Option<&Vec<World>>| edit_member(list, &shown_id, |world| attach(world, &item)),
      commit,
      move |base: Option<&Vec<World>>, stored: &I| edit_member(base, &stored_id, |world| attach(world, stored)),
    );

    let detail = self.world_detail.clone();
    async move {
      let stored = saving.await?;
      detail.invalidate(ApiKey::World { id });
      Ok(stored)
    }
    .boxed()
  }

  /// Start background eviction for every cache.
  pub fn spawn_gc(&self) -> Vec<GcHandle> {
    vec![
      self.novels.cache().spawn_gc(),
      self.novel_detail.spawn_gc(),
      self.metadata.spawn_gc(),
      self.templates.spawn_gc(),
      self.chapters.cache().spawn_gc(),
      self.characters.cache().spawn_gc(),
      self.character_detail.spawn_gc(),
      self.worlds.cache().spawn_gc(),
      self.world_detail.spawn_gc(),
    ]
  }
}

/// `list` with member `id` replaced by `edit(member)`.
fn edit_member<E: Entity>(list: Option<&Vec<E>>, id: &str, edit: impl Fn(&E) -> E) -> Vec<E> {
  list
    .map(|items| {
      items
        .iter()
        .map(|item| if item.id() == id { edit(item) } else { item.clone() })
        .collect()
    })
    .unwrap_or_default()
}
