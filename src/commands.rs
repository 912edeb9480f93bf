//! Resource kinds the CLI understands, and how they map to cache keys
use std::fmt;
use std::str::FromStr;

use quill::api::ApiKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
  Novels,
  Chapters,
  Characters,
  Worlds,
}

#[derive(Debug, Clone)]
pub struct KindInfo {
  pub kind: Kind,
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All resource kinds
pub const KINDS: &[KindInfo] = &[
  KindInfo {
    kind: Kind::Novels,
    name: "novels",
    aliases: &["n", "novel"],
    description: "Novels in the library",
  },
  KindInfo {
    kind: Kind::Chapters,
    name: "chapters",
    aliases: &["ch", "chapter"],
    description: "Chapters of a novel (needs --novel)",
  },
  KindInfo {
    kind: Kind::Characters,
    name: "characters",
    aliases: &["c", "character", "chars"],
    description: "Characters of a novel (needs --novel)",
  },
  KindInfo {
    kind: Kind::Worlds,
    name: "worlds",
    aliases: &["w", "world", "worldbuilding"],
    description: "Worldbuilding settings",
  },
];

impl Kind {
  pub fn info(self) -> &'static KindInfo {
    // KINDS holds every variant
    KINDS.iter().find(|info| info.kind == self).unwrap_or(&KINDS[0])
  }

  /// Whether keys of this kind live under a novel
  pub fn is_nested(self) -> bool {
    matches!(self, Kind::Chapters | Kind::Characters)
  }

  /// Collection key for this kind.
  pub fn key(self, novel: Option<&str>) -> Result<ApiKey, String> {
    let nested = |novel: Option<&str>| {
      novel
        .map(str::to_string)
        .ok_or_else(|| format!("{} need --novel <ID>", self))
    };
    Ok(match self {
      Kind::Novels => ApiKey::Novels,
      Kind::Worlds => ApiKey::Worlds,
      Kind::Chapters => ApiKey::Chapters { novel_id: nested(novel)? },
      Kind::Characters => ApiKey::Characters { novel_id: nested(novel)? },
    })
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.info().name)
  }
}

impl FromStr for Kind {
  type Err = String;

  fn from_str(input: &str) -> Result<Self, Self::Err> {
    let input = input.trim().to_lowercase();
    KINDS
      .iter()
      .find(|info| info.name == input || info.aliases.contains(&input.as_str()))
      .map(|info| info.kind)
      .ok_or_else(|| {
        let names: Vec<&str> = KINDS.iter().map(|info| info.name).collect();
        format!("unknown kind {:?} (expected one of: {})", input, names.join(", "))
      })
  }
}
