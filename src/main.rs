mod app;
mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use quill::api::{Library, MemoryTransport};
use quill::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::app::{Action, App};
use crate::commands::Kind;

#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(about = "Cached, optimistic client for the novel authoring API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/quill/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// API base URL, overrides the config file and QUILL_API_URL
  #[arg(long, global = true)]
  api_url: Option<String>,

  /// Use an in-process store instead of the API
  #[arg(long, global = true)]
  memory: bool,

  /// Verbose logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// List a collection
  List {
    kind: Kind,
    #[arg(long)]
    novel: Option<String>,
  },
  /// Show one entity
  Show {
    kind: Kind,
    id: String,
    #[arg(long)]
    novel: Option<String>,
  },
  /// Create an entity from a JSON payload
  Create {
    kind: Kind,
    #[arg(long)]
    novel: Option<String>,
    #[arg(long)]
    json: String,
  },
  /// Update an entity with a JSON patch
  Update {
    kind: Kind,
    id: String,
    #[arg(long)]
    novel: Option<String>,
    #[arg(long)]
    json: String,
  },
  /// Delete an entity
  Delete {
    kind: Kind,
    id: String,
    #[arg(long)]
    novel: Option<String>,
  },
  /// Print cache notifications for a collection until Ctrl-C
  Watch {
    kind: Kind,
    #[arg(long)]
    novel: Option<String>,
  },
  /// Search characters across all novels
  Search { query: String },
  /// Show a novel's metadata, or change it with a JSON patch
  Metadata {
    novel: String,
    #[arg(long)]
    json: Option<String>,
  },
  /// List templates for new novels
  Templates,
  /// Set how one character relates to another
  Relate {
    #[arg(long)]
    novel: String,
    character: String,
    related: String,
    relationship: String,
  },
}

impl From<Cmd> for Action {
  fn from(cmd: Cmd) -> Self {
    match cmd {
      Cmd::List { kind, novel } => Action::List { kind, novel },
      Cmd::Show { kind, id, novel } => Action::Show { kind, id, novel },
      Cmd::Create { kind, novel, json } => Action::Create { kind, novel, json },
      Cmd::Update { kind, id, novel, json } => Action::Update { kind, id, novel, json },
      Cmd::Delete { kind, id, novel } => Action::Delete { kind, id, novel },
      Cmd::Watch { kind, novel } => Action::Watch { kind, novel },
      Cmd::Search { query } => Action::Search { query },
      Cmd::Metadata { novel, json } => Action::Metadata { novel, json },
      Cmd::Templates => Action::Templates,
      Cmd::Relate {
        novel,
        character,
        related,
        relationship,
      } => Action::Relate {
        novel,
        character,
        related,
        relationship,
      },
    }
  }
}

/// Install the tracing subscriber. The returned guard flushes the log file.
fn init_logging(verbose: bool, to_stderr: bool) -> Result<Option<WorkerGuard>> {
  let default = if verbose { "quill=debug" } else { "quill=info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  let log_dir = Config::data_dir().filter(|_| !to_stderr);
  let Some(log_dir) = log_dir else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_target(false)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  std::fs::create_dir_all(&log_dir)?;
  let appender = tracing_appender::rolling::never(&log_dir, "quill.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_ansi(false)
    .with_writer(writer)
    .init();
  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.verbose, args.log_stderr)?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override API url if specified on command line
  if let Some(url) = args.api_url {
    config.api.url = url;
  }

  let action = Action::from(args.command);
  if args.memory {
    let library = Library::with_transport(Arc::new(MemoryTransport::new()), config.cache_config());
    App::new(library).run(action).await
  } else {
    App::new(Library::new(&config)?).run(action).await
  }
}
