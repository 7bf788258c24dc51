use activity_sync::{logging, ActivityCache, ActivitySync, Config, HttpActivityStore, Module};
use clap::{Parser, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "activity-sync")]
#[command(about = "Keep a local activity cache in sync with the CRM store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/activity-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Module the sync is triggered from
  #[arg(short, long, value_enum, default_value_t = Origin::Crm)]
  origin: Origin,

  /// Sync once and exit instead of refreshing in the background
  #[arg(long)]
  once: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Origin {
  Crm,
  Leadgen,
}

impl From<Origin> for Module {
  fn from(origin: Origin) -> Self {
    match origin {
      Origin::Crm => Module::Crm,
      Origin::Leadgen => Module::LeadGen,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let store = HttpActivityStore::new(&config)?;
  let cache = Arc::new(ActivityCache::new().with_max_age(config.sync.max_age()));
  let engine = ActivitySync::new(store, cache);

  engine.sync(Some(args.origin.into())).await?;
  log_view(&engine.subscribe().borrow());

  if args.once {
    return Ok(());
  }

  let background = engine.start_background(&config.sync);
  let mut view = engine.subscribe();
  loop {
    tokio::select! {
      changed = view.changed() => {
        if changed.is_err() {
          warn!("activity view closed");
          break;
        }
        log_view(&view.borrow_and_update());
      }
      _ = tokio::signal::ctrl_c() => {
        info!("interrupted");
        break;
      }
    }
  }

  background.stop();
  Ok(())
}

fn log_view(view: &activity_sync::ActivityView) {
  match &view.metrics {
    Some(metrics) => info!(
      revision = view.revision,
      activities = view.activities.len(),
      stale = view.activities_stale,
      open = metrics.planned + metrics.in_progress,
      overdue = metrics.overdue,
      completion_rate = metrics.completion_rate,
      "activity view"
    ),
    None => info!(
      revision = view.revision,
      activities = view.activities.len(),
      stale = view.activities_stale,
      "activity view"
    ),
  }
}
