mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use protoworld_common::EntityId;
use protoworld_events::{Envelope, Event, EventBus, EventSource, Handler, Raiser, SubscriberToken};
use protoworld_kernel::{EntityEvent, EntityFactory, EntityManager};
use protoworld_net::MessageReconciler;
use protoworld_persist::SaveFile;
use protoworld_prototype::{ComponentCatalog, PrototypeStore};

#[derive(Parser)]
#[command(name = "protoworld-cli", about = "CLI tool for protoworld templates and entities")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with runtime tunables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info
    Info,
    /// Load and resolve a template directory, printing merged components
    Resolve {
        /// Directory of *.json template files
        dir: PathBuf,
        /// Only print this template
        #[arg(long)]
        id: Option<String>,
    },
    /// Spawn entities and drive the event bus for a number of ticks
    Simulate {
        dir: PathBuf,
        /// Template ids to spawn, one entity each
        #[arg(short, long, num_args = 1..)]
        spawn: Vec<String>,
        #[arg(short, long, default_value = "10")]
        ticks: u64,
        /// JSON array of inbound messages, fed before initialization
        #[arg(short, long)]
        messages: Option<PathBuf>,
    },
    /// Restore a save file against a template directory
    Restore { dir: PathBuf, save: PathBuf },
}

/// Events carried by the simulation bus.
#[derive(Debug, Clone)]
enum SimEvent {
    Tick(u64),
    Spawned(EntityId),
    Initialized(EntityId),
    Deleted(EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum SimEventKind {
    Tick,
    Lifecycle,
}

impl Event for SimEvent {
    type Kind = SimEventKind;

    fn kind(&self) -> SimEventKind {
        match self {
            SimEvent::Tick(_) => SimEventKind::Tick,
            SimEvent::Spawned(_) | SimEvent::Initialized(_) | SimEvent::Deleted(_) => {
                SimEventKind::Lifecycle
            }
        }
    }
}

impl From<EntityEvent> for SimEvent {
    fn from(event: EntityEvent) -> Self {
        match event {
            EntityEvent::Spawned { id, .. } => SimEvent::Spawned(id),
            EntityEvent::Initialized { id } => SimEvent::Initialized(id),
            EntityEvent::Deleted { id } => SimEvent::Deleted(id),
        }
    }
}

fn load_manager(dir: &Path, config: &AppConfig) -> anyhow::Result<EntityManager> {
    let factory = EntityFactory::with_builtins();
    let mut store = PrototypeStore::new();
    store
        .load_dir(dir, Some(factory.components() as &dyn ComponentCatalog))
        .with_context(|| format!("loading templates from {}", dir.display()))?;
    let report = store.resolve_inheritance()?;
    tracing::info!(templates = store.len(), resolved = report.resolved, "templates resolved");
    Ok(EntityManager::with_config(store, factory, config.manager.clone()))
}

fn resolve(dir: &Path, id: Option<&str>, config: &AppConfig) -> anyhow::Result<()> {
    let manager = load_manager(dir, config)?;
    let store = manager.prototypes();
    let mut out = serde_json::Map::new();
    for prototype in store.iter() {
        if id.is_some_and(|wanted| wanted != prototype.id()) {
            continue;
        }
        let components: serde_json::Map<_, _> = prototype
            .components()
            .iter()
            .map(|(name, params)| (name.to_string(), serde_json::Value::Object(params.clone())))
            .collect();
        out.insert(
            prototype.id().to_string(),
            serde_json::json!({
                "name": prototype.display_name(),
                "class": prototype.class(),
                "parent": prototype.parent_id(),
                "snap": prototype.snap().to_string(),
                "components": components,
            }),
        );
    }
    if let Some(wanted) = id {
        anyhow::ensure!(!out.is_empty(), "no template with id {wanted:?}");
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn simulate(
    dir: &Path,
    spawn: &[String],
    ticks: u64,
    messages: Option<&Path>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let mut manager = load_manager(dir, config)?;
    let mut reconciler = MessageReconciler::new(config.reconciler.clone());
    let mut bus: EventBus<SimEvent> = EventBus::with_config(config.events.clone());

    let tick_count = Rc::new(Cell::new(0u64));
    let lifecycle_count = Rc::new(Cell::new(0usize));
    let observer = SubscriberToken::new();

    let seen = Rc::clone(&tick_count);
    let on_tick: Handler<SimEvent> = Rc::new(move |env: &Envelope<SimEvent>, _: &mut Raiser<'_, SimEvent>| {
        if let SimEvent::Tick(n) = env.event {
            seen.set(n);
        }
    });
    let seen = Rc::clone(&lifecycle_count);
    let on_lifecycle: Handler<SimEvent> =
        Rc::new(move |env: &Envelope<SimEvent>, _: &mut Raiser<'_, SimEvent>| {
            tracing::debug!(event = ?env.event, "lifecycle");
            seen.set(seen.get() + 1);
        });
    bus.subscribe(SimEventKind::Tick, on_tick, observer);
    bus.subscribe(SimEventKind::Lifecycle, on_lifecycle, observer);

    if let Some(path) = messages {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading messages from {}", path.display()))?;
        let items: Vec<serde_json::Value> = serde_json::from_str(&text)?;
        for item in items {
            let raw = serde_json::to_vec(&item)?;
            reconciler.handle(&raw, &mut manager)?;
        }
    }

    for template in spawn {
        let id = manager.spawn(template, None)?;
        tracing::info!(%id, %template, "spawned");
    }
    manager.initialize();

    for tick in 1..=ticks {
        for event in manager.drain_events() {
            let source = match &event {
                EntityEvent::Spawned { id, .. }
                | EntityEvent::Initialized { id }
                | EntityEvent::Deleted { id } => EventSource::Entity(*id),
            };
            bus.raise(source, event.into());
        }
        bus.raise(EventSource::System, SimEvent::Tick(tick));
        bus.drain()?;
        reconciler.process_buffer(&mut manager, Instant::now());
    }

    println!("ticks: {}", tick_count.get());
    println!("entities: {}", manager.len());
    println!("lifecycle events: {}", lifecycle_count.get());
    println!("buffered messages: {}", reconciler.len());
    for entity in manager.iter() {
        println!("  {} {} ({})", entity.id(), entity.name(), entity.prototype());
    }

    bus.unsubscribe_all(observer);
    manager.shutdown();
    Ok(())
}

fn restore(dir: &Path, save: &Path, config: &AppConfig) -> anyhow::Result<()> {
    let mut manager = load_manager(dir, config)?;
    let file = SaveFile::load(save).with_context(|| format!("reading save {}", save.display()))?;
    let ids = file.restore(&mut manager)?;
    manager.initialize();
    println!("restored {} of {} records", ids.len(), file.entities.len());
    for id in ids {
        if let Some(entity) = manager.get(id) {
            let at = entity
                .position()
                .map(|p| format!("({}, {})", p.x, p.y))
                .unwrap_or_else(|| "-".into());
            println!("  {} {} [{}] at {}", id, entity.name(), entity.prototype(), at);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("protoworld-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", protoworld_common::crate_info());
            println!("prototype: {}", protoworld_prototype::crate_info());
            println!("events: {}", protoworld_events::crate_info());
            println!("kernel: {}", protoworld_kernel::crate_info());
            println!("net: {}", protoworld_net::crate_info());
            println!("persist: {}", protoworld_persist::crate_info());
        }
        Commands::Resolve { dir, id } => resolve(&dir, id.as_deref(), &config)?,
        Commands::Simulate {
            dir,
            spawn,
            ticks,
            messages,
        } => simulate(&dir, &spawn, ticks, messages.as_deref(), &config)?,
        Commands::Restore { dir, save } => restore(&dir, &save, &config)?,
    }

    Ok(())
}
