//! Binary entrypoint for the textcraft CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and seed the world store
//! - `run [--as NAME] [--admin]` - play the world from the console while the clock ticks
//! - `export [--output FILE]` - dump the world as JSON
//! - `import FILE` - load a JSON dump into an empty world store
//! - `check` - verify the association indices against a rebuild
//!
//! See the library crate docs for module-level details: `textcraft::`.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use textcraft::config::Config;
use textcraft::world::types::PROP_ADMIN;
use textcraft::world::{
    start_clock, Listener, ThingBackend, ThingId, ThingStore, ThingStoreBuilder, World,
    PROTO_PERSON,
};

#[derive(Parser)]
#[command(name = "textcraft")]
#[command(about = "A prototype-inheriting object world for text adventures")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and seed the world
    Init,
    /// Play the world from this console
    Run {
        /// Name of the person to play; created in the lobby when missing
        #[arg(long = "as", default_value = "wizard")]
        player: String,
        /// Give the person admin rights
        #[arg(long)]
        admin: bool,
    },
    /// Write the world as JSON
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Load a JSON dump into an empty world store
    Import {
        /// Dump produced by `export`
        file: String,
    },
    /// Compare the association indices with a full rebuild
    Check,
}

/// Prints world output to the console.
struct ConsoleListener {
    admin: bool,
}

impl Listener for ConsoleListener {
    fn output(&mut self, text: &str) {
        println!("{}", text);
    }

    fn is_admin(&self) -> bool {
        self.admin
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Init => None,
        _ => Some(load_config(&cli.config).await?),
    };
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Init => {
            if Path::new(&cli.config).exists() {
                warn!("{} already exists; leaving it alone", cli.config);
            } else {
                Config::create_default(&cli.config).await?;
                info!("wrote {}", cli.config);
            }
            let config = load_config(&cli.config).await?;
            let mut world = open_world(&config, true)?;
            world.flush()?;
            println!(
                "World '{}' ready in {} ({} things).",
                world.name(),
                config.world.data_dir,
                world.thing_count()
            );
        }
        Commands::Run { player, admin } => {
            let config = config.ok_or_else(|| anyhow!("configuration not loaded"))?;
            run_console(&config, &player, admin).await?;
        }
        Commands::Export { output } => {
            let config = config.ok_or_else(|| anyhow!("configuration not loaded"))?;
            let world = open_world(&config, false)?;
            let json = world.export_json()?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("writing {}", path))?;
                    info!("exported {} things to {}", world.thing_count(), path);
                }
                None => println!("{}", json),
            }
        }
        Commands::Import { file } => {
            let config = config.ok_or_else(|| anyhow!("configuration not loaded"))?;
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file))?;
            // one flush when the store closes instead of one per thing
            let store = ThingStoreBuilder::new(&config.world.data_dir)
                .without_flush()
                .open()?;
            let world = World::import_json(Box::new(store), &json, config.limits())?;
            println!("Imported '{}' ({} things).", world.name(), world.thing_count());
        }
        Commands::Check => {
            let config = config.ok_or_else(|| anyhow!("configuration not loaded"))?;
            let store = open_store(&config)?;
            let size = store.size_on_disk()?;
            let world = world_from_store(store, &config, false)?;
            if world.check_indices() {
                println!(
                    "Indices consistent across {} things ({} bytes on disk).",
                    world.thing_count(),
                    size
                );
            } else {
                println!("Index mismatch: incremental indices differ from a rebuild.");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).await
    } else {
        Ok(Config::default())
    }
}

fn open_store(config: &Config) -> Result<ThingStore> {
    ThingStore::open(&config.world.data_dir)
        .with_context(|| format!("opening world store {}", config.world.data_dir))
}

/// Open the sled-backed world. An empty store is seeded only when allowed.
fn open_world(config: &Config, seed: bool) -> Result<World> {
    world_from_store(open_store(config)?, config, seed)
}

fn world_from_store(store: ThingStore, config: &Config, seed: bool) -> Result<World> {
    if store.get_info()?.is_none() && !(seed || config.world.seed_if_empty) {
        return Err(anyhow!(
            "no world in {}; run `textcraft init` first",
            config.world.data_dir
        ));
    }
    Ok(World::open(Box::new(store), config.world_options())?)
}

/// First person answering to `name`, or a new one in the lobby.
fn find_or_create_player(world: &mut World, name: &str, admin: bool) -> Result<ThingId> {
    let person = world.prototype(PROTO_PERSON);
    let existing = world.thing_ids().into_iter().find(|id| {
        world.get(*id).map(|t| t.prototype) == Some(person) && world.answers_to(*id, name)
    });
    let id = match existing {
        Some(id) => id,
        None => {
            let id = world.create_from(person, name, "")?;
            world.set_location(id, world.lobby())?;
            info!("created player %{} '{}'", id, name);
            id
        }
    };
    if admin {
        world.set_prop(id, PROP_ADMIN, true)?;
    }
    Ok(id)
}

async fn run_console(config: &Config, player: &str, admin: bool) -> Result<()> {
    let world = open_world(config, false)?;
    let handle = start_clock(world, config.clock_config());
    let player = player.to_string();
    let me = handle
        .with(move |w| -> Result<ThingId> {
            let id = find_or_create_player(w, &player, admin)?;
            w.attach_listener(id, Box::new(ConsoleListener { admin }));
            Ok(id)
        })
        .await??;

    handle.command(me, "look").await.ok();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        // errors were already shown to the player
        let _ = handle.command(me, line).await;
    }
    handle
        .with(move |w| {
            w.detach_listener(me);
        })
        .await?;

    let world = handle.shutdown().await?;
    info!("world '{}' saved at version {}", world.name(), world.version());
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let mut level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if let Some(configured) = config
        .as_ref()
        .and_then(|c| c.logging.level.as_deref())
        .and_then(|l| l.parse().ok())
    {
        if verbosity == 0 {
            level = configured;
        }
    }
    builder.filter_level(level);

    fn line(record: &log::Record) -> String {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        if record.target() == "audit" {
            format!("{} [{}] [audit] {}", ts, record.level(), record.args())
        } else {
            format!("{} [{}] {}", ts, record.level(), record.args())
        }
    }

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // mirror to the console only when someone is watching it
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let text = line(record);
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", text);
                }
                if is_tty {
                    writeln!(fmt, "{}", text)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| writeln!(fmt, "{}", line(record)));
        }
    }
    let _ = builder.try_init();
}
