//! Grove CLI - index and watch a tree of markdown documents

use clap::{Parser, Subcommand};
use colored::Colorize;
use grove_core::{Config, GroveError, Item, ItemKind, Repository, Route, Update};
use serde::Serialize;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Index a directory tree of markdown documents and watch it for changes", long_about = None)]
struct Cli {
    /// Override repository root detection
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .grove/config.toml
    Init,

    /// Scan the repository and list its items
    Index,

    /// List every route in the index
    Routes,

    /// Watch routes and print updates as they are published
    Watch {
        /// Route to watch (repeatable; all routes if omitted)
        #[arg(short, long = "route")]
        routes: Vec<String>,
    },
}

#[derive(Serialize)]
struct ItemSummary {
    route: String,
    kind: ItemKind,
    title: String,
    files: usize,
    hash: String,
    /// Seconds since the Unix epoch
    last_modified: Option<u64>,
}

impl ItemSummary {
    fn from_item(item: &Item) -> Self {
        Self {
            route: item.route().to_string(),
            kind: item.kind(),
            title: item.title(),
            files: item.files().len(),
            hash: item.hash().to_string(),
            last_modified: item
                .last_modified()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Init => cmd_init(cli.root),
        Commands::Index => cmd_index(cli.root, cli.json),
        Commands::Routes => cmd_routes(cli.root, cli.json),
        Commands::Watch { routes } => cmd_watch(cli.root, routes, cli.json),
    };

    if let Err(e) = result {
        if cli.json {
            print_json(&serde_json::json!({ "code": error_code(&e), "message": e.to_string() }));
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        std::process::exit(1);
    }
}

/// Logs go to stderr so `--json` output stays machine readable.
/// `GROVE_LOG` takes precedence over `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("GROVE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn error_code(error: &GroveError) -> &'static str {
    match error {
        GroveError::InvalidRoot { .. } => "invalid_root",
        GroveError::Classification { .. } => "classification",
        GroveError::RouteNotFound(_) => "route_not_found",
        GroveError::ConfigExists(_) => "config_exists",
        GroveError::ConfigParse(_) => "config_parse",
        GroveError::Watch(_) | GroveError::WatcherRunning(_) => "watch",
        _ => "error",
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: cannot serialize output: {e}"),
    }
}

fn cmd_init(root: Option<PathBuf>) -> grove_core::Result<()> {
    let repo_root = detect_repo_root(root)?;
    let path = Config::init(&repo_root)?;
    println!("{} {}", "Created".green(), path.display());
    Ok(())
}

fn open(root: Option<PathBuf>) -> grove_core::Result<Repository> {
    let repo_root = detect_repo_root(root)?;
    let config = Config::discover(&repo_root)?;
    Repository::open(&repo_root, config)
}

fn cmd_index(root: Option<PathBuf>, json: bool) -> grove_core::Result<()> {
    let repository = open(root)?;
    let index = repository.index();
    let mut items: Vec<_> = index.items().to_vec();
    items.sort_by(|a, b| a.route().cmp(b.route()));

    if json {
        let summaries: Vec<ItemSummary> = items.iter().map(|i| ItemSummary::from_item(i)).collect();
        print_json(&serde_json::json!({
            "root": repository.root(),
            "generation": repository.generation(),
            "items": summaries,
        }));
        return Ok(());
    }

    for item in &items {
        let kind = match item.kind() {
            ItemKind::Physical => item.kind().as_str().green(),
            ItemKind::Virtual => item.kind().as_str().blue(),
            ItemKind::FileCollection => item.kind().as_str().yellow(),
        };
        let files = match item.files().len() {
            0 => String::new(),
            n => format!(" [{n} files]"),
        };
        println!("{:<15} {} {:?}{}", kind, item.route().to_string().cyan(), item.title(), files);
    }
    println!(
        "{}: {} items (generation {})",
        "Indexed".green(),
        items.len(),
        repository.generation()
    );
    Ok(())
}

fn cmd_routes(root: Option<PathBuf>, json: bool) -> grove_core::Result<()> {
    let repository = open(root)?;
    let mut routes = repository.routes();
    routes.sort();

    if json {
        print_json(&routes);
    } else {
        for route in routes {
            println!("{route}");
        }
    }
    Ok(())
}

fn cmd_watch(root: Option<PathBuf>, routes: Vec<String>, json: bool) -> grove_core::Result<()> {
    let repository = open(root)?;
    let (tx, rx) = crossbeam_channel::unbounded::<Update>();
    repository.subscribe(tx);

    let routes: Vec<Route> = if routes.is_empty() {
        repository.routes()
    } else {
        routes.iter().map(|r| Route::new(r)).collect()
    };
    for route in &routes {
        repository.start_watching(route)?;
    }
    if !json {
        println!(
            "{} {} routes under {} (Ctrl-C to stop)",
            "Watching".green(),
            routes.len(),
            repository.root().display()
        );
    }

    for update in rx.iter() {
        if json {
            print_json(&serde_json::json!({
                "generation": repository.generation(),
                "update": update,
            }));
            continue;
        }
        for route in &update.new {
            println!("{} {}", "new".green(), route);
        }
        for route in &update.modified {
            println!("{} {}", "modified".yellow(), route);
        }
        for route in &update.deleted {
            println!("{} {}", "deleted".red(), route);
        }
    }
    Ok(())
}

fn detect_repo_root(override_path: Option<PathBuf>) -> grove_core::Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    // Walk up from current directory looking for .grove
    let mut current = std::env::current_dir()?;
    loop {
        if current.join(".grove").is_dir() {
            return Ok(current);
        }
        if !current.pop() {
            return Ok(std::env::current_dir()?);
        }
    }
}
