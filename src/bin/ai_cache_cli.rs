//! ai-cache-cli — 共享缓存的预热、统计与清理命令行工具
//!
//! Usage:
//!   ai-cache-cli warm <seed.yaml> [--provider <id>]   Pre-seed entries from a YAML file
//!   ai-cache-cli get <provider> <query>               Look up one cached response
//!   ai-cache-cli stats [--json]                       Print cache statistics
//!   ai-cache-cli clear [pattern]                      Remove all or matching entries
//!
//! Every command accepts `--config <path>`; environment overrides apply last.

use ai_lib_cache::{CacheManager, CacheSettings, WarmEntry};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;

/// Seed file layout for `warm`.
#[derive(Debug, Deserialize)]
struct SeedFile {
    provider: Option<String>,
    entries: Vec<WarmEntry>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_flag_value(&mut args, "--config");

    if args.is_empty() {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[0].as_str() {
        "warm" => cmd_warm(config_path.as_deref(), args[1..].to_vec()).await,
        "get" => cmd_get(config_path.as_deref(), &args[1..]).await,
        "stats" => cmd_stats(config_path.as_deref(), &args[1..]).await,
        "clear" => cmd_clear(config_path.as_deref(), &args[1..]).await,
        "version" | "--version" | "-V" => {
            println!("ai-cache-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"ai-cache-cli — AI 响应缓存命令行工具

USAGE:
    ai-cache-cli <COMMAND> [--config <path>] [OPTIONS]

COMMANDS:
    warm <seed.yaml> [--provider <id>]   Pre-seed the cache from a YAML seed file
    get <provider> <query>               Look up one cached response
    stats [--json]                       Print cache statistics
    clear [pattern]                      Remove all entries, or those whose query contains pattern
    version                              Show version information
    help                                 Show this help message

ENVIRONMENT:
    AI_CACHE_REDIS_URL                   Network store URL (disables mock mode)
    AI_CACHE_MOCK_MODE                   true/false
    AI_CACHE_MAX_SIZE                    In-process store capacity
    AI_CACHE_DEFAULT_TTL_SECS            TTL for providers without a policy
    AI_CACHE_LOCK_TIMEOUT_MS             Coalescing lock timeout
    RUST_LOG                             Log filter, e.g. ai_lib_cache=debug"#
    );
}

/// Remove `flag <value>` from `args`, returning the value.
fn take_flag_value(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let i = args.iter().position(|a| a == flag)?;
    args.remove(i);
    if i < args.len() {
        Some(args.remove(i))
    } else {
        None
    }
}

fn load_manager(config_path: Option<&str>) -> anyhow::Result<CacheManager> {
    let settings = match config_path {
        Some(path) => CacheSettings::from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => CacheSettings::default(),
    };
    let settings = settings.apply_env().context("applying environment overrides")?;
    let manager = CacheManager::new(settings)?;
    if manager.backend_name() == "memory" {
        eprintln!("note: no network store configured; changes only live for this process");
    }
    Ok(manager)
}

fn load_seed(path: &Path) -> anyhow::Result<SeedFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
}

async fn cmd_warm(config_path: Option<&str>, mut args: Vec<String>) -> anyhow::Result<()> {
    let provider_flag = take_flag_value(&mut args, "--provider");
    let Some(seed_path) = args.first() else {
        bail!("warm requires a seed file");
    };
    let seed = load_seed(Path::new(seed_path))?;
    let Some(provider) = provider_flag.or(seed.provider) else {
        bail!("no provider: set `provider` in the seed file or pass --provider");
    };

    let manager = load_manager(config_path)?;
    let offered = seed.entries.len();
    let warmed = manager.warm_cache(seed.entries, &provider).await;
    println!("warmed {warmed}/{offered} entries for provider '{provider}'");
    println!("store now holds {} entries", manager.len().await);
    Ok(())
}

async fn cmd_get(config_path: Option<&str>, args: &[String]) -> anyhow::Result<()> {
    let (Some(provider), Some(query)) = (args.first(), args.get(1)) else {
        bail!("get requires <provider> <query>");
    };
    let manager = load_manager(config_path)?;
    match manager.get_cached_response(query, provider).await {
        Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
        None => {
            println!("miss");
            std::process::exit(2);
        }
    }
    Ok(())
}

async fn cmd_stats(config_path: Option<&str>, args: &[String]) -> anyhow::Result<()> {
    let manager = load_manager(config_path)?;
    let stats = manager.get_cache_stats().await;
    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("backend:        {}", stats.backend);
    println!("total entries:  {}", stats.total_entries);
    println!("fallbacks:      {}", stats.backend_fallbacks);
    if !stats.top_entries.is_empty() {
        println!("\n=== Top entries ===");
        for e in &stats.top_entries {
            println!("{:>6}  [{}] {}", e.hit_count, e.provider, e.query);
        }
    }
    Ok(())
}

async fn cmd_clear(config_path: Option<&str>, args: &[String]) -> anyhow::Result<()> {
    let manager = load_manager(config_path)?;
    let pattern = args.first().map(String::as_str);
    let removed = manager.clear_cache(pattern).await;
    match pattern {
        Some(p) => println!("removed {removed} entries matching '{p}'"),
        None => println!("removed {removed} entries"),
    }
    Ok(())
}
