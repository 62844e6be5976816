use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use dex_api::{DexApi, InProcApi, LoadEvent, StreamHandle};
use dex_core::{Attribute, Collection, Comparison, Entity, EntityKey};
use dex_persist::{Favorites, MemoryStore, PrefStore, SqliteStore};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dexctl", version, about = "Dex CLI: browse, search and filter the creature catalog")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Keep preferences in memory for this run only
    #[arg(long = "no-persist", global = true, action = ArgAction::SetTrue)]
    no_persist: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show one page of the remote listing
    Page {
        /// 1-based page number
        #[arg(default_value_t = 1)]
        page: u32,
        #[arg(long = "per-page", default_value_t = 20)]
        per_page: u32,
    },
    /// Show one entity by name or number
    Get {
        key: String,
        /// Include species text and ability descriptions
        #[arg(long = "detail", action = ArgAction::SetTrue)]
        detail: bool,
        /// Locale for descriptive text (default: saved language)
        #[arg(long = "lang")]
        lang: Option<String>,
    },
    /// Exact lookup by name or number
    Search { query: String },
    /// Fetch several entities by id; failures are skipped
    Batch {
        #[arg(required = true)]
        ids: Vec<u32>,
    },
    /// Load the whole catalog, reporting progress
    LoadAll,
    /// Filter the full catalog: type:NAME gen:N hp:MIN-MAX atk: def: spe: plus free text
    Filter {
        query: Vec<String>,
        #[arg(long = "page", default_value_t = 1)]
        page: usize,
        #[arg(long = "per-page", default_value_t = 20)]
        per_page: usize,
        /// Explain filter stages and counts
        #[arg(long = "explain", action = ArgAction::SetTrue)]
        explain: bool,
    },
    /// Side-by-side stats for up to four entities
    Compare {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Manage favorites
    Fav {
        #[command(subcommand)]
        action: FavAction,
    },
    /// Show or set the preferred language
    Lang { locale: Option<String> },
    /// Print effective settings
    Settings,
}

#[derive(Subcommand, Debug)]
enum FavAction {
    Add { id: u32 },
    Rm { id: u32 },
    Ls,
}

fn init_tracing() {
    let env = std::env::var("DEX_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DEX_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DEX_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_prefs(no_persist: bool) -> Result<Box<dyn PrefStore>> {
    if no_persist {
        return Ok(Box::new(MemoryStore::new()));
    }
    Ok(Box::new(SqliteStore::open_default()?))
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn print_rows(items: &[Arc<Entity>]) {
    println!("{:<6} {:<24} {:<18} {:>5}", "ID", "NAME", "TYPES", "TOTAL");
    for e in items {
        println!("{:<6} {:<24} {:<18} {:>5}", e.display_id(), e.name, e.categories.join("/"), e.attribute_total());
    }
}

fn print_entity(e: &Entity) {
    println!("{} {}", e.display_id(), e.name);
    println!("  types:     {}", e.categories.join(", "));
    println!(
        "  size:      {:.1} m, {:.1} kg, base exp {}",
        e.traits.height as f32 / 10.0,
        e.traits.weight as f32 / 10.0,
        e.traits.base_experience
    );
    let stats: Vec<String> = e.attributes.iter().map(|a| format!("{} {}", a.attribute, a.base)).collect();
    println!("  stats:     {} (total {})", stats.join(", "), e.attribute_total());
    let abilities: Vec<String> = e
        .abilities
        .iter()
        .map(|a| if a.is_hidden { format!("{} (hidden)", a.name) } else { a.name.clone() })
        .collect();
    println!("  abilities: {}", abilities.join(", "));
}

/// Drive `load_all` to completion, drawing progress on stderr. Ctrl-C stops waiting.
async fn load_collection(api: &dyn DexApi, human: bool) -> Result<Arc<Collection>> {
    let t0 = Instant::now();
    let StreamHandle { mut rx, cancel } = api.load_all().await?;
    loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Some(LoadEvent::Progress(p)) => {
                    if human && p.total > 0 {
                        eprint!("\rloading {}/{} ({:.0}%)", p.current, p.total, p.percent());
                    }
                }
                Some(LoadEvent::Loaded(c)) => {
                    if human { eprintln!(); }
                    info!(items = c.items.len(), total = c.total, took_ms = %t0.elapsed().as_millis(), "load-all ok");
                    return Ok(c);
                }
                Some(LoadEvent::Failed(e)) => {
                    if human { eprintln!(); }
                    return Err(e).context("loading catalog");
                }
                None => bail!("load stream closed before completion"),
            },
            _ = signal::ctrl_c() => {
                warn!("Ctrl-C received; abandoning load");
                cancel.cancel();
                bail!("interrupted");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let human = matches!(cli.output, Output::Human);
    let api = InProcApi::from_env()?;

    match cli.command {
        Commands::Page { page, per_page } => {
            let per_page = per_page.max(1);
            let offset = page.saturating_sub(1).saturating_mul(per_page);
            info!(page, per_page, offset, "page invoked");
            let res = api.get_page(offset, per_page).await?;
            match cli.output {
                Output::Human => {
                    let pages = res.page.count.div_ceil(per_page).max(1);
                    println!("page {}/{} ({} total)", page, pages, res.page.count);
                    print_rows(&res.entities);
                    if res.omitted() > 0 {
                        eprintln!("{} entries could not be fetched", res.omitted());
                    }
                }
                Output::Json => print_json(&res)?,
            }
        }
        Commands::Get { key, detail, lang } => {
            let e = api.get_entity(EntityKey::parse(&key)).await?;
            if !detail {
                match cli.output {
                    Output::Human => print_entity(&e),
                    Output::Json => print_json(&e)?,
                }
                return Ok(());
            }
            let prefs = open_prefs(cli.no_persist)?;
            let locale = match lang {
                Some(l) => l,
                None => dex_persist::language(prefs.as_ref())?,
            };
            let species = api.species(e.id).await?;
            let mut abilities = Vec::with_capacity(e.abilities.len());
            for a in e.abilities.iter() {
                abilities.push((a.name.clone(), api.ability_description(&a.name, &locale).await?));
            }
            match cli.output {
                Output::Human => {
                    print_entity(&e);
                    if let Some(genus) = species.genus(&locale) {
                        println!("  genus:     {}", genus);
                    }
                    if let Some(h) = species.habitat.as_deref() {
                        println!("  habitat:   {}", h);
                    }
                    if let Some(text) = species.flavor_text(&locale) {
                        println!("  {}", text);
                    }
                    for (name, text) in abilities.iter().filter(|(_, t)| !t.is_empty()) {
                        println!("  {}: {}", name, text);
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Detail<'a> { entity: &'a Entity, species: &'a dex_core::SpeciesMeta, abilities: &'a [(String, String)], locale: &'a str }
                    print_json(&Detail { entity: &e, species: &species, abilities: &abilities, locale: &locale })?;
                }
            }
        }
        Commands::Search { query } => {
            let e = api.search(&query).await?;
            match cli.output {
                Output::Human => print_entity(&e),
                Output::Json => print_json(&e)?,
            }
        }
        Commands::Batch { ids } => {
            let items = api.get_batch(&ids).await?;
            if items.len() < ids.len() {
                warn!(requested = ids.len(), fetched = items.len(), "batch partially fetched");
            }
            match cli.output {
                Output::Human => print_rows(&items),
                Output::Json => print_json(&items)?,
            }
        }
        Commands::LoadAll => {
            let coll = load_collection(&api, human).await?;
            match cli.output {
                Output::Human => println!("loaded {} of {} entities", coll.items.len(), coll.total),
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Summary { loaded: usize, total: u32, epoch: u64 }
                    print_json(&Summary { loaded: coll.items.len(), total: coll.total, epoch: coll.epoch })?;
                }
            }
        }
        Commands::Filter { query, page, per_page, explain } => {
            let parsed = dex_search::parse_query(&query.join(" ")).map_err(dex_api::DexError::from)?;
            info!(spec = ?parsed.spec, text = %parsed.text, "filter invoked");
            let coll = load_collection(&api, human).await?;
            let (matched, dbg) = dex_search::run_query(&coll.items, &parsed, usize::MAX);
            let slice = dex_search::paginate(&matched, page, per_page);
            match cli.output {
                Output::Human => {
                    println!("{} matches, page {}/{}", slice.total_items, slice.page, slice.total_pages);
                    print_rows(&slice.items);
                    if explain {
                        eprintln!(
                            "debug: total={} after_categories={} after_groupings={} after_ranges={}",
                            dbg.total, dbg.after_categories, dbg.after_groupings, dbg.after_ranges
                        );
                    }
                }
                Output::Json => {
                    if explain {
                        #[derive(serde::Serialize)]
                        struct Explain<'a, T> { page: T, debug: &'a dex_search::FilterDebugInfo }
                        print_json(&Explain { page: &slice, debug: &dbg })?;
                    } else {
                        print_json(&slice)?;
                    }
                }
            }
        }
        Commands::Compare { keys } => {
            let mut cmp = Comparison::new();
            for k in keys.iter() {
                match api.get_entity(EntityKey::parse(k)).await {
                    Ok(e) => {
                        if let Some(out) = cmp.add(e) {
                            warn!(dropped = %out.name, "comparison full; dropped oldest");
                        }
                    }
                    Err(e) => warn!(key = %k, error = %e, "compare: skipping"),
                }
            }
            let items: Vec<Arc<Entity>> = cmp.iter().cloned().collect();
            match cli.output {
                Output::Human => {
                    print!("{:<16}", "");
                    for e in items.iter() { print!("{:>14}", e.name); }
                    println!();
                    for attr in Attribute::ALL {
                        print!("{:<16}", attr.as_str());
                        for e in items.iter() { print!("{:>14}", e.attribute(attr).unwrap_or(0)); }
                        println!();
                    }
                    print!("{:<16}", "total");
                    for e in items.iter() { print!("{:>14}", e.attribute_total()); }
                    println!();
                }
                Output::Json => print_json(&items)?,
            }
        }
        Commands::Fav { action } => {
            let prefs = open_prefs(cli.no_persist)?;
            let fav = Favorites::new(prefs.as_ref());
            match action {
                FavAction::Add { id } => {
                    let added = fav.add(id)?;
                    if human { println!("{}", if added { "added" } else { "already a favorite" }); }
                }
                FavAction::Rm { id } => {
                    let removed = fav.remove(id)?;
                    if human { println!("{}", if removed { "removed" } else { "not a favorite" }); }
                }
                FavAction::Ls => {
                    let ids = fav.list()?;
                    let items = api.get_batch(&ids).await?;
                    match cli.output {
                        Output::Human => print_rows(&items),
                        Output::Json => print_json(&items)?,
                    }
                }
            }
        }
        Commands::Lang { locale } => {
            let prefs = open_prefs(cli.no_persist)?;
            if let Some(l) = locale {
                dex_persist::set_language(prefs.as_ref(), &l)?;
            }
            let current = dex_persist::language(prefs.as_ref())?;
            match cli.output {
                Output::Human => println!("{}", current),
                Output::Json => print_json(&serde_json::json!({ "language": current }))?,
            }
        }
        Commands::Settings => {
            let s = api.settings().await?;
            match cli.output {
                Output::Human => {
                    println!("base_url:       {}", s.base_url);
                    println!("max_in_flight:  {}", s.max_in_flight);
                    println!("timeout_secs:   {}", s.timeout_secs);
                    println!("waves:          {} groups x {} ids, {} ms apart", s.wave_width, s.group_size, s.wave_delay_ms);
                    println!("queue_cap:      {}", s.queue_cap);
                    println!("db_path:        {}", s.db_path.as_deref().unwrap_or("(default)"));
                    println!("metrics_addr:   {}", s.metrics_addr.as_deref().unwrap_or("(off)"));
                }
                Output::Json => print_json(&s)?,
            }
        }
    }

    Ok(())
}
