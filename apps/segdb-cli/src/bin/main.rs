use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use segdb_core::config::Config;
use segdb_core::transcript::{discover_transcripts, Transcript};
use segdb_core::types::SearchMode;
use segdb_core::TenantKey;
use segdb_hybrid::IndexCoordinator;

const USAGE: &str = "Usage: segdb <command> [args...]

Commands:
  build <tenant> <collection> <transcript.json>
  ingest <tenant> <dir>                          build one collection per transcript under <dir>
  search <tenant> <collection> <query> [--mode vector|lexical|hybrid] [--top-k N] [--min-score S]
  delete <tenant> <collection>
  list <tenant>
  stats <tenant> <collection>
  recover [tenant]";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn positional(args: &[String], n: usize) -> anyhow::Result<Vec<&str>> {
    let values: Vec<&str> = args.iter().take_while(|a| !a.starts_with("--")).map(String::as_str).collect();
    if values.len() < n {
        bail!("expected {n} arguments\n\n{USAGE}");
    }
    Ok(values)
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let (cmd, args) = parse_args();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.index_settings()?;
    let base = env::current_dir()?;
    let coordinator = IndexCoordinator::from_settings(settings, &base)?;

    match cmd.as_str() {
        "build" => {
            let a = positional(&args, 3)?;
            let key = TenantKey::new(a[0], a[1])?;
            let documents = Transcript::from_path(Path::new(a[2]))?.documents(&key);
            let stats = coordinator.build(a[0], a[1], &documents)?;
            print_json(&stats)?;
        }
        "ingest" => {
            let a = positional(&args, 2)?;
            let tenant = a[0];
            let dir = PathBuf::from(a[1]);
            let files = discover_transcripts(&dir);
            if files.is_empty() {
                warn!(dir = %dir.display(), "no transcripts found");
                return Ok(());
            }
            let pb = ProgressBar::new(files.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} collections {msg}")?
                    .progress_chars("#>-"),
            );
            let (mut built, mut failed) = (0usize, 0usize);
            for file in &files {
                pb.set_message(file.collection_id.clone());
                let outcome = TenantKey::new(tenant, file.collection_id.as_str())
                    .and_then(|key| Ok(Transcript::from_path(&file.path)?.documents(&key)))
                    .and_then(|docs| coordinator.build(tenant, &file.collection_id, &docs));
                match outcome {
                    Ok(stats) => {
                        built += 1;
                        info!(collection = %file.collection_id, documents = stats.document_count, "collection built");
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(collection = %file.collection_id, path = %file.path.display(), error = %e, "skipping transcript");
                    }
                }
                pb.inc(1);
            }
            pb.finish_with_message("done");
            println!("Ingested {built} collections for '{tenant}' ({failed} failed)");
        }
        "search" => {
            let a = positional(&args, 3)?;
            let mode: SearchMode = flag(&args, "--mode").map(str::parse::<SearchMode>).transpose()?.unwrap_or_default();
            let top_k: usize = flag(&args, "--top-k").map(str::parse::<usize>).transpose().context("--top-k requires a number")?.unwrap_or(10);
            let min_score = match flag(&args, "--min-score") {
                Some(raw) => Some(raw.parse::<f32>().context("--min-score requires a number")?),
                None => coordinator.settings().min_score,
            };
            let hits = coordinator.search_with_min_score(a[0], a[1], a[2], mode, top_k, min_score)?;
            print_json(&hits)?;
        }
        "delete" => {
            let a = positional(&args, 2)?;
            let deleted = coordinator.delete(a[0], a[1])?;
            print_json(&deleted)?;
        }
        "list" => {
            let a = positional(&args, 1)?;
            print_json(&coordinator.list(a[0])?)?;
        }
        "stats" => {
            let a = positional(&args, 2)?;
            print_json(&coordinator.stats(a[0], a[1])?)?;
        }
        "recover" => {
            let outcome = match args.first() {
                Some(tenant) => coordinator.recover_tenant(tenant)?,
                None => coordinator.recover()?,
            };
            print_json(&outcome)?;
        }
        _ => {
            eprintln!("Unknown command: {}\n\n{USAGE}", cmd);
            std::process::exit(1);
        }
    }
    Ok(())
}
