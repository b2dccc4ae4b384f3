use anyhow::{Context, Result, anyhow, bail};
use badger_core::{ButtonDB, CrawlConfig, ImageCache, Store, Table, VisitedUrls};
use badger_scanner::{CrawlContext, CrawlSummary, Crawler};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Log filter used when `RUST_LOG` is unset: crawl progress (one line per
/// depth level, page and saved badge) without store chatter.
pub const DEFAULT_LOG_FILTER: &str = "badger=info,badger_scanner=info,badger_core=warn";

/// Seeds from the command line followed by seeds from the hosts file.
pub fn load_urls_from_source(
    seeds: &[String],
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    let mut urls: Vec<String> = seeds.iter().filter_map(|s| parse_url_line(s)).collect();
    if let Some(hosts_file_path) = hosts_file {
        urls.extend(load_urls_from_file(hosts_file_path)?);
    }

    if urls.is_empty() {
        return Err("Provide at least one seed URL or --hosts-file".to_string());
    }
    Ok(urls)
}

/// One seed per line. Blank lines and `#` comments are skipped.
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parses a seed, assuming http:// when no scheme is given. Only web URLs
/// are accepted.
pub fn parse_url_line(line: &str) -> Option<String> {
    let line = line.trim();
    let parsed = match Url::parse(line) {
        Ok(url) if url.has_host() => Some(url),
        _ => Url::parse(&format!("http://{}", line)).ok(),
    };

    match parsed {
        Some(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            Some(url.to_string())
        }
        _ => {
            eprintln!("{} Skipping invalid URL '{}'", "⚠".yellow(), line);
            None
        }
    }
}

/// Config file (if any) first, then command line overrides.
pub fn resolve_config(args: &ArgMatches) -> Result<CrawlConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => CrawlConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CrawlConfig::default(),
    };

    if let Some(dir) = args.get_one::<String>("data-dir") {
        config = config.with_data_dir(dir.as_str());
    }
    if let Ok(Some(depth)) = args.try_get_one::<usize>("depth") {
        config = config.with_max_depth(*depth);
    }
    if let Ok(Some(workers)) = args.try_get_one::<usize>("workers") {
        config = config.with_workers(*workers);
    }
    debug!("Resolved crawl config: {:?}", config);
    Ok(config)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn stat_line(label: &str, value: impl ToString) -> String {
    format!("  {:<18} {}\n", label, value.to_string().cyan())
}

/// Text report for a finished crawl.
pub fn format_summary(summary: &CrawlSummary, buttons: i64, hosts: i64) -> String {
    let mut report = String::new();
    report.push_str(&stat_line("Pages crawled:", summary.pages_processed));
    report.push_str(&stat_line("Pages dropped:", summary.pages_dropped));
    report.push_str(&stat_line("Depth levels:", summary.levels));
    report.push_str(&stat_line("Links followed:", summary.links_enqueued));
    report.push_str(&stat_line("Requests sent:", summary.requests_sent));
    report.push_str(&stat_line("Badges known:", buttons));
    report.push_str(&stat_line("Hosts known:", hosts));
    report
}

pub async fn handle_crawl(sub_matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(sub_matches)?;

    let seeds: Vec<String> = sub_matches
        .get_many::<String>("SEED")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let hosts_file = sub_matches.get_one::<PathBuf>("hosts-file");
    let urls = load_urls_from_source(&seeds, hosts_file).map_err(|e| anyhow!(e))?;

    print_divider();
    println!("{}", "  BADGER CRAWL".bright_white().bold());
    print_divider();
    println!("{} Seeds: {}", "→".blue(), urls.len().to_string().bright_white());
    println!("{} Max depth: {}", "→".blue(), config.max_depth.to_string().bright_white());
    println!("{} Workers: {}", "→".blue(), config.max_concurrency.to_string().bright_white());
    println!(
        "{} Data: {}",
        "→".blue(),
        config.layout().root().display().to_string().bright_white()
    );
    println!();

    let context = CrawlContext::open(config).context("Failed to open crawl state")?;
    let crawler = Crawler::new(context);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let bar = spinner.clone();
    let crawler = crawler.with_progress_callback(Arc::new(move |depth: usize, url: String| {
        bar.set_message(format!("[depth {}] {}", depth, url));
    }));

    let result = crawler.crawl(&urls).await;
    spinner.finish_and_clear();
    let summary = result.context("Crawl aborted")?;

    let context = crawler.context();
    context.images.compact()?;
    let buttons = context.store.count(Table::Buttons)?;
    let hosts = context.store.count(Table::Hosts)?;

    println!("{} Crawl complete!", "✓".green().bold());
    println!();
    print!("{}", format_summary(&summary, buttons, hosts));
    println!();
    Ok(())
}

/// Reads the whole store, writing it as pretty JSON to `output` when given.
pub fn export_snapshot(config: &CrawlConfig, output: Option<&Path>) -> Result<ButtonDB> {
    let db_path = config.layout().database();
    if !Store::exists(&db_path) {
        bail!("No database at {}; run a crawl first", db_path.display());
    }

    let store = Store::open_read_only(&db_path)?;
    let snapshot = store.all()?;
    let json = serde_json::to_string_pretty(&snapshot)?;

    match output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            writeln!(stdout)?;
        }
    }
    Ok(snapshot)
}

pub fn handle_export(sub_matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(sub_matches)?;
    let output = sub_matches.get_one::<PathBuf>("output");
    let snapshot = export_snapshot(&config, output.map(PathBuf::as_path))?;

    if let Some(path) = output {
        println!(
            "{} Exported {} badges and {} hosts to {}",
            "✓".green().bold(),
            snapshot.buttons.len().to_string().cyan(),
            snapshot.hosts.len().to_string().cyan(),
            path.display().to_string().bright_white()
        );
    }
    Ok(())
}

/// Counts over the persistent state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub buttons: i64,
    pub hosts: i64,
    pub visited: usize,
    pub images_classified: usize,
}

pub fn collect_stats(config: &CrawlConfig) -> Result<CrawlStats> {
    let layout = config.layout();
    let mut stats = CrawlStats::default();

    if Store::exists(&layout.database()) {
        let store = Store::open_read_only(&layout.database())?;
        stats.buttons = store.count(Table::Buttons)?;
        stats.hosts = store.count(Table::Hosts)?;
    }
    if layout.visited().exists() {
        stats.visited = VisitedUrls::load(&layout.visited())?.len();
    }
    if layout.images().exists() {
        stats.images_classified = ImageCache::load(&layout.images())?.len();
    }
    Ok(stats)
}

pub fn handle_stats(sub_matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(sub_matches)?;
    let stats = collect_stats(&config)?;

    print_divider();
    println!(
        "{}",
        format!("  {}", config.layout().root().display()).bright_white().bold()
    );
    print_divider();
    print!("{}", stat_line("Badges:", stats.buttons));
    print!("{}", stat_line("Hosts:", stats.hosts));
    print!("{}", stat_line("Pages visited:", stats.visited));
    print!("{}", stat_line("Images seen:", stats.images_classified));
    Ok(())
}
