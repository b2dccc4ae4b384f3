use badger::command_argument_builder;
use badger::handlers::{DEFAULT_LOG_FILTER, handle_crawl, handle_export, handle_stats};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let matches = command_argument_builder().get_matches();

    let outcome = match matches.subcommand() {
        Some(("crawl", sub_matches)) => handle_crawl(sub_matches).await,
        Some(("export", sub_matches)) => handle_export(sub_matches),
        Some(("stats", sub_matches)) => handle_stats(sub_matches),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
