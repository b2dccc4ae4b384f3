use clap::{arg, command};
use std::path::PathBuf;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("badger")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("badger")
        .about("Crawls the web for 88x31 badges and the sites they link to")
        .styles(CLAP_STYLING)
        .subcommand_required(true)
        .arg(
            arg!(--"data-dir" <DIR>)
                .required(false)
                .global(true)
                .help("Where the database, caches and badge files live (default: ~/.local/share/badger)"),
        )
        .arg(
            arg!(-c --"config" <FILE>)
                .required(false)
                .global(true)
                .help("JSON crawl configuration; command line flags take precedence")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(
            command!("crawl")
                .about("Crawl outward from one or more seed pages, collecting badges")
                .arg(
                    arg!([SEED])
                        .num_args(1..)
                        .required_unless_present("hosts-file")
                        .help("Seed URLs; http:// is assumed when no scheme is given"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of seed URLs")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-d --"depth" <DEPTH>)
                        .required(false)
                        .help("Link hops to follow from each seed (default: 3)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-w --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("Maximum number of requests in flight (default: 10)")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            command!("export")
                .about("Write every known badge and host as one JSON document")
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("File to write (default: stdout)")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(command!("stats").about("Show how much has been collected so far"))
}
