use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use log::{error, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use memhook::config::Config;
use memhook::plugins::{overlapping, plan};
use memhook::trace::{ForkTraceEntry, MemoryTraceEntry, TraceEntryType, TraceReader};
use memhook::Result;

use std::process;

fn init_logging(verbose: bool) {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} | {l} | {m}{n}")))
        .build();

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level));

    if let Ok(config) = config {
        log4rs::init_config(config).ok();
    }
}

fn dump(matches: &ArgMatches) -> Result<()> {
    let path = matches.value_of("trace").unwrap_or_default();
    let state: Option<u32> = match matches.value_of("state") {
        Some(state) => match state.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                error!("bad state id {}", state);
                process::exit(2);
            }
        },
        None => None,
    };

    let mut reader = TraceReader::open(path, state.unwrap_or(0))?;
    let mut count = 0;

    while let Some(header) = reader.next_entry() {
        if state.map_or(false, |id| id != header.state_id) {
            continue;
        }
        count += 1;

        let kind = match header.kind() {
            Some(kind) => kind,
            None => continue,
        };

        let prefix = format!(
            "{:>8} {:>4} {:>6}",
            header.timestamp, header.state_id, header.pid
        );

        match kind {
            TraceEntryType::Memory => match MemoryTraceEntry::parse(reader.payload()) {
                Some(entry) if entry.is_write() => {
                    println!("{} {}", prefix, format!("{}", entry).red())
                }
                Some(entry) => println!("{} {}", prefix, format!("{}", entry).green()),
                None => println!("{} {}", prefix, "malformed memory entry".yellow()),
            },
            TraceEntryType::Fork => match ForkTraceEntry::parse(reader.payload()) {
                Some(fork) => println!(
                    "{} {} at {:#x} -> {:?}",
                    prefix,
                    "fork".cyan(),
                    fork.pc,
                    fork.children
                ),
                None => println!("{} {}", prefix, "malformed fork entry".yellow()),
            },
            _ => println!("{} {} ({} bytes)", prefix, kind, header.size),
        }
    }

    println!("\n{} entries", count.to_string().bold());
    Ok(())
}

fn check(matches: &ArgMatches) -> Result<()> {
    let path = matches.value_of("config").unwrap_or_default();
    let config = Config::load(path)?;
    config.validate()?;

    let planned = plan(&config)?;
    for (index, entry) in planned.iter().enumerate() {
        println!(
            "{:>3} {:<10} {:<16} {:#018x}..{:#018x} {}",
            index,
            entry.kind.to_string().blue(),
            entry.name,
            entry.base,
            entry.end(),
            entry.mask
        );
    }

    for (first, second) in overlapping(&planned) {
        println!(
            "{} {} overlaps {}, accesses in both go to {}",
            "warning:".yellow().bold(),
            planned[second].name,
            planned[first].name,
            planned[first].name
        );
    }

    if config.migration.is_some() {
        for function in config.migration_functions()? {
            println!(
                "{:>3} {:<10} {:#018x}..{:#018x}",
                "-",
                "migrate".magenta(),
                function.start_pc,
                function.end_pc
            );
        }
    }

    println!("{}", "ok".green().bold());
    Ok(())
}

fn main() {
    let matches = App::new("memhook")
        .version("0.3.2")
        .about("Inspect memory traces and interception configs")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .global(true)
            .help("Show verbose / debugging output"))
        .subcommand(SubCommand::with_name("dump")
            .about("List the entries of a trace log")
            .arg(Arg::with_name("trace")
                .required(true)
                .help("Path to the trace log"))
            .arg(Arg::with_name("state")
                .short("s")
                .long("state")
                .takes_value(true)
                .help("Only show entries of this state id")))
        .subcommand(SubCommand::with_name("check")
            .about("Validate a configuration and list its handlers by priority")
            .arg(Arg::with_name("config")
                .required(true)
                .help("Path to the json configuration")))
        .get_matches();

    let verbose = matches.occurrences_of("verbose") > 0
        || matches
            .subcommand()
            .1
            .map_or(false, |sub| sub.occurrences_of("verbose") > 0);
    init_logging(verbose);

    let result = match matches.subcommand() {
        ("dump", Some(sub)) => dump(sub),
        ("check", Some(sub)) => check(sub),
        _ => Ok(()),
    };

    if let Err(err) = result {
        eprintln!("{} {}", "error:".red().bold(), err);
        process::exit(1);
    }
}
