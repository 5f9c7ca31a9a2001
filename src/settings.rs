use clap::{App, AppSettings, Arg, ArgMatches};
use rcmark_heap::config::parse_size;
use rcmark_heap::{ConfigError, GcConfig};

use crate::workload::Workload;

pub struct Settings {
    pub gc: GcConfig,
    pub workload: Workload,
    /// verify heap invariants after every round
    pub check: bool,
}

fn app() -> App<'static, 'static> {
    App::new("rcmark")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Drives the rcmark collector with synthetic object graphs and reports what it did.")
        .setting(AppSettings::ColoredHelp)
        .arg(
            Arg::with_name("rounds")
                .long("rounds")
                .takes_value(true)
                .default_value("4")
                .help("number of times the workload is repeated"),
        )
        .arg(
            Arg::with_name("chains")
                .long("chains")
                .takes_value(true)
                .default_value("64")
                .help("acyclic lists built and dropped per round, reclaimed by refcounting"),
        )
        .arg(
            Arg::with_name("length")
                .long("length")
                .takes_value(true)
                .default_value("256")
                .help("nodes per list"),
        )
        .arg(
            Arg::with_name("cycles")
                .long("cycles")
                .takes_value(true)
                .default_value("1024")
                .help("two-node cycles dropped per round, only a full collection reclaims them"),
        )
        .arg(
            Arg::with_name("depth")
                .long("depth")
                .takes_value(true)
                .default_value("12")
                .help("depth of the binary tree held by a root for the length of a round"),
        )
        .arg(
            Arg::with_name("weak")
                .long("weak")
                .takes_value(true)
                .default_value("128")
                .help("weak references with a finalizer created per round"),
        )
        .arg(
            Arg::with_name("mode")
                .long("mode")
                .takes_value(true)
                .possible_values(&["normal", "aggressive", "rare"])
                .help("when lite sweeps run, overrides RCMARK_GC_MODE"),
        )
        .arg(
            Arg::with_name("trigger")
                .long("trigger")
                .takes_value(true)
                .value_name("SIZE")
                .help("heap size that triggers a full collection, e.g. 8M"),
        )
        .arg(
            Arg::with_name("min_trigger")
                .long("min-trigger")
                .takes_value(true)
                .value_name("SIZE")
                .help("floor for the adaptive trigger"),
        )
        .arg(
            Arg::with_name("margin")
                .long("margin")
                .takes_value(true)
                .value_name("SIZE")
                .help("bytes allocated between lite sweeps"),
        )
        .arg(
            Arg::with_name("fixed_trigger")
                .long("fixed-trigger")
                .help("keep the trigger level fixed instead of adapting it to the live heap"),
        )
        .arg(
            Arg::with_name("quarantine")
                .long("quarantine")
                .takes_value(true)
                .value_name("SIZE")
                .min_values(0)
                .help("check freed node storage for writes, holding back up to SIZE bytes"),
        )
        .arg(
            Arg::with_name("no_check")
                .long("no-check")
                .help("skip the heap invariant check after each round"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("report every full collection"),
        )
}

pub fn opts_with_clap() -> Result<Settings, ConfigError> {
    settings_from(&app().get_matches())
}

fn count(matches: &ArgMatches, name: &str) -> usize {
    value_t!(matches, name, usize).unwrap_or_else(|e| e.exit())
}

fn settings_from(matches: &ArgMatches) -> Result<Settings, ConfigError> {
    let mut gc = GcConfig::from_env()?;
    if let Some(mode) = matches.value_of("mode") {
        // possible_values has already restricted the spelling
        gc.mode = mode.parse().unwrap_or_default();
    }
    if let Some(size) = matches.value_of("trigger") {
        gc.trigger_level = parse_size("--trigger", size)?;
    }
    if let Some(size) = matches.value_of("min_trigger") {
        gc.min_trigger_level = parse_size("--min-trigger", size)?;
    }
    if let Some(size) = matches.value_of("margin") {
        gc.gclite_margin = parse_size("--margin", size)?;
    }
    if matches.is_present("fixed_trigger") {
        gc.adaptive_trigger = false;
    }
    if matches.is_present("quarantine") {
        gc.quarantine = Some(match matches.value_of("quarantine") {
            Some(size) => parse_size("--quarantine", size)?,
            None => rcmark_heap::config::DEFAULT_QUARANTINE_BYTES,
        });
    }
    if matches.is_present("verbose") {
        gc.verbose = true;
    }

    let workload = Workload {
        rounds: count(matches, "rounds"),
        chains: count(matches, "chains"),
        length: count(matches, "length"),
        cycles: count(matches, "cycles"),
        depth: count(matches, "depth"),
        weak: count(matches, "weak"),
    };

    Ok(Settings {
        gc: gc.validate()?,
        workload,
        check: !matches.is_present("no_check"),
    })
}
