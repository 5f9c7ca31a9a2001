//! This is the `rcmark` binary. It builds synthetic object graphs on an `rcmark_heap`
//! collector and reports what the lite sweeps and full collections did with them.
//!
//! Collector tunables come from the `RCMARK_GC_*` environment variables and can be
//! overridden on the command line:
//!
//! ```text
//! rcmark --rounds 8 --cycles 4096 --trigger 4M --verbose
//! ```

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

mod settings;
pub mod workload;

use std::process::ExitCode;

use settings::opts_with_clap;
use workload::Report;

/// Run the binary. Exits 1 if the heap ends up inconsistent or leaks nodes, 2 on a bad
/// configuration.
pub fn run() -> ExitCode {
    env_logger::init();

    let settings = match opts_with_clap() {
        Ok(settings) => settings,
        Err(err) => {
            error!("{}", err);
            eprintln!("rcmark: {err}");
            return ExitCode::from(2);
        }
    };
    info!("Collector configuration: {:?}", settings.gc);
    info!("Workload: {:?}", settings.workload);

    let heap = rcmark_heap::initialize(settings.gc);
    let report = match settings.workload.run(heap, settings.check) {
        Ok(report) => report,
        Err(err) => {
            error!("Workload aborted: {}", err);
            return ExitCode::FAILURE;
        }
    };
    print_report(&report);

    if settings.check && !heap.check_invariants() {
        return ExitCode::FAILURE;
    }
    if report.nodes_left != 0 {
        error!("{} nodes were never reclaimed", report.nodes_left);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn print_report(report: &Report) {
    let stats = &report.stats;
    println!("rounds:            {}", report.rounds);
    println!("nodes built:       {}", report.nodes_built);
    println!("nodes left:        {}", report.nodes_left);
    println!("finalizers run:    {}", report.finalized);
    println!("tree checksum:     {}", report.tree_sum);
    println!("full collections:  {}", stats.full_collections);
    println!("lite sweeps:       {}", stats.lite_sweeps);
    println!("marked:            {}", stats.total_marked);
    println!("detached:          {}", stats.total_detached);
    println!("reclaimed:         {}", stats.total_reclaimed);
    println!("trigger level:     {}", stats.trigger_level);
    println!("collection time:   {:?}", stats.total_collection_time);
}
