//! Start scenarios, wait, shut them down.

use anyhow::{Context, Result};
use std::time::Duration;

use zoo_core::{
    AllocEvent, ConcurrencyDriver, DispatchReport, Harness, MockAllocator, Registry,
    ScenarioOutcome, SystemAllocator, TeardownRecord, TeardownReport,
};
use zoo_types::{FaultError, ScenarioId, Selection};

use crate::config::Config;
use crate::RunArgs;

/// Run the run command. Returns the startup status code.
pub async fn run(config: &Config, args: &RunArgs, mock: bool) -> Result<i32> {
    let selection = build_selection(config, args).context("Invalid scenario selection")?;
    if selection.is_empty() {
        println!("No scenarios selected.");
        println!();
        println!("Run 'debug-zoo list' to see the catalog.");
        return Ok(0);
    }

    let mut settings = config.settings();
    if let Some(style) = args.overflow_style {
        settings.out_of_bounds.style = style.into();
    }

    let registry = Registry::standard(&settings);
    let mock_alloc = mock.then(MockAllocator::new);
    let mut harness = match &mock_alloc {
        Some(alloc) => Harness::new(registry, alloc.clone()),
        None => Harness::new(registry, SystemAllocator::new()),
    };
    if let Some(limit) = config.harness.max_tasks {
        harness = harness.with_driver(ConcurrencyDriver::new().with_task_limit(limit));
    }

    let report = harness.startup(&selection);
    print_activation(&report);

    wait(args.hold).await?;

    let records = harness.shutdown();
    print_teardown(&records);
    if let Some(alloc) = &mock_alloc {
        print_mock_ledger(alloc);
    }

    let status = report.status_code();
    println!("status: {}", status);
    Ok(status)
}

/// Union of the config file's flags, the CLI flags and `--param` tokens.
fn build_selection(config: &Config, args: &RunArgs) -> Result<Selection, FaultError> {
    let mut cli = Selection::new();
    for (id, on) in [
        (ScenarioId::Leak, args.leak),
        (ScenarioId::UseAfterFree, args.use_after_free),
        (ScenarioId::LockOrderInversion, args.lockdep),
        (ScenarioId::DataRace, args.race),
    ] {
        if on {
            cli.enable(id);
        }
    }
    match args.slab_poison {
        Some(Some(size)) => {
            let flag = i64::try_from(size).map_err(|_| {
                FaultError::InvalidSelection(format!("slab_poison: {size} out of range"))
            })?;
            cli.set_flag(ScenarioId::OutOfBounds, flag)?;
        }
        Some(None) => {
            cli.enable(ScenarioId::OutOfBounds);
        }
        None => {}
    }
    for token in &args.params {
        cli.apply_param(token)?;
    }

    let mut selection = config.selection()?;
    selection.merge(&cli);
    Ok(selection)
}

/// Block until the hold time elapses or Ctrl-C arrives.
async fn wait(hold: Option<u64>) -> Result<()> {
    match hold {
        Some(secs) => {
            tracing::info!(secs, "holding before shutdown (Ctrl-C to stop early)");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for Ctrl-C")?;
                    tracing::info!("interrupted");
                }
            }
        }
        None => {
            tracing::info!("running until Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
        }
    }
    Ok(())
}

fn print_activation(report: &DispatchReport) {
    println!("Activated:");
    for record in report.records() {
        match &record.result {
            Ok(outcome) => println!("  {}: {}", record.id, describe_outcome(outcome)),
            Err(e) => println!("  {}: FAILED ({})", record.id, e),
        }
    }
    println!();
}

fn describe_outcome(outcome: &ScenarioOutcome) -> String {
    match outcome {
        ScenarioOutcome::Leaked { size } => format!("leaked {} bytes", size),
        ScenarioOutcome::ReadAfterFree { addr, observed } => {
            format!("read {:?} from released block {:#x}", observed, addr)
        }
        ScenarioOutcome::Spawned { tasks } => format!("started {}", tasks.join(", ")),
        ScenarioOutcome::WroteOutOfBounds {
            addr,
            size,
            last_offset,
            written,
        } => format!(
            "wrote {} bytes into {}-byte buffer at {:#x} (last offset {})",
            written, size, addr, last_offset
        ),
    }
}

fn print_teardown(records: &[TeardownRecord]) {
    if records.is_empty() {
        return;
    }
    println!("Teardown:");
    for record in records {
        match record.report {
            TeardownReport::Announced { joined, abandoned } => println!(
                "  {}: unloaded ({} joined, {} still blocked)",
                record.id, joined, abandoned
            ),
            TeardownReport::RaceTally {
                observed,
                attempted,
                expected,
                joined,
            } => println!(
                "  {}: counter {} of {} attempted, {} expected ({} lost, {} tasks joined)",
                record.id,
                observed,
                attempted,
                expected,
                attempted.saturating_sub(observed),
                joined
            ),
        }
    }
    println!();
}

fn print_mock_ledger(alloc: &MockAllocator) {
    let smashed = alloc
        .events()
        .iter()
        .filter_map(|event| match event {
            AllocEvent::Allocated { addr, .. } => Some(*addr),
            _ => None,
        })
        .filter(|addr| !alloc.redzone_intact(*addr))
        .count();

    println!("Mock allocator:");
    println!("  Allocations:     {}", alloc.allocation_count());
    println!("  Releases:        {}", alloc.release_count());
    println!("  Outstanding:     {}", alloc.outstanding().len());
    println!("  Red zones hit:   {}", smashed);
    println!();
}
