use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

use audit_ledger::audit::entry::{AuditRecord, RecordId};
use audit_ledger::audit::verify::{verify_records, ChainAnchor, VerificationReport};
use audit_ledger::database::jsonl::load_records_from_file;

fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("verify-audit-log")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify the hash chain of a JSON-lines audit ledger")
        .arg(
            Arg::new("log-path")
                .short('l')
                .long("log-path")
                .value_name("PATH")
                .help("Path to the ledger file")
                .required(true),
        )
        .arg(
            Arg::new("from-id")
                .short('f')
                .long("from-id")
                .value_name("ID")
                .value_parser(clap::value_parser!(u64))
                .help("Start at this record, trusting everything before it"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let log_path = matches
        .get_one::<String>("log-path")
        .ok_or_else(|| anyhow!("--log-path is required"))?;
    let from_id = matches.get_one::<u64>("from-id").copied().map(RecordId);
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match verify_ledger_file(log_path, from_id, verbose) {
        Ok(report) if report.valid => {
            if !quiet {
                println!("✓ {}", report.summary());
            }
            Ok(())
        }
        Ok(report) => {
            error!("{}", report.summary());
            std::process::exit(1);
        }
        Err(e) => {
            error!("Audit log verification failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn verify_ledger_file(
    log_path: &str,
    from_id: Option<RecordId>,
    verbose: bool,
) -> Result<VerificationReport> {
    info!("Verifying audit ledger: {}", log_path);

    if !Path::new(log_path).exists() {
        return Err(anyhow!("Audit log file not found: {}", log_path));
    }

    let records = load_records_from_file(log_path)?;
    if verbose {
        println!("Loaded {} audit records", records.len());
    }

    let (anchor, to_check) = split_at_checkpoint(&records, from_id)?;
    let report = verify_records(to_check, anchor);

    if verbose {
        print_summary(to_check, &report);
    }

    Ok(report)
}

/// Anchor the run on the record before `from_id`
fn split_at_checkpoint(
    records: &[AuditRecord],
    from_id: Option<RecordId>,
) -> Result<(ChainAnchor, &[AuditRecord])> {
    let Some(from_id) = from_id else {
        return Ok((ChainAnchor::genesis(), records));
    };

    let start = records
        .iter()
        .position(|r| r.id == from_id)
        .ok_or_else(|| anyhow!("Record {} not found in ledger", from_id))?;

    let anchor = match start.checked_sub(1) {
        Some(previous) => ChainAnchor::after(&records[previous]),
        None => ChainAnchor::genesis(),
    };
    Ok((anchor, &records[start..]))
}

fn print_summary(records: &[AuditRecord], report: &VerificationReport) {
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        println!("Ledger is empty");
        return;
    };

    println!("\nAudit Ledger Summary:");
    println!("  Records checked: {}", report.records_checked);
    println!("  First record: #{} at {}", first.id, first.timestamp);
    println!("  Last record: #{} at {}", last.id, last.timestamp);
    println!("  Head hash: {}", last.hash);

    let mut by_action: BTreeMap<&str, usize> = BTreeMap::new();
    let mut phi_accesses = 0;
    for record in records {
        *by_action.entry(record.action.as_str()).or_insert(0) += 1;
        if record.phi_accessed {
            phi_accesses += 1;
        }
    }

    println!("  PHI accesses: {}", phi_accesses);
    println!("\nAction distribution:");
    for (action, count) in by_action {
        println!("  {}: {}", action, count);
    }
}
