//! # chatlens
//!
//! Import chat exports (LINE, QQ, WeChat, native JSON/JSONL) into a local
//! SQLite corpus and query activity statistics.
//!
//! ## Usage
//! ```bash
//! chatlens import <export_file> [--db corpus.db]
//! chatlens list
//! chatlens stats activity <corpus-id>
//! chatlens sql <corpus-id> "SELECT COUNT(*) FROM message"
//! ```
//!
//! Every subcommand is a thin shell over [`Engine`]: work is submitted as
//! jobs and results come back over the event channel, so this thread never
//! touches parsing, writes or analytics itself.

use std::process;

use chrono::NaiveDate;
use clap::Parser;

use chatlens::engine::Engine;
use chatlens::event::ParseOptions;
use chatlens::types::TimeFilter;
use chatlens::worker::{JobData, JobEvent, JobId};

mod cli;
use cli::{Analysis, Args, Command};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CHATLENS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Blocks on the event channel until the given job finishes, ignoring
/// progress from other jobs.
fn wait_finished(engine: &Engine, job: JobId) -> Result<JobData, Box<dyn std::error::Error>> {
    loop {
        match engine.events().recv()? {
            JobEvent::Finished(outcome) if outcome.id == job => return Ok(outcome.result?),
            _ => {}
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let engine = Engine::open(&args.db)?;

    match args.command {
        Command::Import {
            input,
            tz_offset,
            batch_size,
        } => {
            let mut options = ParseOptions::new().with_batch_size(batch_size);
            if let Some(offset) = tz_offset {
                options = options.with_tz_offset_secs(offset);
            }

            println!("Importing {}...", input.display());
            let job = engine.import_start(&input, options);
            loop {
                match engine.events().recv()? {
                    JobEvent::Progress { id, progress } if id == job => {
                        if let Some(pct) = progress.percentage() {
                            eprintln!(
                                "  {:?}: {:.1}% ({} messages)",
                                progress.phase, pct, progress.messages_processed
                            );
                        }
                    }
                    JobEvent::Finished(outcome) if outcome.id == job => {
                        match outcome.result? {
                            JobData::Import(report) => {
                                println!("Done. Corpus: {}", report.corpus_id);
                                println!(
                                    "  {} messages, {} members, {} skipped, {} duplicates",
                                    report.message_count,
                                    report.member_count,
                                    report.skipped_records,
                                    report.duplicates_skipped,
                                );
                                for warning in &report.warnings {
                                    println!("  warning: {}", warning);
                                }
                            }
                            other => {
                                return Err(format!("unexpected job result: {other:?}").into());
                            }
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }

        Command::List => {
            let corpora = engine.sessions_list()?;
            if corpora.is_empty() {
                println!("No corpora. Import something first.");
            }
            for corpus in corpora {
                println!(
                    "{}  {}  [{} {}]  {} messages, {} members{}",
                    corpus.id,
                    corpus.name,
                    corpus.platform,
                    corpus.kind.as_str(),
                    corpus.message_count,
                    corpus.member_count,
                    if corpus.partial { "  (partial)" } else { "" },
                );
            }
        }

        Command::Stats {
            analysis,
            corpus,
            from,
            to,
        } => {
            let filter = build_filter(from.as_deref(), to.as_deref())?;
            let job = submit_stats(&engine, analysis, &corpus, filter);
            let data = wait_finished(&engine, job)?;
            print_stats(data)?;
        }

        Command::Sql { corpus, query } => {
            let job = engine.sql(&corpus, &query);
            let JobData::Sql(result) = wait_finished(&engine, job)? else {
                return Err("unexpected job result for sql query".into());
            };
            println!("{}", result.columns.join("\t"));
            for row in &result.rows {
                let cells: Vec<String> = row.iter().map(render_cell).collect();
                println!("{}", cells.join("\t"));
            }
            println!(
                "({} rows in {} ms{})",
                result.row_count,
                result.duration_ms,
                if result.limited { ", truncated" } else { "" },
            );
        }
    }

    engine.shutdown();
    Ok(())
}

fn build_filter(
    from: Option<&str>,
    to: Option<&str>,
) -> Result<TimeFilter, Box<dyn std::error::Error>> {
    let mut filter = TimeFilter::all();
    if let Some(from) = from {
        let date = NaiveDate::parse_from_str(from, "%Y-%m-%d")
            .map_err(|_| format!("invalid date '{from}', expected YYYY-MM-DD"))?;
        filter = filter.since(date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp());
    }
    if let Some(to) = to {
        let date = NaiveDate::parse_from_str(to, "%Y-%m-%d")
            .map_err(|_| format!("invalid date '{to}', expected YYYY-MM-DD"))?;
        filter = filter.until(date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp());
    }
    Ok(filter)
}

fn submit_stats(engine: &Engine, analysis: Analysis, corpus: &str, filter: TimeFilter) -> JobId {
    match analysis {
        Analysis::Activity => engine.analytics_activity(corpus, Some(filter), None),
        Analysis::DragonKing => engine.analytics_dragon_king(corpus, Some(filter), None),
        Analysis::Streaks => engine.analytics_streaks(corpus, Some(filter), None, None),
        Analysis::Chains => engine.analytics_repeat_chains(corpus, Some(filter), None, None),
        Analysis::Catchphrases => engine.analytics_catchphrases(corpus, Some(filter), None, None),
        Analysis::Sessions => engine.analytics_sessions(corpus, Some(filter), None, None),
    }
}

fn print_stats(data: JobData) -> Result<(), Box<dyn std::error::Error>> {
    match data {
        JobData::Activity(report) => {
            println!("{} messages total", report.total_messages);
            for entry in report.entries {
                println!(
                    "{:<24} {:>8}  {:>5.1}%",
                    entry.name,
                    entry.message_count,
                    entry.percentage * 100.0
                );
            }
        }
        JobData::DragonKing(report) => {
            println!("{} days inspected", report.total_days);
            for entry in report.entries {
                println!("{:<24} {:>5} days won", entry.name, entry.days_won);
            }
        }
        JobData::Streaks(report) => {
            for m in &report.members {
                println!(
                    "{:<24} {:>4} streaks (max {}, low {}, mid {}, high {})",
                    m.name, m.total_streaks, m.max_combo, m.low_streak, m.mid_streak, m.high_streak
                );
            }
            if let Some(record) = report.max_combo_record {
                println!(
                    "record: member #{} with {} in a row (start ts {})",
                    record.member_id, record.combo_length, record.start_ts
                );
            }
        }
        JobData::Chains(report) => {
            println!("{} chains", report.total_chains);
            for m in &report.members {
                println!(
                    "{:<24} originated {} / initiated {} / broke {}",
                    m.name, m.originated, m.initiated, m.broken
                );
            }
            for hot in &report.hot_contents {
                println!(
                    "  \"{}\" x{} (longest {}, by {})",
                    hot.content, hot.count, hot.max_chain_length, hot.originator_name
                );
            }
        }
        JobData::Catchphrases(report) => {
            for m in report.members {
                println!("{}:", m.name);
                for phrase in m.catchphrases {
                    println!("  \"{}\" x{}", phrase.content, phrase.count);
                }
            }
        }
        JobData::Sessions(sessions) => {
            for s in sessions {
                println!(
                    "session {:>4}: {} .. {} (first message #{})",
                    s.id, s.start_ts, s.end_ts, s.first_message_id
                );
            }
        }
        other => return Err(format!("unexpected job result: {other:?}").into()),
    }
    Ok(())
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
