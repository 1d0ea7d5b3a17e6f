mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cli::Commands;
use group_embeddings::{
    Container, ContainerConfig, GroupAggregate, PartitionOutcome, PartitionSelector,
    RefreshConfig,
};

#[derive(Parser)]
#[command(name = "group-embeddings")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true, default_value = "~/.group-embeddings")]
    data_dir: String,

    /// DuckDB file to use instead of <data-dir>/group-embeddings.duckdb
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let read_only = matches!(cli.command, Commands::Status { .. } | Commands::Show { .. });
    let container = Container::new(ContainerConfig {
        data_dir: expand_tilde(&cli.data_dir),
        database: cli.database.clone(),
        memory_storage: false,
        read_only,
    })
    .await?;

    match cli.command {
        Commands::Run {
            partition,
            exclude,
            batch_size,
            dimensions,
            fail_fast,
            json,
        } => {
            let selector = build_selector(partition, exclude);
            let use_case = container.refresh_use_case(RefreshConfig {
                max_batch_size: batch_size,
                expected_dimensions: dimensions,
                fail_fast,
                show_progress: !json,
            });

            let report = use_case.execute(&selector).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.partitions().is_empty() {
                println!("No partitions to process.");
            } else {
                for partition in report.partitions() {
                    match partition.outcome() {
                        PartitionOutcome::UpToDate { checkpoint } => println!(
                            "  {}: up to date (checkpoint {})",
                            partition.partition_key(),
                            checkpoint
                        ),
                        PartitionOutcome::Merged {
                            range,
                            batches,
                            records,
                            groups,
                        } => println!(
                            "  {}: merged {} records into {} groups over {} in {} batches",
                            partition.partition_key(),
                            records,
                            groups,
                            range,
                            batches
                        ),
                        PartitionOutcome::Failed {
                            error,
                            committed_through,
                        } => {
                            let committed = committed_through
                                .map(|c| format!(" (committed through {})", c))
                                .unwrap_or_default();
                            println!(
                                "  {}: FAILED{}: {}",
                                partition.partition_key(),
                                committed,
                                error
                            );
                        }
                    }
                }
            }

            let failed = report.failures().count();
            if failed > 0 {
                anyhow::bail!(
                    "{} of {} partitions failed (run {})",
                    failed,
                    report.partitions().len(),
                    report.run_id()
                );
            }
        }

        Commands::Status { partition, json } => {
            let selector = build_selector(partition, Vec::new());
            let statuses = container.status_use_case().execute(&selector).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else if statuses.is_empty() {
                println!("No partitions found.");
            } else {
                println!(
                    "{:<20} {:>12} {:>12} {:>10} {:>8}",
                    "PARTITION", "CHECKPOINT", "MAX ID", "PENDING", "GROUPS"
                );
                for status in statuses {
                    let max_id = status
                        .max_raw_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<20} {:>12} {:>12} {:>10} {:>8}",
                        status.partition_key,
                        status.checkpoint,
                        max_id,
                        status.pending_span(),
                        status.group_count
                    );
                }
            }
        }

        Commands::Show {
            partition,
            group,
            preview,
        } => {
            let use_case = container.list_aggregates_use_case();
            let aggregates = match group {
                Some(group) => vec![use_case.get(&partition, &group).await?],
                None => use_case.execute(&partition).await?,
            };

            if aggregates.is_empty() {
                println!("No aggregates for partition {}.", partition);
            } else {
                println!("Aggregates for partition {}:\n", partition);
                for aggregate in &aggregates {
                    println!(
                        "  {} (count: {}, dimensions: {})",
                        aggregate.group_key(),
                        aggregate.count(),
                        aggregate.dimensions()
                    );
                    println!("    mean: {}", format_mean(aggregate, preview));
                }
            }
        }

        Commands::Import { path } => {
            let imported = container.import_use_case().execute(&path).await?;
            println!(
                "Imported {} raw records into {}",
                imported,
                container.db_path().display()
            );
        }
    }

    Ok(())
}

fn build_selector(partition: Vec<String>, exclude: Vec<String>) -> PartitionSelector {
    let selector = if partition.is_empty() {
        PartitionSelector::all()
    } else {
        PartitionSelector::only(partition)
    };
    selector.excluding(exclude)
}

fn format_mean(aggregate: &GroupAggregate, preview: usize) -> String {
    let values = aggregate.mean().as_slice();
    let shown: Vec<String> = values
        .iter()
        .take(preview)
        .map(|v| format!("{:.4}", v))
        .collect();
    if values.len() > preview {
        format!("[{}, ...]", shown.join(", "))
    } else {
        format!("[{}]", shown.join(", "))
    }
}

fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            if path == "~" {
                return home.to_string_lossy().to_string();
            }
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn run_accepts_repeated_and_comma_separated_partitions() {
        let cli = Cli::try_parse_from([
            "group-embeddings",
            "run",
            "--partition",
            "1,2",
            "-p",
            "3",
            "--batch-size",
            "500",
        ])
        .expect("valid arguments");

        match cli.command {
            Commands::Run {
                partition,
                batch_size,
                fail_fast,
                ..
            } => {
                assert_eq!(partition, vec!["1", "2", "3"]);
                assert_eq!(batch_size, Some(500));
                assert!(!fail_fast);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn show_requires_partition() {
        let res = Cli::try_parse_from(["group-embeddings", "show"]);
        assert!(res.is_err(), "show without a partition should be rejected");
    }

    #[test]
    fn selector_from_flags() {
        let selector = build_selector(vec![], vec!["2".to_string()]);
        assert!(selector.requires_discovery());
        assert!(!selector.matches("2"));

        let selector = build_selector(vec!["1".to_string()], vec![]);
        assert_eq!(selector.resolve(vec![]), vec!["1"]);
    }

    #[test]
    fn expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/tmp/data"), "/tmp/data");
    }
}
