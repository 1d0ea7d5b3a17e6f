use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::{AggregateStore, MergeBatch, RawEmbeddingRepository};
use crate::domain::{
    DomainError, IdRange, PartialAggregator, PartitionOutcome, PartitionReport,
    PartitionSelector, RunReport,
};

/// Tuning knobs of a refresh run.
#[derive(Debug, Clone, Default)]
pub struct RefreshConfig {
    /// Commit each partition's pending range in sub-batches of at most this
    /// many raw records. `None` commits the whole range in one transaction.
    pub max_batch_size: Option<usize>,
    /// Reject raw vectors whose dimension differs from this value.
    pub expected_dimensions: Option<usize>,
    /// Stop the run at the first failed partition instead of moving on.
    pub fail_fast: bool,
    pub show_progress: bool,
}

/// Folds newly arrived raw embeddings into the running group aggregates,
/// one partition at a time.
pub struct RefreshGroupEmbeddingsUseCase {
    raw_repo: Arc<dyn RawEmbeddingRepository>,
    aggregate_store: Arc<dyn AggregateStore>,
    config: RefreshConfig,
}

impl RefreshGroupEmbeddingsUseCase {
    pub fn new(
        raw_repo: Arc<dyn RawEmbeddingRepository>,
        aggregate_store: Arc<dyn AggregateStore>,
    ) -> Self {
        Self {
            raw_repo,
            aggregate_store,
            config: RefreshConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs every selected partition in sequence.
    ///
    /// Partition failures are recorded in the report and do not abort the
    /// remaining partitions unless `fail_fast` is set. Only a failure to
    /// discover the partition list fails the call itself.
    pub async fn execute(&self, selector: &PartitionSelector) -> Result<RunReport, DomainError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("refresh", run_id = %run_id);
        self.run(selector, run_id).instrument(span).await
    }

    async fn run(
        &self,
        selector: &PartitionSelector,
        run_id: String,
    ) -> Result<RunReport, DomainError> {
        let start_time = Instant::now();

        let discovered = if selector.requires_discovery() {
            self.raw_repo.partitions().await?
        } else {
            Vec::new()
        };
        let partitions = selector.resolve(discovered);
        info!("Refreshing {} partitions", partitions.len());

        let progress_bar = if self.config.show_progress {
            let bar = ProgressBar::new(partitions.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .expect("Invalid progress bar template")
                    .progress_chars("#>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut report = RunReport::new(run_id);
        for (index, partition_key) in partitions.iter().enumerate() {
            progress_bar.set_message(partition_key.clone());

            let outcome = self.refresh_partition(partition_key).await;
            let failed = matches!(outcome, PartitionOutcome::Failed { .. });
            report.push(PartitionReport::new(partition_key.clone(), outcome));
            progress_bar.inc(1);

            if failed && self.config.fail_fast {
                warn!(
                    "Stopping after failed partition {}; {} partitions not processed",
                    partition_key,
                    partitions.len() - index - 1
                );
                break;
            }
        }

        progress_bar.finish_with_message("done");

        info!(
            "Refresh complete: {} records merged, {} partitions failed in {:.2}s",
            report.records_merged(),
            report.failures().count(),
            start_time.elapsed().as_secs_f64()
        );

        Ok(report)
    }

    /// Computes `(checkpoint, current max id]` for the partition.
    ///
    /// The upper bound is read once; rows that arrive later wait for the
    /// next run.
    pub async fn select_range(&self, partition_key: &str) -> Result<IdRange, DomainError> {
        let low = self.aggregate_store.read_checkpoint(partition_key).await?;
        let high = self.raw_repo.max_id(partition_key).await?;

        match high {
            Some(high) if high < low => {
                warn!(
                    "Partition {} checkpoint {} is ahead of max raw id {}",
                    partition_key, low, high
                );
                Ok(IdRange::new(low, low))
            }
            Some(high) => Ok(IdRange::new(low, high)),
            None => Ok(IdRange::new(low, low)),
        }
    }

    async fn refresh_partition(&self, partition_key: &str) -> PartitionOutcome {
        let mut committed_through = None;
        match self
            .try_refresh_partition(partition_key, &mut committed_through)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Partition {} failed: {}", partition_key, e);
                PartitionOutcome::Failed {
                    error: e.to_string(),
                    committed_through,
                }
            }
        }
    }

    async fn try_refresh_partition(
        &self,
        partition_key: &str,
        committed_through: &mut Option<i64>,
    ) -> Result<PartitionOutcome, DomainError> {
        let range = self.select_range(partition_key).await?;
        if range.is_empty() {
            debug!("Partition {} is up to date at {}", partition_key, range.low());
            return Ok(PartitionOutcome::UpToDate {
                checkpoint: range.low(),
            });
        }

        let limit = self.config.max_batch_size.filter(|n| *n > 0);
        info!("Partition {}: merging {}", partition_key, range);

        let mut batches = 0;
        let mut records = 0u64;
        let mut groups = BTreeSet::new();
        let mut low = range.low();
        while low < range.high() {
            let raw = self
                .raw_repo
                .scan(partition_key, IdRange::new(low, range.high()), limit)
                .await?;

            // A full page may stop short of the snapshot; the next page starts
            // after its last id.
            let batch_high = match (limit, raw.last()) {
                (Some(n), Some(last)) if raw.len() >= n => last.id(),
                _ => range.high(),
            };
            let batch_range = IdRange::new(low, batch_high);

            let mut aggregator = PartialAggregator::new(partition_key, batch_range)
                .with_expected_dimensions(self.config.expected_dimensions);
            aggregator.extend(&raw)?;
            debug!(
                "Batch {}: {} records with vectors, {} without",
                batch_range,
                aggregator.included(),
                aggregator.skipped()
            );
            records += aggregator.included();
            let partials = aggregator.finish();
            groups.extend(partials.iter().map(|p| p.group_key().to_string()));

            let batch = MergeBatch::new(partition_key, batch_range, partials);
            let commit = self.aggregate_store.commit_batch(&batch).await?;
            *committed_through = Some(commit.checkpoint);
            batches += 1;
            low = batch_high;

            debug!(
                "Committed batch {} for partition {} ({} groups)",
                batch_range, partition_key, commit.groups_written
            );
        }

        info!(
            "Partition {}: merged {} records into {} groups, checkpoint {}",
            partition_key,
            records,
            groups.len(),
            range.high()
        );

        Ok(PartitionOutcome::Merged {
            range,
            batches,
            records,
            groups: groups.len(),
        })
    }
}
