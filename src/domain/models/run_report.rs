use serde::Serialize;

use super::IdRange;

/// Result of one partition within a run.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PartitionOutcome {
    /// Nothing newer than the checkpoint; nothing was written.
    UpToDate { checkpoint: i64 },
    Merged {
        range: IdRange,
        batches: usize,
        records: u64,
        groups: usize,
    },
    /// The partition stopped on `error`. Batches up to `committed_through`
    /// (the checkpoint after the last successful commit) remain applied.
    Failed {
        error: String,
        committed_through: Option<i64>,
    },
}

#[derive(Debug, Serialize)]
pub struct PartitionReport {
    partition_key: String,
    #[serde(flatten)]
    outcome: PartitionOutcome,
}

impl PartitionReport {
    pub fn new(partition_key: impl Into<String>, outcome: PartitionOutcome) -> Self {
        Self {
            partition_key: partition_key.into(),
            outcome,
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn outcome(&self) -> &PartitionOutcome {
        &self.outcome
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PartitionOutcome::Failed { .. })
    }
}

/// Summary of a whole run across partitions.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    run_id: String,
    partitions: Vec<PartitionReport>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            partitions: Vec::new(),
        }
    }

    pub fn push(&mut self, report: PartitionReport) {
        self.partitions.push(report);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn partitions(&self) -> &[PartitionReport] {
        &self.partitions
    }

    pub fn find(&self, partition_key: &str) -> Option<&PartitionReport> {
        self.partitions
            .iter()
            .find(|p| p.partition_key == partition_key)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions.iter().filter(|p| p.is_failed())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn records_merged(&self) -> u64 {
        self.partitions
            .iter()
            .map(|p| match p.outcome {
                PartitionOutcome::Merged { records, .. } => records,
                _ => 0,
            })
            .sum()
    }
}

/// Point-in-time lag of one partition behind the raw table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStatus {
    pub partition_key: String,
    pub checkpoint: i64,
    pub max_raw_id: Option<i64>,
    pub group_count: u64,
}

impl PartitionStatus {
    /// Id span not yet folded into aggregates.
    pub fn pending_span(&self) -> u64 {
        self.max_raw_id
            .map(|max| IdRange::new(self.checkpoint, max).span())
            .unwrap_or(0)
    }
}
