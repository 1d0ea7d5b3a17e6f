//! Refresh runs against the in-memory adapters.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use group_embeddings::{
    AggregateStore, BatchCommit, Checkpoint, DomainError, EmbeddingVector, GroupAggregate, IdRange,
    InMemoryAggregateStore, InMemoryRawEmbeddingRepository, MergeBatch, PartitionOutcome,
    PartitionSelector, RawEmbeddingRecord, RawEmbeddingRepository, RefreshConfig,
    RefreshGroupEmbeddingsUseCase,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn record(id: i64, partition: &str, group: &str, vector: Option<Vec<f64>>) -> RawEmbeddingRecord {
    RawEmbeddingRecord::new(id, partition, group, vector.map(EmbeddingVector::new))
}

struct TestEnv {
    raw: Arc<InMemoryRawEmbeddingRepository>,
    store: Arc<InMemoryAggregateStore>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            raw: Arc::new(InMemoryRawEmbeddingRepository::new()),
            store: Arc::new(InMemoryAggregateStore::new()),
        }
    }

    fn refresh(&self, config: RefreshConfig) -> RefreshGroupEmbeddingsUseCase {
        RefreshGroupEmbeddingsUseCase::new(self.raw.clone(), self.store.clone())
            .with_config(config)
    }

    async fn aggregate(&self, partition: &str, group: &str) -> GroupAggregate {
        self.store
            .find_aggregate(partition, group)
            .await
            .expect("find")
            .expect("aggregate exists")
    }
}

/// Fails every commit for one partition and delegates the rest.
struct FailingStore {
    inner: InMemoryAggregateStore,
    failing_partition: String,
}

#[async_trait]
impl AggregateStore for FailingStore {
    async fn read_checkpoint(&self, partition_key: &str) -> Result<i64, DomainError> {
        self.inner.read_checkpoint(partition_key).await
    }

    async fn commit_batch(&self, batch: &MergeBatch) -> Result<BatchCommit, DomainError> {
        if batch.partition_key() == self.failing_partition {
            return Err(DomainError::storage("disk full"));
        }
        self.inner.commit_batch(batch).await
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError> {
        self.inner.list_checkpoints().await
    }

    async fn find_aggregate(
        &self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<Option<GroupAggregate>, DomainError> {
        self.inner.find_aggregate(partition_key, group_key).await
    }

    async fn find_by_partition(
        &self,
        partition_key: &str,
    ) -> Result<Vec<GroupAggregate>, DomainError> {
        self.inner.find_by_partition(partition_key).await
    }

    async fn count_groups(&self, partition_key: &str) -> Result<u64, DomainError> {
        self.inner.count_groups(partition_key).await
    }
}

#[tokio::test]
async fn test_first_run_then_incremental_merge() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[
            record(1, "P", "A", Some(vec![2.0, 0.0])),
            record(2, "P", "A", Some(vec![4.0, 0.0])),
            record(3, "P", "B", Some(vec![1.0, 1.0])),
        ])
        .await
        .expect("append");

    let report = env
        .refresh(RefreshConfig::default())
        .execute(&PartitionSelector::all())
        .await
        .expect("first run");
    assert!(report.is_success());
    assert_eq!(report.records_merged(), 3);

    let a = env.aggregate("P", "A").await;
    assert_eq!(a.count(), 2);
    assert_eq!(a.mean().as_slice(), &[3.0, 0.0]);
    let b = env.aggregate("P", "B").await;
    assert_eq!(b.count(), 1);
    assert_eq!(b.mean().as_slice(), &[1.0, 1.0]);
    assert_eq!(env.store.read_checkpoint("P").await.expect("checkpoint"), 3);

    env.raw
        .append_batch(&[record(4, "P", "A", Some(vec![0.0, 6.0]))])
        .await
        .expect("append");

    let report = env
        .refresh(RefreshConfig::default())
        .execute(&PartitionSelector::all())
        .await
        .expect("second run");
    match report.find("P").expect("P reported").outcome() {
        PartitionOutcome::Merged {
            range,
            records,
            groups,
            ..
        } => {
            assert_eq!((range.low(), range.high()), (3, 4));
            assert_eq!(*records, 1);
            assert_eq!(*groups, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let a = env.aggregate("P", "A").await;
    assert_eq!(a.count(), 3);
    assert!(a
        .mean()
        .approx_eq(&EmbeddingVector::new(vec![2.0, 2.0]), 1e-12));
    assert_eq!(env.aggregate("P", "B").await, b);
    assert_eq!(env.store.read_checkpoint("P").await.expect("checkpoint"), 4);
}

#[tokio::test]
async fn test_rerun_without_new_data_is_a_no_op() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[record(1, "p1", "a", Some(vec![1.0]))])
        .await
        .expect("append");

    let use_case = env.refresh(RefreshConfig::default());
    use_case
        .execute(&PartitionSelector::all())
        .await
        .expect("first run");
    let before = env.aggregate("p1", "a").await;

    let report = use_case
        .execute(&PartitionSelector::all())
        .await
        .expect("second run");
    match report.find("p1").expect("p1 reported").outcome() {
        PartitionOutcome::UpToDate { checkpoint } => assert_eq!(*checkpoint, 1),
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(env.aggregate("p1", "a").await, before);
    assert_eq!(report.records_merged(), 0);
}

#[tokio::test]
async fn test_records_without_vectors_advance_checkpoint_only() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[
            record(1, "p1", "a", Some(vec![1.0, 1.0])),
            record(2, "p1", "a", None),
            record(3, "p1", "b", None),
        ])
        .await
        .expect("append");

    env.refresh(RefreshConfig::default())
        .execute(&PartitionSelector::all())
        .await
        .expect("run");

    assert_eq!(env.aggregate("p1", "a").await.count(), 1);
    assert!(env
        .store
        .find_aggregate("p1", "b")
        .await
        .expect("find")
        .is_none());
    assert_eq!(env.store.read_checkpoint("p1").await.expect("checkpoint"), 3);
}

#[tokio::test]
async fn test_select_range_with_checkpoint_ahead_of_data() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[record(1, "p1", "a", Some(vec![1.0]))])
        .await
        .expect("append");
    env.store
        .commit_batch(&MergeBatch::new("p1", IdRange::new(0, 10), vec![]))
        .await
        .expect("seed checkpoint");

    let use_case = env.refresh(RefreshConfig::default());
    let range = use_case.select_range("p1").await.expect("range");
    assert!(range.is_empty());
    assert_eq!(range.low(), 10);

    let range = use_case.select_range("unknown").await.expect("range");
    assert!(range.is_empty());
    assert_eq!(range.low(), 0);
}

#[tokio::test]
async fn test_batch_size_splits_range_into_commits() {
    let env = TestEnv::new();
    let records: Vec<RawEmbeddingRecord> = (1..=10)
        .map(|id| record(id, "p1", "a", Some(vec![id as f64])))
        .collect();
    env.raw.append_batch(&records).await.expect("append");

    let report = env
        .refresh(RefreshConfig {
            max_batch_size: Some(3),
            ..Default::default()
        })
        .execute(&PartitionSelector::all())
        .await
        .expect("run");

    match report.find("p1").expect("p1 reported").outcome() {
        PartitionOutcome::Merged {
            batches, records, ..
        } => {
            assert_eq!(*batches, 4);
            assert_eq!(*records, 10);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let a = env.aggregate("p1", "a").await;
    assert_eq!(a.count(), 10);
    assert!((a.mean().as_slice()[0] - 5.5).abs() < 1e-12);
}

#[tokio::test]
async fn test_random_batch_boundaries_match_single_pass() {
    let mut rng = StdRng::seed_from_u64(42);
    let groups = ["a", "b", "c", "d"];
    let records: Vec<RawEmbeddingRecord> = (1..=300)
        .map(|id| {
            let group = groups[rng.gen_range(0..groups.len())];
            let vector = if rng.gen_bool(0.1) {
                None
            } else {
                Some(vec![rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)])
            };
            record(id, "p1", group, vector)
        })
        .collect();

    let single = TestEnv::new();
    single.raw.append_batch(&records).await.expect("append");
    single
        .refresh(RefreshConfig::default())
        .execute(&PartitionSelector::all())
        .await
        .expect("single pass");

    // Data arrives in random chunks and each run uses a random batch size.
    let incremental = TestEnv::new();
    let mut offset = 0;
    while offset < records.len() {
        let chunk = rng.gen_range(1..=60usize).min(records.len() - offset);
        incremental
            .raw
            .append_batch(&records[offset..offset + chunk])
            .await
            .expect("append");
        offset += chunk;

        let report = incremental
            .refresh(RefreshConfig {
                max_batch_size: Some(rng.gen_range(1..=25)),
                ..Default::default()
            })
            .execute(&PartitionSelector::all())
            .await
            .expect("incremental run");
        assert!(report.is_success());
    }

    let with_vectors = records.iter().filter(|r| r.has_vector()).count() as u64;
    let mut total = 0;
    for group in groups {
        let expected = single.aggregate("p1", group).await;
        let actual = incremental.aggregate("p1", group).await;
        assert_eq!(actual.count(), expected.count(), "count of group {}", group);
        total += actual.count();
        assert!(
            actual.mean().approx_eq(expected.mean(), 1e-9),
            "mean of group {} diverged: {:?} vs {:?}",
            group,
            actual.mean(),
            expected.mean()
        );
    }
    assert_eq!(total, with_vectors, "every vector counted exactly once");
    assert_eq!(
        incremental
            .store
            .read_checkpoint("p1")
            .await
            .expect("checkpoint"),
        300
    );
}

#[tokio::test]
async fn test_failed_partition_does_not_block_others() {
    let raw = Arc::new(InMemoryRawEmbeddingRepository::new());
    raw.append_batch(&[
        record(1, "p1", "a", Some(vec![1.0])),
        record(2, "p2", "a", Some(vec![2.0])),
        record(3, "p3", "a", Some(vec![3.0])),
    ])
    .await
    .expect("append");
    let store = Arc::new(FailingStore {
        inner: InMemoryAggregateStore::new(),
        failing_partition: "p2".to_string(),
    });

    let report = RefreshGroupEmbeddingsUseCase::new(raw.clone(), store.clone())
        .execute(&PartitionSelector::all())
        .await
        .expect("run");

    assert!(!report.is_success());
    let failed: Vec<&str> = report.failures().map(|p| p.partition_key()).collect();
    assert_eq!(failed, vec!["p2"]);
    match report.find("p2").expect("p2 reported").outcome() {
        PartitionOutcome::Failed {
            error,
            committed_through,
        } => {
            assert!(error.contains("disk full"));
            assert_eq!(*committed_through, None);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(store.read_checkpoint("p1").await.expect("checkpoint"), 1);
    assert_eq!(store.read_checkpoint("p2").await.expect("checkpoint"), 0);
    assert_eq!(store.read_checkpoint("p3").await.expect("checkpoint"), 3);
}

#[tokio::test]
async fn test_fail_fast_stops_after_first_failure() {
    let raw = Arc::new(InMemoryRawEmbeddingRepository::new());
    raw.append_batch(&[
        record(1, "p1", "a", Some(vec![1.0])),
        record(2, "p2", "a", Some(vec![2.0])),
    ])
    .await
    .expect("append");
    let store = Arc::new(FailingStore {
        inner: InMemoryAggregateStore::new(),
        failing_partition: "p1".to_string(),
    });

    let report = RefreshGroupEmbeddingsUseCase::new(raw.clone(), store.clone())
        .with_config(RefreshConfig {
            fail_fast: true,
            ..Default::default()
        })
        .execute(&PartitionSelector::all())
        .await
        .expect("run");

    assert_eq!(report.partitions().len(), 1);
    assert!(report.find("p2").is_none());
    assert_eq!(store.read_checkpoint("p2").await.expect("checkpoint"), 0);
}

#[tokio::test]
async fn test_inconsistent_batch_keeps_earlier_sub_batches() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[
            record(1, "p1", "a", Some(vec![1.0, 1.0])),
            record(2, "p1", "a", Some(vec![3.0, 3.0])),
            record(3, "p1", "a", Some(vec![1.0, 1.0, 1.0])),
            record(4, "p1", "a", Some(vec![5.0, 5.0])),
        ])
        .await
        .expect("append");

    let report = env
        .refresh(RefreshConfig {
            max_batch_size: Some(2),
            ..Default::default()
        })
        .execute(&PartitionSelector::all())
        .await
        .expect("run");

    match report.find("p1").expect("p1 reported").outcome() {
        PartitionOutcome::Failed {
            committed_through, ..
        } => assert_eq!(*committed_through, Some(2)),
        other => panic!("unexpected outcome {:?}", other),
    }

    let a = env.aggregate("p1", "a").await;
    assert_eq!(a.count(), 2);
    assert_eq!(a.mean().as_slice(), &[2.0, 2.0]);
    assert_eq!(env.store.read_checkpoint("p1").await.expect("checkpoint"), 2);
}

#[tokio::test]
async fn test_expected_dimensions_rejects_partition() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[
            record(1, "p1", "a", Some(vec![1.0, 1.0])),
            record(2, "p2", "a", Some(vec![1.0, 1.0, 1.0])),
        ])
        .await
        .expect("append");

    let report = env
        .refresh(RefreshConfig {
            expected_dimensions: Some(2),
            ..Default::default()
        })
        .execute(&PartitionSelector::all())
        .await
        .expect("run");

    assert!(!report.find("p1").expect("p1").is_failed());
    assert!(report.find("p2").expect("p2").is_failed());
    assert_eq!(env.store.read_checkpoint("p2").await.expect("checkpoint"), 0);
}

#[tokio::test]
async fn test_selector_limits_processed_partitions() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[
            record(1, "p1", "a", Some(vec![1.0])),
            record(2, "p2", "a", Some(vec![1.0])),
            record(3, "p3", "a", Some(vec![1.0])),
        ])
        .await
        .expect("append");

    let report = env
        .refresh(RefreshConfig::default())
        .execute(&PartitionSelector::all().excluding(["p2"]))
        .await
        .expect("run");

    let processed: HashSet<&str> = report
        .partitions()
        .iter()
        .map(|p| p.partition_key())
        .collect();
    assert_eq!(processed, HashSet::from(["p1", "p3"]));
    assert_eq!(env.store.read_checkpoint("p2").await.expect("checkpoint"), 0);

    // An explicitly named partition with no raw rows is simply up to date.
    let report = env
        .refresh(RefreshConfig::default())
        .execute(&PartitionSelector::only(["p2", "ghost"]))
        .await
        .expect("run");
    assert!(report.is_success());
    assert!(matches!(
        report.find("ghost").expect("ghost").outcome(),
        PartitionOutcome::UpToDate { checkpoint: 0 }
    ));
    assert_eq!(env.store.read_checkpoint("p2").await.expect("checkpoint"), 2);
}

#[tokio::test]
async fn test_batch_size_counts_rows_not_ids() {
    let env = TestEnv::new();
    env.raw
        .append_batch(&[
            record(1, "p1", "a", Some(vec![1.0])),
            record(1_000_000, "p1", "a", Some(vec![2.0])),
            record(2_000_000, "p1", "a", Some(vec![3.0])),
        ])
        .await
        .expect("append");

    let report = env
        .refresh(RefreshConfig {
            max_batch_size: Some(2),
            ..Default::default()
        })
        .execute(&PartitionSelector::all())
        .await
        .expect("run");

    match report.find("p1").expect("p1 reported").outcome() {
        PartitionOutcome::Merged {
            range,
            batches,
            records,
            ..
        } => {
            assert_eq!((range.low(), range.high()), (0, 2_000_000));
            assert_eq!(*batches, 2, "sparse ids must not produce empty batches");
            assert_eq!(*records, 3);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let a = env.aggregate("p1", "a").await;
    assert_eq!(a.count(), 3);
    assert_eq!(a.mean().as_slice(), &[2.0]);
    assert_eq!(
        env.store.read_checkpoint("p1").await.expect("checkpoint"),
        2_000_000
    );
}
