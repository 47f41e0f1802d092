use std::{sync::Arc, time::Duration};

use anyhow::Result;
use telemetry_hub::{
    clients::memory::MemoryStore,
    error::HubError,
    models::{
        fault::FaultModel,
        message::{CORRUPTED_BODY, MessageGroup, TelemetryEvent},
        producer::{StartOutcome, StopOutcome},
    },
    processor::BatchOutcome,
    producer::LoadGenerator,
};
use tokio::time::{Instant, sleep};

use crate::common::{memory_queue, processor};

/// Test: Clean model publishes only well-formed normal messages carrying a timestamp
#[tokio::test(start_paused = true)]
async fn test_clean_model_publishes_normal_messages() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());

    generator.start(FaultModel::new(60, 0, 0, 0)?).await?;
    sleep(Duration::from_millis(5_500)).await;
    generator.stop().await;

    let published = queue.published();
    assert_eq!(published.len(), 6);

    for (index, entry) in published.iter().enumerate() {
        assert_eq!(entry.group, MessageGroup::Normal);
        let event: TelemetryEvent = serde_json::from_str(&entry.body)?;
        assert_eq!(event.source, "loadgen");
        assert_eq!(event.sequence, index as u64 + 1);
    }

    let status = generator.status();
    assert_eq!(status.stats.published, 6);
    assert_eq!(status.stats.cycles, 6);

    Ok(())
}

/// Test: Inter-publish interval equals 60/rpm plus the injected latency
#[tokio::test(start_paused = true)]
async fn test_interval_includes_injected_latency() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());

    generator.start(FaultModel::new(120, 0, 250, 0)?).await?;
    sleep(Duration::from_secs(10)).await;
    generator.stop().await;

    let published = queue.published();
    assert!(published.len() >= 10);

    for pair in published.windows(2) {
        assert_eq!(
            pair[1].published_at - pair[0].published_at,
            Duration::from_millis(750)
        );
    }

    Ok(())
}

/// Test: Full error rate publishes nothing and counts a simulated failure per cycle
#[tokio::test(start_paused = true)]
async fn test_full_error_rate_publishes_nothing() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());

    generator.start(FaultModel::new(60, 100, 0, 100)?).await?;
    sleep(Duration::from_millis(10_500)).await;
    generator.stop().await;

    let stats = generator.status().stats;
    assert!(queue.published().is_empty());
    assert_eq!(stats.cycles, 11);
    assert_eq!(stats.simulated_failures, stats.cycles);
    assert_eq!(stats.published, 0);

    Ok(())
}

/// Test: Full corruption rate sends the fixed invalid body in the corrupted group
#[tokio::test(start_paused = true)]
async fn test_full_corruption_rate_sends_corrupted_group() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());

    generator.start(FaultModel::new(60, 0, 0, 100)?).await?;
    sleep(Duration::from_millis(3_500)).await;
    generator.stop().await;

    let published = queue.published();
    assert_eq!(published.len(), 4);
    assert!(published.iter().all(|entry| {
        entry.group == MessageGroup::Corrupted && entry.body == CORRUPTED_BODY
    }));
    assert_eq!(generator.status().stats.corrupted, 4);

    Ok(())
}

/// Test: Second start without stop is a no-op that keeps the original model
#[tokio::test(start_paused = true)]
async fn test_second_start_keeps_original_model() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());
    let original = FaultModel::new(30, 5, 0, 5)?;

    assert_eq!(
        generator.start(original.clone()).await?,
        StartOutcome::Started
    );
    assert_eq!(
        generator.start(FaultModel::new(600, 50, 10, 50)?).await?,
        StartOutcome::AlreadyRunning
    );

    let status = generator.status();
    assert!(status.running);
    assert_eq!(status.model, original);

    generator.stop().await;
    Ok(())
}

/// Test: Invalid model is rejected and the generator stays stopped
#[tokio::test(start_paused = true)]
async fn test_invalid_model_is_rejected() -> Result<()> {
    let generator = LoadGenerator::new(memory_queue());

    let invalid = FaultModel {
        requests_per_minute: 0,
        ..FaultModel::default()
    };
    let result = generator.start(invalid).await;

    assert!(matches!(result, Err(HubError::InvalidModel(_))));
    assert!(!generator.status().running);

    Ok(())
}

/// Test: Stop while stopped is a safe no-op and status tracks the task
#[tokio::test(start_paused = true)]
async fn test_stop_lifecycle() -> Result<()> {
    let generator = LoadGenerator::new(memory_queue());

    assert_eq!(generator.stop().await, StopOutcome::NotRunning);
    assert!(!generator.status().running);

    generator.start(FaultModel::default()).await?;
    assert!(generator.status().running);

    assert_eq!(generator.stop().await, StopOutcome::Stopped);
    assert!(!generator.status().running);
    assert_eq!(generator.stop().await, StopOutcome::NotRunning);

    // Restart after stop picks up the new model.
    let model = FaultModel::new(240, 0, 0, 0)?;
    assert_eq!(generator.start(model.clone()).await?, StartOutcome::Started);
    assert_eq!(generator.status().model, model);
    generator.stop().await;

    Ok(())
}

/// Test: Stop is observed without waiting out a long send interval
#[tokio::test(start_paused = true)]
async fn test_stop_does_not_wait_for_interval() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());

    generator.start(FaultModel::new(1, 0, 0, 0)?).await?;
    sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    generator.stop().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(queue.published().len(), 1);

    Ok(())
}

/// Test: Publish failures are counted and the loop keeps running
#[tokio::test(start_paused = true)]
async fn test_publish_failure_does_not_end_loop() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());

    queue.set_unreachable(true);
    generator.start(FaultModel::new(60, 0, 0, 0)?).await?;
    sleep(Duration::from_millis(2_500)).await;

    queue.set_unreachable(false);
    sleep(Duration::from_secs(3)).await;
    generator.stop().await;

    let status = generator.status();
    assert_eq!(status.stats.publish_failures, 3);
    assert_eq!(status.stats.published, 3);
    assert_eq!(queue.published().len(), 3);

    Ok(())
}

/// Test: Same seed and model replay the same group sequence
#[tokio::test(start_paused = true)]
async fn test_seeded_generators_replay_identically() -> Result<()> {
    let model = FaultModel::new(600, 30, 0, 40)?;
    let mut runs = Vec::new();

    for _ in 0..2 {
        let queue = memory_queue();
        let generator = LoadGenerator::new(queue.clone()).with_seed(1234);
        generator.start(model.clone()).await?;
        sleep(Duration::from_millis(9_950)).await;
        generator.stop().await;

        let groups: Vec<MessageGroup> = queue.published().iter().map(|e| e.group).collect();
        runs.push((groups, generator.status().stats));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].1.cycles, 100);

    Ok(())
}

/// Test: Single-shot publish returns its id independent of the loop
#[tokio::test(start_paused = true)]
async fn test_publish_once_returns_id() -> Result<()> {
    let queue = memory_queue();
    let generator = LoadGenerator::new(queue.clone());

    let id = generator.publish_once().await?;

    let published = queue.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].dedup_id, id);
    assert_eq!(published[0].group, MessageGroup::SingleShot);
    assert!(!generator.status().running);

    Ok(())
}

/// Test: Single-shot publish with the queue unreachable fails and nothing is persisted
#[tokio::test(start_paused = true)]
async fn test_publish_once_unreachable_persists_nothing() -> Result<()> {
    let queue = memory_queue();
    let store = Arc::new(MemoryStore::new());
    let generator = LoadGenerator::new(queue.clone());

    queue.set_unreachable(true);
    let result = generator.publish_once().await;
    assert!(matches!(result, Err(HubError::Transient(_))));

    queue.set_unreachable(false);
    let outcome = processor(&queue, &store).process_batch().await;

    assert_eq!(outcome, BatchOutcome::Empty);
    assert!(store.records().is_empty());

    Ok(())
}
