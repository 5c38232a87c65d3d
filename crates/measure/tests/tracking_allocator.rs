//! Measurements against the real tracking allocator.
//!
//! This test binary installs `TrackingAllocator` globally, so every heap
//! byte the measured callables allocate is attributed to their context.

use heapmeter_measure::{
    AllocationProbe, HeapProbe, MeasureConfig, MeasurementResult, Meter, Outcome,
    TrackingAllocator, measure,
};

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator::new();

fn meter() -> Meter {
    Meter::new(AllocationProbe::new()).with_config(MeasureConfig::for_testing())
}

#[tokio::test]
async fn given_installed_allocator_when_checked_then_reported_installed() {
    let _warm = vec![0u8; 16];
    assert!(TrackingAllocator::is_installed());
}

#[tokio::test]
async fn given_non_allocating_callable_when_measured_then_zero_bytes() {
    let result = meter().measure(|| 42_u64).await;

    assert_eq!(result, MeasurementResult::measured(Some(0), 42));
}

#[tokio::test]
async fn given_retained_buffer_when_measured_then_buffer_size_reported() {
    // Given: A callable returning a 4 KiB buffer it allocated
    // When: Measured through the default entry point
    let result = measure(|| vec![0u8; 4096]).await;

    // Then: Exactly the buffer is retained
    assert_eq!(result.bytes, Some(4096));
    assert_eq!(result.value().map(Vec::len), Some(4096));
}

#[tokio::test]
async fn given_odd_sized_retention_when_measured_then_rounded_up_to_words() {
    let word = AllocationProbe::new().word_size();

    let result = meter().measure(|| vec![7u8; 13]).await;

    assert_eq!(result.bytes, Some(13_u64.div_ceil(word) * word));
}

#[tokio::test]
async fn given_temporary_allocations_when_measured_then_only_retained_bytes_count() {
    // Given: A callable that allocates and frees a large scratch buffer
    let result = meter()
        .measure(|| {
            let scratch: Vec<u64> = (0..10_000).collect();
            scratch.iter().sum::<u64>()
        })
        .await;

    // Then: Nothing is retained
    assert_eq!(result.bytes, Some(0));
    assert_eq!(result.value, Outcome::Returned(49_995_000));
}

#[tokio::test]
async fn given_callable_freeing_captured_memory_when_measured_then_unmeasurable() {
    // Given: A callable that drops memory allocated before the measurement
    let captured = vec![1u8; 1024];

    // When: Measured
    let result = meter().measure(move || drop(captured)).await;

    // Then: The negative balance is reported as unmeasurable, not zero
    assert_eq!(result.bytes, None);
    assert_eq!(result.value, Outcome::Returned(()));
}

#[tokio::test]
async fn given_panicking_callable_when_measured_then_failure() {
    let result: MeasurementResult<Vec<u8>> = meter()
        .measure(|| {
            let _partial = vec![0u8; 256];
            std::panic::panic_any("allocation went wrong")
        })
        .await;

    assert!(result.is_failure());
    assert_eq!(result.bytes, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_concurrent_measurements_when_run_then_each_attributed_separately() {
    let tasks: Vec<_> = (1..=8_usize)
        .map(|kib| {
            tokio::spawn(async move {
                let result = meter().measure(move || vec![0u8; kib * 1024]).await;
                (kib, result)
            })
        })
        .collect();

    for task in tasks {
        let (kib, result) = task.await.expect("measurement task should not panic");
        assert_eq!(result.value().map(Vec::len), Some(kib * 1024));
        assert_eq!(result.bytes, Some(kib as u64 * 1024));
    }
}
