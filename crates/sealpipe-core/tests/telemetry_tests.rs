use std::time::{Duration, Instant};

use sealpipe_core::telemetry::profile;

#[test]
fn elapsed_us_reports_elapsed_time() {
    let started_at = Instant::now();
    std::thread::sleep(Duration::from_millis(1));
    assert!(profile::elapsed_us(started_at) >= 1_000);
    assert_eq!(profile::duration_us(Duration::from_millis(3)), 3_000);
}

#[cfg(feature = "telemetry")]
mod telemetry_enabled_tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use sealpipe_core::telemetry::{self, tags};
    use sealpipe_core::{BufferPool, CipherConfig, CompressionLevel, Pipeline, PipelineConfig};

    static TELEMETRY_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn lock() -> std::sync::MutexGuard<'static, ()> {
        match TELEMETRY_TEST_MUTEX.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[test]
    fn buffer_pool_reports_created_and_recycled() {
        let _guard = lock();
        telemetry::reset();

        let pool = BufferPool::new(64, 1);
        {
            let _first = pool.acquire();
        }
        {
            let _second = pool.acquire();
        }

        let snapshot = telemetry::snapshot();
        assert_eq!(
            snapshot.counter(tags::METRIC_BUFFER_ACQUIRE_CREATED_COUNT),
            Some(1)
        );
        assert_eq!(
            snapshot.counter(tags::METRIC_BUFFER_ACQUIRE_RECYCLED_COUNT),
            Some(1)
        );
        assert_eq!(snapshot.gauge(tags::METRIC_BUFFER_IN_FLIGHT), Some(0));
        let latency = snapshot.histogram(tags::METRIC_BUFFER_ACQUIRE_LATENCY_US);
        assert_eq!(latency.map(|h| h.count), Some(2));
    }

    #[test]
    fn pipeline_run_records_stage_and_orderer_metrics() -> Result<(), Box<dyn std::error::Error>> {
        let _guard = lock();
        telemetry::reset();

        let config = PipelineConfig::new("telemetry")
            .with_cipher(CipherConfig::new("telemetry").with_cost(1, 64))
            .with_compression_level(CompressionLevel::FAST)
            .with_chunk_size(1024)
            .with_degree_of_parallelism(2);
        let pipeline = Pipeline::new(config)?;

        let data = vec![42u8; 4 * 1024];
        let sealed = pipeline
            .compress_and_encrypt(Cursor::new(&data), Vec::new())?
            .into_destination();
        pipeline.decrypt_and_decompress(Cursor::new(&sealed), Vec::new())?;

        let snapshot = telemetry::snapshot();
        assert_eq!(snapshot.counter(tags::METRIC_PIPELINE_RUN_COUNT), Some(2));
        assert_eq!(snapshot.counter(tags::METRIC_PIPELINE_FAULT_COUNT), None);
        assert_eq!(snapshot.counter(tags::METRIC_STAGE_TASK_COUNT), Some(16));
        assert_eq!(snapshot.counter(tags::METRIC_COMPRESSION_APPLY_COUNT), Some(4));
        assert_eq!(snapshot.counter(tags::METRIC_COMPRESSION_REVERSE_COUNT), Some(4));
        assert_eq!(snapshot.counter(tags::METRIC_CIPHER_SEAL_COUNT), Some(4));
        assert_eq!(snapshot.counter(tags::METRIC_CIPHER_OPEN_COUNT), Some(4));
        assert_eq!(snapshot.counter(tags::METRIC_ORDERER_WRITE_COUNT), Some(8));
        assert_eq!(snapshot.gauge(tags::METRIC_ORDERER_PENDING), Some(0));
        assert_eq!(snapshot.gauge(tags::METRIC_STAGE_ACTIVE_COUNT), Some(0));
        assert_eq!(
            snapshot
                .histogram(tags::METRIC_PIPELINE_RUN_LATENCY_US)
                .map(|h| h.count),
            Some(2)
        );
        Ok(())
    }

    #[test]
    fn failed_open_is_counted() -> Result<(), Box<dyn std::error::Error>> {
        let _guard = lock();
        telemetry::reset();

        let config = PipelineConfig::new("telemetry")
            .with_cipher(CipherConfig::new("telemetry").with_cost(1, 64))
            .with_chunk_size(1024)
            .with_degree_of_parallelism(1);
        let pipeline = Pipeline::new(config)?;

        let mut sealed = pipeline
            .compress_and_encrypt(Cursor::new(vec![1u8; 100]), Vec::new())?
            .into_destination();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(
            pipeline
                .decrypt_and_decompress(Cursor::new(&sealed), Vec::new())
                .is_err()
        );

        let snapshot = telemetry::snapshot();
        assert_eq!(snapshot.counter(tags::METRIC_CIPHER_OPEN_FAIL_COUNT), Some(1));
        assert_eq!(snapshot.counter(tags::METRIC_PIPELINE_FAULT_COUNT), Some(1));
        Ok(())
    }
}

#[cfg(feature = "profiling")]
mod profile_tag_stack_tests {
    use std::sync::Mutex;

    use sealpipe_core::telemetry::{profile, tags};

    static PROFILE_TAG_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn enabled_tags_filter_tag_stacks() {
        let _guard = match PROFILE_TAG_MUTEX.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        profile::set_enabled_tags(&[tags::TAG_CIPHER, tags::TAG_BUFFER]);
        assert!(profile::is_tag_stack_enabled(&[tags::TAG_SYSTEM, tags::TAG_CIPHER]));
        assert!(profile::is_tag_stack_enabled(&[tags::TAG_SYSTEM, "BUFFER"]));
        assert!(!profile::is_tag_stack_enabled(&[tags::TAG_SYSTEM, tags::TAG_ORDERER]));

        profile::set_enabled_tags(&[]);
        assert!(profile::is_tag_stack_enabled(&[tags::TAG_SYSTEM, tags::TAG_ORDERER]));
    }
}
