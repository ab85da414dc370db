/// Profiling target for buffer pool operations.
pub const PROFILE_BUFFER: &str = "sealpipe.profile.buffer";
/// Profiling target for stage worker runtime.
pub const PROFILE_STAGE: &str = "sealpipe.profile.stage";
/// Profiling target for compression and cipher transforms.
pub const PROFILE_TRANSFORM: &str = "sealpipe.profile.transform";
/// Profiling target for the sequencing sink.
pub const PROFILE_ORDERER: &str = "sealpipe.profile.orderer";

/// Log target for pipeline orchestration.
pub const LOG_PIPELINE: &str = "sealpipe.pipeline";
/// Log target for parallel stage runners.
pub const LOG_STAGE: &str = "sealpipe.stage";
/// Log target for the sequencing sink.
pub const LOG_ORDERER: &str = "sealpipe.orderer";
/// Log target for the buffer pool.
pub const LOG_BUFFER: &str = "sealpipe.buffer";

/// Global system-level tag shared by all profiling events.
pub const TAG_SYSTEM: &str = "system";
/// Logical tag for buffer subsystem events.
pub const TAG_BUFFER: &str = "buffer";
/// Logical tag for stage worker events.
pub const TAG_STAGE: &str = "stage";
/// Logical tag for compression events.
pub const TAG_COMPRESSION: &str = "compression";
/// Logical tag for cipher events.
pub const TAG_CIPHER: &str = "cipher";
/// Logical tag for orderer events.
pub const TAG_ORDERER: &str = "orderer";

pub const METRIC_BUFFER_ACQUIRE_CREATED_COUNT: &str = "sealpipe.buffer.acquire.created.count";
pub const METRIC_BUFFER_ACQUIRE_RECYCLED_COUNT: &str = "sealpipe.buffer.acquire.recycled.count";
pub const METRIC_BUFFER_ACQUIRE_WAIT_COUNT: &str = "sealpipe.buffer.acquire.wait.count";
pub const METRIC_BUFFER_RELEASE_DISCARDED_COUNT: &str = "sealpipe.buffer.release.discarded.count";
pub const METRIC_BUFFER_IN_FLIGHT: &str = "sealpipe.buffer.in_flight";
pub const METRIC_BUFFER_ACQUIRE_LATENCY_US: &str = "sealpipe.buffer.acquire.latency_us";

pub const METRIC_STAGE_TASK_COUNT: &str = "sealpipe.stage.task.count";
pub const METRIC_STAGE_TASK_FAIL_COUNT: &str = "sealpipe.stage.task.fail.count";
pub const METRIC_STAGE_TASK_LATENCY_US: &str = "sealpipe.stage.task.latency_us";
pub const METRIC_STAGE_ACTIVE_COUNT: &str = "sealpipe.stage.active.count";

pub const METRIC_COMPRESSION_APPLY_COUNT: &str = "sealpipe.compression.apply.count";
pub const METRIC_COMPRESSION_REVERSE_COUNT: &str = "sealpipe.compression.reverse.count";
pub const METRIC_COMPRESSION_INPUT_BYTES: &str = "sealpipe.compression.input_bytes";
pub const METRIC_COMPRESSION_OUTPUT_BYTES: &str = "sealpipe.compression.output_bytes";
pub const METRIC_CIPHER_SEAL_COUNT: &str = "sealpipe.cipher.seal.count";
pub const METRIC_CIPHER_OPEN_COUNT: &str = "sealpipe.cipher.open.count";
pub const METRIC_CIPHER_OPEN_FAIL_COUNT: &str = "sealpipe.cipher.open.fail.count";

pub const METRIC_ORDERER_WRITE_COUNT: &str = "sealpipe.orderer.write.count";
pub const METRIC_ORDERER_WRITE_BYTES: &str = "sealpipe.orderer.write.bytes";
pub const METRIC_ORDERER_PENDING: &str = "sealpipe.orderer.pending";

pub const METRIC_PIPELINE_RUN_COUNT: &str = "sealpipe.pipeline.run.count";
pub const METRIC_PIPELINE_FAULT_COUNT: &str = "sealpipe.pipeline.fault.count";
pub const METRIC_PIPELINE_RUN_LATENCY_US: &str = "sealpipe.pipeline.run.latency_us";
