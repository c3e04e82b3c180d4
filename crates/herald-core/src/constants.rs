//! TigerStyle constants for Herald
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Node Identity
// =============================================================================

/// Number of distinct node ids; valid ids are `[0, NODE_ID_COUNT_MAX)`
pub const NODE_ID_COUNT_MAX: u16 = 1024;

/// Maximum candidates tried when reserving a node id in the store
pub const NODE_ID_PROBE_COUNT_MAX: u16 = 32;

// =============================================================================
// ID Format
// =============================================================================

/// Digits of the `yyyyMMddHHmmssSSS` timestamp field
pub const ID_TIMESTAMP_DIGITS_COUNT: usize = 17;

/// Digits of the zero-padded node id field
pub const ID_NODE_DIGITS_COUNT: usize = 3;

/// Node ids that fit the node field; ids in `[1000, 1024)` cannot mint IDs
pub const ID_NODE_PRINTABLE_COUNT_MAX: u16 = 1000;

/// Digits of the zero-padded sequence field
pub const ID_SEQUENCE_DIGITS_COUNT: usize = 4;

/// Total fixed-width numeric tail of every ID
pub const ID_TAIL_DIGITS_COUNT: usize =
    ID_TIMESTAMP_DIGITS_COUNT + ID_NODE_DIGITS_COUNT + ID_SEQUENCE_DIGITS_COUNT;

/// IDs a single node can mint within one millisecond
pub const ID_SEQUENCE_COUNT_MAX: u16 = 10_000;

/// Maximum length of an ID domain prefix in bytes
pub const ID_DOMAIN_LENGTH_BYTES_MAX: usize = 64;

// =============================================================================
// Health
// =============================================================================

/// Default probe period in seconds
pub const HEALTH_CHECK_INTERVAL_SECS_DEFAULT: u64 = 15;

/// Default sample validity in seconds
pub const HEALTH_CHECK_STALENESS_SECS_DEFAULT: u64 = 30;

/// Maximum retained health samples regardless of configuration
pub const HEALTH_WINDOW_SAMPLES_COUNT_MAX: usize = 4096;

/// Timer jitter tolerated when judging whether the newest sample is stale
pub const HEALTH_STALENESS_SLACK_MS_DEFAULT: u64 = 250;

/// Maximum time a single probe may run before it counts as unhealthy (10 sec)
pub const HEALTH_PROBE_TIMEOUT_MS_MAX: u64 = 10 * 1000;

// =============================================================================
// Coordination Store
// =============================================================================

/// Default timeout for one publish/unpublish/list call (2 sec)
pub const STORE_OPERATION_TIMEOUT_MS_DEFAULT: u64 = 2 * 1000;

/// Default backoff between reconnect attempts (5 sec)
pub const STORE_RECONNECT_INTERVAL_MS_DEFAULT: u64 = 5 * 1000;

/// Depth of the queue carrying store connection events to the lifecycle task
pub const STORE_EVENT_QUEUE_DEPTH_MAX: usize = 64;

/// Maximum length of a service name in bytes
pub const SERVICE_NAME_LENGTH_BYTES_MAX: usize = 256;

// =============================================================================
// Lifecycle
// =============================================================================

/// Default budget for the best-effort unpublish on stop (5 sec)
pub const SHUTDOWN_TIMEOUT_MS_DEFAULT: u64 = 5 * 1000;

/// Ticks a constant input needs to settle the lifecycle from a started server
pub const LIFECYCLE_CONVERGENCE_TICKS_COUNT_MAX: u32 = 2;

// =============================================================================
// Compile-time Assertions
// =============================================================================

const _: () = {
    assert!(ID_TAIL_DIGITS_COUNT == 24);
    assert!(ID_NODE_PRINTABLE_COUNT_MAX as u32 == 10u32.pow(ID_NODE_DIGITS_COUNT as u32));
    assert!(ID_NODE_PRINTABLE_COUNT_MAX <= NODE_ID_COUNT_MAX);
    assert!(ID_SEQUENCE_COUNT_MAX as u32 == 10u32.pow(ID_SEQUENCE_DIGITS_COUNT as u32));
    assert!(NODE_ID_PROBE_COUNT_MAX <= NODE_ID_COUNT_MAX);
    assert!(HEALTH_CHECK_STALENESS_SECS_DEFAULT >= HEALTH_CHECK_INTERVAL_SECS_DEFAULT);
    assert!(STORE_OPERATION_TIMEOUT_MS_DEFAULT < SHUTDOWN_TIMEOUT_MS_DEFAULT);
    assert!(STORE_EVENT_QUEUE_DEPTH_MAX > 0);
};
