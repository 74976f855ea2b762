/// Lock wait before `LockError::Timeout` (seconds)
pub const DEFAULT_LOCK_MAX_WAIT_SECS: u64 = 100;
/// First poll interval of a lock waiter (milliseconds)
pub const DEFAULT_LOCK_INITIAL_BACKOFF_MS: u64 = 5;
/// Poll interval ceiling of a lock waiter (milliseconds)
pub const DEFAULT_LOCK_MAX_BACKOFF_MS: u64 = 250;

/// Attempts for a SQL statement that keeps hitting SQLITE_BUSY
pub const DEFAULT_DB_RETRY_ATTEMPTS: u32 = 8;
/// First retry delay for a busy table (milliseconds)
pub const DEFAULT_DB_RETRY_INITIAL_MS: u64 = 10;
/// Retry delay ceiling for a busy table (milliseconds)
pub const DEFAULT_DB_RETRY_MAX_MS: u64 = 1_000;
/// SQLite busy_timeout applied to every per-call connection (milliseconds)
pub const DEFAULT_DB_BUSY_TIMEOUT_MS: u64 = 2_000;

/// Soft wall time of a recipe that declares none (seconds)
pub const DEFAULT_WALL_TIME_SECS: u64 = 3_600;
/// Time active workers get to finish after SIGINT (seconds)
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;
/// Time a terminated worker gets before it is killed (seconds)
pub const DEFAULT_KILL_AFTER_SECS: u64 = 5;

/// Trigger scan period (seconds)
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
/// Quiet period before a night is considered complete (seconds)
pub const DEFAULT_QUIESCENCE_SECS: u64 = 600;

/// Bytes of worker stdout/stderr kept in results
pub const OUTPUT_TAIL_BYTES: usize = 4_096;

/// DPRTYPE of a header no rule matched
pub const UNKNOWN_DPRTYPE: &str = "UNKNOWN";

/// Version stamped into every product header
pub const DRS_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Version of the pre-processing stage stamped into every product header
pub const PP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Modified Julian Date of the Unix epoch
pub const MJD_UNIX_EPOCH: f64 = 40_587.0;

/// Keyword group copied into index rows as the header subset
pub const INDEX_HEADER_GROUP: &str = "index";
/// Seconds per day, for exposure times expressed against MJDs
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Lock serializing raw-tree scans and night submissions.
pub const TRIGGER_LOCK: &str = "trigger";
