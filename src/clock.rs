/// Injected time source. The decision engine and the caches never read
/// the system clock directly, so both stay deterministic under test.
pub trait Clock: Send + Sync {
    fn now_epoch_ms(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        u64::try_from(now.as_millis()).unwrap_or(u64::MAX)
    }
}

pub const MS_PER_MINUTE: u64 = 60_000;
pub const MS_PER_DAY: u64 = 86_400_000;

pub fn minute_bucket(now_ms: u64) -> u64 {
    now_ms / MS_PER_MINUTE
}

pub fn day_bucket(now_ms: u64) -> u64 {
    now_ms / MS_PER_DAY
}
