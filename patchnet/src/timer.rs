use std::time::{Duration, Instant};

/// 分段累计计时器。
///
/// 与一般的计时器不同，它只统计`start()`与`stop()`之间的时间，
/// 因此可以跳过保存文件之类不希望计入的部分。
#[derive(Clone, Debug)]
pub struct Stopwatch {
    consumed: Duration,
    since: Option<Instant>,
}

impl Stopwatch {
    /// 初始化并立即开始计时。
    #[inline]
    pub fn started() -> Self {
        Self {
            consumed: Duration::ZERO,
            since: Some(Instant::now()),
        }
    }

    /// 初始化但不开始计时。
    #[inline]
    pub fn new() -> Self {
        Self {
            consumed: Duration::ZERO,
            since: None,
        }
    }

    /// 开始（或重新开始）一段计时。已在计时中的区间会被丢弃。
    #[inline]
    pub fn start(&mut self) {
        self.since = Some(Instant::now());
    }

    /// 结束当前区间并累计。未开始时调用无效果。
    #[inline]
    pub fn stop(&mut self) {
        if let Some(since) = self.since.take() {
            self.consumed += since.elapsed();
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.since.is_some()
    }

    /// 累计时间，包含尚未结束的区间。
    pub fn total(&self) -> Duration {
        match self.since {
            Some(since) => self.consumed + since.elapsed(),
            None => self.consumed,
        }
    }

    #[inline]
    pub fn total_ms(&self) -> u64 {
        self.total().as_millis() as u64
    }

    /// 清零并停止。
    #[inline]
    pub fn reset(&mut self) {
        self.consumed = Duration::ZERO;
        self.since = None;
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
