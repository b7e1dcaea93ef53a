//! Per-task extraction deadlines

use std::time::Duration;

/// Decides how long a task may run before its worker is killed
pub trait DeadlinePolicy: Send + Sync {
    /// Time allowed after START for a document of `page_count` pages
    fn deadline(&self, page_count: u32) -> Duration;

    /// Time allowed between dispatch and START
    fn start_deadline(&self) -> Duration {
        self.deadline(0)
    }
}

/// `base * (1 + page_count)`: larger documents get proportionally more time
#[derive(Debug, Clone, Copy)]
pub struct PageScaledDeadline {
    pub base: Duration,
}

impl PageScaledDeadline {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl DeadlinePolicy for PageScaledDeadline {
    fn deadline(&self, page_count: u32) -> Duration {
        self.base.saturating_mul(page_count.saturating_add(1))
    }
}

/// Any `Fn(page_count) -> Duration` closure is a policy
impl<F> DeadlinePolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn deadline(&self, page_count: u32) -> Duration {
        self(page_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_scaled_deadline() {
        let policy = PageScaledDeadline::new(Duration::from_secs(60));
        assert_eq!(policy.start_deadline(), Duration::from_secs(60));
        assert_eq!(policy.deadline(0), Duration::from_secs(60));
        assert_eq!(policy.deadline(4), Duration::from_secs(300));
        assert_eq!(policy.deadline(u32::MAX), Duration::from_secs(60).saturating_mul(u32::MAX));
    }

    #[test]
    fn test_closure_policy() {
        let base = Duration::from_millis(500);
        let policy: Box<dyn DeadlinePolicy> = Box::new(move |pages: u32| base * (pages + 2));
        assert_eq!(policy.start_deadline(), Duration::from_secs(1));
        assert_eq!(policy.deadline(2), Duration::from_secs(2));
    }
}
