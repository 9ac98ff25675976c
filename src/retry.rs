use std::time::Duration;

/// Bounded attempt counter for one logical request.
///
/// Every failure path spends one attempt; the request is abandoned once the
/// budget reaches zero.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryBudget {
    max_attempts: u32,
    attempts_left: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts,
            attempts_left: max_attempts,
        }
    }

    /// Record a failed attempt. Returns `true` if another attempt is allowed.
    pub fn spend(&mut self) -> bool {
        self.attempts_left = self.attempts_left.saturating_sub(1);
        self.attempts_left > 0
    }

    pub fn attempts_left(&self) -> u32 {
        self.attempts_left
    }

    /// 1-based number of the attempt about to run.
    pub fn attempt(&self) -> u32 {
        self.max_attempts - self.attempts_left + 1
    }

    /// Delay after a 429: one rate-limit window per attempt already spent.
    pub fn rate_limit_backoff(&self, window: Duration) -> Duration {
        window * (self.max_attempts - self.attempts_left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_attempts_allow_two_retries() {
        let mut budget = RetryBudget::new(3);
        assert_eq!(budget.attempt(), 1);
        assert!(budget.spend());
        assert_eq!(budget.attempt(), 2);
        assert!(budget.spend());
        assert_eq!(budget.attempt(), 3);
        assert!(!budget.spend());
        assert_eq!(budget.attempts_left(), 0);
    }

    #[test]
    fn zero_budget_still_allows_one_attempt() {
        let mut budget = RetryBudget::new(0);
        assert_eq!(budget.attempts_left(), 1);
        assert!(!budget.spend());
    }

    #[test]
    fn rate_limit_backoff_scales_with_spent_budget() {
        let window = Duration::from_secs(5);
        let mut budget = RetryBudget::new(3);
        assert!(budget.spend());
        assert_eq!(budget.rate_limit_backoff(window), Duration::from_secs(5));
        assert!(budget.spend());
        assert_eq!(budget.rate_limit_backoff(window), Duration::from_secs(10));
    }

    #[test]
    fn spend_saturates() {
        let mut budget = RetryBudget::new(1);
        assert!(!budget.spend());
        assert!(!budget.spend());
        assert_eq!(budget.attempts_left(), 0);
    }
}
