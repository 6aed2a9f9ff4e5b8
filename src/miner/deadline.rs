// Per-layer deadlines for the early-block and before-coin flags
//
// Each kind has a single slot. Arming a kind overwrites whatever deadline was
// pending for it, so at most one deadline per kind exists at any time.

use std::time::{Duration, Instant};

/// Which in-progress block flag a deadline clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    EarlyBlock,
    BeforeCoin,
}

#[derive(Debug, Clone, Default)]
pub struct Deadlines {
    early_block: Option<Instant>,
    before_coin: Option<Instant>,
}

impl Deadlines {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: DeadlineKind) -> &mut Option<Instant> {
        match kind {
            DeadlineKind::EarlyBlock => &mut self.early_block,
            DeadlineKind::BeforeCoin => &mut self.before_coin,
        }
    }

    /// Arm `kind` to fire `after` from `now`, superseding any pending deadline
    pub fn arm(&mut self, kind: DeadlineKind, now: Instant, after: Duration) {
        *self.slot(kind) = Some(now + after);
    }

    pub fn pending(&self, kind: DeadlineKind) -> Option<Instant> {
        match kind {
            DeadlineKind::EarlyBlock => self.early_block,
            DeadlineKind::BeforeCoin => self.before_coin,
        }
    }

    /// Disarm and return every deadline that is due at `now`
    pub fn take_expired(&mut self, now: Instant) -> Vec<DeadlineKind> {
        let mut expired = Vec::new();
        for kind in [DeadlineKind::EarlyBlock, DeadlineKind::BeforeCoin] {
            let slot = self.slot(kind);
            if matches!(*slot, Some(at) if at <= now) {
                *slot = None;
                expired.push(kind);
            }
        }
        expired
    }

    /// Earliest pending deadline
    pub fn next_due(&self) -> Option<Instant> {
        match (self.early_block, self.before_coin) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_fires_once() {
        let start = Instant::now();
        let mut deadlines = Deadlines::new();
        deadlines.arm(DeadlineKind::EarlyBlock, start, Duration::from_secs(30));

        assert!(deadlines.take_expired(start + Duration::from_secs(29)).is_empty());
        assert_eq!(
            deadlines.take_expired(start + Duration::from_secs(30)),
            vec![DeadlineKind::EarlyBlock]
        );
        assert!(deadlines.take_expired(start + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_rearm_supersedes_pending() {
        let start = Instant::now();
        let mut deadlines = Deadlines::new();
        deadlines.arm(DeadlineKind::BeforeCoin, start, Duration::from_secs(120));

        let later = start + Duration::from_secs(100);
        deadlines.arm(DeadlineKind::BeforeCoin, later, Duration::from_secs(120));

        // The first deadline no longer exists
        assert!(deadlines.take_expired(start + Duration::from_secs(121)).is_empty());
        assert_eq!(
            deadlines.pending(DeadlineKind::BeforeCoin),
            Some(later + Duration::from_secs(120))
        );
    }

    #[test]
    fn test_kinds_are_independent() {
        let start = Instant::now();
        let mut deadlines = Deadlines::new();
        deadlines.arm(DeadlineKind::EarlyBlock, start, Duration::from_secs(30));
        deadlines.arm(DeadlineKind::BeforeCoin, start, Duration::from_secs(120));

        assert_eq!(deadlines.next_due(), Some(start + Duration::from_secs(30)));
        deadlines.take_expired(start + Duration::from_secs(30));
        assert_eq!(deadlines.next_due(), Some(start + Duration::from_secs(120)));
        assert_eq!(
            deadlines.take_expired(start + Duration::from_secs(200)),
            vec![DeadlineKind::BeforeCoin]
        );
        assert_eq!(deadlines.next_due(), None);
    }
}
