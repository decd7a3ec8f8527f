use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReconnectState {
    Disconnected,
    Resolving,
    Connecting,
    Connected,
    Backoff { until: Instant },
}

/// what the caller should do after an access
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AccessAction {
    StartAttempt,
    Nothing,
}


/// Decides when a client (re)connects. It is pure bookkeeping: the client reports accesses and
///  I/O completions, and starts a resolve + connect attempt when told to.
///
/// Reconnecting is lazy: nothing happens until the client is accessed. After a connection is
///  lost or an attempt fails, there is a grace period during which accesses do not trigger a
///  new attempt.
#[derive(Debug)]
pub struct Reconnector {
    state: ReconnectState,
    grace_period: Duration,
}

impl Reconnector {
    pub fn new(grace_period: Duration) -> Reconnector {
        Reconnector {
            state: ReconnectState::Disconnected,
            grace_period,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn on_access(&mut self, now: Instant) -> AccessAction {
        match self.state {
            ReconnectState::Disconnected => self.start_attempt(),
            ReconnectState::Backoff { until } if now >= until => self.start_attempt(),
            _ => AccessAction::Nothing,
        }
    }

    fn start_attempt(&mut self) -> AccessAction {
        debug!("starting connection attempt");
        self.state = ReconnectState::Resolving;
        AccessAction::StartAttempt
    }

    pub fn on_resolved(&mut self) {
        if self.state == ReconnectState::Resolving {
            self.state = ReconnectState::Connecting;
        }
    }

    pub fn on_connected(&mut self) {
        if self.state == ReconnectState::Connecting {
            self.state = ReconnectState::Connected;
        }
    }

    /// a failed resolve or connect
    pub fn on_attempt_failed(&mut self, now: Instant) {
        if matches!(self.state, ReconnectState::Resolving | ReconnectState::Connecting) {
            self.enter_backoff(now);
        }
    }

    pub fn on_connection_lost(&mut self, now: Instant) {
        if self.state == ReconnectState::Connected {
            self.enter_backoff(now);
        }
    }

    fn enter_backoff(&mut self, now: Instant) {
        self.state = ReconnectState::Backoff { until: now + self.grace_period };
    }

    pub fn is_connected(&self) -> bool {
        self.state == ReconnectState::Connected
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    const GRACE: Duration = Duration::from_millis(300);

    #[test]
    fn test_first_access_starts_attempt() {
        let mut reconnector = Reconnector::new(GRACE);
        let now = Instant::now();

        assert_eq!(reconnector.on_access(now), AccessAction::StartAttempt);
        assert_eq!(reconnector.state(), ReconnectState::Resolving);
        assert_eq!(reconnector.on_access(now), AccessAction::Nothing);

        reconnector.on_resolved();
        assert_eq!(reconnector.state(), ReconnectState::Connecting);
        assert_eq!(reconnector.on_access(now), AccessAction::Nothing);

        reconnector.on_connected();
        assert!(reconnector.is_connected());
        assert_eq!(reconnector.on_access(now + GRACE * 10), AccessAction::Nothing);
    }

    #[rstest]
    #[case::resolve_failed(false)]
    #[case::connect_failed(true)]
    fn test_failed_attempt_backs_off(#[case] resolved: bool) {
        let mut reconnector = Reconnector::new(GRACE);
        let start = Instant::now();
        reconnector.on_access(start);
        if resolved {
            reconnector.on_resolved();
        }

        reconnector.on_attempt_failed(start);
        assert_eq!(reconnector.state(), ReconnectState::Backoff { until: start + GRACE });

        assert_eq!(reconnector.on_access(start + GRACE - Duration::from_millis(1)), AccessAction::Nothing);
        assert_eq!(reconnector.on_access(start + GRACE), AccessAction::StartAttempt);
        assert_eq!(reconnector.state(), ReconnectState::Resolving);
    }

    #[test]
    fn test_lost_connection_backs_off() {
        let mut reconnector = Reconnector::new(GRACE);
        let start = Instant::now();
        reconnector.on_access(start);
        reconnector.on_resolved();
        reconnector.on_connected();

        let lost_at = start + Duration::from_secs(5);
        reconnector.on_connection_lost(lost_at);
        assert!(!reconnector.is_connected());
        assert_eq!(reconnector.on_access(lost_at), AccessAction::Nothing);
        assert_eq!(reconnector.on_access(lost_at + GRACE), AccessAction::StartAttempt);
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut reconnector = Reconnector::new(GRACE);
        let now = Instant::now();

        reconnector.on_connected();
        reconnector.on_connection_lost(now);
        reconnector.on_attempt_failed(now);
        assert_eq!(reconnector.state(), ReconnectState::Disconnected);

        reconnector.on_access(now);
        reconnector.on_connection_lost(now);
        assert_eq!(reconnector.state(), ReconnectState::Resolving);
    }
}
