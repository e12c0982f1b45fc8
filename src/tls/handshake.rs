//! Handshake state machine.
//!
//! # States
//! ```text
//! NotStarted ──Started──▶ Negotiating ──Verified──▶ Established
//!     │                     │   ▲
//!     │                     │   └── StepPending / Ready
//!     │                     ├── NotReady / DeadlineExpired ──▶ Failed(Timeout)
//!     └──Rejected(kind)─────┴── Rejected(kind) ──────────────▶ Failed(kind)
//! ```
//!
//! `Established` and `Failed` are terminal: they absorb every event. A pipe
//! gets exactly one handshake.

use std::time::{Duration, Instant};

use crate::tls::error::TlsError;

/// Why a handshake ended in [`HandshakeState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    EngineInit,
    Configuration,
    Negotiation,
    Timeout,
    NoCertificate,
    CertificateRejected,
}

impl From<&TlsError> for FailureKind {
    fn from(err: &TlsError) -> Self {
        match err {
            TlsError::EngineInitFailed(_) => FailureKind::EngineInit,
            TlsError::ConfigurationRejected(_) => FailureKind::Configuration,
            TlsError::Timeout { .. } => FailureKind::Timeout,
            TlsError::NoCertificate { .. } => FailureKind::NoCertificate,
            TlsError::CertificateVerificationFailed { .. } => FailureKind::CertificateRejected,
            TlsError::HandshakeFailed { .. }
            | TlsError::IoError(_)
            | TlsError::AlreadyAttempted => FailureKind::Negotiation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    Negotiating,
    Established,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Engine context and session were configured.
    Started,
    /// The engine needs socket readiness before the next step.
    StepPending,
    /// The socket became ready within the remaining time.
    Ready,
    /// The readiness wait returned without the socket becoming ready.
    NotReady,
    DeadlineExpired,
    /// The engine finished and the peer certificate passed every check.
    Verified,
    Rejected(FailureKind),
}

impl HandshakeState {
    /// Apply `event`, returning the next state.
    pub fn on(self, event: HandshakeEvent) -> HandshakeState {
        use HandshakeEvent::*;
        use HandshakeState::*;

        match (self, event) {
            (Established, _) | (Failed(_), _) => self,

            (NotStarted, Started) => Negotiating,
            (NotStarted, Rejected(kind)) => Failed(kind),
            (NotStarted, _) => NotStarted,

            (Negotiating, StepPending) | (Negotiating, Ready) => Negotiating,
            (Negotiating, NotReady) | (Negotiating, DeadlineExpired) => Failed(FailureKind::Timeout),
            (Negotiating, Verified) => Established,
            (Negotiating, Rejected(kind)) => Failed(kind),
            (Negotiating, Started) => Negotiating,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed(_))
    }
}

/// Wall-clock bound for an operation. `None` means no deadline.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn start(timeout: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left, clamped to zero. `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout.map(|t| t.saturating_sub(self.elapsed()))
    }

    /// Never true without a deadline.
    pub fn expired(&self) -> bool {
        match self.timeout {
            Some(t) => self.elapsed() >= t,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HandshakeEvent::*;
    use HandshakeState::*;

    #[test]
    fn happy_path() {
        let state = NotStarted.on(Started).on(StepPending).on(Ready).on(StepPending);
        assert_eq!(state, Negotiating);
        assert_eq!(state.on(Verified), Established);
    }

    #[test]
    fn readiness_failure_and_deadline_are_timeouts() {
        assert_eq!(Negotiating.on(NotReady), Failed(FailureKind::Timeout));
        assert_eq!(Negotiating.on(DeadlineExpired), Failed(FailureKind::Timeout));
    }

    #[test]
    fn setup_rejection_fails_before_negotiation() {
        assert_eq!(
            NotStarted.on(Rejected(FailureKind::Configuration)),
            Failed(FailureKind::Configuration)
        );
    }

    #[test]
    fn terminal_states_absorb_events() {
        let failed = Failed(FailureKind::CertificateRejected);
        for event in [Started, StepPending, Ready, NotReady, DeadlineExpired, Verified] {
            assert_eq!(Established.on(event), Established);
            assert_eq!(failed.on(event), failed);
        }
        assert!(Established.is_terminal());
        assert!(failed.is_terminal());
        assert!(!Negotiating.is_terminal());
    }

    #[test]
    fn not_started_ignores_progress_events() {
        assert_eq!(NotStarted.on(Verified), NotStarted);
        assert_eq!(NotStarted.on(NotReady), NotStarted);
    }

    #[test]
    fn failure_kind_from_error() {
        let err = TlsError::NoCertificate { hostname: "h".into() };
        assert_eq!(FailureKind::from(&err), FailureKind::NoCertificate);
        let err = TlsError::HandshakeFailed {
            hostname: "h".into(),
            reason: "r".into(),
        };
        assert_eq!(FailureKind::from(&err), FailureKind::Negotiation);
    }

    #[test]
    fn unbounded_deadline_never_expires() {
        let deadline = Deadline::start(None);
        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), None);
    }

    #[test]
    fn zero_deadline_is_expired_and_clamped() {
        let deadline = Deadline::start(Some(Duration::ZERO));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn bounded_deadline_counts_down() {
        let deadline = Deadline::start(Some(Duration::from_secs(60)));
        assert!(!deadline.expired());
        let remaining = deadline.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(50));
    }
}
