use thiserror::Error;

/// Errors raised at tracker construction or during a tracking step.
///
/// `EmptyFrame`, `AllForbidden` and `FlowFailure` are deliberately not
/// represented here: they are normal control-flow outcomes, not failures.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unknown {policy} policy: {value}")]
    ConfigurationError { policy: &'static str, value: String },

    #[error("track_window must be non-zero")]
    ZeroWindow,

    #[error("shape mismatch: {detail}")]
    ShapeMismatch { detail: String },

    #[error(
        "frame {got} is not strictly after the last pushed frame {last_pushed}; out-of-order \
         frame indices are rejected"
    )]
    OutOfOrderFrame { last_pushed: i64, got: i64 },
}
