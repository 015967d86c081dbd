// =============================================================================
// Error taxonomy for the signal processor
// =============================================================================
//
// Propagation policy:
//   - Parse and MissingCredentials abort the whole invocation (500-equivalent).
//   - Calculation and Order errors are caught at the action boundary and
//     surfaced inside the action outcome, so one failed step never crashes
//     the rest of the flow.
//   - Anomaly is non-fatal: logged, notified, and processing continues.
// =============================================================================

use thiserror::Error;

/// Structured errors produced by the processing core.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or incomplete webhook payload.
    #[error("payload parse error: {0}")]
    Parse(String),

    /// Exchange credentials are absent; nothing may execute.
    #[error("missing exchange credentials: {0}")]
    MissingCredentials(String),

    /// A sizing or price computation could not complete (bad precision
    /// lookup, zero quantity, unparseable risk:reward ratio, ...).
    #[error("calculation error: {0}")]
    Calculation(String),

    /// The exchange rejected an order submission.
    #[error("order error: {0}")]
    Order(String),

    /// Unexpected exchange state (e.g. multiple nonzero positions for one
    /// symbol). Surfaced, never silently resolved.
    #[error("anomaly: {0}")]
    Anomaly(String),
}

impl RelayError {
    /// Whether this error must abort the whole invocation rather than being
    /// reported as a failed step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::MissingCredentials(_))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_split() {
        assert!(RelayError::Parse("x".into()).is_fatal());
        assert!(RelayError::MissingCredentials("x".into()).is_fatal());
        assert!(!RelayError::Calculation("x".into()).is_fatal());
        assert!(!RelayError::Order("x".into()).is_fatal());
        assert!(!RelayError::Anomaly("x".into()).is_fatal());
    }

    #[test]
    fn messages_carry_context() {
        let e = RelayError::Calculation("quantity rounded to zero".into());
        assert_eq!(e.to_string(), "calculation error: quantity rounded to zero");
    }
}
