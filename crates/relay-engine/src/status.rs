//! Status reporting.

use relay_ipc::{Indicator, IndicatorFill, IndicatorShape, SessionState, StatusSignal};

/// Map a session state to its display status.
///
/// Observability only; nothing in the session reads this back.
pub fn status(state: SessionState, last_error: Option<&str>) -> StatusSignal {
    let (fill, shape, label) = match state {
        SessionState::Stopped => (IndicatorFill::Grey, IndicatorShape::Ring, "Stopped".to_string()),
        SessionState::Starting => (IndicatorFill::Blue, IndicatorShape::Dot, "Starting...".to_string()),
        SessionState::Streaming => (IndicatorFill::Green, IndicatorShape::Dot, "Streaming".to_string()),
        SessionState::Paused => (IndicatorFill::Yellow, IndicatorShape::Ring, "Paused".to_string()),
        SessionState::Stopping => (IndicatorFill::Grey, IndicatorShape::Dot, "Stopping...".to_string()),
        SessionState::Error => {
            let label = match last_error {
                Some(message) => format!("Error: {message}"),
                None => "Error".to_string(),
            };
            (IndicatorFill::Red, IndicatorShape::Ring, label)
        }
    };

    StatusSignal {
        indicator: Indicator { fill, shape },
        label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_labels() {
        assert_eq!(status(SessionState::Stopped, None).label, "Stopped");
        assert_eq!(status(SessionState::Streaming, None).label, "Streaming");
        assert_eq!(
            status(SessionState::Paused, None).indicator,
            Indicator {
                fill: IndicatorFill::Yellow,
                shape: IndicatorShape::Ring
            }
        );
    }

    #[test]
    fn test_last_error_only_shown_in_error_state() {
        let err = status(SessionState::Error, Some("Connection refused"));
        assert_eq!(err.label, "Error: Connection refused");
        assert_eq!(err.indicator.fill, IndicatorFill::Red);

        let stopped = status(SessionState::Stopped, Some("Connection refused"));
        assert_eq!(stopped.label, "Stopped");
    }
}
