use serde::{Deserialize, Serialize};

/// Presentation hint derived from a status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusStyle {
    #[default]
    Normal,
    Warning,
    Critical,
}

/// Maps a status label to its style by substring.
///
/// "CONGESTED" is checked before "MODERATE" so that a combined label always
/// lands on the critical style.
pub fn classify(status: &str) -> StatusStyle {
    if status.contains("CONGESTED") {
        StatusStyle::Critical
    } else if status.contains("MODERATE") {
        StatusStyle::Warning
    } else {
        StatusStyle::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congested_takes_precedence() {
        assert_eq!(classify("HEAVILY CONGESTED"), StatusStyle::Critical);
        assert_eq!(classify("MODERATE, TURNING CONGESTED"), StatusStyle::Critical);
        assert_eq!(classify("CONGESTED 🔴"), StatusStyle::Critical);
    }

    #[test]
    fn moderate_maps_to_warning() {
        assert_eq!(classify("MODERATE FLOW"), StatusStyle::Warning);
        assert_eq!(classify("MODERATE 🟡"), StatusStyle::Warning);
    }

    #[test]
    fn everything_else_is_normal() {
        assert_eq!(classify(""), StatusStyle::Normal);
        assert_eq!(classify("WAITING"), StatusStyle::Normal);
        assert_eq!(classify("LOW 🟢"), StatusStyle::Normal);
        assert_eq!(classify("congested"), StatusStyle::Normal);
    }
}
