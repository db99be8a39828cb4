use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Per-choice application status. Wire literals are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApplicationStatus {
    #[serde(rename = "documents pending")]
    DocumentsPending,
    #[serde(rename = "documents received")]
    DocumentsReceived,
    #[serde(rename = "application pending")]
    ApplicationPending,
    #[serde(rename = "application filed")]
    ApplicationFiled,
    #[serde(rename = "conditional offer received")]
    ConditionalOfferReceived,
    #[serde(rename = "unconditional offer received")]
    UnconditionalOfferReceived,
    #[serde(rename = "Uni finalized")]
    UniFinalized,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 7] = [
        ApplicationStatus::DocumentsPending,
        ApplicationStatus::DocumentsReceived,
        ApplicationStatus::ApplicationPending,
        ApplicationStatus::ApplicationFiled,
        ApplicationStatus::ConditionalOfferReceived,
        ApplicationStatus::UnconditionalOfferReceived,
        ApplicationStatus::UniFinalized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentsPending => "documents pending",
            Self::DocumentsReceived => "documents received",
            Self::ApplicationPending => "application pending",
            Self::ApplicationFiled => "application filed",
            Self::ConditionalOfferReceived => "conditional offer received",
            Self::UnconditionalOfferReceived => "unconditional offer received",
            Self::UniFinalized => "Uni finalized",
        }
    }

    /// Position in the usual progression. Both offer kinds share a rank.
    /// Informational only: transitions are never checked against it.
    pub fn rank(&self) -> u8 {
        match self {
            Self::DocumentsPending => 0,
            Self::DocumentsReceived => 1,
            Self::ApplicationPending => 2,
            Self::ApplicationFiled => 3,
            Self::ConditionalOfferReceived | Self::UnconditionalOfferReceived => 4,
            Self::UniFinalized => 5,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| TrackerError::InvalidStatus(value.to_string()))
    }
}

pub fn is_valid_status(value: &str) -> bool {
    value.parse::<ApplicationStatus>().is_ok()
}

/// Any enumerated status may follow any other, including itself and
/// earlier stages. Only membership is checked.
pub fn validate_transition(
    _current: Option<ApplicationStatus>,
    proposed: &str,
) -> Result<ApplicationStatus> {
    proposed.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_enumerated_literal() {
        for status in ApplicationStatus::ALL {
            assert!(is_valid_status(status.as_str()));
        }
        assert!(is_valid_status("Uni finalized"));
    }

    #[test]
    fn casing_is_exact() {
        assert!(!is_valid_status("uni finalized"));
        assert!(!is_valid_status("Documents pending"));
        assert!(!is_valid_status("application filed "));
        assert!(!is_valid_status("Accepted"));
        assert!(!is_valid_status(""));
    }

    #[test]
    fn transitions_are_permissive() {
        let regressed = validate_transition(
            Some(ApplicationStatus::UniFinalized),
            "documents pending",
        )
        .unwrap();
        assert_eq!(regressed, ApplicationStatus::DocumentsPending);

        let same = validate_transition(
            Some(ApplicationStatus::ApplicationFiled),
            "application filed",
        )
        .unwrap();
        assert_eq!(same, ApplicationStatus::ApplicationFiled);

        assert!(validate_transition(None, "conditional offer received").is_ok());
    }

    #[test]
    fn rejects_unknown_status() {
        let err = validate_transition(None, "Waitlisted").unwrap_err();
        assert!(matches!(err, TrackerError::InvalidStatus(ref s) if s == "Waitlisted"));
    }

    #[test]
    fn serde_uses_wire_literals() {
        let json = serde_json::to_string(&ApplicationStatus::UniFinalized).unwrap();
        assert_eq!(json, "\"Uni finalized\"");
        let parsed: ApplicationStatus =
            serde_json::from_str("\"conditional offer received\"").unwrap();
        assert_eq!(parsed, ApplicationStatus::ConditionalOfferReceived);
        assert!(serde_json::from_str::<ApplicationStatus>("\"uni finalized\"").is_err());
    }

    #[test]
    fn offers_share_a_rank() {
        assert_eq!(
            ApplicationStatus::ConditionalOfferReceived.rank(),
            ApplicationStatus::UnconditionalOfferReceived.rank()
        );
        assert!(ApplicationStatus::UniFinalized.rank() > ApplicationStatus::ApplicationFiled.rank());
    }
}
