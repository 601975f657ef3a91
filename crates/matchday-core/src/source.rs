use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream provider identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Official Fantasy Premier League API.
    Fpl,
    /// football-data.org v4 API.
    FootballData,
}

impl ProviderId {
    pub const ALL: [Self; 2] = [Self::Fpl, Self::FootballData];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fpl => "fpl",
            Self::FootballData => "football_data",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fpl" => Ok(Self::Fpl),
            "football_data" | "football-data" | "footballdata" => Ok(Self::FootballData),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("FPL".parse::<ProviderId>(), Ok(ProviderId::Fpl));
        assert_eq!(
            " football-data ".parse::<ProviderId>(),
            Ok(ProviderId::FootballData)
        );
        assert!(matches!(
            "opta".parse::<ProviderId>(),
            Err(ValidationError::InvalidSource { .. })
        ));
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&ProviderId::FootballData).expect("serialize");
        assert_eq!(json, "\"football_data\"");
    }
}
