use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Competition round (gameweek) number, `1..=38`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Round(u8);

impl Round {
    pub const MAX: u32 = 38;

    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if value == 0 || value > Self::MAX {
            return Err(ValidationError::InvalidRound {
                value,
                max: Self::MAX,
            });
        }

        Ok(Self(value as u8))
    }

    pub const fn get(self) -> u32 {
        self.0 as u32
    }
}

impl TryFrom<u32> for Round {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Round> for u32 {
    fn from(value: Round) -> Self {
        value.get()
    }
}

impl FromStr for Round {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<u32>()
            .map_err(|_| ValidationError::InvalidRound {
                value: 0,
                max: Self::MAX,
            })?;
        Self::new(parsed)
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
