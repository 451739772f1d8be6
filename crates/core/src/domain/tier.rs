use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Quality/cost class of a completion call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Premium,
    Economy,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Economy => "economy",
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelTier {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "premium" => Ok(Self::Premium),
            "economy" => Ok(Self::Economy),
            other => Err(DomainError::UnknownModelTier(other.to_string())),
        }
    }
}
