use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::SiameseError;

/// Which partition of the corpus an operation reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSplit {
    Train,
    Val,
    Test,
}

impl DatasetSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Val   => "val",
            DatasetSplit::Test  => "test",
        }
    }
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSplit {
    type Err = SiameseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train"         => Ok(DatasetSplit::Train),
            "val" | "valid" => Ok(DatasetSplit::Val),
            "test"          => Ok(DatasetSplit::Test),
            other => Err(SiameseError::Configuration(format!(
                "unknown dataset split '{other}' (expected train, val or test)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_known_splits() {
        assert_eq!("train".parse::<DatasetSplit>().unwrap(), DatasetSplit::Train);
        assert_eq!("valid".parse::<DatasetSplit>().unwrap(), DatasetSplit::Val);
        assert_eq!(" TEST ".parse::<DatasetSplit>().unwrap(), DatasetSplit::Test);
    }

    #[test]
    fn test_unknown_split_is_configuration_error() {
        let err = "bogus".parse::<DatasetSplit>().unwrap_err();
        assert!(matches!(err, SiameseError::Configuration(_)));
    }
}
