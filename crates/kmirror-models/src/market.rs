use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which Bybit book a series was sourced from.
///
/// `spot` is the cash book (TradingView parity), `linear` the USDT-margined
/// perpetual. Persisted separately; both may exist for the same symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    #[default]
    Linear,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown market type: {0}")]
pub struct ParseMarketTypeError(pub String);

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Linear => "linear",
        }
    }
}

impl FromStr for MarketType {
    type Err = ParseMarketTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "linear" => Ok(MarketType::Linear),
            _ => Err(ParseMarketTypeError(s.to_string())),
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!("spot".parse::<MarketType>().unwrap(), MarketType::Spot);
        assert_eq!("LINEAR".parse::<MarketType>().unwrap(), MarketType::Linear);
        assert!("inverse".parse::<MarketType>().is_err());
        assert_eq!(MarketType::Spot.to_string(), "spot");
    }

    #[test]
    fn default_is_linear() {
        assert_eq!(MarketType::default(), MarketType::Linear);
    }
}
