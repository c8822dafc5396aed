// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Runtime settings.
//!
//! Settings are read from TOML. Every key is optional and falls back to
//! the defaults below.
//!
//! ```toml
//! merchant_domains = ["shopee.ph", "shopee.com.ph"]
//! tracking_base_url = "https://cashback.example/track"
//! commission_rate = 0.10
//! cashback_rate = 0.05
//! minimum_withdrawal = 100
//! ```
//!
//! Rates apply to every merchant alike.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Accepted merchant hosts. Subdomains of each entry are accepted too.
    pub merchant_domains: Vec<String>,
    /// Prefix of generated tracking URLs; the link id is appended.
    pub tracking_base_url: String,
    /// Share of the product price paid to us as commission.
    #[serde(deserialize_with = "decimal_value")]
    pub commission_rate: Decimal,
    /// Share of the commission passed back to the user as cashback.
    #[serde(deserialize_with = "decimal_value")]
    pub cashback_rate: Decimal,
    /// Smallest payout, and the balance a user needs before requesting one.
    #[serde(deserialize_with = "decimal_value")]
    pub minimum_withdrawal: Decimal,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            merchant_domains: vec!["shopee.ph".to_string(), "shopee.com.ph".to_string()],
            tracking_base_url: "http://localhost:8000/track".to_string(),
            commission_rate: dec!(0.10),
            cashback_rate: dec!(0.05),
            minimum_withdrawal: dec!(100),
        }
    }
}

impl Settings {
    /// Reads and validates settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!("loading settings from {:?}", path);
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merchant_domains.is_empty()
            || self.merchant_domains.iter().any(|d| d.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "merchant_domains must list at least one non-empty domain".to_string(),
            ));
        }
        if !(self.tracking_base_url.starts_with("http://")
            || self.tracking_base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "tracking_base_url must be an http(s) URL, got {:?}",
                self.tracking_base_url
            )));
        }
        for (name, rate) in [
            ("commission_rate", self.commission_rate),
            ("cashback_rate", self.cashback_rate),
        ] {
            if rate <= Decimal::ZERO || rate > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in (0, 1], got {rate}"
                )));
            }
        }
        if self.minimum_withdrawal <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "minimum_withdrawal must be positive, got {}",
                self.minimum_withdrawal
            )));
        }
        Ok(())
    }
}

/// Accepts `0.10`, `100` or `"0.10"` for decimal settings.
fn decimal_value<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(Decimal::from(value)),
        Raw::Float(value) => Decimal::try_from(value).map_err(serde::de::Error::custom),
        Raw::Text(value) => Decimal::from_str(value.trim()).map_err(serde::de::Error::custom),
    }
}
