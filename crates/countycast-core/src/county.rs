//! County identifiers.
//!
//! A county is addressed by its 5-digit FIPS code, kept as text so leading
//! zeros survive every hop ("01001" is Autauga County, AL; `1001` is not a
//! county code). Orphaned volume that cannot be attributed to any county goes
//! to [`CountyKey::Unassigned`], a tag of its own instead of a reserved
//! real-looking code such as `"00000"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Number of characters in a county FIPS code.
pub const COUNTY_FIPS_LEN: usize = 5;

/// Number of leading characters of a county FIPS code that identify the state.
pub const STATE_FIPS_LEN: usize = 2;

/// Validated 5-digit county FIPS code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountyFips(String);

impl CountyFips {
    /// Parse a county code. Surrounding whitespace is ignored; anything other
    /// than exactly five ASCII digits is rejected.
    pub fn parse(raw: &str) -> PipelineResult<Self> {
        let code = raw.trim();
        if code.len() != COUNTY_FIPS_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PipelineError::Parse(format!(
                "invalid county FIPS code '{raw}': expected {COUNTY_FIPS_LEN} digits"
            )));
        }
        Ok(Self(code.to_string()))
    }

    /// Derive the county code of a sub-county (census block group) identifier
    /// by truncating it to its first five characters.
    ///
    /// The identifier is treated as fixed-width text and is never parsed as a
    /// number, so `"010010201001"` yields `"01001"`.
    pub fn from_block_group(block_group: &str) -> PipelineResult<Self> {
        let id = block_group.trim();
        if id.len() < COUNTY_FIPS_LEN || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PipelineError::Parse(format!(
                "invalid census block group '{block_group}'"
            )));
        }
        Self::parse(&id[..COUNTY_FIPS_LEN])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit state prefix.
    pub fn state(&self) -> &str {
        &self.0[..STATE_FIPS_LEN]
    }
}

impl fmt::Display for CountyFips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CountyFips {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CountyFips {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CountyFips> for String {
    fn from(value: CountyFips) -> Self {
        value.0
    }
}

/// Aggregation bucket a place resolves to.
///
/// Real counties sort before the unassigned bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CountyKey {
    County(CountyFips),
    Unassigned,
}

impl CountyKey {
    pub fn fips(&self) -> Option<&CountyFips> {
        match self {
            CountyKey::County(fips) => Some(fips),
            CountyKey::Unassigned => None,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        matches!(self, CountyKey::Unassigned)
    }
}

impl From<CountyFips> for CountyKey {
    fn from(value: CountyFips) -> Self {
        CountyKey::County(value)
    }
}

impl From<Option<CountyFips>> for CountyKey {
    fn from(value: Option<CountyFips>) -> Self {
        value.map_or(CountyKey::Unassigned, CountyKey::County)
    }
}

impl fmt::Display for CountyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountyKey::County(fips) => fips.fmt(f),
            CountyKey::Unassigned => f.write_str("unassigned"),
        }
    }
}
