//! Structured ensemble-member identifiers.
//!
//! A member identifier is a dotted string with a fixed number of fields.
//! Raw simulation output uses six fields
//! (`model.simulation.version.realm.grid.frequency`) while CMOR-indexed
//! output uses five (`model.simulation.version.grid.table`). Parsing resolves
//! the model family once, so downstream code can branch on capabilities
//! instead of re-matching substrings of the identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{EerieError, EerieResult};

/// Model family, resolved from the model field at parse time.
///
/// Families carry the capability quirks that the orchestration layer needs:
/// whether daily extrema live under a rewritten frequency suffix, and whether
/// the source publishes ensemble realizations that must be averaged out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    Icon,
    IfsFesom,
    IfsNemo,
    HadGem,
    IfsAmip,
    Other,
}

impl ModelFamily {
    pub fn of_model(model: &str) -> ModelFamily {
        if model.contains("amip") {
            ModelFamily::IfsAmip
        } else if model.contains("icon") {
            ModelFamily::Icon
        } else if model.contains("fesom") {
            ModelFamily::IfsFesom
        } else if model.contains("ifs-nemo") {
            ModelFamily::IfsNemo
        } else if model.contains("hadgem") {
            ModelFamily::HadGem
        } else {
            ModelFamily::Other
        }
    }

    /// Daily maxima/minima are stored under an `avg` -> `max`/`min` frequency
    /// rewrite with a `24` raw-name suffix.
    pub fn has_realm_daily_suffix(&self) -> bool {
        matches!(self, ModelFamily::IfsFesom)
    }

    /// The source may publish a `realization` dimension to average out.
    pub fn has_ensemble_realizations(&self) -> bool {
        matches!(self, ModelFamily::HadGem | ModelFamily::IfsAmip)
    }
}

/// Raw simulation output key: `model.simulation.version.realm.grid.frequency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMember {
    pub model: String,
    pub simulation: String,
    pub version: String,
    pub realm: String,
    pub grid: String,
    pub frequency: String,
}

/// CMOR-indexed output key: `model.simulation.version.grid.table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmorMember {
    pub model: String,
    pub simulation: String,
    pub version: String,
    pub grid: String,
    pub table: String,
}

/// A parsed member identifier.
///
/// `to_string` is the exact left inverse of [`MemberKey::parse`]; derived
/// variants ([`MemberKey::to_ocean`] and friends) return new keys and never
/// mutate the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKey {
    Raw(RawMember),
    Cmor(CmorMember),
}

impl MemberKey {
    pub fn parse(identifier: &str) -> EerieResult<MemberKey> {
        let pieces: Vec<&str> = identifier.split('.').collect();
        match pieces.as_slice() {
            [model, simulation, version, realm, grid, frequency] => {
                Ok(MemberKey::Raw(RawMember {
                    model: model.to_string(),
                    simulation: simulation.to_string(),
                    version: version.to_string(),
                    realm: realm.to_string(),
                    grid: grid.to_string(),
                    frequency: frequency.to_string(),
                }))
            }
            [model, simulation, version, grid, table] => Ok(MemberKey::Cmor(CmorMember {
                model: model.to_string(),
                simulation: simulation.to_string(),
                version: version.to_string(),
                grid: grid.to_string(),
                table: table.to_string(),
            })),
            _ => Err(EerieError::MemberParse {
                identifier: identifier.to_string(),
                found: pieces.len(),
            }),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            MemberKey::Raw(m) => &m.model,
            MemberKey::Cmor(m) => &m.model,
        }
    }

    pub fn simulation(&self) -> &str {
        match self {
            MemberKey::Raw(m) => &m.simulation,
            MemberKey::Cmor(m) => &m.simulation,
        }
    }

    pub fn family(&self) -> ModelFamily {
        ModelFamily::of_model(self.model())
    }

    pub fn uses_cmor_table(&self) -> bool {
        matches!(self, MemberKey::Cmor(_))
    }

    /// Short `model-simulation` label used for the member dimension.
    pub fn slug(&self) -> String {
        format!("{}-{}", self.model(), self.simulation())
    }

    /// Switch the key to its ocean counterpart.
    pub fn to_ocean(&self) -> MemberKey {
        match self {
            MemberKey::Raw(m) => {
                let mut out = m.clone();
                out.realm = "ocean".to_string();
                MemberKey::Raw(out)
            }
            MemberKey::Cmor(m) => {
                let mut out = m.clone();
                if let Some(rest) = out.table.strip_prefix('A') {
                    out.table = format!("O{rest}");
                }
                MemberKey::Cmor(out)
            }
        }
    }

    /// Switch the key to its atmosphere counterpart.
    pub fn to_atmos(&self) -> MemberKey {
        match self {
            MemberKey::Raw(m) => {
                let mut out = m.clone();
                out.realm = "atmos".to_string();
                MemberKey::Raw(out)
            }
            MemberKey::Cmor(m) => {
                let mut out = m.clone();
                if let Some(rest) = out.table.strip_prefix('O') {
                    out.table = format!("A{rest}");
                }
                MemberKey::Cmor(out)
            }
        }
    }

    /// Switch the key to the daily frequency variant.
    pub fn to_daily(&self) -> MemberKey {
        match self {
            MemberKey::Raw(m) => {
                let mut out = m.clone();
                out.frequency = out.frequency.replace("monthly", "daily");
                MemberKey::Raw(out)
            }
            MemberKey::Cmor(m) => {
                let mut out = m.clone();
                out.table = out.table.replace("mon", "day");
                MemberKey::Cmor(out)
            }
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKey::Raw(m) => write!(
                f,
                "{}.{}.{}.{}.{}.{}",
                m.model, m.simulation, m.version, m.realm, m.grid, m.frequency
            ),
            MemberKey::Cmor(m) => write!(
                f,
                "{}.{}.{}.{}.{}",
                m.model, m.simulation, m.version, m.grid, m.table
            ),
        }
    }
}
