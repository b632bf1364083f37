//! Variable-name harmonization between CMOR names and raw dataset names.
//!
//! Each model family publishes its fields under its own raw names. The
//! mapping is a set of immutable lookup tables consulted in a fixed order:
//! ICON per-variable exceptions (identity fallback), the AMIP override
//! table, then the general table. A variable absent from the applicable
//! table is a lookup failure, never a silent pass-through.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::errors::{EerieError, EerieResult};
use crate::dataset::Dataset;
use crate::members::{MemberKey, ModelFamily};

/// Variables that live in the ocean realm of the raw catalogues.
pub const OCEAN_VARIABLES: [&str; 6] = ["tos", "sic", "zos", "uo", "vo", "so"];

pub fn is_ocean_variable(varname: &str) -> bool {
    OCEAN_VARIABLES.contains(&varname)
}

static CMOR_TO_RAW: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("pr", "tprate"),
        ("tas", "mean2t"),
        ("tasmax", "mx2t"),
        ("tasmin", "mn2t"),
        ("clt", "meantcc"),
        ("tos", "avg_tos"),
        ("zos", "avg_zos"),
        ("uas", "m10u"),
        ("vas", "m10v"),
        ("sic", "mci"),
        ("sfcWind", "mean10ws"),
        ("eke", "eke"),
        ("so", "avg_sos"),
    ])
});

/// AMIP runs override a handful of the general entries.
static CMOR_TO_RAW_AMIP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut table = CMOR_TO_RAW.clone();
    table.extend([("uas", "avg_10u"), ("vas", "avg_10v"), ("tos", "avg_sst")]);
    table
});

/// Raw name a variable is stored under for the given member.
pub fn raw_variable_name(member: &MemberKey, varname: &str) -> EerieResult<String> {
    let raw = match member.family() {
        ModelFamily::Icon => match varname {
            "tos" => "to",
            "zos" => "ssh",
            "sfcWind" => "sfcwind",
            "tasmax" | "tasmin" => "tas",
            other => other,
        },
        ModelFamily::IfsAmip => {
            CMOR_TO_RAW_AMIP
                .get(varname)
                .copied()
                .ok_or_else(|| EerieError::Lookup {
                    member: member.to_string(),
                    variable: varname.to_string(),
                })?
        }
        _ => CMOR_TO_RAW
            .get(varname)
            .copied()
            .ok_or_else(|| EerieError::Lookup {
                member: member.to_string(),
                variable: varname.to_string(),
            })?,
    };
    Ok(raw.to_string())
}

/// Rename the raw data variable to its CMOR name.
pub fn rename_to_cmor(dataset: &mut Dataset, rawname: &str, cmorname: &str) -> EerieResult<()> {
    if rawname == cmorname {
        return Ok(());
    }
    dataset.rename_var(rawname, cmorname)
}
