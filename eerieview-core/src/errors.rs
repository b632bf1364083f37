use thiserror::Error;

/// Error type for invalid operations on EERIE comparison products.
#[derive(Error, Debug)]
pub enum EerieError {
    /// A member identifier did not have the arity of any known variant.
    #[error("member identifier '{identifier}' must have 5 or 6 dot-separated fields, found {found}")]
    MemberParse { identifier: String, found: usize },
    /// A period selection produced zero time steps.
    #[error("empty time slice for period {0}")]
    EmptySlice(String),
    /// A (member, variable) combination is absent from the data source.
    #[error("no entry for member '{member}' and variable '{variable}'")]
    Lookup { member: String, variable: String },
    /// Unsupported time unit, cadence, region set or similar misconfiguration.
    #[error("{0}")]
    Config(String),
    /// The predictor and observation vectors of a regression differ in length.
    #[error("length of vectors does not match: x has {x_len}, y has {y_len}")]
    LengthMismatch { x_len: usize, y_len: usize },
    /// Incompatible array dimensions or coordinates.
    #[error("dimension mismatch: {0}")]
    Shape(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode product: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Convenience type for `Result<T, EerieError>`.
pub type EerieResult<T> = Result<T, EerieError>;
