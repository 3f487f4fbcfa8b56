//! # Error Types Module
//!
//! Questo modulo definisce la tassonomia degli errori del motore di conversione.
//!
//! ## Responsabilità:
//! - Definisce `ConvertError` per categorizzare tutti gli esiti negativi di un Job
//! - Fornisce `ErrorKind`, la forma compatta usata dall'adapter della piattaforma
//! - Integra con `thiserror` per la conversione automatica da errori standard
//!
//! ## Categorie di errori:
//! - Protocollo: `SessionBusy`, `NoOperationSelected`, `NoPendingDecision`
//! - Validazione: `FormatMismatch`, `InputTooLarge`, `NoValidInput`, `TooManyInputs`, `InvalidParameters`
//! - Esecuzione: `Transcode`, `Timeout`, `MissingDependency`, `Io`, `Image`, `Fetch`
//! - Esito: `OutputTooLargeAfterOptimization`, `Cancelled`
//!
//! ## Esempio:
//! ```ignore
//! if !accepted.contains(&ext) {
//!     return Err(ConvertError::FormatMismatch { extension: ext, accepted });
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Failures a conversion request can end with
#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("File format '{extension}' is not accepted, expected one of: {}", .accepted.join(", "))]
    FormatMismatch {
        extension: String,
        accepted: Vec<String>,
    },

    #[error("Input is {size} bytes, the limit is {ceiling} bytes")]
    InputTooLarge { size: u64, ceiling: u64 },

    #[error("No valid input images were provided")]
    NoValidInput,

    #[error("Too many inputs: {count} provided, at most {max} allowed")]
    TooManyInputs { count: usize, max: usize },

    #[error("Transcoding failed: {0}")]
    Transcode(String),

    #[error("{tool} did not finish within {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("Output is still too large after optimization: {original} bytes, then {optimized} bytes (limit {ceiling})")]
    OutputTooLargeAfterOptimization {
        original: u64,
        optimized: u64,
        ceiling: u64,
    },

    #[error("A conversion is already running for this session")]
    SessionBusy,

    #[error("No operation has been selected for this session")]
    NoOperationSelected,

    #[error("There is no optimization offer waiting for a decision")]
    NoPendingDecision,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("The session was closed while the conversion was running")]
    Cancelled,

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Fetch error: {0}")]
    Fetch(String),
}

impl From<reqwest::Error> for ConvertError {
    fn from(err: reqwest::Error) -> Self {
        ConvertError::Fetch(err.to_string())
    }
}

pub type ConvertResult<T> = std::result::Result<T, ConvertError>;

/// Compact failure category handed to the platform adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FormatMismatch,
    InputTooLarge,
    NoValidInput,
    TooManyInputs,
    TranscodeError,
    OutputTooLargeAfterOptimization,
    SessionBusy,
    NoOperationSelected,
    NoPendingDecision,
    InvalidParameters,
    Cancelled,
    MissingDependency,
    FetchError,
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::FormatMismatch { .. } => ErrorKind::FormatMismatch,
            ConvertError::InputTooLarge { .. } => ErrorKind::InputTooLarge,
            ConvertError::NoValidInput => ErrorKind::NoValidInput,
            ConvertError::TooManyInputs { .. } => ErrorKind::TooManyInputs,
            ConvertError::Transcode(_)
            | ConvertError::Timeout { .. }
            | ConvertError::Io(_)
            | ConvertError::Image(_) => ErrorKind::TranscodeError,
            ConvertError::OutputTooLargeAfterOptimization { .. } => {
                ErrorKind::OutputTooLargeAfterOptimization
            }
            ConvertError::SessionBusy => ErrorKind::SessionBusy,
            ConvertError::NoOperationSelected => ErrorKind::NoOperationSelected,
            ConvertError::NoPendingDecision => ErrorKind::NoPendingDecision,
            ConvertError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            ConvertError::Cancelled => ErrorKind::Cancelled,
            ConvertError::MissingDependency(_) => ErrorKind::MissingDependency,
            ConvertError::Fetch(_) => ErrorKind::FetchError,
        }
    }

    /// Protocol misuse is rejected before any resource is allocated
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SessionBusy | ErrorKind::NoOperationSelected | ErrorKind::NoPendingDecision
        )
    }
}

/// Serializable failure as exposed to the platform adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&ConvertError> for ConversionFailure {
    fn from(err: &ConvertError) -> Self {
        Self {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}
