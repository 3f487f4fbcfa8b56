//! # JSON Output Module
//!
//! Output strutturato in JSON, una riga per evento, per l'integrazione con un
//! processo esterno (bot o interfaccia grafica) che pilota la CLI.
//!
//! ## Tipi di messaggi:
//! - `session_selected`: operazione selezionata
//! - `optimization_offered`: primo output oltre il limite, retry disponibile
//! - `delivered`: risultato consegnato
//! - `failed`: errore tipizzato (`kind` + `detail`)
//! - `idle_warning` / `session_expired`: eventi dell'Idle Supervisor

use crate::engine::{ConversionResult, OptimizationOffer, SessionEvent};
use crate::error::{ConversionFailure, ConvertError, ErrorKind};
use crate::operation::OperationParams;
use serde::Serialize;
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    #[serde(rename = "session_selected")]
    SessionSelected {
        session: String,
        params: OperationParams,
    },

    #[serde(rename = "optimization_offered")]
    OptimizationOffered {
        session: String,
        original_size: u64,
        ceiling: u64,
    },

    #[serde(rename = "delivered")]
    Delivered {
        session: String,
        filename: String,
        size: u64,
        output_path: Option<PathBuf>,
        side_text: Option<String>,
        cleaned_paths: usize,
    },

    #[serde(rename = "failed")]
    Failed {
        session: String,
        kind: ErrorKind,
        detail: String,
    },

    #[serde(rename = "idle_warning")]
    IdleWarning { session: String },

    #[serde(rename = "session_expired")]
    SessionExpired { session: String, cleaned_paths: usize },
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn selected(session: &str, params: &OperationParams) -> Self {
        Self::SessionSelected {
            session: session.to_string(),
            params: params.clone(),
        }
    }

    pub fn offered(session: &str, offer: &OptimizationOffer) -> Self {
        Self::OptimizationOffered {
            session: session.to_string(),
            original_size: offer.original_size,
            ceiling: offer.ceiling,
        }
    }

    pub fn delivered(session: &str, result: &ConversionResult, output_path: Option<PathBuf>) -> Self {
        Self::Delivered {
            session: session.to_string(),
            filename: result.filename.clone(),
            size: result.bytes.len() as u64,
            output_path,
            side_text: result.side_text.clone(),
            cleaned_paths: result.cleaned_paths.len(),
        }
    }

    pub fn failed(session: &str, error: &ConvertError) -> Self {
        let failure = ConversionFailure::from(error);
        Self::Failed {
            session: session.to_string(),
            kind: failure.kind,
            detail: failure.detail,
        }
    }
}

impl From<&SessionEvent> for JsonMessage {
    fn from(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::IdleWarning(session) => Self::IdleWarning {
                session: session.clone(),
            },
            SessionEvent::Expired {
                session,
                cleaned_paths,
            } => Self::SessionExpired {
                session: session.clone(),
                cleaned_paths: cleaned_paths.len(),
            },
        }
    }
}
