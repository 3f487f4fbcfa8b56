//! # Media Converter Library
//!
//! Motore di conversione media per canale: un'operazione selezionata per sessione,
//! un Job alla volta, limiti di dimensione con un unico retry ottimizzato.
//!
//! ## Architettura dei moduli:
//! - `config`: Configurazione (limiti, timer, directory temporanea) e validazione
//! - `error`: Tassonomia degli errori e forma esposta all'adapter
//! - `operation`: Operazioni, parametri tipizzati, profili di qualità
//! - `format_gate`: Estensioni accettate per operazione
//! - `temp`: Tracciamento e rilascio dei file intermedi per Job
//! - `command`, `platform`, `tool_resolver`: Invocazione e risoluzione dei tool esterni
//! - `probe`: Proprietà di base dei sorgenti
//! - `strategies`: Una strategia di trascodifica per operazione
//! - `negotiator`: Limiti di input/output e offerta di retry
//! - `session`: Sessioni per canale e stato dei Job
//! - `idle`: Timer di inattività a due stadi
//! - `fetch`: Download degli allegati
//! - `engine`: Orchestrazione dell'intero flusso
//! - `json_output`, `progress`: Output della CLI
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use media_converter::{Config, ConversionEngine, FileRef, OperationParams, SubmitOutcome};
//! use std::path::Path;
//!
//! # async fn convert(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
//! let (engine, _events) = ConversionEngine::with_strategies(Config::default());
//! engine.select("channel-1", OperationParams::Crop).await?;
//! match engine.submit_file("channel-1", vec![FileRef::local(path)?]).await? {
//!     SubmitOutcome::Delivered(result) => std::fs::write(&result.filename, &result.bytes)?,
//!     other => println!("{:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod format_gate;
pub mod idle;
pub mod json_output;
pub mod negotiator;
pub mod operation;
pub mod platform;
pub mod probe;
pub mod progress;
pub mod session;
pub mod strategies;
pub mod temp;
pub mod tool_resolver;

pub use config::Config;
pub use engine::{ConversionEngine, ConversionResult, Decision, OptimizationOffer, SessionEvent, SubmitOutcome};
pub use error::{ConversionFailure, ConvertError, ConvertResult, ErrorKind};
pub use fetch::FileRef;
pub use operation::{Operation, OperationParams, QualityProfile, StretchMode, TargetFormat};
pub use strategies::{StrategyTranscoder, Transcoder};
