//! # Size Negotiator
//!
//! Confronta le dimensioni di input e output con i limiti configurati.
//!
//! ## Responsabilità:
//! - Rifiuto degli input oltre il limite prima della trascodifica
//! - Verdetto sull'output: consegna, offerta di un unico retry ottimizzato, rifiuto
//! - Formattazione delle dimensioni per i messaggi utente

use crate::error::ConvertError;
use crate::operation::QualityProfile;
use serde::Serialize;

/// The single reduced-quality attempt offered after an overflow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationAttempt {
    /// Size of the first-pass output
    pub original_size: u64,
    pub ceiling: u64,
    pub profile: QualityProfile,
}

/// Outcome of checking one output against the ceiling
#[derive(Debug)]
pub enum Verdict {
    Accept,
    OfferRetry(OptimizationAttempt),
    Reject(ConvertError),
}

#[derive(Debug, Clone, Copy)]
pub struct SizeNegotiator {
    input_ceiling: u64,
    output_ceiling: u64,
}

impl SizeNegotiator {
    pub fn new(input_ceiling: u64, output_ceiling: u64) -> Self {
        Self {
            input_ceiling,
            output_ceiling,
        }
    }

    pub fn input_ceiling(&self) -> u64 {
        self.input_ceiling
    }

    pub fn output_ceiling(&self) -> u64 {
        self.output_ceiling
    }

    /// Reject a source above the input ceiling
    pub fn check_input(&self, size: u64) -> Result<(), ConvertError> {
        if size > self.input_ceiling {
            return Err(ConvertError::InputTooLarge {
                size,
                ceiling: self.input_ceiling,
            });
        }
        Ok(())
    }

    /// Judge an output.
    ///
    /// `first_pass_size` is the size that triggered the retry; it is only
    /// meaningful once `retry_attempted` is set.
    pub fn assess(&self, output_len: u64, retry_attempted: bool, first_pass_size: u64) -> Verdict {
        if output_len <= self.output_ceiling {
            return Verdict::Accept;
        }
        if retry_attempted {
            return Verdict::Reject(ConvertError::OutputTooLargeAfterOptimization {
                original: first_pass_size,
                optimized: output_len,
                ceiling: self.output_ceiling,
            });
        }
        Verdict::OfferRetry(OptimizationAttempt {
            original_size: output_len,
            ceiling: self.output_ceiling,
            profile: Self::optimized_profile(),
        })
    }

    pub fn optimized_profile() -> QualityProfile {
        QualityProfile::optimized()
    }
}

/// Human readable byte size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Percentage saved going from `original` to `new`
pub fn reduction_percent(original: u64, new: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        (1.0 - new as f64 / original as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1_000_000;

    fn negotiator() -> SizeNegotiator {
        SizeNegotiator::new(100 * MB, 25 * MB)
    }

    #[test]
    fn test_input_ceiling() {
        assert!(negotiator().check_input(100 * MB).is_ok());
        assert!(matches!(
            negotiator().check_input(100 * MB + 1),
            Err(ConvertError::InputTooLarge { size, ceiling }) if size == 100 * MB + 1 && ceiling == 100 * MB
        ));
    }

    #[test]
    fn test_output_within_ceiling_accepted() {
        assert!(matches!(negotiator().assess(25 * MB, false, 0), Verdict::Accept));
        assert!(matches!(negotiator().assess(22 * MB, true, 30 * MB), Verdict::Accept));
    }

    #[test]
    fn test_first_overflow_offers_optimized_retry() {
        match negotiator().assess(30 * MB, false, 0) {
            Verdict::OfferRetry(attempt) => {
                assert_eq!(attempt.original_size, 30 * MB);
                assert_eq!(attempt.ceiling, 25 * MB);
                assert!(attempt.profile.optimized);
            }
            other => panic!("expected a retry offer, got {:?}", other),
        }
    }

    #[test]
    fn test_second_overflow_is_terminal() {
        match negotiator().assess(28 * MB, true, 30 * MB) {
            Verdict::Reject(ConvertError::OutputTooLargeAfterOptimization { original, optimized, ceiling }) => {
                assert_eq!((original, optimized, ceiling), (30 * MB, 28 * MB, 25 * MB));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(25 * 1024 * 1024), "25.00 MB");
    }

    #[test]
    fn test_reduction_percent() {
        assert_eq!(reduction_percent(0, 10), 0.0);
        assert!((reduction_percent(200, 50) - 75.0).abs() < 1e-9);
    }
}
