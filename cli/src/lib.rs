//! Question Bank command-line front end
//!
//! Record file loading and the stdio JSON server used by the
//! `question-bank` binary.

pub mod records;
pub mod transport;

pub use records::{load_records, parse_records};
pub use transport::{serve, JsonLineTransport, PredictRequest, PredictResponse};

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "question_bank=info,question_bank_cli=info";
