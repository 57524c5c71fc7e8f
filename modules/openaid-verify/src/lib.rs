pub mod agent;
pub mod conflict;
pub mod crossref;
pub mod flush;
pub mod geocode;
pub mod log;
pub mod probe;
pub mod score;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use agent::VerificationAgent;
pub use types::{
    CheckResult, Decision, FieldConflict, VerificationResult, VerificationType,
};
