pub mod judge;
pub mod pricing;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use judge::{Claim, ClaudeJudge, Judge, Judgment, JudgmentRequest, UrlProposal};
pub use pricing::{cost_usd, price_for, ModelPrice};
