//! Transaction submission with durable history and run-wide gas pricing

mod gas;
pub mod request;
mod submitter;

pub use gas::GasEstimator;
pub use request::{CallRequest, DeployRequest, SubmissionRequest};
pub use submitter::TransactionSubmitter;
