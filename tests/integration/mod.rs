//! Integration tests for the Docket job system

mod awaken;
mod dispatcher;
mod escalation;
mod scenario;
mod shell;
mod timeout;
pub mod test_utils;
