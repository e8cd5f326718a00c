pub mod backup;
pub mod deployment;
pub mod encoding;
pub mod error;
pub mod fs_ops;
pub mod log_verifier;
pub mod offsite;
pub mod orchestrator;
pub mod repository;
pub mod service_wait;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod tests;
