pub(crate) mod cli;
pub(crate) mod config;
pub(crate) mod service;
pub(crate) mod source;
