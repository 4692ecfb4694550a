//! xt core: tag-based host discovery and multi-step ssh flows.
//!
//! A flow runs a list of shell commands over ssh. Structured steps parse
//! their JSON output into records, the operator picks one, and its fields
//! are substituted into the next step's command. Steps can also fan out to
//! every discovered host under a shared timeout.
//!
//! The CLI lives in `xt-cli`; this crate has no terminal dependency. Prompts
//! and progress output go through the [`flow::Chooser`] and
//! [`flow::FlowReporter`] traits.

pub mod config;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod remote;

pub use config::{Config, ResolvedProfile};
pub use error::FlowError;
