//! Multi-step flows.
//!
//! ```text
//! config.yaml ──► Flow (schema) ──► FlowEngine
//!                                     │
//!                  render (binder) ◄──┤
//!                                     ├──► RemoteExecuter / FanoutRunner
//!                  parse (parser)  ◄──┤
//!                                     └──► select (selector) ──► Binding
//! ```

pub mod binder;
pub mod engine;
pub mod parser;
pub mod schema;
pub mod selector;

pub use engine::{FlowEngine, FlowReport, FlowReporter, FlowState, StepOutcome, StepReport};
pub use parser::{Binding, Record};
pub use schema::{FieldSpec, Flow, OutputFormat, Step};
pub use selector::Chooser;
