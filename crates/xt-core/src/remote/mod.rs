//! Remote command execution and file copies over ssh.

pub mod executer;
pub mod fanout;

pub use executer::{Direction, ExecOutput, RemoteExecuter, ScpExecuter, SshExecuter, Transfer};
pub use fanout::{ExecutionResult, FanoutReport, FanoutReporter, FanoutRunner, TracingReporter};
