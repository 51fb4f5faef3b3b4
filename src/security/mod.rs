// Command gating: allow-list validation, human approval and shell execution
pub mod approval;
pub mod executor;
pub mod policy;

pub use approval::{Action, ExecutionGate, Prompter, RiskLevel};
pub use executor::{ExecutionResult, ShellExecutor, ShellRunner};
pub use policy::CommandValidator;
