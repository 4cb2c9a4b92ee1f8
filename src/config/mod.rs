pub mod session;
pub mod workflow;

pub use workflow::WorkflowConfig;
