pub mod assemble;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logparse;
pub mod pipeline;
pub mod plan;
pub mod probe;
pub mod report;
pub mod request;
pub mod server;
pub mod util;
pub mod workspace;

pub use engine::{SystemToolchain, Toolchain};
pub use error::RenderError;
pub use pipeline::Pipeline;
pub use probe::ToolAvailability;
pub use request::{CompileRequest, CompileResponse, CompileResult, FailureKind};
