pub mod system;
pub mod types;

use std::path::PathBuf;

pub use system::SystemToolchain;
pub use types::{Invocation, RunError, Tool, ToolOutput};

/// The seam between the pipeline and the external TeX/image tools.
pub trait Toolchain {
    /// Existence check only; must not run the tool.
    fn locate(&self, tool: Tool) -> Option<PathBuf>;
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError>;
}

impl<T: Toolchain + ?Sized> Toolchain for &T {
    fn locate(&self, tool: Tool) -> Option<PathBuf> {
        (**self).locate(tool)
    }

    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError> {
        (**self).run(invocation)
    }
}

impl<T: Toolchain + ?Sized> Toolchain for std::sync::Arc<T> {
    fn locate(&self, tool: Tool) -> Option<PathBuf> {
        (**self).locate(tool)
    }

    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError> {
        (**self).run(invocation)
    }
}
