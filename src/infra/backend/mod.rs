//! Backend launchers: in-process handlers, child processes, and pre-provisioned containers.

pub mod child_process;
pub mod container;
pub mod in_process;

pub use child_process::ChildProcessLauncher;
pub use container::{ContainerLauncher, FixedContainerPool};
pub use in_process::InProcessLauncher;
