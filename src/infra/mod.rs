//! Infrastructure adapters: execution backends and the work archive.

pub mod archive;
pub mod backend;

pub use archive::WorkArchive;
pub use backend::{ChildProcessLauncher, ContainerLauncher, FixedContainerPool, InProcessLauncher};
