pub mod branches;
pub mod config;
pub mod error;
pub mod flow;
pub mod git;
pub mod snapshot;
pub mod ui;

pub use branches::{BranchManager, BranchTypeDescriptor, FinishOptions};
pub use error::{GitFlowError, Result};
pub use flow::{GitFlow, InitOptions};
pub use git::{Git2Backend, RepositoryBackend, TagInfo};
