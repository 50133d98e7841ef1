//! Container image builder
//!
//! Turns a [`BuildContract`] into a Dockerfile and `.dockerignore`, and
//! checks that dependency lock files agree with their manifests before a
//! build is attempted.

pub mod contract;
pub mod lockfile;
pub mod render;

#[cfg(test)]
mod image_tests;

pub use contract::{
    BaseImage, BuildContract, CompileStage, Instruction, PackageManager, RuntimeIdentity, Stage,
};
pub use lockfile::{verify_cargo, verify_poetry, verify_requirements, verify_tree, LockStatus};
pub use render::{render_dockerfile, render_dockerignore, write_build_files};

use thiserror::Error;

/// Errors raised while validating or rendering an image build
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build contract violated: {}", .0.join("; "))]
    Contract(Vec<String>),

    #[error("Lock file does not match manifest: {}", .0.join("; "))]
    Lock(Vec<String>),

    #[error("Failed to parse {file}: {message}")]
    Parse { file: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub(crate) fn parse(file: &str, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            file: file.to_string(),
            message: message.to_string(),
        }
    }
}
