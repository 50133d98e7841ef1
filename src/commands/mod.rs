//! CLI command handlers
//!
//! Each subcommand of the `media-fetch-api` binary has its arguments and its
//! handler here, so the binary itself only parses and dispatches.

pub mod image;
pub mod serve;

pub use image::{CheckLockArgs, DockerfileArgs};
pub use serve::ServeArgs;
