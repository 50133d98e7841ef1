//! `dockerfile` and `check-lock` commands

use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::image::{
    render_dockerfile, verify_tree, write_build_files, BuildContract, LockStatus, PackageManager,
};
use crate::utils::file_utils::ensure_dir_exists;

#[derive(Args, Debug, Clone)]
pub struct DockerfileArgs {
    /// Image variant
    #[arg(long, default_value = "rust", value_parser = ["rust", "pip", "poetry"])]
    pub variant: String,

    /// Include the compiler toolchain (Python variants)
    #[arg(long)]
    pub native: bool,

    /// Resolve dependencies at build time even when the source tree has a lock file
    #[arg(long)]
    pub no_lock: bool,

    /// Source tree the image is built from; its lock file decides locked installs
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub source: PathBuf,

    /// Write Dockerfile and .dockerignore into this directory instead of stdout
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckLockArgs {
    /// Source tree containing the manifest and lock file
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Package manager; detected from the manifest when omitted
    #[arg(long, value_parser = ["cargo", "pip", "poetry"])]
    pub manager: Option<String>,
}

/// Contract selected by the command line
pub fn contract_for(args: &DockerfileArgs) -> Result<BuildContract> {
    let mut contract = BuildContract::preset(&args.variant)
        .ok_or_else(|| anyhow!("Unknown image variant: {}", args.variant))?;
    if args.native {
        contract.needs_native_build = true;
    }
    if args.no_lock {
        return Ok(contract.without_lock());
    }

    let contract = contract.with_lock_from(&args.source);
    if !contract.has_lock_file {
        warn!(
            "No {} in {}; the image resolves dependencies fresh",
            contract.package_manager.lock_file(),
            args.source.display()
        );
    }
    Ok(contract)
}

pub fn handle_dockerfile(args: DockerfileArgs) -> Result<()> {
    let contract = contract_for(&args)?;

    match &args.out {
        Some(dir) => {
            ensure_dir_exists(dir)?;
            let written = write_build_files(&contract, dir)?;
            for path in written {
                println!("{}", path.display());
            }
        }
        None => print!("{}", render_dockerfile(&contract)?),
    }
    Ok(())
}

/// Package manager whose manifest is present in `dir`
pub fn detect_manager(dir: &Path) -> Option<PackageManager> {
    [
        PackageManager::Cargo,
        PackageManager::Poetry,
        PackageManager::Pip,
    ]
    .into_iter()
    .find(|m| dir.join(m.manifest_file()).is_file())
}

pub fn handle_check_lock(args: CheckLockArgs) -> Result<LockStatus> {
    let manager = match &args.manager {
        Some(name) => PackageManager::parse(name)
            .ok_or_else(|| anyhow!("Unknown package manager: {}", name))?,
        None => detect_manager(&args.dir)
            .ok_or_else(|| anyhow!("No dependency manifest found in {}", args.dir.display()))?,
    };

    let status = verify_tree(&args.dir, manager)
        .with_context(|| format!("Lock check failed for {}", args.dir.display()))?;

    match &status {
        LockStatus::Locked { checked } => {
            info!("{} is consistent ({} dependencies)", manager.lock_file(), checked);
            println!("ok: {} dependencies locked", checked);
        }
        LockStatus::Unlocked => {
            warn!("Build will resolve dependencies fresh; it is not reproducible");
            println!("unlocked: no {}", manager.lock_file());
        }
    }
    Ok(status)
}
