//! Standalone binary builder: one release binary per package.
//!
//! Packages compile concurrently, each with its own cargo target
//! directory so cargo's own locking never serializes them. Every
//! compile runs to completion before the first error is reported, so
//! one broken package doesn't hide failures in the others.

use std::fs;
use std::io;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::task::JoinSet;

use super::{check_packages, BuildError, BuildOpts, Builder};
use crate::env::BuildEnv;
use crate::tree::FileTree;

/// Builds each package as its own binary under `bin/`.
pub struct BinaryBuilder;

impl Builder for BinaryBuilder {
    fn default_binary_dir(&self) -> &'static str {
        "bin"
    }

    fn build(&self, tree: &mut FileTree, opts: &BuildOpts) -> Result<(), BuildError> {
        let env = opts.check()?.clone();
        let units = check_packages(&opts.packages)?;

        let bin_dir = opts.binary_dir(self);
        let stage = opts.temp_dir.join(bin_dir);
        fs::create_dir_all(&stage)?;
        let build_root = opts.temp_dir.join(".build");
        fs::create_dir_all(&build_root)?;

        let env = Arc::new(env);
        let rt = Runtime::new()?;
        rt.block_on(async {
            let mut set = JoinSet::new();
            for (name, pkg) in units {
                let env = Arc::clone(&env);
                let target_dir = build_root.join(&name);
                let staged = stage.join(&name);
                set.spawn(async move { compile(&env, &name, &pkg, &target_dir, &staged).await });
            }

            let mut first_err = None;
            while let Some(joined) = set.join_next().await {
                let result = joined
                    .map_err(|e| BuildError::Io(io::Error::new(io::ErrorKind::Other, e)))
                    .and_then(|r| r);
                if let Err(e) = result {
                    first_err.get_or_insert(e);
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })?;

        tree.add_file(&stage, bin_dir)?;
        Ok(())
    }
}

async fn compile(
    env: &BuildEnv,
    name: &str,
    pkg: &std::path::Path,
    target_dir: &std::path::Path,
    staged: &std::path::Path,
) -> Result<(), BuildError> {
    let mut cmd = tokio::process::Command::new("cargo");
    cmd.args(env.cargo_args(target_dir)).current_dir(pkg);
    if let Some(flags) = env.rustflags() {
        cmd.env("RUSTFLAGS", flags);
    }

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(BuildError::BinaryFailed {
            package: name.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    // fs::copy carries the mode bits over, so the staged binary stays
    // executable.
    tokio::fs::copy(env.binary_path(target_dir, name), staged).await?;
    Ok(())
}
