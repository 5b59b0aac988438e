//! Multicall builder: every package compiled into one `bb` binary.
//!
//! A dispatcher crate is generated under the temp directory with a path
//! dependency on each package. Each package must expose `pub fn main()`
//! from its library target, and its package name must match its
//! directory basename. The dispatcher selects the applet from argv[0],
//! so `bbin/<name>` entries are symlinks to `bb` (or shellbang stubs,
//! for kernels that won't follow the symlink before the interpreter).

use std::fmt::Write as _;
use std::fs;

use super::{check_packages, BuildError, BuildOpts, Builder};
use crate::cpio::Record;
use crate::process::Cmd;
use crate::tree::{FileTree, TreeError};

/// Builds all packages into a single `bbin/bb` dispatcher.
#[derive(Debug, Default)]
pub struct MulticallBuilder {
    /// Emit `#!` stub files instead of symlinks for the per-command
    /// entries.
    pub shellbang: bool,
}

impl Builder for MulticallBuilder {
    fn default_binary_dir(&self) -> &'static str {
        "bbin"
    }

    fn build(&self, tree: &mut FileTree, opts: &BuildOpts) -> Result<(), BuildError> {
        let env = opts.check()?.clone();
        let units = check_packages(&opts.packages)?;
        let bin_dir = opts.binary_dir(self);

        // Conflicts are cheaper to find before a long compile.
        let bb_path = format!("{bin_dir}/bb");
        if tree.contains(&bb_path) {
            return Err(TreeError::AlreadyExists { path: bb_path }.into());
        }
        for (name, _) in &units {
            let path = format!("{bin_dir}/{name}");
            if tree.contains(&path) {
                return Err(TreeError::AlreadyExists { path }.into());
            }
        }

        let crate_dir = opts.temp_dir.join(".build").join("bb");
        generate_dispatcher(&crate_dir, &units)
            .map_err(|e| BuildError::Multicall(format!("generating dispatcher crate: {e}")))?;

        let target_dir = crate_dir.join("target");
        let mut cmd = Cmd::new("cargo")
            .args(env.cargo_args(&target_dir).iter().map(String::as_str))
            .dir(&crate_dir)
            .error_msg("compiling multicall dispatcher");
        if let Some(flags) = env.rustflags() {
            cmd = cmd.env("RUSTFLAGS", flags);
        }
        cmd.run().map_err(|e| BuildError::Multicall(format!("{e:#}")))?;

        tree.add_file(&env.binary_path(&target_dir, "bb"), &bb_path)?;
        for (name, _) in &units {
            let path = format!("{bin_dir}/{name}");
            if self.shellbang {
                let stub = format!("#!/{bin_dir}/bb #!{name}\n");
                tree.add_record(Record::static_file(path, stub, 0o755))?;
            } else {
                tree.add_record(Record::symlink(path, "bb"))?;
            }
        }
        Ok(())
    }
}

/// Write the dispatcher crate sources.
fn generate_dispatcher(
    dir: &std::path::Path,
    units: &[(String, std::path::PathBuf)],
) -> std::io::Result<()> {
    fs::create_dir_all(dir.join("src"))?;

    let mut manifest = String::from(
        "[package]\n\
         name = \"bb\"\n\
         version = \"0.1.0\"\n\
         edition = \"2021\"\n\n\
         [workspace]\n\n\
         [profile.release]\n\
         strip = true\n\n\
         [dependencies]\n",
    );
    for (name, pkg) in units {
        let pkg = fs::canonicalize(pkg)?;
        let _ = writeln!(manifest, "{name} = {{ path = {:?} }}", pkg.display());
    }
    fs::write(dir.join("Cargo.toml"), manifest)?;

    let mut arms = String::new();
    for (name, _) in units {
        let ident = name.replace('-', "_");
        let _ = writeln!(arms, "        {name:?} => {ident}::main(),");
    }
    let main = format!(
        r##"fn main() {{
    let args: Vec<String> = std::env::args().collect();
    let base = args
        .first()
        .map(|a| std::path::Path::new(a))
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let applet = if base == "bb" {{
        match args.get(1).map(String::as_str) {{
            Some(a) if a.starts_with("#!") => a[2..].trim().to_string(),
            Some(a) => a.to_string(),
            None => {{
                eprintln!("bb: usage: bb <command> [args...]");
                std::process::exit(1);
            }}
        }}
    }} else {{
        base.to_string()
    }};
    match applet.as_str() {{
{arms}        other => {{
            eprintln!("bb: {{other}}: command not found");
            std::process::exit(1);
        }}
    }}
}}
"##
    );
    fs::write(dir.join("src").join("main.rs"), main)
}
