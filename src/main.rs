//! Rampack - bootable initramfs assembler.
//!
//! Compiles command packages, stages extra files and special entries
//! (init, uinit, default shell), merges an optional base archive, and
//! writes a reproducible cpio newc image (or a plain directory tree).

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use rampack::archive::Format;
use rampack::env::{self, BuildEnv};
use rampack::image::{self, BuilderKind, Modifier};
use rampack::stats::{self, BuildStats};
use rampack::template::Templates;

#[derive(Parser)]
#[command(name = "rampack")]
#[command(about = "Bootable initramfs assembler")]
#[command(
    after_help = "QUICK START:\n  rampack make cmds/core/*          Build an image from packages\n  rampack make -c plain             Build a named template config\n  rampack list-configs              Show template configs\n  rampack list-commands core        Show a template command list"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an initramfs image
    Make(MakeArgs),

    /// List the configs in a template file
    ListConfigs {
        /// Template file (default: templates.yaml)
        #[arg(short, long, default_value = "templates.yaml")]
        template: PathBuf,
    },

    /// Show a template's command lists, expanded
    ListCommands {
        /// Template file (default: templates.yaml)
        #[arg(short, long, default_value = "templates.yaml")]
        template: PathBuf,
        /// Lists to show (default: all)
        lists: Vec<String>,
    },
}

#[derive(clap::Args)]
struct MakeArgs {
    /// Command packages or glob patterns to build
    packages: Vec<String>,

    /// Builder for the packages given on the command line
    #[arg(long, default_value = "bb")]
    build: String,

    /// Output file (default: <tmp>/initramfs.<os>_<arch>.cpio)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "cpio")]
    format: Format,

    /// Base cpio archive to merge in at lowest precedence
    #[arg(long)]
    base: Option<PathBuf>,

    /// Keep the base archive's init; ours is renamed to inito
    #[arg(long)]
    use_existing_init: bool,

    /// Command (or archive path) init points at
    #[arg(long)]
    init: Option<String>,

    /// Uinit command line; arguments land in etc/uinit.flags
    #[arg(long)]
    uinit: Option<String>,

    /// Command bin/sh and bin/defaultsh point at
    #[arg(long)]
    shell: Option<String>,

    /// Extra host file to include, as 'src' or 'src:dst' (repeatable)
    #[arg(long = "files", value_name = "SPEC")]
    files: Vec<String>,

    /// Extra symlink, as 'dst:target' (repeatable)
    #[arg(long = "symlink", value_name = "DST:TARGET")]
    symlinks: Vec<String>,

    /// Template file with named configs and command lists
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Named config from the template file
    #[arg(short, long, requires = "template")]
    config: Option<String>,

    /// Build no command packages, even from a template
    #[arg(long)]
    no_commands: bool,

    /// Multicall entries as '#!' stubs instead of symlinks
    #[arg(long)]
    shellbang: bool,

    /// Don't pull in shared-library dependencies of extra files
    #[arg(long)]
    skip_ldd: bool,

    /// Target OS (default: host, or RAMPACK_OS)
    #[arg(long)]
    os: Option<String>,

    /// Target architecture (default: host, or RAMPACK_ARCH)
    #[arg(long)]
    arch: Option<String>,

    /// Build tags, comma- or space-separated (default: RAMPACK_TAGS)
    #[arg(long)]
    tags: Option<String>,

    /// Scratch directory for builds (implies keeping it)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Keep the scratch directory after the build
    #[arg(long)]
    keep_temp_dir: bool,

    /// JSON ledger to append build stats to
    #[arg(long)]
    stats_output_path: Option<PathBuf>,

    /// Label for the stats entry (default: <os>_<arch>[ tags])
    #[arg(long)]
    stats_label: Option<String>,
}

fn main() -> Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Make(args) => cmd_make(args),
        Commands::ListConfigs { template } => cmd_list_configs(&template),
        Commands::ListCommands { template, lists } => cmd_list_commands(&template, &lists),
    }
}

fn cmd_make(args: MakeArgs) -> Result<()> {
    let base_env = BuildEnv::from_env();
    let mods = modifiers_for(&args)?;
    let mut opts = image::opts_for(base_env, mods)?;
    let env = opts.env.clone();

    let output = match args.output {
        Some(path) => path,
        None => std::env::temp_dir().join(format!(
            "initramfs.{}_{}.cpio",
            env.target_os, env.target_arch
        )),
    };
    opts.output = Some(image::Output::Path {
        format: args.format,
        path: output.clone(),
    });

    // The scratch directory survives on request, and on multicall
    // failures so the generated dispatcher can be inspected.
    let mut keep = args.keep_temp_dir;
    let scratch = match args.temp_dir {
        Some(path) => {
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create temp dir {}", path.display()))?;
            keep = true;
            Scratch::Kept(path)
        }
        None => Scratch::Ephemeral(
            tempfile::Builder::new()
                .prefix("rampack-")
                .tempdir()
                .context("Failed to create temp dir")?,
        ),
    };
    opts.temp_dir = scratch.path().to_path_buf();

    println!("Building {} image for {env}...", args.format);
    let started = Instant::now();
    let result = image::create_image(opts);
    let elapsed = started.elapsed();

    if let Err(e) = &result {
        if e.is_multicall() {
            keep = true;
        }
    }
    if keep {
        println!("Keeping temp dir {}", scratch.path().display());
    }
    scratch.finish(keep);
    result?;

    println!(
        "Successfully built {:?} (size {}) in {:.1}s.",
        output.display(),
        std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0),
        elapsed.as_secs_f64()
    );

    if let Some(stats_path) = args.stats_output_path {
        let label = args.stats_label.unwrap_or_else(|| default_label(&env));
        stats::append(&stats_path, BuildStats::measure(&label, elapsed, &output)?)?;
    }
    Ok(())
}

/// The final target, tags included, identifies a stats entry.
fn default_label(env: &BuildEnv) -> String {
    let mut label = format!("{}_{}", env.target_os, env.target_arch);
    if !env.build_tags.is_empty() {
        label.push(' ');
        label.push_str(&env.build_tags.join(","));
    }
    label
}

/// Template modifiers first, command-line flags second, so flags win.
fn modifiers_for(args: &MakeArgs) -> Result<Vec<Modifier>> {
    let mut mods: Vec<Modifier> = Vec::new();

    if let Some(config) = &args.config {
        let template = args.template.as_deref().expect("clap enforces --template");
        let templates = Templates::from_file(template)
            .with_context(|| format!("Failed to load template {}", template.display()))?;
        mods.extend(templates.modifiers(config)?);
    }

    mods.push(image::with_target(
        args.os.clone(),
        args.arch.clone(),
        args.tags.as_deref().map(env::split_tags).unwrap_or_default(),
    ));
    if !args.files.is_empty() {
        mods.push(image::with_files(args.files.clone()));
    }
    for spec in &args.symlinks {
        let Some((dest, target)) = spec.split_once(':') else {
            bail!("Invalid symlink spec {spec:?}: expected 'dst:target'");
        };
        mods.push(image::with_symlink(dest, target));
    }
    if let Some(init) = &args.init {
        mods.push(image::with_init(init.clone()));
    }
    if let Some(uinit) = &args.uinit {
        mods.push(image::with_uinit(uinit.clone()));
    }
    if let Some(shell) = &args.shell {
        mods.push(image::with_shell(shell.clone()));
    }
    if !args.packages.is_empty() {
        let kind: BuilderKind = args.build.parse()?;
        mods.push(image::with_commands(kind, args.packages.clone()));
    }
    if args.no_commands {
        mods.push(image::with_no_commands());
    }
    if args.shellbang {
        mods.push(image::with_shellbang(true));
    }
    if args.skip_ldd {
        mods.push(image::with_skip_ldd());
    }
    if args.use_existing_init {
        mods.push(image::with_existing_init(true));
    }
    if let Some(base) = &args.base {
        mods.push(image::with_base_archive(base.clone()));
    }
    Ok(mods)
}

fn cmd_list_configs(template: &Path) -> Result<()> {
    let templates = Templates::from_file(template)
        .with_context(|| format!("Failed to load template {}", template.display()))?;
    for name in templates.config_names() {
        println!("{name}");
    }
    Ok(())
}

fn cmd_list_commands(template: &Path, lists: &[String]) -> Result<()> {
    let templates = Templates::from_file(template)
        .with_context(|| format!("Failed to load template {}", template.display()))?;

    let names: Vec<&str> = if lists.is_empty() {
        templates.commands.keys().map(String::as_str).collect()
    } else {
        lists.iter().map(String::as_str).collect()
    };
    for name in names {
        if !templates.commands.contains_key(name) {
            bail!("No command list {name:?} in {}", template.display());
        }
        println!("{name}:");
        for cmd in templates.commands_for([name]) {
            println!("  {cmd}");
        }
    }
    Ok(())
}

/// A build scratch directory, ephemeral unless asked to stay.
enum Scratch {
    Ephemeral(tempfile::TempDir),
    Kept(PathBuf),
}

impl Scratch {
    fn path(&self) -> &Path {
        match self {
            Scratch::Ephemeral(d) => d.path(),
            Scratch::Kept(p) => p,
        }
    }

    fn finish(self, keep: bool) {
        if let Scratch::Ephemeral(d) = self {
            if keep {
                let _ = d.keep();
            }
            // Dropping removes the directory otherwise.
        }
    }
}
