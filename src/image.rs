//! Image assembly: build commands, stage files, write the archive.
//!
//! [`Opts`] is the full description of one image. Callers rarely fill
//! it in by hand; they stack [`Modifier`]s (template first, command
//! line second, so flags override template values) and let
//! [`opts_for`] fold them into the final description, then call
//! [`create_image`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::archive::{
    open_reader, open_writer, write_archive, ArchiveError, ArchiveWriter, Format, WriteOpts,
};
use crate::builder::{BinaryBuilder, BuildError, BuildOpts, Builder, MulticallBuilder};
use crate::cpio::{Record, RecordReader};
use crate::env::BuildEnv;
use crate::process;
use crate::resolve::{self, ResolveError};
use crate::tree::{FileTree, TreeError};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("no output archive specified")]
    NoOutput,

    #[error("no temporary directory specified")]
    TempDirMissing,

    #[error("invalid file spec {spec:?}: expected 'src' or 'src:dst'")]
    InvalidFileSpec { spec: String },

    #[error("{cmd:?} is neither a built command nor an archive path")]
    NotResolvable { cmd: String },

    #[error("unknown builder {name:?}: expected 'binary' or 'bb'")]
    UnknownBuilder { name: String },

    #[error("could not create init entry: {0}")]
    Init(#[source] TreeError),

    #[error("could not create uinit entry: {0}")]
    Uinit(#[source] TreeError),

    #[error("could not write uinit flags: {0}")]
    UinitFlags(#[source] TreeError),

    #[error("could not create default shell entry: {0}")]
    Shell(#[source] TreeError),

    #[error("could not create symlink {dest:?}: {source}")]
    Symlink {
        dest: String,
        #[source]
        source: TreeError,
    },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ImageError {
    /// True for multicall dispatcher failures; the CLI keeps the temp
    /// directory on these.
    pub fn is_multicall(&self) -> bool {
        matches!(self, ImageError::Build(e) if e.is_multicall())
    }
}

/// Which builder compiles a command group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderKind {
    Binary,
    Multicall,
}

impl FromStr for BuilderKind {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<BuilderKind, ImageError> {
        match s {
            "binary" | "bin" => Ok(BuilderKind::Binary),
            "bb" | "multicall" => Ok(BuilderKind::Multicall),
            other => Err(ImageError::UnknownBuilder {
                name: other.to_string(),
            }),
        }
    }
}

/// One group of command packages sharing a builder.
#[derive(Debug, Clone)]
pub struct Commands {
    pub builder: BuilderKind,
    /// Package directories or glob patterns.
    pub packages: Vec<String>,
    /// Archive directory for the group's binaries; empty for the
    /// builder's default.
    pub binary_dir: String,
}

impl Commands {
    pub fn new(builder: BuilderKind, packages: Vec<String>) -> Commands {
        Commands {
            builder,
            packages,
            binary_dir: String::new(),
        }
    }

    /// Where this group's binaries appear in the archive.
    pub fn target_dir(&self) -> &str {
        if !self.binary_dir.is_empty() {
            return &self.binary_dir;
        }
        match self.builder {
            BuilderKind::Binary => "bin",
            BuilderKind::Multicall => "bbin",
        }
    }
}

/// Where the finished archive goes.
pub enum Output {
    Path { format: Format, path: PathBuf },
    Writer(Box<dyn ArchiveWriter>),
}

/// Where the base archive comes from.
pub enum Base {
    Path { format: Format, path: PathBuf },
    Reader(Box<dyn RecordReader>),
}

/// Everything that defines one image.
pub struct Opts {
    pub env: BuildEnv,
    pub commands: Vec<Commands>,
    /// `src` or `src:dst` host files to copy in.
    pub extra_files: Vec<String>,
    /// Extra symlinks, archive dest to command-or-path target.
    pub symlinks: BTreeMap<String, String>,
    pub init: Option<String>,
    pub uinit: Option<String>,
    pub uinit_args: Vec<String>,
    pub default_shell: Option<String>,
    pub use_existing_init: bool,
    pub output: Option<Output>,
    pub base: Option<Base>,
    pub temp_dir: PathBuf,
    /// Don't pull in shared-library dependencies of extra files.
    pub skip_ldd: bool,
    /// Multicall entries as `#!` stubs instead of symlinks.
    pub shellbang: bool,
    /// Drop all command groups; archive only files and records.
    pub no_commands: bool,
}

impl Opts {
    pub fn new(env: BuildEnv) -> Opts {
        Opts {
            env,
            commands: Vec::new(),
            extra_files: Vec::new(),
            symlinks: BTreeMap::new(),
            init: None,
            uinit: None,
            uinit_args: Vec::new(),
            default_shell: None,
            use_existing_init: false,
            output: None,
            base: None,
            temp_dir: PathBuf::new(),
            skip_ldd: false,
            shellbang: false,
            no_commands: false,
        }
    }
}

/// A deferred edit to [`Opts`], applied in order by [`opts_for`].
pub type Modifier = Box<dyn FnOnce(&mut Opts) -> Result<(), ImageError>>;

/// Fold modifiers over a fresh [`Opts`] for `env`.
pub fn opts_for(env: BuildEnv, mods: Vec<Modifier>) -> Result<Opts, ImageError> {
    let mut opts = Opts::new(env);
    for m in mods {
        m(&mut opts)?;
    }
    Ok(opts)
}

pub fn with_target(
    os: Option<String>,
    arch: Option<String>,
    tags: Vec<String>,
) -> Modifier {
    Box::new(move |o| {
        if let Some(os) = os {
            o.env.target_os = os;
        }
        if let Some(arch) = arch {
            o.env.target_arch = arch;
        }
        if !tags.is_empty() {
            o.env.build_tags = tags;
        }
        Ok(())
    })
}

pub fn with_temp_dir(path: impl Into<PathBuf>) -> Modifier {
    let path = path.into();
    Box::new(move |o| {
        o.temp_dir = path;
        Ok(())
    })
}

/// Set the command `init` points at. Empty unsets it, letting a
/// template's choice be overridden away.
pub fn with_init(cmd: impl Into<String>) -> Modifier {
    let cmd = cmd.into();
    Box::new(move |o| {
        o.init = if cmd.is_empty() { None } else { Some(cmd) };
        Ok(())
    })
}

/// Set the uinit command; everything after the first word becomes
/// `etc/uinit.flags`.
pub fn with_uinit(cmdline: impl Into<String>) -> Modifier {
    let cmdline = cmdline.into();
    Box::new(move |o| {
        let mut words = cmdline.split_whitespace();
        match words.next() {
            Some(cmd) => {
                o.uinit = Some(cmd.to_string());
                o.uinit_args = words.map(str::to_string).collect();
            }
            None => {
                o.uinit = None;
                o.uinit_args.clear();
            }
        }
        Ok(())
    })
}

pub fn with_shell(cmd: impl Into<String>) -> Modifier {
    let cmd = cmd.into();
    Box::new(move |o| {
        o.default_shell = if cmd.is_empty() { None } else { Some(cmd) };
        Ok(())
    })
}

pub fn with_files<I, S>(specs: I) -> Modifier
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let specs: Vec<String> = specs.into_iter().map(Into::into).collect();
    Box::new(move |o| {
        o.extra_files.extend(specs);
        Ok(())
    })
}

pub fn with_symlink(dest: impl Into<String>, target: impl Into<String>) -> Modifier {
    let dest = dest.into();
    let target = target.into();
    Box::new(move |o| {
        o.symlinks.insert(dest, target);
        Ok(())
    })
}

pub fn with_commands(builder: BuilderKind, packages: Vec<String>) -> Modifier {
    Box::new(move |o| {
        if packages.is_empty() {
            return Ok(());
        }
        // Same-builder groups with the default directory share one
        // compile.
        if let Some(group) = o
            .commands
            .iter_mut()
            .find(|c| c.builder == builder && c.binary_dir.is_empty())
        {
            group.packages.extend(packages);
        } else {
            o.commands.push(Commands::new(builder, packages));
        }
        Ok(())
    })
}

pub fn with_binary_commands(packages: Vec<String>) -> Modifier {
    with_commands(BuilderKind::Binary, packages)
}

pub fn with_multicall_commands(packages: Vec<String>) -> Modifier {
    with_commands(BuilderKind::Multicall, packages)
}

pub fn with_no_commands() -> Modifier {
    Box::new(|o| {
        o.no_commands = true;
        Ok(())
    })
}

pub fn with_shellbang(on: bool) -> Modifier {
    Box::new(move |o| {
        o.shellbang = on;
        Ok(())
    })
}

pub fn with_skip_ldd() -> Modifier {
    Box::new(|o| {
        o.skip_ldd = true;
        Ok(())
    })
}

pub fn with_existing_init(on: bool) -> Modifier {
    Box::new(move |o| {
        o.use_existing_init = on;
        Ok(())
    })
}

pub fn with_output(format: Format, path: impl Into<PathBuf>) -> Modifier {
    let path = path.into();
    Box::new(move |o| {
        o.output = Some(Output::Path { format, path });
        Ok(())
    })
}

pub fn with_base_archive(path: impl Into<PathBuf>) -> Modifier {
    let path = path.into();
    Box::new(move |o| {
        o.base = Some(Base::Path {
            format: Format::Cpio,
            path,
        });
        Ok(())
    })
}

/// Assemble the image described by `opts` and write it out.
pub fn create_image(opts: Opts) -> Result<(), ImageError> {
    let mut opts = opts;
    if opts.no_commands {
        opts.commands.clear();
    }
    if !opts.commands.is_empty() && opts.temp_dir.as_os_str().is_empty() {
        return Err(ImageError::TempDirMissing);
    }

    // Expand patterns up front so command name resolution below sees
    // concrete package directories.
    for group in &mut opts.commands {
        let resolved = resolve::resolve_packages(&group.packages)?;
        group.packages = resolved
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
    }

    let mut tree = FileTree::new();

    for (i, group) in opts.commands.iter().enumerate() {
        let group_tmp = opts.temp_dir.join(format!("group{i}"));
        fs::create_dir_all(&group_tmp)?;
        let build_opts = BuildOpts {
            env: Some(opts.env.clone()),
            packages: group.packages.iter().map(PathBuf::from).collect(),
            temp_dir: group_tmp,
            binary_dir: group.binary_dir.clone(),
        };
        match group.builder {
            BuilderKind::Binary => BinaryBuilder.build(&mut tree, &build_opts)?,
            BuilderKind::Multicall => MulticallBuilder {
                shellbang: opts.shellbang,
            }
            .build(&mut tree, &build_opts)?,
        }
    }

    for spec in &opts.extra_files {
        if spec.is_empty() {
            continue;
        }
        let (src, dest) = parse_file_spec(spec)?;
        tree.add_file(&src, &dest)?;
        if !opts.skip_ldd {
            add_ldd_deps(&mut tree, &src)?;
        }
    }

    for (dest, target) in &opts.symlinks {
        let resolved = resolve_command_or_path(target, &opts.commands)?;
        tree.add_record(Record::symlink(
            dest.clone(),
            relative_target(dest, &resolved),
        ))
        .map_err(|source| ImageError::Symlink {
            dest: dest.clone(),
            source,
        })?;
    }

    if let Some(init) = &opts.init {
        let resolved = resolve_command_or_path(init, &opts.commands)?;
        tree.add_record(Record::symlink("init", relative_target("init", &resolved)))
            .map_err(ImageError::Init)?;
    }

    if let Some(uinit) = &opts.uinit {
        let resolved = resolve_command_or_path(uinit, &opts.commands)?;
        tree.add_record(Record::symlink(
            "bin/uinit",
            relative_target("bin/uinit", &resolved),
        ))
        .map_err(ImageError::Uinit)?;
    }

    // Flags stand on their own: a base archive may already carry the
    // uinit binary while the caller only supplies its arguments.
    if !opts.uinit_args.is_empty() {
        tree.add_record(Record::static_file(
            "etc/uinit.flags",
            opts.uinit_args.join("\n"),
            0o444,
        ))
        .map_err(ImageError::UinitFlags)?;
    }

    if let Some(shell) = &opts.default_shell {
        let resolved = resolve_command_or_path(shell, &opts.commands)?;
        for link in ["bin/defaultsh", "bin/sh"] {
            tree.add_record(Record::symlink(link, relative_target(link, &resolved)))
                .map_err(ImageError::Shell)?;
        }
    }

    let output: Box<dyn ArchiveWriter> = match opts.output {
        Some(Output::Writer(w)) => w,
        Some(Output::Path { format, path }) => open_writer(format, &path)?,
        None => return Err(ImageError::NoOutput),
    };
    let base: Option<Box<dyn RecordReader>> = match opts.base {
        Some(Base::Reader(r)) => Some(r),
        Some(Base::Path { format, path }) => Some(open_reader(format, &path)?),
        None => None,
    };

    write_archive(WriteOpts {
        tree,
        output,
        base,
        use_existing_init: opts.use_existing_init,
    })?;
    Ok(())
}

/// Split `src:dst`; a bare `src` lands at its own path minus the
/// leading slash.
fn parse_file_spec(spec: &str) -> Result<(PathBuf, String), ImageError> {
    let invalid = || ImageError::InvalidFileSpec {
        spec: spec.to_string(),
    };
    match spec.split_once(':') {
        Some((src, dst)) if !src.is_empty() && !dst.is_empty() => {
            Ok((PathBuf::from(src), dst.to_string()))
        }
        Some(_) => Err(invalid()),
        None if spec.is_empty() => Err(invalid()),
        None => Ok((
            PathBuf::from(spec),
            spec.trim_start_matches('/').to_string(),
        )),
    }
}

/// Map a special-entry value to an archive path: the name of a built
/// command, or (with a `/`) a path inside the archive.
fn resolve_command_or_path(cmd: &str, commands: &[Commands]) -> Result<String, ImageError> {
    for group in commands {
        for pkg in &group.packages {
            if let Ok(name) = resolve::command_name(Path::new(pkg)) {
                if name == cmd {
                    return Ok(format!("{}/{}", group.target_dir(), name));
                }
            }
        }
    }
    if cmd.contains('/') {
        return Ok(cmd.trim_start_matches('/').to_string());
    }
    Err(ImageError::NotResolvable {
        cmd: cmd.to_string(),
    })
}

/// Symlink target for `resolved`, relative to `link`'s parent
/// directory.
fn relative_target(link: &str, resolved: &str) -> String {
    let parent: Vec<&str> = match link.rsplit_once('/') {
        Some((p, _)) => p.split('/').collect(),
        None => Vec::new(),
    };
    let dest: Vec<&str> = resolved.split('/').collect();

    let mut common = 0;
    while common < parent.len()
        && common + 1 < dest.len()
        && parent[common] == dest[common]
    {
        common += 1;
    }

    let mut parts: Vec<&str> = vec![".."; parent.len() - common];
    parts.extend(&dest[common..]);
    parts.join("/")
}

/// Pull in the shared libraries an executable extra file needs, at
/// their own absolute paths. Failures to list dependencies are
/// warnings, not errors.
fn add_ldd_deps(tree: &mut FileTree, src: &Path) -> Result<(), ImageError> {
    let meta = match fs::metadata(src) {
        Ok(m) => m,
        Err(_) => return Ok(()),
    };
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Ok(());
    }

    let result = process::Cmd::new("ldd")
        .arg_path(src)
        .allow_fail()
        .run();
    let out = match result {
        Ok(out) => out,
        Err(e) => {
            eprintln!("  [WARN] Could not run ldd on {}: {e:#}", src.display());
            return Ok(());
        }
    };
    if !out.success() {
        // Static binaries and scripts have no dynamic section.
        return Ok(());
    }

    for line in out.stdout.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let path = match tokens.iter().position(|t| *t == "=>") {
            Some(pos) => tokens.get(pos + 1).copied(),
            None => tokens.first().copied(),
        };
        if let Some(p) = path.filter(|p| p.starts_with('/')) {
            tree.add_file(Path::new(p), p.trim_start_matches('/'))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::SharedArchive;
    use crate::cpio::RecordKind;

    fn shared_output(opts: &mut Opts) -> SharedArchive {
        let out = SharedArchive::new();
        opts.output = Some(Output::Writer(Box::new(out.clone())));
        out
    }

    #[test]
    fn no_commands_and_one_file_archives_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("hosts");
        fs::write(&f, "127.0.0.1 localhost").unwrap();

        let mut opts = Opts::new(BuildEnv::host());
        opts.extra_files = vec![format!("{}:etc/hosts", f.display())];
        opts.skip_ldd = true;
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();

        let archive = out.lock();
        assert!(archive.contains("etc/hosts"));
        assert!(archive.contains("etc"));
        assert!(!archive.contains("bin"));
        assert!(!archive.contains("init"));
    }

    #[test]
    fn missing_output_is_an_error() {
        let opts = Opts::new(BuildEnv::host());
        assert!(matches!(create_image(opts), Err(ImageError::NoOutput)));
    }

    #[test]
    fn commands_without_temp_dir_fail() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.commands
            .push(Commands::new(BuilderKind::Binary, vec!["pkg/a".into()]));
        shared_output(&mut opts);
        assert!(matches!(
            create_image(opts),
            Err(ImageError::TempDirMissing)
        ));
    }

    #[test]
    fn invalid_file_specs_are_rejected() {
        for spec in [":x", "x:"] {
            let mut opts = Opts::new(BuildEnv::host());
            opts.extra_files = vec![spec.to_string()];
            shared_output(&mut opts);
            let err = create_image(opts).unwrap_err();
            assert!(matches!(err, ImageError::InvalidFileSpec { .. }), "{spec:?}");
        }
    }

    #[test]
    fn empty_file_specs_are_ignored() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.extra_files = vec![String::new()];
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();
        assert!(out.lock().is_empty());
    }

    #[test]
    fn bare_file_spec_lands_at_its_own_path() {
        let (src, dest) = parse_file_spec("/bin/echo-like").unwrap();
        assert_eq!(src, PathBuf::from("/bin/echo-like"));
        assert_eq!(dest, "bin/echo-like");
    }

    #[test]
    fn init_points_into_the_archive() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.init = Some("/bin/systemd".to_string());
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();

        let archive = out.lock();
        let init = archive.get("init").unwrap();
        assert_eq!(init.kind(), RecordKind::Symlink);
        assert_eq!(init.symlink_target().as_deref(), Some("bin/systemd"));
    }

    #[test]
    fn init_resolves_to_built_command() {
        let commands = vec![Commands::new(
            BuilderKind::Multicall,
            vec!["cmds/core/init".into()],
        )];
        let resolved = resolve_command_or_path("init", &commands).unwrap();
        assert_eq!(resolved, "bbin/init");
    }

    #[test]
    fn bare_command_name_without_a_build_is_unresolvable() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.init = Some("startup".to_string());
        shared_output(&mut opts);
        let err = create_image(opts).unwrap_err();
        assert!(matches!(err, ImageError::NotResolvable { ref cmd } if cmd == "startup"));
    }

    #[test]
    fn init_conflicts_with_explicit_init_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("myinit");
        fs::write(&f, "#!/bin/sh").unwrap();

        let mut opts = Opts::new(BuildEnv::host());
        opts.extra_files = vec![format!("{}:init", f.display())];
        opts.skip_ldd = true;
        opts.init = Some("/bin/systemd".to_string());
        shared_output(&mut opts);
        let err = create_image(opts).unwrap_err();
        assert!(matches!(err, ImageError::Init(_)));
    }

    #[test]
    fn uinit_writes_flags_file() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.uinit = Some("/bbin/helper".to_string());
        opts.uinit_args = vec!["--verbose".to_string(), "--retries=3".to_string()];
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();

        let archive = out.lock();
        let link = archive.get("bin/uinit").unwrap();
        assert_eq!(link.symlink_target().as_deref(), Some("../bbin/helper"));
        let flags = archive.get("etc/uinit.flags").unwrap();
        assert_eq!(flags.data.read().unwrap(), b"--verbose\n--retries=3");
        assert_eq!(flags.perm(), 0o444);
    }

    #[test]
    fn uinit_args_alone_still_write_flags() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.uinit_args = vec!["-foo".to_string(), "-bar".to_string()];
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();

        let archive = out.lock();
        assert!(!archive.contains("bin/uinit"));
        let flags = archive.get("etc/uinit.flags").unwrap();
        assert_eq!(flags.data.read().unwrap(), b"-foo\n-bar");
    }

    #[test]
    fn shell_creates_both_entries() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.default_shell = Some("/bbin/gosh".to_string());
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();

        let archive = out.lock();
        for link in ["bin/defaultsh", "bin/sh"] {
            let r = archive.get(link).unwrap();
            assert_eq!(r.symlink_target().as_deref(), Some("../bbin/gosh"), "{link}");
        }
    }

    #[test]
    fn shell_conflict_is_reported_as_shell_error() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("sh");
        fs::write(&f, "").unwrap();

        let mut opts = Opts::new(BuildEnv::host());
        opts.extra_files = vec![format!("{}:bin/sh", f.display())];
        opts.skip_ldd = true;
        opts.default_shell = Some("/bbin/gosh".to_string());
        shared_output(&mut opts);
        let err = create_image(opts).unwrap_err();
        assert!(matches!(err, ImageError::Shell(_)));
    }

    #[test]
    fn explicit_symlinks_are_relative_to_their_parent() {
        let mut opts = Opts::new(BuildEnv::host());
        opts.symlinks
            .insert("usr/bin/env".to_string(), "/bin/env".to_string());
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();

        let archive = out.lock();
        let r = archive.get("usr/bin/env").unwrap();
        assert_eq!(r.symlink_target().as_deref(), Some("../../bin/env"));
    }

    #[test]
    fn uinit_flags_survive_base_archive_merge() {
        use crate::cpio::Archive;

        let base = Archive::from_records(vec![Record::static_file(
            "etc/motd",
            "hello",
            0o644,
        )])
        .unwrap();

        let mut opts = Opts::new(BuildEnv::host());
        opts.uinit = Some("/bbin/helper".to_string());
        opts.base = Some(Base::Reader(Box::new(base.into_reader())));
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();

        let archive = out.lock();
        assert!(archive.contains("etc/motd"));
        assert!(archive.contains("bin/uinit"));
    }

    #[test]
    fn modifiers_fold_in_order() {
        let opts = opts_for(
            BuildEnv::host(),
            vec![
                with_init("one"),
                with_init("two"),
                with_uinit("helper --flag a"),
                with_shell(""),
                with_multicall_commands(vec!["cmds/a".into()]),
                with_multicall_commands(vec!["cmds/b".into()]),
                with_binary_commands(vec!["cmds/c".into()]),
                with_skip_ldd(),
            ],
        )
        .unwrap();

        assert_eq!(opts.init.as_deref(), Some("two"));
        assert_eq!(opts.uinit.as_deref(), Some("helper"));
        assert_eq!(opts.uinit_args, ["--flag", "a"]);
        assert_eq!(opts.default_shell, None);
        assert!(opts.skip_ldd);
        // Same-builder groups merge.
        assert_eq!(opts.commands.len(), 2);
        assert_eq!(opts.commands[0].packages, ["cmds/a", "cmds/b"]);
        assert_eq!(opts.commands[1].packages, ["cmds/c"]);
    }

    #[test]
    fn with_no_commands_drops_every_group() {
        let mut opts = opts_for(
            BuildEnv::host(),
            vec![
                with_multicall_commands(vec!["cmds/a".into()]),
                with_no_commands(),
            ],
        )
        .unwrap();
        let out = shared_output(&mut opts);
        create_image(opts).unwrap();
        assert!(out.lock().is_empty());
    }

    #[test]
    fn relative_targets() {
        assert_eq!(relative_target("init", "bin/systemd"), "bin/systemd");
        assert_eq!(relative_target("bin/sh", "bbin/ls"), "../bbin/ls");
        assert_eq!(relative_target("bbin/sh", "bbin/gosh"), "gosh");
        assert_eq!(relative_target("a/b/c", "a/d"), "../d");
    }

    #[test]
    fn builder_kind_parses_template_names() {
        assert_eq!(BuilderKind::from_str("bb").unwrap(), BuilderKind::Multicall);
        assert_eq!(
            BuilderKind::from_str("binary").unwrap(),
            BuilderKind::Binary
        );
        assert!(BuilderKind::from_str("gbb-wrong").is_err());
    }
}
