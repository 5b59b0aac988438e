//! YAML build templates: named command lists and named image configs.
//!
//! A template file carries reusable command lists under `commands:` and
//! complete image descriptions under `configs:`. A config compiles down
//! to a stack of [`Modifier`]s, so command-line flags applied after it
//! override whatever the template chose.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::image::{self, BuilderKind, Modifier};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("config {name:?} does not exist in the template file")]
    NotExist { name: String },

    #[error("reading template: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing template: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// The top level of a template file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Templates {
    /// Named command lists. Entries in a config's command list that
    /// match one of these names expand to the named list.
    #[serde(default)]
    pub commands: BTreeMap<String, Vec<String>>,

    /// Named image configurations.
    #[serde(default)]
    pub configs: BTreeMap<String, Config>,
}

/// One named image configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub build_tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub init: Option<String>,
    #[serde(default)]
    pub uinit: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandGroup {
    pub builder: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Templates {
    pub fn parse(yaml: &str) -> Result<Templates, TemplateError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Templates, TemplateError> {
        Templates::parse(&std::fs::read_to_string(path)?)
    }

    /// Names of available configs, sorted.
    pub fn config_names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }

    /// Expand command-list names in `list`; anything not naming a list
    /// passes through as a package pattern. Lists may reference other
    /// lists; cycles terminate because each list expands at most once.
    pub fn commands_for<I, S>(&self, list: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        let mut expanded: Vec<String> = Vec::new();
        for entry in list {
            self.expand_into(entry.as_ref(), &mut out, &mut expanded);
        }
        out
    }

    fn expand_into(&self, entry: &str, out: &mut Vec<String>, expanded: &mut Vec<String>) {
        match self.commands.get(entry) {
            Some(list) if !expanded.iter().any(|e| e == entry) => {
                expanded.push(entry.to_string());
                for e in list {
                    self.expand_into(e, out, expanded);
                }
            }
            Some(_) => {}
            None => out.push(entry.to_string()),
        }
    }

    /// The modifier stack for the named config.
    pub fn modifiers(&self, name: &str) -> Result<Vec<Modifier>, TemplateError> {
        let config = self.configs.get(name).ok_or_else(|| TemplateError::NotExist {
            name: name.to_string(),
        })?;

        let mut mods: Vec<Modifier> = vec![image::with_target(
            config.os.clone(),
            config.arch.clone(),
            config.build_tags.clone(),
        )];
        if !config.files.is_empty() {
            mods.push(image::with_files(config.files.clone()));
        }
        if let Some(init) = &config.init {
            mods.push(image::with_init(init.clone()));
        }
        if let Some(uinit) = &config.uinit {
            mods.push(image::with_uinit(uinit.clone()));
        }
        if let Some(shell) = &config.shell {
            mods.push(image::with_shell(shell.clone()));
        }
        for group in &config.commands {
            let kind: BuilderKind = group.builder.parse()?;
            mods.push(image::with_commands(
                kind,
                self.commands_for(&group.commands),
            ));
        }
        Ok(mods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::BuildEnv;
    use crate::image::opts_for;

    const TEMPLATE: &str = r#"
commands:
  core:
    - cmds/core/init
    - cmds/core/ls
  everything:
    - core
    - cmds/exp/watchdog

configs:
  plain:
    os: linux
    arch: x86_64
    build_tags: [netboot]
    files:
      - /etc/resolv.conf
    init: init
    uinit: helper --flag
    shell: gosh
    commands:
      - builder: bb
        commands: [core, cmds/extra/gosh]
      - builder: binary
        commands: [cmds/exp/watchdog]
      - builder: bb
        commands: [cmds/extra/helper]
"#;

    #[test]
    fn parses_and_lists_configs() {
        let tpl = Templates::parse(TEMPLATE).unwrap();
        assert_eq!(tpl.config_names(), ["plain"]);
    }

    #[test]
    fn unknown_config_is_an_error() {
        let tpl = Templates::parse(TEMPLATE).unwrap();
        assert!(matches!(
            tpl.modifiers("missing"),
            Err(TemplateError::NotExist { ref name }) if name == "missing"
        ));
    }

    #[test]
    fn command_lists_expand_recursively() {
        let tpl = Templates::parse(TEMPLATE).unwrap();
        let cmds = tpl.commands_for(["everything"]);
        assert_eq!(
            cmds,
            ["cmds/core/init", "cmds/core/ls", "cmds/exp/watchdog"]
        );
    }

    #[test]
    fn unknown_list_names_pass_through_as_patterns() {
        let tpl = Templates::parse(TEMPLATE).unwrap();
        assert_eq!(tpl.commands_for(["cmds/foo/*"]), ["cmds/foo/*"]);
    }

    #[test]
    fn config_becomes_opts() {
        let tpl = Templates::parse(TEMPLATE).unwrap();
        let opts = opts_for(BuildEnv::host(), tpl.modifiers("plain").unwrap()).unwrap();

        assert_eq!(opts.env.target_os, "linux");
        assert_eq!(opts.env.target_arch, "x86_64");
        assert_eq!(opts.env.build_tags, ["netboot"]);
        assert_eq!(opts.extra_files, ["/etc/resolv.conf"]);
        assert_eq!(opts.init.as_deref(), Some("init"));
        assert_eq!(opts.uinit.as_deref(), Some("helper"));
        assert_eq!(opts.uinit_args, ["--flag"]);
        assert_eq!(opts.default_shell.as_deref(), Some("gosh"));

        // Both bb groups merged into one compile; the binary group
        // stays separate.
        assert_eq!(opts.commands.len(), 2);
        assert_eq!(
            opts.commands[0].packages,
            [
                "cmds/core/init",
                "cmds/core/ls",
                "cmds/extra/gosh",
                "cmds/extra/helper"
            ]
        );
        assert_eq!(opts.commands[1].packages, ["cmds/exp/watchdog"]);
    }

    #[test]
    fn later_modifiers_override_template_values() {
        let tpl = Templates::parse(TEMPLATE).unwrap();
        let mut mods = tpl.modifiers("plain").unwrap();
        mods.push(image::with_init(""));
        let opts = opts_for(BuildEnv::host(), mods).unwrap();
        assert_eq!(opts.init, None);
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        let err = Templates::parse("configs: [not, a, map]").unwrap_err();
        assert!(matches!(err, TemplateError::Parse(_)));
    }

    #[test]
    fn unknown_builder_name_fails() {
        let tpl = Templates::parse(
            "configs:\n  bad:\n    commands:\n      - builder: gccgo\n        commands: [x]\n",
        )
        .unwrap();
        assert!(tpl.modifiers("bad").is_err());
    }
}
