//! Variable scopes: global (meta) ARGs and per-stage ARG/ENV bindings.

use std::collections::BTreeMap;

use stagekey_core::error::Result;

use super::dockerfile::{Instruction, Step};
use super::word::{merge_scopes, resolve, Vars};

/// ARGs declared before the first `FROM`, with build-arg overrides applied.
///
/// Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    args: Vars,
    overrides: BTreeMap<String, String>,
}

impl GlobalScope {
    /// Bind meta ARGs in file order.
    ///
    /// A key is resolved against the globals bound so far; its value is the
    /// override when one exists, otherwise the resolved default.
    pub fn new(meta_args: &[Step], overrides: &BTreeMap<String, String>) -> Result<Self> {
        let mut scope = Self {
            args: Vars::new(),
            overrides: overrides.clone(),
        };

        for step in meta_args {
            if let Instruction::Arg { args } = &step.instruction {
                for decl in args {
                    let key = scope.resolve(&decl.name)?;
                    let value = match scope.overrides.get(&key) {
                        Some(value) => value.clone(),
                        None => scope.resolve(decl.default.as_deref().unwrap_or(""))?,
                    };
                    scope.args.insert(key, value);
                }
            }
        }

        Ok(scope)
    }

    /// Resolve text against global bindings only.
    pub fn resolve(&self, text: &str) -> Result<String> {
        resolve(text, &self.args)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    pub fn override_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }
}

/// ARG and ENV bindings of one stage, filled in file order.
#[derive(Debug, Clone, Default)]
pub struct StageScope {
    args: Vars,
    env: Vars,
}

impl StageScope {
    /// ARGs and ENVs merged; ENV wins on collision.
    fn own_vars(&self) -> Vars {
        merge_scopes(&[&self.args, &self.env])
    }

    /// Resolve against stage ARGs and ENVs.
    pub fn resolve_own(&self, text: &str) -> Result<String> {
        resolve(text, &self.own_vars())
    }

    /// Resolve against stage ENVs only.
    pub fn resolve_inherited(&self, text: &str) -> Result<String> {
        resolve(text, &self.env)
    }

    /// Bind a stage ARG and return the resolved pair.
    ///
    /// Value precedence: build-arg override, then the global value when the
    /// declared default is empty, then the default resolved in this stage.
    pub fn add_arg(
        &mut self,
        key: &str,
        default: Option<&str>,
        global: &GlobalScope,
    ) -> Result<(String, String)> {
        let key = self.resolve_own(key)?;
        let default = default.unwrap_or("");

        let value = if let Some(value) = global.override_for(&key) {
            value.to_string()
        } else if default.is_empty() {
            global.get(&key).unwrap_or_default().to_string()
        } else {
            self.resolve_own(default)?
        };

        self.args.insert(key.clone(), value.clone());
        Ok((key, value))
    }

    /// Bind a stage ENV and return the resolved pair.
    pub fn add_env(&mut self, key: &str, value: &str) -> Result<(String, String)> {
        let key = self.resolve_own(key)?;
        let value = self.resolve_own(value)?;
        self.env.insert(key.clone(), value.clone());
        Ok((key, value))
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::dockerfile::Dockerfile;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn global(content: &str, pairs: &[(&str, &str)]) -> GlobalScope {
        let df = Dockerfile::parse(content).unwrap();
        GlobalScope::new(&df.meta_args, &overrides(pairs)).unwrap()
    }

    #[test]
    fn test_global_defaults_resolve_in_order() {
        let scope = global("ARG A=1\nARG B=${A}.0\nARG C\nFROM x", &[]);
        assert_eq!(scope.get("A"), Some("1"));
        assert_eq!(scope.get("B"), Some("1.0"));
        assert_eq!(scope.get("C"), Some(""));
    }

    #[test]
    fn test_global_override_is_verbatim() {
        let scope = global("ARG A=1\nARG B=$A\nFROM x", &[("A", "$HOME")]);
        assert_eq!(scope.get("A"), Some("$HOME"));
        assert_eq!(scope.get("B"), Some("$HOME"));
    }

    #[test]
    fn test_global_resolve() {
        let scope = global("ARG TAG=3.19\nFROM x", &[]);
        assert_eq!(scope.resolve("alpine:$TAG").unwrap(), "alpine:3.19");
    }

    #[test]
    fn test_stage_arg_precedence() {
        let global = global("ARG A=global\nARG B=global\nFROM x", &[("C", "cli")]);
        let mut stage = StageScope::default();

        assert_eq!(
            stage.add_arg("A", None, &global).unwrap(),
            ("A".to_string(), "global".to_string())
        );
        assert_eq!(
            stage.add_arg("B", Some("local"), &global).unwrap(),
            ("B".to_string(), "local".to_string())
        );
        assert_eq!(
            stage.add_arg("C", Some("local"), &global).unwrap(),
            ("C".to_string(), "cli".to_string())
        );
        assert_eq!(
            stage.add_arg("D", Some(""), &global).unwrap(),
            ("D".to_string(), String::new())
        );
    }

    #[test]
    fn test_stage_arg_default_sees_env() {
        let global = GlobalScope::default();
        let mut stage = StageScope::default();
        stage.add_env("BASE", "/opt").unwrap();
        let (_, value) = stage.add_arg("DIR", Some("$BASE/app"), &global).unwrap();
        assert_eq!(value, "/opt/app");
        assert_eq!(stage.arg("DIR"), Some("/opt/app"));
    }

    #[test]
    fn test_env_wins_over_arg() {
        let global = GlobalScope::default();
        let mut stage = StageScope::default();
        stage.add_arg("X", Some("arg"), &global).unwrap();
        stage.add_env("X", "env").unwrap();
        assert_eq!(stage.resolve_own("$X").unwrap(), "env");
    }

    #[test]
    fn test_inherited_sees_env_only() {
        let global = GlobalScope::default();
        let mut stage = StageScope::default();
        stage.add_arg("A", Some("arg"), &global).unwrap();
        stage.add_env("E", "env").unwrap();
        assert_eq!(stage.resolve_inherited("$A|$E").unwrap(), "|env");
        assert_eq!(stage.resolve_own("$A|$E").unwrap(), "arg|env");
    }

    #[test]
    fn test_add_env_resolves_key_and_value() {
        let mut stage = StageScope::default();
        stage.add_env("NAME", "PATH").unwrap();
        let pair = stage.add_env("${NAME}", "\"/usr/bin:$NAME\"").unwrap();
        assert_eq!(pair, ("PATH".to_string(), "/usr/bin:PATH".to_string()));
        assert_eq!(stage.env("PATH"), Some("/usr/bin:PATH"));
    }
}
