//! Rewriting of debugger commands typed by the user (or sent by an IDE).

use crate::error::Error;
use indexmap::IndexMap;
use log::debug;

/// Environment variable with user-defined rules, in form `key:value,key:value`.
pub const OVERWRITE_ENV: &str = "XDS_OVERWRITE_COMMANDS";

/// Ordered table of literal substitutions.
#[derive(Debug, Clone, PartialEq)]
pub struct OverwriteTable {
    rules: IndexMap<String, String>,
}

impl Default for OverwriteTable {
    /// Remote gdb is already loaded and started by the agent, so `run` and executable loading
    /// are turned into their attach-friendly variants.
    fn default() -> Self {
        let rules = IndexMap::from([
            ("-exec-run".to_string(), "-exec-continue".to_string()),
            (
                "-file-exec-and-symbols".to_string(),
                "-file-exec-file".to_string(),
            ),
        ]);
        Self { rules }
    }
}

impl OverwriteTable {
    /// Build a table from the value of [`OVERWRITE_ENV`], `None` means that the variable is
    /// not set and default rules are used. An empty value disables overwriting.
    pub fn from_env_value(value: Option<&str>) -> Result<Self, Error> {
        match value {
            None => Ok(Self::default()),
            Some(v) => Self::parse(v),
        }
    }

    pub fn parse(definition: &str) -> Result<Self, Error> {
        let definition = definition.trim();
        let mut rules = IndexMap::new();
        if definition.is_empty() {
            return Ok(Self { rules });
        }

        for def in definition.split(',') {
            let mut kv = def.split(':');
            match (kv.next(), kv.next(), kv.next()) {
                (Some(key), Some(value), None) if !key.trim().is_empty() => {
                    rules.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => return Err(Error::InvalidOverwrite(def.to_string())),
            }
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Apply every rule in order, each one replaces its first occurrence only.
    pub fn apply(&self, line: &str) -> String {
        let mut line = line.to_string();
        for (key, value) in &self.rules {
            if line.contains(key.as_str()) {
                line = line.replacen(key.as_str(), value, 1);
                debug!(target: "stdin", "overwrite {key} -> {value}");
            }
        }
        line
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_rules() {
        let table = OverwriteTable::from_env_value(None).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.apply("-exec-run"), "-exec-continue");
        assert_eq!(
            table.apply("12-file-exec-and-symbols /tmp/app"),
            "12-file-exec-file /tmp/app"
        );
        assert_eq!(table.apply("-break-insert main"), "-break-insert main");
    }

    #[test]
    fn test_first_occurrence_only() {
        let table = OverwriteTable::default();
        assert_eq!(
            table.apply("-exec-run -exec-run"),
            "-exec-continue -exec-run"
        );
    }

    #[test]
    fn test_rules_apply_in_order() {
        let table = OverwriteTable::parse("foo:bar, bar:baz").unwrap();
        // second rule sees the output of the first one
        assert_eq!(table.apply("foo"), "baz");
        assert_eq!(table.apply("x foo bar"), "x baz bar");
    }

    #[test]
    fn test_user_definition() {
        let table = OverwriteTable::from_env_value(Some(" run : continue ")).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.apply("run"), "continue");
        // user rules replace defaults
        assert_eq!(table.apply("-exec-run"), "-exec-continue");
        assert_eq!(table.apply("-file-exec-and-symbols"), "-file-exec-and-symbols");
    }

    #[test]
    fn test_empty_definition_disables() {
        let table = OverwriteTable::from_env_value(Some("  ")).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.apply("-exec-run"), "-exec-run");
    }

    #[test]
    fn test_malformed_definition() {
        for def in ["a:b,c", "a:b:c", ":x"] {
            let err = OverwriteTable::parse(def).unwrap_err();
            assert!(matches!(err, Error::InvalidOverwrite(_)), "{def}");
            assert_eq!(err.exit_code(), nix::errno::Errno::EINVAL as i32);
        }
    }
}
