//! Environment configuration of xds-gdb.
//!
//! Settings are environment variables. They may be defined in an env file: the one named by
//! `XDS_CONFIG`, `:XDS-ENV:` tags of the gdb command file, or the first `xds-gdb.env` found
//! in well-known locations.

use crate::error::Error;
use log::{debug, info};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const ENV_FILE_NAME: &str = "xds-gdb.env";
/// Tag of gdb command file comments that carry env assignments.
pub const ENV_TAG: &str = ":XDS-ENV:";

/// Where the environment configuration comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    None,
    File(PathBuf),
    CommandFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    pub source: Source,
    pub vars: BTreeMap<String, String>,
}

impl EnvConfig {
    fn empty() -> Self {
        Self {
            source: Source::None,
            vars: BTreeMap::new(),
        }
    }

    /// Assignments in form `NAME=value`, sorted by name.
    pub fn assignments(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// Export variables into the process environment, existing variables are kept.
    pub fn export(&self) {
        for (key, value) in &self.vars {
            if std::env::var_os(key).is_none() {
                std::env::set_var(key, value);
            } else {
                debug!(target: "config", "{key} already set, keep current value");
            }
        }
    }
}

/// Extract env assignments from `:XDS-ENV:` tags of comment lines.
///
/// All the following forms are supported:
/// ```text
/// # :XDS-ENV: XDS_PROJECT_ID=IW7B4EE-DBY4Z74_myProject
/// #:XDS-ENV:XDS_SDK_ID=poky-agl_aarch64_3.99.1+snapshot
/// # :XDS-ENV:  export XDS_SERVER_URL=localhost:8800
/// ```
pub fn extract_env_tags(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .filter_map(|line| line.split_once(ENV_TAG))
        .map(|(_, assignment)| {
            let assignment = assignment.trim();
            assignment
                .strip_prefix("export ")
                .unwrap_or(assignment)
                .trim()
                .to_string()
        })
        .filter(|assignment| !assignment.is_empty())
        .collect()
}

/// Candidate env files, in search order.
pub fn search_paths(cwd: &Path, home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = vec![cwd.to_path_buf(), cwd.join(".."), cwd.join("target")];
    if let Some(home) = home {
        dirs.push(home.join(".config").join("xds"));
    }
    dirs.into_iter().map(|d| d.join(ENV_FILE_NAME)).collect()
}

fn parse(
    what: &Path,
    iter: impl Iterator<Item = Result<(String, String), dotenvy::Error>>,
) -> Result<BTreeMap<String, String>, Error> {
    iter.collect::<Result<BTreeMap<_, _>, _>>().map_err(|e| {
        Error::EnvFile(format!(
            "Error reading env config file {}: {e}",
            what.display()
        ))
    })
}

fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>, Error> {
    if !path.exists() {
        return Err(Error::EnvFile(format!(
            "Error env config file {} not found",
            path.display()
        )));
    }
    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        Error::EnvFile(format!(
            "Error loading env config file {}: {e}",
            path.display()
        ))
    })?;
    parse(path, iter)
}

/// Read env assignments from the gdb command file, `None` if it has no tag.
fn read_command_file(path: &Path) -> Result<Option<BTreeMap<String, String>>, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::EnvFile(format!("Cannot open {} : {e}", path.display()))
    })?;
    let assignments = extract_env_tags(&content);
    if assignments.is_empty() {
        return Ok(None);
    }
    let text = assignments.join("\n");
    parse(path, dotenvy::from_read_iter(Cursor::new(text))).map(Some)
}

/// Load the environment configuration.
///
/// # Arguments
///
/// * `config_file`: explicit env file, must exist
/// * `command_file`: gdb command file, searched for `:XDS-ENV:` tags
/// * `cwd`: directory where the search of an env file starts
pub fn load(
    config_file: Option<&Path>,
    command_file: Option<&Path>,
    cwd: &Path,
) -> Result<EnvConfig, Error> {
    if let Some(path) = config_file {
        info!(target: "config", "load env config file {}", path.display());
        return Ok(EnvConfig {
            vars: read_env_file(path)?,
            source: Source::File(path.to_path_buf()),
        });
    }

    if let Some(path) = command_file.filter(|p| p.exists()) {
        info!(target: "config", "try to extract config from gdb command file {}", path.display());
        match read_command_file(path) {
            Ok(Some(vars)) => {
                return Ok(EnvConfig {
                    vars,
                    source: Source::CommandFile(path.to_path_buf()),
                })
            }
            Ok(None) => debug!(target: "config", "no {ENV_TAG} tag in {}", path.display()),
            Err(e) => info!(target: "config", "extraction from gdb command file failed: {e}"),
        }
    }

    let home = home::home_dir();
    for path in search_paths(cwd, home.as_deref()) {
        info!(target: "config", "search config in {}", path.display());
        if path.is_file() {
            return Ok(EnvConfig {
                vars: read_env_file(&path)?,
                source: Source::File(path),
            });
        }
    }

    info!(target: "config", "no env config file found");
    Ok(EnvConfig::empty())
}

#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;
    use std::fs;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("xds-gdb-{name}-{}", std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_extract_env_tags() {
        let content = "\
# :XDS-ENV: XDS_PROJECT_ID=IW7B4EE-DBY4Z74_myProject
#:XDS-ENV:XDS_SDK_ID=poky-agl_aarch64_3.99.1+snapshot
  # :XDS-ENV:  export XDS_SERVER_URL=localhost:8800
target remote :1234
echo :XDS-ENV: NOT_A_COMMENT=1
# plain comment
";
        assert_eq!(
            extract_env_tags(content),
            vec![
                "XDS_PROJECT_ID=IW7B4EE-DBY4Z74_myProject",
                "XDS_SDK_ID=poky-agl_aarch64_3.99.1+snapshot",
                "XDS_SERVER_URL=localhost:8800",
            ]
        );
    }

    #[test]
    fn test_search_paths_order() {
        let paths = search_paths(Path::new("/w/app"), Some(Path::new("/home/u")));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/w/app/xds-gdb.env"),
                PathBuf::from("/w/app/../xds-gdb.env"),
                PathBuf::from("/w/app/target/xds-gdb.env"),
                PathBuf::from("/home/u/.config/xds/xds-gdb.env"),
            ]
        );
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let err = load(Some(Path::new("/nonexistent/xds.env")), None, Path::new("/")).unwrap_err();
        assert!(matches!(err, Error::EnvFile(_)));
        assert_eq!(err.exit_code(), nix::errno::Errno::ENOENT as i32);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new("explicit");
        let file = dir.0.join("my.env");
        fs::write(&file, "XDS_SDK_ID=sdk\nexport XDS_PROJECT_ID=prj\n# comment\n").unwrap();

        let cfg = load(Some(&file), None, &dir.0).unwrap();
        assert_eq!(cfg.source, Source::File(file));
        assert_eq!(cfg.assignments(), vec!["XDS_PROJECT_ID=prj", "XDS_SDK_ID=sdk"]);
    }

    #[test]
    fn test_load_from_command_file_tags() {
        let dir = TempDir::new("cmdfile");
        let cmd = dir.0.join("gdb.ini");
        fs::write(&cmd, "# :XDS-ENV: XDS_PROJECT_ID=abc\nbreak main\n").unwrap();
        // tags win over an env file in the working directory
        fs::write(dir.0.join(ENV_FILE_NAME), "XDS_PROJECT_ID=other\n").unwrap();

        let cfg = load(None, Some(&cmd), &dir.0).unwrap();
        assert_eq!(cfg.source, Source::CommandFile(cmd));
        assert_eq!(cfg.assignments(), vec!["XDS_PROJECT_ID=abc"]);
    }

    #[test]
    fn test_load_searches_env_file() {
        let dir = TempDir::new("search");
        let cwd = dir.0.join("app");
        fs::create_dir_all(cwd.join("target")).unwrap();
        fs::write(cwd.join("target").join(ENV_FILE_NAME), "XDS_SDK_ID=from-target\n").unwrap();
        let cmd = cwd.join("gdb.ini");
        fs::write(&cmd, "break main\n").unwrap();

        let cfg = load(None, Some(&cmd), &cwd).unwrap();
        assert_eq!(cfg.source, Source::File(cwd.join("target").join(ENV_FILE_NAME)));
        assert_eq!(cfg.vars["XDS_SDK_ID"], "from-target");
    }

    #[test]
    #[serial]
    fn test_export_keeps_existing_variables() {
        std::env::set_var("XDS_GDB_TEST_EXISTING", "kept");
        std::env::remove_var("XDS_GDB_TEST_NEW");

        let cfg = EnvConfig {
            source: Source::None,
            vars: BTreeMap::from([
                ("XDS_GDB_TEST_EXISTING".to_string(), "replaced".to_string()),
                ("XDS_GDB_TEST_NEW".to_string(), "set".to_string()),
            ]),
        };
        cfg.export();

        assert_eq!(std::env::var("XDS_GDB_TEST_EXISTING").unwrap(), "kept");
        assert_eq!(std::env::var("XDS_GDB_TEST_NEW").unwrap(), "set");
    }
}
