//! Projects and SDKs known by the agent: resolution and discovery report.

use crate::session::remote::api::{ProjectConfig, Sdk};
use std::fmt::Write;

/// Length of ID prefixes shown in the report example.
const SHORT_ID_LEN: usize = 8;

/// Find a project whose ID starts with `id`, the first match in the agent order wins.
pub fn resolve_project<'a>(projects: &'a [ProjectConfig], id: &str) -> Option<&'a ProjectConfig> {
    projects.iter().find(|p| p.id.starts_with(id))
}

/// Derive the path relative to the project root from the working directory.
///
/// The project client path must occur exactly once in `cwd`, the remainder of `cwd` (without
/// leading and trailing `/`) is the relative path.
///
/// # Arguments
///
/// * `cwd`: current working directory
/// * `client_path`: project path on the client side
pub fn derive_relative_path(cwd: &str, client_path: &str) -> Option<String> {
    let root = if client_path.starts_with('/') {
        client_path.to_string()
    } else {
        format!("/{client_path}")
    };

    let mut parts = cwd.split(root.as_str());
    let _before = parts.next()?;
    let after = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(after.trim_matches('/').to_string())
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((pos, _)) => &id[..pos],
        None => id,
    }
}

/// Write rows with the first column padded to the widest cell.
fn write_table(out: &mut String, header: (&str, &str), rows: &[(String, String)]) {
    let width = rows
        .iter()
        .map(|(first, _)| first.chars().count())
        .chain(std::iter::once(header.0.len()))
        .max()
        .unwrap_or_default();

    _ = writeln!(out, " {:<width$}   {}", header.0, header.1);
    for (first, second) in rows {
        _ = writeln!(out, " {first:<width$}   {second}");
    }
}

/// Build the human-readable report listing projects and SDKs.
///
/// # Arguments
///
/// * `projects`: projects known by the agent
/// * `sdks`: installed cross SDKs
/// * `app_name`: program name used in the example command line
pub fn discovery_report(projects: &[ProjectConfig], sdks: &[Sdk], app_name: &str) -> String {
    let mut out = String::new();

    if !projects.is_empty() {
        _ = writeln!(
            out,
            "List of existing projects (use: export XDS_PROJECT_ID=<< ID >>):"
        );
        let rows: Vec<_> = projects
            .iter()
            .map(|p| {
                let label = if p.default_sdk.is_empty() {
                    p.label.clone()
                } else {
                    format!("{} (default SDK: {})", p.label, p.default_sdk)
                };
                (p.id.clone(), label)
            })
            .collect();
        write_table(&mut out, ("ID", "Label"), &rows);
    }

    _ = writeln!(
        out,
        "\nList of installed cross SDKs (use: export XDS_SDK_ID=<< ID >>):"
    );
    let rows: Vec<_> = sdks
        .iter()
        .map(|s| (s.id.clone(), s.name.clone()))
        .collect();
    write_table(&mut out, ("ID", "Name"), &rows);

    if let (Some(project), Some(sdk)) = (projects.first(), sdks.first()) {
        _ = writeln!(out, "\nFor example:");
        _ = writeln!(
            out,
            "  XDS_PROJECT_ID={} XDS_SDK_ID={}  {app_name} -x myGdbConf.ini",
            short_id(&project.id),
            short_id(&sdk.id)
        );
    }
    _ = writeln!(
        out,
        "\nOr define settings within gdb configuration file (see help and :XDS-ENV: tag)"
    );
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn project(id: &str, label: &str, path: &str) -> ProjectConfig {
        ProjectConfig {
            id: id.to_string(),
            label: label.to_string(),
            path: path.to_string(),
            default_sdk: String::new(),
        }
    }

    fn sdk(id: &str, name: &str) -> Sdk {
        Sdk {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_resolve_project_by_prefix() {
        let projects = vec![
            project("abc123", "first", "/w/a"),
            project("abc456", "second", "/w/b"),
            project("xyz", "third", "/w/c"),
        ];
        assert_eq!(resolve_project(&projects, "abc1").unwrap().label, "first");
        // ambiguous prefix: first one in agent order
        assert_eq!(resolve_project(&projects, "abc").unwrap().label, "first");
        assert_eq!(resolve_project(&projects, "xyz").unwrap().label, "third");
        assert!(resolve_project(&projects, "nope").is_none());
        assert!(resolve_project(&[], "abc").is_none());
    }

    #[test]
    fn test_derive_relative_path() {
        assert_eq!(
            derive_relative_path("/home/u/work/myproj/src", "myproj").unwrap(),
            "src"
        );
        assert_eq!(
            derive_relative_path("/home/u/work/myproj/src/lib/", "/home/u/work/myproj").unwrap(),
            "src/lib"
        );
        assert_eq!(
            derive_relative_path("/home/u/work/myproj", "/home/u/work/myproj").unwrap(),
            ""
        );
    }

    #[test]
    fn test_derive_relative_path_failures() {
        // not inside project
        assert!(derive_relative_path("/home/u/other", "myproj").is_none());
        // more than one occurrence
        assert!(derive_relative_path("/a/p/b/p/c", "p").is_none());
    }

    #[test]
    fn test_discovery_report() {
        let mut p = project("IW7B4EE-DBY4Z74_myProject", "myProject", "/w/p");
        p.default_sdk = "poky-agl".to_string();
        let report = discovery_report(
            &[p, project("IW7B4EE-AAAA_other", "other", "/w/o")],
            &[sdk("poky-agl_aarch64_4.0.1", "AGL aarch64")],
            "xds-gdb",
        );

        let expected = "\
List of existing projects (use: export XDS_PROJECT_ID=<< ID >>):
 ID                          Label
 IW7B4EE-DBY4Z74_myProject   myProject (default SDK: poky-agl)
 IW7B4EE-AAAA_other          other

List of installed cross SDKs (use: export XDS_SDK_ID=<< ID >>):
 ID                       Name
 poky-agl_aarch64_4.0.1   AGL aarch64

For example:
  XDS_PROJECT_ID=IW7B4EE- XDS_SDK_ID=poky-agl  xds-gdb -x myGdbConf.ini

Or define settings within gdb configuration file (see help and :XDS-ENV: tag)
";
        assert_eq!(report, expected);
    }

    #[test]
    fn test_discovery_report_without_inventory() {
        let report = discovery_report(&[], &[], "xds-gdb");
        assert!(!report.contains("List of existing projects"));
        assert!(report.contains("List of installed cross SDKs"));
        assert!(!report.contains("For example"));
        assert!(report.ends_with("(see help and :XDS-ENV: tag)\n"));
    }
}
