//! Diagnostic catalog: which samplers run and how their command lines are built.
//!
//! Each diagnostic is a command template with a single `{interval}` placeholder. Rendering
//! substitutes the sampling interval and splits the result into an argument vector with
//! POSIX shell-word rules. No shell ever sees the command.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INTERVAL: u32 = 30;
pub const INTERVAL_PLACEHOLDER: &str = "{interval}";

const PROFILE_FILE: &str = "profile.json";

/// Cluster statistics samplers collected when no profile is configured.
const BUILTIN: &[(&str, &str)] = &[
    (
        "cluster_health",
        "isi statistics query current --nodes=all --stats=cluster.health,cluster.node.count.up,cluster.node.count.down,cluster.node.list.down --no-footer --degraded --interval={interval}",
    ),
    (
        "system",
        "isi statistics system --nodes=all --degraded --format=table --output time,node,cpu,smb,ftp,http,nfs,hdfs,total,netin,netout,diskin,diskout --interval={interval}",
    ),
    (
        "protocol_by_op",
        "isi statistics protocol --protocols=nfs --zero --long --output=TimeStamp,NumOps,In,InAvg,Out,OutAvg,TimeMin,TimeMax,TimeAvg,Op --totalby=Op --degraded --interval={interval}",
    ),
    (
        "protocol_by_node",
        "isi statistics protocol --protocols=nfs --zero --long --output=TimeStamp,In,Out,Op --totalby=node --degraded --interval={interval}",
    ),
    (
        "drives",
        "isi statistics drive --nodes=all --degraded --sort=timeinq --limit=30 --output time,drive,type,opsin,bytesin,opsout,bytesout,timeavg,timeinq,queued,busy --interval={interval}",
    ),
    (
        "client_connections",
        "isi statistics query current --nodes=all --stats=node.clientstats.active.nfs,node.clientstats.connected.nfs --degraded --interval={interval}",
    ),
    (
        "heat_per_node",
        "isi statistics heat --totalby=node,event --sort=node,event --degraded --interval={interval}",
    ),
    (
        "heat_all_nodes",
        "isi statistics heat --totalby=node,event --sort=event --degraded --interval={interval}",
    ),
    (
        "query_node",
        "isi statistics query current --nodes=all --stats=node.health,node.cpu.user.avg,node.cpu.sys.avg,node.cpu.idle.avg,node.memory.used,node.memory.free,node.disk.busy.avg --degraded --no-footer --interval={interval}",
    ),
    (
        "query_network",
        "isi statistics query current --nodes=all --stats=node.open.files,node.net.ext.bytes.in.rate,node.net.ext.bytes.out.rate --degraded --no-footer --interval={interval}",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSpec {
    pub name: String,
    pub command: String,
}

impl DiagnosticSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    /// Substitute the interval and split into an argument vector.
    pub fn render(&self, interval: u32) -> Result<Vec<String>, ConfigError> {
        if interval == 0 {
            return Err(ConfigError::Interval);
        }
        if self.command.matches(INTERVAL_PLACEHOLDER).count() != 1 {
            return Err(ConfigError::Template {
                name: self.name.clone(),
            });
        }
        let line = self
            .command
            .replace(INTERVAL_PLACEHOLDER, &interval.to_string());
        let argv = shell_words::split(&line).map_err(|e| ConfigError::Tokenize {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;
        if argv.is_empty() {
            return Err(ConfigError::Tokenize {
                name: self.name.clone(),
                reason: "no program given".into(),
            });
        }
        Ok(argv)
    }
}

/// Optional JSON file overriding the built-in catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(default)]
    pub interval: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub exit_timeout: Option<Duration>,
    pub diagnostics: Vec<DiagnosticSpec>,
}

impl Profile {
    pub fn builtin() -> Self {
        Self {
            interval: None,
            exit_timeout: None,
            diagnostics: builtin(),
        }
    }
}

pub fn builtin() -> Vec<DiagnosticSpec> {
    BUILTIN
        .iter()
        .map(|(name, command)| DiagnosticSpec::new(*name, *command))
        .collect()
}

/// Per-user profile location, used when no `--profile` is given.
pub fn default_profile_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(env!("CARGO_PKG_NAME")).join(PROFILE_FILE))
}

/// Load an explicit profile, else the per-user one if present, else the built-in catalog.
pub fn load_profile(explicit: Option<&Path>) -> Result<Profile, ConfigError> {
    if let Some(path) = explicit {
        return read_profile(path);
    }
    match default_profile_path() {
        Some(path) if path.is_file() => {
            tracing::debug!(path = %path.display(), "Using per-user profile");
            read_profile(&path)
        }
        _ => Ok(Profile::builtin()),
    }
}

pub fn read_profile(path: &Path) -> Result<Profile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ProfileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::ProfileParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Check names and templates before anything touches the filesystem.
pub fn validate(specs: &[DiagnosticSpec], interval: u32) -> Result<(), ConfigError> {
    if specs.is_empty() {
        return Err(ConfigError::NoDiagnostics);
    }
    let mut seen = HashSet::new();
    for spec in specs {
        if !is_valid_name(&spec.name) {
            return Err(ConfigError::InvalidName(spec.name.clone()));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(ConfigError::DuplicateName(spec.name.clone()));
        }
        spec.render(interval)?;
    }
    Ok(())
}

/// A name becomes `<name>.log`, so it must be a single plain path component.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_interval_and_splits() {
        let spec = DiagnosticSpec::new("heat", "isi statistics heat --sort=event --interval={interval}");
        let argv = spec.render(5).unwrap();
        assert_eq!(
            argv,
            vec!["isi", "statistics", "heat", "--sort=event", "--interval=5"]
        );
    }

    #[test]
    fn test_render_keeps_quoted_arguments_together() {
        let spec = DiagnosticSpec::new("sh", "sh -c 'echo every {interval}s; sleep 60'");
        let argv = spec.render(10).unwrap();
        assert_eq!(argv, vec!["sh", "-c", "echo every 10s; sleep 60"]);
    }

    #[test]
    fn test_render_does_not_expand_shell_syntax() {
        let spec = DiagnosticSpec::new("x", "echo $HOME `id` {interval} > out");
        let argv = spec.render(1).unwrap();
        assert_eq!(argv, vec!["echo", "$HOME", "`id`", "1", ">", "out"]);
    }

    #[test]
    fn test_render_requires_exactly_one_placeholder() {
        let none = DiagnosticSpec::new("a", "isi statistics drive");
        assert!(matches!(none.render(5), Err(ConfigError::Template { .. })));

        let two = DiagnosticSpec::new("b", "cmd {interval} {interval}");
        assert!(matches!(two.render(5), Err(ConfigError::Template { .. })));
    }

    #[test]
    fn test_render_rejects_zero_interval() {
        let spec = DiagnosticSpec::new("a", "cmd --interval={interval}");
        assert!(matches!(spec.render(0), Err(ConfigError::Interval)));
    }

    #[test]
    fn test_render_rejects_unbalanced_quotes() {
        let spec = DiagnosticSpec::new("a", "cmd 'oops {interval}");
        assert!(matches!(spec.render(5), Err(ConfigError::Tokenize { .. })));
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let specs = builtin();
        assert_eq!(specs.len(), 10);
        validate(&specs, DEFAULT_INTERVAL).unwrap();
        // Leading whitespace in a template must not produce an empty program name.
        let argv = specs
            .iter()
            .find(|s| s.name == "client_connections")
            .unwrap()
            .render(30)
            .unwrap();
        assert_eq!(argv[0], "isi");
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_names() {
        let dup = vec![
            DiagnosticSpec::new("a", "x {interval}"),
            DiagnosticSpec::new("a", "y {interval}"),
        ];
        assert!(matches!(validate(&dup, 5), Err(ConfigError::DuplicateName(n)) if n == "a"));

        for bad in ["", ".", "..", "sub/dir", "  "] {
            let specs = vec![DiagnosticSpec::new(bad, "x {interval}")];
            assert!(
                matches!(validate(&specs, 5), Err(ConfigError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }

        assert!(matches!(validate(&[], 5), Err(ConfigError::NoDiagnostics)));
    }

    #[test]
    fn test_read_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(
            &path,
            r#"{
                "interval": 10,
                "exit_timeout": "3s",
                "diagnostics": [{"name": "a", "command": "sleep {interval}"}]
            }"#,
        )
        .unwrap();

        let profile = read_profile(&path).unwrap();
        assert_eq!(profile.interval, Some(10));
        assert_eq!(profile.exit_timeout, Some(Duration::from_secs(3)));
        assert_eq!(profile.diagnostics, vec![DiagnosticSpec::new("a", "sleep {interval}")]);
    }

    #[test]
    fn test_read_profile_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let err = read_profile(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::ProfileRead { .. }));
        assert!(err.to_string().contains("missing.json"));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"diagnostics": [], "colour": "blue"}"#).unwrap();
        assert!(matches!(
            read_profile(&bad),
            Err(ConfigError::ProfileParse { .. })
        ));
    }

    #[test]
    fn test_load_profile_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, r#"{"diagnostics": [{"name": "only", "command": "x {interval}"}]}"#)
            .unwrap();
        let profile = load_profile(Some(&path)).unwrap();
        assert_eq!(profile.diagnostics.len(), 1);
        assert_eq!(profile.interval, None);
        assert_eq!(profile.exit_timeout, None);
    }
}
