//! Agent configuration: built-in defaults, then an optional JSON file, then
//! SMART_BACKUP_* environment variables, then command-line flags.
//! Config file lives under $XDG_CONFIG_HOME/smart_backup/config.json (fallback ~/.config/smart_backup/config.json).

use crate::error::ConfigError;
use crate::idle::IdleThresholds;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STATE_FILE_NAME: &str = "backup_state.json";
pub const LOG_FILE_NAME: &str = "smart_backup.log";
pub const MANIFEST_FILE_NAME: &str = "backup_report.txt";

pub const DEFAULT_EXTENSIONS: &[&str] = &[".py", ".md", ".jsonc", ".txt", ".bat"];
pub const DEFAULT_CONFIG_SUBTREE: &str = ".opencode";

#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace whose top-level files (and config subtree) get backed up.
    pub source_dir: PathBuf,
    /// Holds the snapshot directories, the state file and the log file.
    pub backup_root: PathBuf,
    /// User-visible directory that accumulates merged copies of every snapshot.
    pub mirror_dir: PathBuf,
    /// File-name suffixes copied from the top level of `source_dir`.
    pub extensions: Vec<String>,
    /// Directory under `source_dir` that is deep-copied when present.
    pub config_subtree: String,
    /// Number of snapshot directories kept after pruning.
    pub retention: usize,
    pub min_interval: Duration,
    pub poll_period: Duration,
    pub cooldown: Duration,
    /// How long the CPU sample blocks to average usage.
    pub sample_window: Duration,
    pub thresholds: IdleThresholds,
}

impl Default for Config {
    fn default() -> Self {
        let openwork = dirs_next::desktop_dir()
            .or_else(dirs_next::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("OpenWork");
        let source_dir = dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("com.differentai.opencode")
            .join("workspaces")
            .join("starter");
        Self {
            source_dir,
            backup_root: openwork.join("Daily_Backups"),
            mirror_dir: openwork,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            config_subtree: DEFAULT_CONFIG_SUBTREE.to_string(),
            retention: 5,
            min_interval: Duration::from_secs(12 * 60 * 60),
            poll_period: Duration::from_secs(300),
            cooldown: Duration::from_secs(60),
            sample_window: Duration::from_secs(1),
            thresholds: IdleThresholds::default(),
        }
    }
}

impl Config {
    pub fn state_file(&self) -> PathBuf {
        self.backup_root.join(STATE_FILE_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.backup_root.join(LOG_FILE_NAME)
    }

    /// Build the effective config for a parsed command line, reading the process
    /// environment and the config file.
    pub fn resolve(args: &ParsedArgs) -> Result<Self, ConfigError> {
        Self::resolve_with(args, |k| std::env::var_os(k))
    }

    pub fn resolve_with<F>(args: &ParsedArgs, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut cfg = Config::default();

        // Explicit path must exist; the default location is optional.
        let explicit = args
            .config
            .clone()
            .or_else(|| env("SMART_BACKUP_CONFIG").map(PathBuf::from));
        match explicit {
            Some(path) => cfg.apply_file(&ConfigFile::load(&path)?),
            None => {
                let path = config_path(&env);
                if path.exists() {
                    cfg.apply_file(&ConfigFile::load(&path)?);
                }
            }
        }

        if let Some(v) = env("SMART_BACKUP_SOURCE") {
            cfg.source_dir = PathBuf::from(v);
        }
        if let Some(v) = env("SMART_BACKUP_ROOT") {
            cfg.backup_root = PathBuf::from(v);
        }
        if let Some(v) = env("SMART_BACKUP_MIRROR") {
            cfg.mirror_dir = PathBuf::from(v);
        }

        if let Some(v) = &args.source {
            cfg.source_dir = v.clone();
        }
        if let Some(v) = &args.backup_root {
            cfg.backup_root = v.clone();
        }
        if let Some(v) = &args.mirror {
            cfg.mirror_dir = v.clone();
        }
        if let Some(k) = args.keep {
            cfg.retention = k;
        }
        Ok(cfg)
    }

    fn apply_file(&mut self, f: &ConfigFile) {
        if let Some(v) = &f.source_dir {
            self.source_dir = v.clone();
        }
        if let Some(v) = &f.backup_root {
            self.backup_root = v.clone();
        }
        if let Some(v) = &f.mirror_dir {
            self.mirror_dir = v.clone();
        }
        if let Some(v) = &f.extensions {
            self.extensions = v.clone();
        }
        if let Some(v) = &f.config_subtree {
            self.config_subtree = v.clone();
        }
        if let Some(v) = f.retention {
            self.retention = v;
        }
        if let Some(h) = f.min_interval_hours.filter(|h| h.is_finite()) {
            self.min_interval = Duration::from_secs_f64(h.clamp(0.0, 24.0 * 3650.0) * 3600.0);
        }
        if let Some(s) = f.poll_secs {
            self.poll_period = Duration::from_secs(s);
        }
        if let Some(s) = f.cooldown_secs {
            self.cooldown = Duration::from_secs(s);
        }
        if let Some(ms) = f.sample_window_ms {
            self.sample_window = Duration::from_millis(ms);
        }
        let t = &mut self.thresholds;
        if let Some(v) = f.max_cpu_percent {
            t.max_cpu_percent = v;
        }
        if let Some(v) = f.max_mem_percent {
            t.max_mem_percent = v;
        }
        if let Some(v) = f.max_busy_processes {
            t.max_busy_processes = v;
        }
        if let Some(v) = f.busy_process_cpu_percent {
            t.busy_process_cpu_percent = v;
        }
        if let Some(v) = f.max_net_bytes {
            t.max_net_bytes = v;
        }
    }
}

/// On-disk config; every field is optional and overrides the built-in default.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub source_dir: Option<PathBuf>,
    pub backup_root: Option<PathBuf>,
    pub mirror_dir: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub config_subtree: Option<String>,
    pub retention: Option<usize>,
    pub min_interval_hours: Option<f64>,
    pub poll_secs: Option<u64>,
    pub cooldown_secs: Option<u64>,
    pub sample_window_ms: Option<u64>,
    pub max_cpu_percent: Option<f32>,
    pub max_mem_percent: Option<f32>,
    pub max_busy_processes: Option<usize>,
    pub busy_process_cpu_percent: Option<f32>,
    pub max_net_bytes: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn config_path<F>(env: &F) -> PathBuf
where
    F: Fn(&str) -> Option<OsString>,
{
    let dir = if let Some(xdg) = env("XDG_CONFIG_HOME") {
        PathBuf::from(xdg)
    } else {
        dirs_next::config_dir().unwrap_or_else(|| PathBuf::from("."))
    };
    dir.join("smart_backup").join("config.json")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArgs {
    pub monitor: bool,
    pub source: Option<PathBuf>,
    pub backup_root: Option<PathBuf>,
    pub mirror: Option<PathBuf>,
    pub keep: Option<usize>,
    pub config: Option<PathBuf>,
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--monitor] [--source DIR|-s DIR] [--backup-root DIR|-b DIR] [--mirror DIR|-m DIR] [--keep N|-k N] [--config FILE|-c FILE]"
    )
}

/// Parse argv. `Ok(None)` means help was requested. Path values are taken as raw
/// OS strings; flags themselves must be UTF-8.
pub fn parse_args<I, T>(args: I) -> Result<Option<ParsedArgs>, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut it = args.into_iter().map(Into::<OsString>::into);
    let prog = it
        .next()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "smart_backup_agent".into());
    let mut out = ParsedArgs::default();

    let missing = |flag: &str| ConfigError::Usage(format!("{flag} needs a value\n{}", usage(&prog)));
    let unexpected =
        |arg: &OsString| ConfigError::Usage(format!("Unexpected argument {arg:?}. {}", usage(&prog)));

    while let Some(arg) = it.next() {
        let Some(text) = arg.to_str() else {
            return Err(unexpected(&arg));
        };
        let (flag, inline) = match text.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(OsString::from(v))),
            _ => (text.to_string(), None),
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "--monitor" => out.monitor = true,
            "--source" | "-s" | "--backup-root" | "-b" | "--mirror" | "-m" | "--config"
            | "-c" | "--keep" | "-k" => {
                let value = match inline.or_else(|| it.next()) {
                    Some(v) if !v.is_empty() => v,
                    _ => return Err(missing(flag.as_str())),
                };
                match flag.as_str() {
                    "--source" | "-s" => out.source = Some(PathBuf::from(value)),
                    "--backup-root" | "-b" => out.backup_root = Some(PathBuf::from(value)),
                    "--mirror" | "-m" => out.mirror = Some(PathBuf::from(value)),
                    "--config" | "-c" => out.config = Some(PathBuf::from(value)),
                    _ => {
                        let n = value
                            .to_str()
                            .and_then(|v| v.parse::<usize>().ok())
                            .ok_or_else(|| {
                                ConfigError::Usage(format!("--keep expects a number, got {value:?}"))
                            })?;
                        out.keep = Some(n);
                    }
                }
            }
            _ => return Err(unexpected(&arg)),
        }
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn argv(a: &[&str]) -> Vec<String> {
        std::iter::once("agent")
            .chain(a.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_long_short_and_assign_forms() {
        let p = parse_args(argv(&["--monitor", "-s", "/src", "--backup-root=/bk", "-k", "3"]))
            .unwrap()
            .unwrap();
        assert!(p.monitor);
        assert_eq!(p.source, Some(PathBuf::from("/src")));
        assert_eq!(p.backup_root, Some(PathBuf::from("/bk")));
        assert_eq!(p.keep, Some(3));
        assert_eq!(p.mirror, None);
    }

    #[test]
    fn help_and_errors() {
        assert!(parse_args(argv(&["--monitor", "--help"])).unwrap().is_none());
        assert!(matches!(
            parse_args(argv(&["--bogus"])),
            Err(ConfigError::Usage(_))
        ));
        assert!(matches!(
            parse_args(argv(&["--keep", "many"])),
            Err(ConfigError::Usage(_))
        ));
        assert!(matches!(parse_args(argv(&["-s"])), Err(ConfigError::Usage(_))));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_path_values_are_kept_verbatim() {
        use std::os::unix::ffi::OsStringExt;
        let raw = OsString::from_vec(vec![b'/', b's', 0xff, b'c']);
        let args = vec![OsString::from("agent"), OsString::from("--source"), raw.clone()];
        let p = parse_args(args).unwrap().unwrap();
        assert_eq!(p.source, Some(PathBuf::from(raw.clone())));

        let bad_flag = vec![OsString::from("agent"), raw];
        assert!(matches!(parse_args(bad_flag), Err(ConfigError::Usage(_))));
    }

    #[test]
    fn no_flags_means_single_run() {
        let p = parse_args(argv(&[])).unwrap().unwrap();
        assert_eq!(p, ParsedArgs::default());
    }

    #[test]
    fn layering_file_then_env_then_flags() {
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("cfg.json");
        std::fs::write(
            &file,
            r#"{ "source_dir": "/from-file", "backup_root": "/file-root", "retention": 9,
                 "poll_secs": 30, "max_cpu_percent": 25.0 }"#,
        )
        .unwrap();

        let mut env: HashMap<&str, OsString> = HashMap::new();
        env.insert("SMART_BACKUP_ROOT", "/env-root".into());
        env.insert("XDG_CONFIG_HOME", td.path().into());

        let args = ParsedArgs {
            config: Some(file),
            mirror: Some(PathBuf::from("/flag-mirror")),
            ..Default::default()
        };
        let cfg = Config::resolve_with(&args, |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.source_dir, PathBuf::from("/from-file"));
        assert_eq!(cfg.backup_root, PathBuf::from("/env-root"));
        assert_eq!(cfg.mirror_dir, PathBuf::from("/flag-mirror"));
        assert_eq!(cfg.retention, 9);
        assert_eq!(cfg.poll_period, Duration::from_secs(30));
        assert_eq!(cfg.thresholds.max_cpu_percent, 25.0);
        assert_eq!(cfg.thresholds.max_mem_percent, 60.0);
        assert_eq!(cfg.state_file(), PathBuf::from("/env-root").join(STATE_FILE_NAME));
    }

    #[test]
    fn malformed_explicit_config_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("cfg.json");
        std::fs::write(&file, "{ not json").unwrap();
        let args = ParsedArgs {
            config: Some(file),
            ..Default::default()
        };
        let err = Config::resolve_with(&args, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let missing = ParsedArgs {
            config: Some(td.path().join("nope.json")),
            ..Default::default()
        };
        assert!(matches!(
            Config::resolve_with(&missing, |_| None),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.retention, 5);
        assert_eq!(cfg.min_interval, Duration::from_secs(43_200));
        assert_eq!(cfg.poll_period, Duration::from_secs(300));
        assert_eq!(cfg.cooldown, Duration::from_secs(60));
        assert_eq!(cfg.config_subtree, ".opencode");
        assert!(cfg.backup_root.starts_with(&cfg.mirror_dir));
    }
}
