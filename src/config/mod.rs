//! Layered key/value configuration: defaults, `kernelrc`, environment.

use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use directories::BaseDirs;
use tracing::{debug, warn};

pub const HISTORY_FILE_NAME: &str = "scilab_kernel.hist";
pub const DEFAULT_HISTORY_LENGTH: usize = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    pub fn load_from(config_path: &Path) -> Self {
        let mut map = default_map();

        if config_path.exists() {
            match fs::File::open(config_path) {
                Ok(file) => {
                    debug!(path = %config_path.display(), "reading kernelrc");
                    parse_rc(BufReader::new(file), &mut map);
                }
                Err(err) => warn!(path = %config_path.display(), %err, "cannot open kernelrc"),
            }
        }

        // Environment takes precedence over the rc file
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path: config_path.to_path_buf() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from)
    }

    pub fn executable(&self) -> PathBuf {
        self.get_path("SCILAB_EXECUTABLE").unwrap_or_else(|| PathBuf::from("scilab-cli"))
    }

    pub fn version_executable(&self) -> PathBuf {
        self.get_path("SCILAB_VERSION_EXECUTABLE").unwrap_or_else(|| PathBuf::from("scilab"))
    }

    pub fn engine_args(&self) -> Vec<String> {
        self.get("SCILAB_ENGINE_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn startup_timeout_secs(&self) -> u64 {
        self.get("SCILAB_STARTUP_TIMEOUT")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(60)
    }

    pub fn history_length(&self) -> usize {
        self.get_usize("SCILAB_KERNEL_HIST_LENGTH").unwrap_or(DEFAULT_HISTORY_LENGTH)
    }

    /// Explicit log filter; `None` defers to `RUST_LOG`.
    pub fn log_level(&self) -> Option<String> {
        self.get("SCILAB_KERNEL_LOG").filter(|v| !v.trim().is_empty())
    }

    /// History file location: explicit key first, then the notebook profile.
    ///
    /// Returns `None` when no profile directory exists, which disables
    /// persistence for the lifetime of the kernel.
    pub fn history_file(&self) -> Option<PathBuf> {
        if let Some(p) = self.get_path("SCILAB_KERNEL_HIST_FILE") {
            return Some(p);
        }
        match self.profile_dir() {
            Some(dir) if dir.is_dir() => Some(dir.join(HISTORY_FILE_NAME)),
            Some(dir) => {
                warn!(profile = %dir.display(), "No default profile found, history unavailable");
                None
            }
            None => {
                warn!("No home directory found, history unavailable");
                None
            }
        }
    }

    fn profile_dir(&self) -> Option<PathBuf> {
        let root = match self.get_path("IPYTHONDIR") {
            Some(p) => p,
            None => BaseDirs::new()?.home_dir().join(".ipython"),
        };
        Some(root.join("profile_default"))
    }
}

fn parse_rc(reader: impl BufRead, map: &mut HashMap<String, String>) {
    for line in reader.lines().map_while(Result::ok) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "SCILAB_EXECUTABLE",
        "SCILAB_ENGINE_ARGS",
        "SCILAB_VERSION_EXECUTABLE",
        "SCILAB_STARTUP_TIMEOUT",
        "IPYTHONDIR",
    ];

    KEYS.contains(&k) || k.starts_with("SCILAB_KERNEL_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("scilab_kernel").join("kernelrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    m.insert("SCILAB_EXECUTABLE".into(), "scilab-cli".into());
    m.insert("SCILAB_ENGINE_ARGS".into(), "-nwni".into());
    m.insert("SCILAB_VERSION_EXECUTABLE".into(), "scilab".into());
    m.insert("SCILAB_STARTUP_TIMEOUT".into(), "60".into());
    m.insert("SCILAB_KERNEL_HIST_LENGTH".into(), DEFAULT_HISTORY_LENGTH.to_string());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc_lines_override_defaults_and_skip_comments() {
        let mut map = default_map();
        let rc = "# engine\nSCILAB_EXECUTABLE = /opt/scilab/bin/scilab-cli\n\nbogus line\nSCILAB_KERNEL_HIST_LENGTH=10\n";
        parse_rc(rc.as_bytes(), &mut map);

        assert_eq!(map["SCILAB_EXECUTABLE"], "/opt/scilab/bin/scilab-cli");
        assert_eq!(map["SCILAB_KERNEL_HIST_LENGTH"], "10");
        assert!(!map.contains_key("bogus line"));
    }

    #[test]
    fn explicit_history_file_wins_over_profile() {
        let mut cfg = Config { inner: default_map(), config_path: PathBuf::new() };
        cfg.set("SCILAB_KERNEL_HIST_FILE", "/tmp/kernel.hist");
        assert_eq!(cfg.history_file(), Some(PathBuf::from("/tmp/kernel.hist")));
    }

    #[test]
    fn missing_profile_disables_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config { inner: default_map(), config_path: PathBuf::new() };
        cfg.set("IPYTHONDIR", dir.path().to_string_lossy());
        assert_eq!(cfg.history_file(), None);

        std::fs::create_dir(dir.path().join("profile_default")).unwrap();
        assert_eq!(
            cfg.history_file(),
            Some(dir.path().join("profile_default").join(HISTORY_FILE_NAME))
        );
    }

    #[test]
    fn engine_args_split_on_whitespace() {
        let mut cfg = Config { inner: default_map(), config_path: PathBuf::new() };
        assert_eq!(cfg.engine_args(), vec!["-nwni".to_string()]);
        cfg.set("SCILAB_ENGINE_ARGS", "-nwni  -quit");
        assert_eq!(cfg.engine_args(), vec!["-nwni".to_string(), "-quit".to_string()]);
        assert_eq!(cfg.history_length(), DEFAULT_HISTORY_LENGTH);
        assert_eq!(cfg.log_level(), None);
    }
}
