use crate::command::ExitCode;
use crate::resolve::{DEFAULT_PATH, find_command_path};
use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::{CString, OsStr};
use std::path::{Path, PathBuf};

/// Mutable, user-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: environment variables passed to every launched program.
/// - `current_dir`: the shell's working directory, inherited by children.
/// - `should_exit`: set by `exit` so the read-eval loop stops after the current line.
/// - `exit_status`: the status the shell process ends with.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
    pub exit_status: ExitCode,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars,
            current_dir,
            should_exit: false,
            exit_status: 0,
        }
    }

    /// Get the value of an environment variable.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    /// Set or override an environment variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Executable resolver: the absolute or relative path of a runnable file named `name`.
    pub fn resolve_command(&self, name: &str) -> Option<PathBuf> {
        let search_paths = self.get_var("PATH").unwrap_or_else(|| DEFAULT_PATH.to_string());
        let path = Path::new(name);
        if path.is_relative() && path.components().count() > 1 {
            let joined = self.current_dir.join(path);
            return find_command_path(OsStr::new(&search_paths), &joined).map(|p| p.into_owned());
        }
        find_command_path(OsStr::new(&search_paths), path).map(|p| p.into_owned())
    }

    /// `KEY=value` strings for `execve`. Entries containing NUL bytes are skipped.
    pub fn envp(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_env() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
            exit_status: 0,
        }
    }

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = empty_env();
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);
        env.set_var("KEY", "VALUE");
        assert_eq!(env.get_var("KEY"), Some("VALUE".to_string()));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
        assert!(!env.should_exit);
    }

    #[test]
    fn envp_renders_pairs() {
        let mut env = empty_env();
        env.set_var("A", "1");
        env.set_var("BAD", "x\0y");
        let envp = env.envp();
        assert_eq!(envp, vec![CString::new("A=1").unwrap()]);
    }

    #[test]
    fn resolve_falls_back_to_default_path() {
        let env = empty_env();
        let found = env.resolve_command("sh").expect("sh on the default path");
        assert!(found.ends_with("sh"));
        assert!(env.resolve_command("no_such_command_for_wsh").is_none());
    }

    #[test]
    fn resolve_relative_paths_against_current_dir() {
        let mut env = empty_env();
        env.current_dir = PathBuf::from("/");
        let found = env.resolve_command("bin/sh").expect("/bin/sh via relative path");
        assert_eq!(found, PathBuf::from("/bin/sh"));
    }
}
