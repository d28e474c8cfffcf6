use crate::command::{CommandFactory, Context, ExecutableCommand, ExitCode};
use crate::interpreter::Factory;
use anyhow::{Context as _, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "fg" or "cd".
    fn name() -> &'static str;

    /// Executes the command against the shell's environment and job table.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        match T::execute(*self, ctx) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(ctx.err, "wsh: {e:#}")?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        if self.is_error {
            writeln!(ctx.err, "{}", self.output)?;
            Ok(1)
        } else {
            writeln!(ctx.out, "{}", self.output)?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Leave the shell, hanging up any remaining jobs.
pub struct Exit {
    #[argh(positional)]
    /// exit status of the shell. Defaults to 0.
    pub status: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let status = self.status.unwrap_or(0);
        ctx.env.should_exit = true;
        ctx.env.exit_status = status;
        Ok(status)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let env = &mut *ctx.env;
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => anyhow::bail!("cd: HOME not set"),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: {}", canonical.display()))?;
        tracing::debug!(dir = %canonical.display(), "changed directory");
        env.set_var("PWD", canonical.to_string_lossy());
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List background and stopped jobs in ascending job id order.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        ctx.jobs.list(ctx.out)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Move a job into the foreground and wait for it.
pub struct Fg {
    #[argh(positional)]
    /// job to resume. Defaults to the most recent job.
    pub job_id: Option<usize>,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        Ok(ctx.jobs.resume_foreground(self.job_id, ctx.err)?)
    }
}

#[derive(FromArgs)]
/// Continue a stopped job in the background.
pub struct Bg {
    #[argh(positional)]
    /// job to continue. Defaults to the most recent stopped job.
    pub job_id: Option<usize>,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        ctx.jobs.resume_background(self.job_id, ctx.err)?;
        Ok(0)
    }
}

/// Factories for every built-in, in dispatch order.
pub(crate) fn factories() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Jobs>::default()),
        Box::new(Factory::<Fg>::default()),
        Box::new(Factory::<Bg>::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JobControl;
    use crate::env::Environment;
    use crate::reconciler::Reconciler;
    use crate::terminal::Terminal;
    use std::collections::HashMap;
    use std::env as stdenv;
    use std::io;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    fn test_env() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
            exit_status: 0,
        }
    }

    fn test_jobs() -> JobControl {
        JobControl::new(Terminal::detached(), Reconciler::new(), None)
    }

    struct Outcome {
        code: ExitCode,
        out: String,
        err: String,
    }

    /// Dispatch `argv` through the built-in factories the way the interpreter does.
    fn run(argv: &[&str], env: &mut Environment, jobs: &mut JobControl) -> Outcome {
        let cmd = factories()
            .iter()
            .find_map(|f| f.try_create(argv[0], &argv[1..]))
            .expect("a built-in");
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = {
            let mut ctx = Context {
                env,
                jobs,
                out: &mut out,
                err: &mut err,
            };
            cmd.execute(&mut ctx).unwrap()
        };
        Outcome {
            code,
            out: String::from_utf8(out).unwrap(),
            err: String::from_utf8(err).unwrap(),
        }
    }

    fn make_unique_temp_dir() -> io::Result<PathBuf> {
        let mut p = stdenv::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("wsh_test_cd_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&p)?;
        Ok(p)
    }

    #[test]
    fn test_unknown_names_are_not_builtins() {
        assert!(
            factories()
                .iter()
                .all(|f| f.try_create("sleep", &["5"]).is_none())
        );
    }

    #[test]
    fn test_exit_defaults_to_zero() {
        let mut env = test_env();
        let res = run(&["exit"], &mut env, &mut test_jobs());
        assert_eq!(res.code, 0);
        assert!(env.should_exit);
        assert_eq!(env.exit_status, 0);
    }

    #[test]
    fn test_exit_with_status() {
        let mut env = test_env();
        let res = run(&["exit", "3"], &mut env, &mut test_jobs());
        assert_eq!(res.code, 3);
        assert!(env.should_exit);
        assert_eq!(env.exit_status, 3);
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let temp = make_unique_temp_dir().expect("failed to create temp dir");
        let canonical_temp = fs::canonicalize(&temp).expect("canonicalize failed");
        let orig = stdenv::current_dir().unwrap();

        let mut env = test_env();
        let target = canonical_temp.to_string_lossy().to_string();
        let res = run(&["cd", &target], &mut env, &mut test_jobs());

        assert_eq!(res.code, 0);
        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), canonical_temp);
        assert_eq!(env.current_dir, canonical_temp);
        assert_eq!(env.get_var("PWD"), Some(target));

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let temp = make_unique_temp_dir().expect("failed to create temp dir");
        let canonical_temp = fs::canonicalize(&temp).expect("canonicalize failed");
        let orig = stdenv::current_dir().unwrap();

        let mut env = test_env();
        env.set_var("HOME", canonical_temp.to_string_lossy().to_string());
        let res = run(&["cd"], &mut env, &mut test_jobs());

        assert_eq!(res.code, 0);
        assert_eq!(env.current_dir, canonical_temp);

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();

        let mut env = test_env();
        let name = format!("nonexistent_dir_for_wsh_test_{}", std::process::id());
        let res = run(&["cd", &name], &mut env, &mut test_jobs());

        assert_eq!(res.code, 1);
        assert!(res.err.starts_with("wsh: cd: "), "{}", res.err);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_rejects_extra_arguments() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let res = run(&["cd", "/", "/tmp"], &mut test_env(), &mut test_jobs());
        assert_eq!(res.code, 1);
        assert!(!res.err.is_empty());
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_jobs_with_empty_table_prints_nothing() {
        let res = run(&["jobs"], &mut test_env(), &mut test_jobs());
        assert_eq!(res.code, 0);
        assert!(res.out.is_empty());
        assert!(res.err.is_empty());
    }

    #[test]
    fn test_fg_unknown_job() {
        let mut jobs = test_jobs();
        let res = run(&["fg", "99"], &mut test_env(), &mut jobs);
        assert_eq!(res.code, 1);
        assert_eq!(res.err, "wsh: 99: no such job\n");
        assert!(jobs.table().is_empty());
    }

    #[test]
    fn test_bg_without_jobs() {
        let res = run(&["bg"], &mut test_env(), &mut test_jobs());
        assert_eq!(res.code, 1);
        assert_eq!(res.err, "wsh: no current job\n");
    }

    #[test]
    fn test_non_numeric_job_id_is_usage_error() {
        let res = run(&["fg", "abc"], &mut test_env(), &mut test_jobs());
        assert_eq!(res.code, 1);
        assert!(!res.err.is_empty());
        assert!(res.out.is_empty());
    }

    #[test]
    fn test_help_goes_to_stdout() {
        let res = run(&["jobs", "--help"], &mut test_env(), &mut test_jobs());
        assert_eq!(res.code, 0);
        assert!(res.out.contains("Usage: jobs"), "{}", res.out);
    }
}
