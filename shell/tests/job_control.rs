use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

struct Run {
    status: Option<i32>,
    stdout: String,
    stderr: String,
}

fn wsh() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wsh"));
    cmd.env("PATH", "/usr/bin:/bin").env_remove("WSH_LOG");
    cmd
}

fn collect(output: Output) -> Run {
    Run {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

/// Feed `script` to the shell on a pipe, as if typed line by line.
fn run_script(script: &str) -> Run {
    let mut child = wsh()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn wsh");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(script.as_bytes())
        .unwrap();
    collect(child.wait_with_output().expect("wait for wsh"))
}

/// Like `run_script`, but sleeps for `pause` between chunks so the shell sits at the prompt
/// while its jobs change state.
fn run_paced(chunks: &[&str], pause: Duration) -> Run {
    let mut child = wsh()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn wsh");
    let mut stdin = child.stdin.take().unwrap();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(pause);
        }
        stdin.write_all(chunk.as_bytes()).unwrap();
        stdin.flush().unwrap();
    }
    drop(stdin);
    collect(child.wait_with_output().expect("wait for wsh"))
}

#[test]
fn background_job_is_listed() {
    let run = run_script("sleep 2 &\njobs\n");
    assert_eq!(run.stdout, "1: sleep 2 &\n");
    assert!(run.stderr.starts_with("[1] "), "{}", run.stderr);
    assert_eq!(run.status, Some(0));
}

#[test]
fn background_ids_are_smallest_free() {
    let run = run_script("sleep 2 &\nsleep 3 &\nsleep 4 &\njobs\n");
    assert_eq!(run.stdout, "1: sleep 2 &\n2: sleep 3 &\n3: sleep 4 &\n");
}

#[test]
fn fg_unknown_job_reports_and_continues() {
    let run = run_script("sleep 2 &\nfg 99\njobs\n");
    assert!(run.stderr.contains("wsh: 99: no such job\n"), "{}", run.stderr);
    assert_eq!(run.stdout, "1: sleep 2 &\n");
}

#[test]
fn stopped_foreground_job_moves_to_table() {
    let run = run_script("sh -c 'kill -STOP $$'\njobs\nfg 1\njobs\n");
    assert!(
        run.stderr.contains("[1] Stopped sh -c kill -STOP $$\n"),
        "{}",
        run.stderr
    );
    // Listed once while stopped, gone after it finishes in the foreground.
    assert_eq!(run.stdout, "1: sh -c kill -STOP $$\n");
    assert_eq!(run.status, Some(0));
}

#[test]
fn bg_then_fg_round_trip() {
    let run = run_script("sh -c 'kill -STOP $$; sleep 1'\nbg 1\njobs\nfg 1\njobs\n");
    assert!(
        run.stderr.contains("[1] sh -c kill -STOP $$; sleep 1 &\n"),
        "{}",
        run.stderr
    );
    assert_eq!(run.stdout, "1: sh -c kill -STOP $$; sleep 1\n");
    assert!(!run.stderr.contains("wsh: "), "{}", run.stderr);
}

#[test]
fn fg_continues_job_that_stopped_at_the_prompt() {
    let run = run_paced(
        &["sh -c 'sleep 0.3; kill -STOP $$; echo resumed' &\n", "fg 1\njobs\n"],
        Duration::from_millis(1200),
    );
    assert_eq!(run.stdout, "resumed\n");
    assert!(!run.stderr.contains("Stopped"), "{}", run.stderr);
    assert_eq!(run.status, Some(0));
}

#[test]
fn bg_sees_job_that_stopped_at_the_prompt() {
    let run = run_paced(
        &[
            "sh -c 'sleep 0.3; kill -STOP $$; sleep 0.3; echo resumed' &\n",
            "bg\n",
            "\njobs\n",
        ],
        Duration::from_millis(1200),
    );
    assert!(
        run.stderr
            .contains("[1] sh -c sleep 0.3; kill -STOP $$; sleep 0.3; echo resumed &\n"),
        "{}",
        run.stderr
    );
    assert!(!run.stderr.contains("no current job"), "{}", run.stderr);
    assert!(run.stderr.contains("[1] Done sh -c"), "{}", run.stderr);
    assert_eq!(run.stdout, "resumed\n");
}

#[test]
fn exec_failure_is_reported_by_the_child() {
    use std::os::unix::fs::PermissionsExt;

    let path = std::env::temp_dir().join(format!("wsh_bad_exec_{}", std::process::id()));
    // Executable bit set, but neither a binary nor a `#!` script.
    std::fs::write(&path, "this is not a program\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    let run = run_script(&format!("{}\njobs\nexit 2\n", path.display()));
    let _ = std::fs::remove_file(&path);

    assert!(
        run.stderr.contains(&format!("{}: exec failed: ", path.display())),
        "{}",
        run.stderr
    );
    assert_eq!(run.stdout, "");
    // The shell kept going and read the remaining lines.
    assert_eq!(run.status, Some(2));
}

#[test]
fn bg_on_running_job_is_refused() {
    let run = run_script("sleep 2 &\nbg 1\n");
    assert!(
        run.stderr.contains("wsh: job 1 is already running in the background"),
        "{}",
        run.stderr
    );
}

#[test]
fn completed_background_job_is_reported_and_released() {
    let run = run_script("true &\nsleep 1\njobs\n");
    assert!(run.stderr.contains("[1] Done true\n"), "{}", run.stderr);
    assert_eq!(run.stdout, "");
}

#[test]
fn signal_termination_is_reported() {
    let run = run_script("sh -c 'kill -TERM $$'\n");
    assert!(
        run.stderr.contains(": Terminated by signal SIGTERM.\n"),
        "{}",
        run.stderr
    );
}

#[test]
fn pipeline_stages_are_connected() {
    let run = run_script("printf 'a\\nb\\nc\\n' | wc -l\n");
    assert_eq!(run.stdout.trim(), "3");
}

#[test]
fn not_executable_command() {
    let run = run_script("no_such_program_for_wsh\njobs\n");
    assert!(
        run.stderr
            .contains("wsh: no_such_program_for_wsh: command is not executable\n"),
        "{}",
        run.stderr
    );
    assert_eq!(run.stdout, "");
    assert_eq!(run.status, Some(0));
}

#[test]
fn exit_status() {
    assert_eq!(run_script("exit\n").status, Some(0));
    assert_eq!(run_script("exit 5\njobs\n").status, Some(5));
    assert_eq!(run_script("sh -c 'exit 3'\n").status, Some(0));
}

#[test]
fn remaining_jobs_are_hung_up_on_exit() {
    let started = Instant::now();
    // The sleep shares our stdout pipe, so the read only finishes once it is gone.
    let run = run_script("sleep 30 &\nsh -c 'kill -STOP $$'\n");
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(run.stderr.contains("[2] Stopped"), "{}", run.stderr);
}

#[test]
fn script_file_runs_in_batch_mode() {
    let path = std::env::temp_dir().join(format!("wsh_script_{}", std::process::id()));
    std::fs::write(&path, "sleep 2 &\njobs\nexit 7\n").unwrap();
    let run = collect(
        wsh()
            .arg(&path)
            .stdin(Stdio::null())
            .output()
            .expect("run wsh"),
    );
    let _ = std::fs::remove_file(&path);
    assert_eq!(run.stdout, "1: sleep 2 &\n");
    assert_eq!(run.status, Some(7));
}

#[test]
fn extra_positional_arguments_are_rejected() {
    let run = collect(wsh().args(["a", "b"]).output().expect("run wsh"));
    assert_eq!(run.status, Some(1));
    assert!(!run.stderr.is_empty());
}

#[test]
fn missing_script_is_an_error() {
    let run = collect(
        wsh()
            .arg("/nonexistent/wsh/script")
            .output()
            .expect("run wsh"),
    );
    assert_eq!(run.status, Some(1));
    assert!(run.stderr.starts_with("wsh: /nonexistent/wsh/script"), "{}", run.stderr);
}
