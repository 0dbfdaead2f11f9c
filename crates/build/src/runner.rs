//! Subprocess plumbing for toolchain invocations.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;

/// Result of a finished toolchain command.
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit status of the child.
    pub status: ExitStatus,
    /// stdout followed by stderr, lossily decoded and trimmed.
    pub combined: String,
}

/// Invocation of one external program.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// Absolute path of the executable.
    pub program: &'a Path,
    pub args: &'a [OsString],
    pub cwd: &'a Path,
    /// Added on top of the inherited environment.
    pub env: &'a [(&'static str, &'static str)],
}

/// Runs a program to completion, capturing stdout and stderr concurrently.
///
/// The child is killed if this future is dropped, so a cancelled build never
/// leaves a compiler running.
pub async fn run_capture(inv: &Invocation<'_>) -> std::io::Result<CommandOutput> {
    let mut child = tokio::process::Command::new(inv.program)
        .args(inv.args)
        .current_dir(inv.cwd)
        .envs(inv.env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out = Vec::new();
    let mut err = Vec::new();

    let out_fut = async {
        if let Some(ref mut s) = stdout {
            let _ = s.read_to_end(&mut out).await;
        }
    };
    let err_fut = async {
        if let Some(ref mut s) = stderr {
            let _ = s.read_to_end(&mut err).await;
        }
    };

    let (_, _, status) = tokio::join!(out_fut, err_fut, child.wait());
    let status = status?;

    out.extend_from_slice(&err);
    Ok(CommandOutput {
        status,
        combined: String::from_utf8_lossy(&out).trim().to_string(),
    })
}

/// Finds an executable named `name` on a `PATH`-style search list.
pub fn find_in_path(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_in_path_skips_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let search = std::env::join_paths([Path::new("/definitely/not/here"), dir.path()]).unwrap();
        assert_eq!(find_in_path("nope", &search), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec![
            OsString::from("-c"),
            OsString::from("echo out; echo err 1>&2; exit 3"),
        ];
        let out = run_capture(&Invocation {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: dir.path(),
            env: &[],
        })
        .await
        .unwrap();
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.combined, "out\nerr");
    }
}
