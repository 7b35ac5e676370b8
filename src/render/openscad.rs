use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{RenderJob, Renderer};
use crate::error::RenderFailureKind;

/// Replaces OpenSCAD's `color()` module so that only the children painted
/// with `render_color` are emitted.
const COLOR_FILTER_MODULE: &str =
    "module color(c, alpha = 1.0) { if (str(c) == render_color) children(); }";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Renders one color by running OpenSCAD as a subprocess.
#[derive(Debug, Clone)]
pub struct OpenScadRenderer {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl OpenScadRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the render arguments, for launchers such as
    /// `flatpak run org.openscad.OpenSCAD`.
    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list for `job`, excluding the program itself.
    pub fn command_args(&self, job: &RenderJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        args.push("-o".into());
        args.push(job.output_path.clone().into_os_string());
        args.push("-D".into());
        args.push(format!("render_color=\"{}\"", escape_scad_string(&job.color.token)).into());
        args.push("-D".into());
        args.push(COLOR_FILTER_MODULE.into());
        args.push(job.model_path.clone().into_os_string());
        args
    }
}

impl Renderer for OpenScadRenderer {
    fn render(&self, job: &RenderJob, timeout: Duration) -> Result<(), RenderFailureKind> {
        let args = self.command_args(job);
        debug!(
            "Running: {} {}",
            self.program.display(),
            args.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                RenderFailureKind::Spawn(format!("{}: {err}", self.program.display()))
            })?;

        // Drain stderr on a side thread so a chatty renderer can't fill the
        // pipe and stall. A grandchild may keep the pipe open after the
        // renderer exits, so the result is only awaited for a short grace
        // period.
        let stderr_output = child.stderr.take().map(|mut stderr| {
            let (sender, receiver) = crossbeam_channel::bounded(1);
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer);
                let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
            });
            receiver
        });

        let status = wait_with_deadline(&mut child, timeout);
        let stderr = match (&status, stderr_output) {
            (WaitResult::TimedOut, _) | (_, None) => String::new(),
            (_, Some(receiver)) => receiver.recv_timeout(STDERR_GRACE).unwrap_or_else(|_| {
                warn!("renderer for '{}' left its stderr open; output dropped", job.color.token);
                String::new()
            }),
        };
        if !stderr.trim().is_empty() {
            debug!("renderer output for '{}':\n{}", job.color.token, stderr.trim_end());
        }

        match status {
            WaitResult::Exited(status) if status.success() => Ok(()),
            WaitResult::Exited(status) => Err(RenderFailureKind::ExitStatus {
                code: status.code(),
                stderr: last_lines(&stderr, 5),
            }),
            WaitResult::TimedOut => Err(RenderFailureKind::Timeout(timeout)),
            WaitResult::WaitFailed(message) => Err(RenderFailureKind::Spawn(message)),
        }
    }
}

enum WaitResult {
    Exited(std::process::ExitStatus),
    TimedOut,
    WaitFailed(String),
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> WaitResult {
    // A timeout too large to represent means no deadline at all.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitResult::Exited(status),
            Ok(None) if deadline.is_some_and(|deadline| Instant::now() >= deadline) => {
                if let Err(err) = child.kill() {
                    warn!("unable to terminate renderer process {}: {err}", child.id());
                }
                let _ = child.wait();
                return WaitResult::TimedOut;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return WaitResult::WaitFailed(format!("unable to wait for renderer: {err}"));
            }
        }
    }
}

fn escape_scad_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ResolvedColor, Rgba};

    fn job(token: &str, output: PathBuf) -> RenderJob {
        RenderJob {
            index: 0,
            color: ResolvedColor {
                token: token.to_string(),
                rgba: Rgba::new(1.0, 0.0, 0.0, 1.0),
            },
            model_path: PathBuf::from("model.scad"),
            output_path: output,
        }
    }

    #[test]
    fn command_line_matches_openscad_conventions() {
        let renderer = OpenScadRenderer::new("openscad");
        let args = renderer.command_args(&job("red", PathBuf::from("/tmp/red.3mf")));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-o",
                "/tmp/red.3mf",
                "-D",
                "render_color=\"red\"",
                "-D",
                COLOR_FILTER_MODULE,
                "model.scad",
            ]
        );
    }

    #[test]
    fn tokens_are_escaped_and_leading_args_come_first() {
        let renderer = OpenScadRenderer::new("flatpak").with_leading_args(["run", "org.openscad.OpenSCAD"]);
        let args = renderer.command_args(&job("a\"b\\c", PathBuf::from("out.3mf")));
        assert_eq!(args[0], "run");
        assert_eq!(args[1], "org.openscad.OpenSCAD");
        assert_eq!(args[5], "render_color=\"a\\\"b\\\\c\"");
    }

    #[test]
    fn last_lines_keeps_tail() {
        assert_eq!(last_lines("a\n\nb\nc\n", 2), "b\nc");
        assert_eq!(last_lines("", 3), "");
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use tempfile::TempDir;

        fn shell(script: &str) -> OpenScadRenderer {
            OpenScadRenderer::new("/bin/sh").with_leading_args(["-c", script, "renderer"])
        }

        #[test]
        fn successful_render_writes_output() {
            let dir = TempDir::new().unwrap();
            let out = dir.path().join("red.3mf");
            // $2 is the output path after "-o".
            let renderer = shell(r#"printf data > "$2""#);
            renderer
                .render(&job("red", out.clone()), Duration::from_secs(10))
                .unwrap();
            assert_eq!(std::fs::read(out).unwrap(), b"data");
        }

        #[test]
        fn nonzero_exit_reports_code_and_stderr() {
            let dir = TempDir::new().unwrap();
            let renderer = shell("echo 'ERROR: boom' >&2; exit 3");
            let err = renderer
                .render(&job("red", dir.path().join("x.3mf")), Duration::from_secs(10))
                .unwrap_err();
            assert_eq!(
                err,
                RenderFailureKind::ExitStatus {
                    code: Some(3),
                    stderr: "ERROR: boom".into()
                }
            );
        }

        #[test]
        fn slow_render_is_killed_at_deadline() {
            let dir = TempDir::new().unwrap();
            let renderer = shell("exec sleep 30");
            let started = Instant::now();
            let err = renderer
                .render(&job("red", dir.path().join("x.3mf")), Duration::from_millis(200))
                .unwrap_err();
            assert_eq!(err, RenderFailureKind::Timeout(Duration::from_millis(200)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn huge_timeout_means_no_deadline() {
            let dir = TempDir::new().unwrap();
            let out = dir.path().join("red.3mf");
            let renderer = shell(r#"printf data > "$2""#);
            renderer
                .render(&job("red", out.clone()), Duration::from_secs(u64::MAX))
                .unwrap();
            assert!(out.exists());
        }

        #[test]
        fn lingering_grandchild_does_not_hold_up_the_result() {
            let dir = TempDir::new().unwrap();
            // The background sleep inherits stderr and keeps it open after
            // the shell exits.
            let renderer = shell("sleep 30 & echo 'ERROR: boom' >&2; exit 1");
            let started = Instant::now();
            let err = renderer
                .render(&job("red", dir.path().join("x.3mf")), Duration::from_secs(10))
                .unwrap_err();
            assert!(matches!(err, RenderFailureKind::ExitStatus { code: Some(1), .. }));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn missing_program_is_a_spawn_error() {
            let dir = TempDir::new().unwrap();
            let renderer = OpenScadRenderer::new(dir.path().join("no-such-openscad"));
            let err = renderer
                .render(&job("red", dir.path().join("x.3mf")), Duration::from_secs(1))
                .unwrap_err();
            assert!(matches!(err, RenderFailureKind::Spawn(_)));
        }
    }
}
