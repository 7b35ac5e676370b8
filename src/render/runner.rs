use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::{RenderJob, RenderOutcome, Renderer};
use crate::error::RenderFailureKind;

/// Runs render jobs on a fixed-size pool of worker threads.
///
/// Outcomes come back in job order no matter which job finishes first.
pub struct RenderJobRunner<'r, R: ?Sized> {
    renderer: &'r R,
    concurrency: usize,
    timeout: Duration,
    cancel_on_failure: bool,
}

impl<'r, R: Renderer + ?Sized> RenderJobRunner<'r, R> {
    pub fn new(renderer: &'r R, concurrency: usize, timeout: Duration) -> Self {
        Self {
            renderer,
            concurrency: concurrency.max(1),
            timeout,
            cancel_on_failure: false,
        }
    }

    /// When set, jobs still queued after a failure are reported as skipped
    /// instead of being started. Jobs already running are never interrupted.
    pub fn cancel_on_failure(mut self, cancel: bool) -> Self {
        self.cancel_on_failure = cancel;
        self
    }

    pub fn run(&self, jobs: Vec<RenderJob>) -> Vec<RenderOutcome> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let workers = self.concurrency.min(jobs.len());
        let (sender, receiver) = crossbeam_channel::unbounded();
        for (slot, job) in jobs.iter().cloned().enumerate() {
            // The receiver is alive in this scope, so sending cannot fail.
            let _ = sender.send((slot, job));
        }
        drop(sender);

        let slots: Mutex<Vec<Option<RenderOutcome>>> = Mutex::new(vec![None; jobs.len()]);
        let failed = AtomicBool::new(false);
        info!(
            "Rendering {} color(s) with {workers} worker(s)",
            jobs.len()
        );

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let receiver = receiver.clone();
                    let slots = &slots;
                    let failed = &failed;
                    scope.spawn(move || self.work(receiver, slots, failed))
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    error!("render worker panicked");
                }
            }
        });

        slots
            .into_inner()
            .into_iter()
            .zip(jobs)
            .map(|(slot, job)| {
                slot.unwrap_or_else(|| {
                    RenderOutcome::failed(
                        job,
                        RenderFailureKind::Spawn("render worker exited before finishing".into()),
                    )
                })
            })
            .collect()
    }

    fn work(
        &self,
        receiver: Receiver<(usize, RenderJob)>,
        slots: &Mutex<Vec<Option<RenderOutcome>>>,
        failed: &AtomicBool,
    ) {
        while let Ok((slot, job)) = receiver.recv() {
            let outcome = if self.cancel_on_failure && failed.load(Ordering::Acquire) {
                RenderOutcome::failed(job, RenderFailureKind::Skipped)
            } else {
                self.execute(job)
            };
            if let Some(kind) = &outcome.error {
                if !matches!(kind, RenderFailureKind::Skipped) {
                    warn!("render for color '{}' failed: {kind}", outcome.job.color.token);
                }
                failed.store(true, Ordering::Release);
            }
            slots.lock()[slot] = Some(outcome);
        }
    }

    fn execute(&self, job: RenderJob) -> RenderOutcome {
        info!(
            "Generating {} for color '{}'",
            job.output_path.display(),
            job.color.token
        );
        // Only a file written by this render may count as its output.
        match fs::remove_file(&job.output_path) {
            Ok(()) => debug!("removed stale {}", job.output_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                let reason = format!(
                    "unable to clear previous output {}: {err}",
                    job.output_path.display()
                );
                return RenderOutcome::failed(job, RenderFailureKind::Spawn(reason));
            }
        }
        if let Err(kind) = self.renderer.render(&job, self.timeout) {
            return RenderOutcome::failed(job, kind);
        }
        match fs::metadata(&job.output_path) {
            Ok(meta) if meta.len() > 0 => RenderOutcome::succeeded(job),
            Ok(_) => {
                let path = job.output_path.clone();
                RenderOutcome::failed(job, RenderFailureKind::EmptyOutput(path))
            }
            Err(_) => {
                let path = job.output_path.clone();
                RenderOutcome::failed(job, RenderFailureKind::MissingOutput(path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ResolvedColor, Rgba};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Writes a few bytes to the output path, sleeping longer for earlier
    /// jobs so completion order is the reverse of submission order.
    struct FakeRenderer {
        fail: HashSet<String>,
        write_empty: HashSet<String>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        delay_ms: u64,
    }

    impl FakeRenderer {
        fn new() -> Self {
            Self {
                fail: HashSet::new(),
                write_empty: HashSet::new(),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay_ms: 5,
            }
        }

        fn failing(mut self, token: &str) -> Self {
            self.fail.insert(token.to_string());
            self
        }
    }

    impl Renderer for FakeRenderer {
        fn render(&self, job: &RenderJob, _timeout: Duration) -> Result<(), RenderFailureKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(self.delay_ms * (8 - job.index as u64 % 8)));
            self.active.fetch_sub(1, Ordering::SeqCst);

            let token = &job.color.token;
            if self.fail.contains(token) {
                return Err(RenderFailureKind::ExitStatus {
                    code: Some(1),
                    stderr: String::new(),
                });
            }
            let contents: &[u8] = if self.write_empty.contains(token) { b"" } else { b"3mf" };
            fs::write(&job.output_path, contents).unwrap();
            Ok(())
        }
    }

    fn jobs(dir: &TempDir, tokens: &[&str]) -> Vec<RenderJob> {
        tokens
            .iter()
            .enumerate()
            .map(|(index, token)| RenderJob {
                index,
                color: ResolvedColor {
                    token: token.to_string(),
                    rgba: Rgba::new(0.0, 0.0, 0.0, 1.0),
                },
                model_path: PathBuf::from("model.scad"),
                output_path: dir.path().join(format!("color-{index:03}.3mf")),
            })
            .collect()
    }

    const TOKENS: [&str; 6] = ["red", "green", "blue", "cyan", "magenta", "yellow"];

    #[test]
    fn outcomes_follow_job_order() {
        let dir = TempDir::new().unwrap();
        let renderer = FakeRenderer::new();
        let outcomes = RenderJobRunner::new(&renderer, 4, Duration::from_secs(5))
            .run(jobs(&dir, &TOKENS));
        let tokens: Vec<&str> = outcomes.iter().map(|o| o.job.color.token.as_str()).collect();
        assert_eq!(tokens, TOKENS);
        assert!(outcomes.iter().all(RenderOutcome::success));
    }

    #[test]
    fn concurrency_is_bounded() {
        let dir = TempDir::new().unwrap();
        let renderer = FakeRenderer::new();
        RenderJobRunner::new(&renderer, 2, Duration::from_secs(5)).run(jobs(&dir, &TOKENS));
        assert!(renderer.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), TOKENS.len());
    }

    #[test]
    fn zero_concurrency_still_runs_serially() {
        let dir = TempDir::new().unwrap();
        let renderer = FakeRenderer::new();
        let outcomes =
            RenderJobRunner::new(&renderer, 0, Duration::from_secs(5)).run(jobs(&dir, &TOKENS[..2]));
        assert_eq!(outcomes.len(), 2);
        assert_eq!(renderer.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_does_not_cancel_siblings_by_default() {
        let dir = TempDir::new().unwrap();
        let renderer = FakeRenderer::new().failing("red");
        let outcomes =
            RenderJobRunner::new(&renderer, 1, Duration::from_secs(5)).run(jobs(&dir, &TOKENS));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), TOKENS.len());
        assert!(!outcomes[0].success());
        assert!(outcomes[1..].iter().all(RenderOutcome::success));
    }

    #[test]
    fn cancel_on_failure_skips_queued_jobs() {
        let dir = TempDir::new().unwrap();
        let renderer = FakeRenderer::new().failing("red");
        let outcomes = RenderJobRunner::new(&renderer, 1, Duration::from_secs(5))
            .cancel_on_failure(true)
            .run(jobs(&dir, &TOKENS));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert!(outcomes[1..]
            .iter()
            .all(|o| o.error == Some(RenderFailureKind::Skipped)));
    }

    #[test]
    fn missing_or_empty_output_is_a_failure() {
        let dir = TempDir::new().unwrap();

        struct Silent;
        impl Renderer for Silent {
            fn render(&self, _: &RenderJob, _: Duration) -> Result<(), RenderFailureKind> {
                Ok(())
            }
        }
        let outcomes = RenderJobRunner::new(&Silent, 2, Duration::from_secs(5))
            .run(jobs(&dir, &["red"]));
        assert!(matches!(outcomes[0].error, Some(RenderFailureKind::MissingOutput(_))));

        let mut renderer = FakeRenderer::new();
        renderer.write_empty.insert("blue".into());
        let outcomes = RenderJobRunner::new(&renderer, 2, Duration::from_secs(5))
            .run(jobs(&dir, &["blue"]));
        assert!(matches!(outcomes[0].error, Some(RenderFailureKind::EmptyOutput(_))));
    }

    #[test]
    fn leftover_file_does_not_count_as_output() {
        let dir = TempDir::new().unwrap();

        struct Silent;
        impl Renderer for Silent {
            fn render(&self, _: &RenderJob, _: Duration) -> Result<(), RenderFailureKind> {
                Ok(())
            }
        }
        let jobs = jobs(&dir, &["red"]);
        fs::write(&jobs[0].output_path, b"archive from an earlier run").unwrap();

        let outcomes = RenderJobRunner::new(&Silent, 1, Duration::from_secs(5)).run(jobs);
        assert!(matches!(outcomes[0].error, Some(RenderFailureKind::MissingOutput(_))));
        assert!(!outcomes[0].job.output_path.exists());
    }

    #[test]
    fn no_jobs_no_outcomes() {
        let renderer = FakeRenderer::new();
        let outcomes = RenderJobRunner::new(&renderer, 4, Duration::from_secs(5)).run(Vec::new());
        assert!(outcomes.is_empty());
    }
}
