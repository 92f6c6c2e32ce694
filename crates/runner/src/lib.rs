//! Process supervisor for the relay binaries.
//!
//! A [`Runner`] owns a set of long-running app processes and a set of closers:
//! - every process runs concurrently on a shared [`CancellationToken`]
//! - SIGINT/SIGTERM, or the first process error, cancels all of them
//! - closers run afterward under a timeout, whatever the outcome
//!
//! # Example
//!
//! ```no_run
//! use mybus_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("tick");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A boxed app process: takes the shared cancellation token and runs until
/// it is cancelled or fails.
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// A boxed cleanup function run once after all processes stop.
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Every process stopped cleanly (normally after a shutdown signal)
    Stopped,
    /// A process failed; carries its name and error
    Failed { process: String, error: anyhow::Error },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

struct NamedProcess {
    name: String,
    process: AppProcess,
}

pub struct Runner {
    app_processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// A runner with a 10 second closer timeout and OS signal handling on
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    /// Adds an app process. If any process returns an error, all processes
    /// are cancelled and closers are executed.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let index = self.app_processes.len();
        self.with_named_process(format!("process-{index}"), process)
    }

    /// Adds an app process under a name used in shutdown logs
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Adds an already boxed process, as returned by the `into_runner_process`
    /// helpers of the service crates
    pub fn with_boxed_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.app_processes.push(NamedProcess {
            name: name.into(),
            process,
        });
        self
    }

    /// Adds a closer. Closers run after every process has stopped, and all of
    /// them are attempted even if some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, e.g. to stop the runner from a test
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Disable SIGINT/SIGTERM handling
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Run until shutdown, execute closers, then exit the process with code 0
    /// on a clean stop and 1 on a process failure.
    pub async fn run(self) {
        match self.run_until_stopped().await {
            RunOutcome::Stopped => {
                tracing::info!("Application exiting normally");
                std::process::exit(0);
            }
            RunOutcome::Failed { process, error } => {
                tracing::error!(process = %process, "Application exiting with error: {:#}", error);
                std::process::exit(1);
            }
        }
    }

    /// Run every process until cancellation or the first failure, then run
    /// the closers. Does not exit the process.
    pub async fn run_until_stopped(self) -> RunOutcome {
        let token = self.cancellation_token;
        let closer_timeout = self.closer_timeout;
        let closers = self.closers;

        let mut join_set = JoinSet::new();
        for NamedProcess { name, process } in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                tracing::debug!(process = %name, "starting app process");
                let result = process(process_token).await;
                (name, result)
            });
        }

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut outcome = RunOutcome::Stopped;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(process = %name, "app process completed");
                }
                Ok((name, Err(error))) => {
                    if !token.is_cancelled() {
                        tracing::error!(process = %name, "app process error: {:#}", error);
                        outcome = RunOutcome::Failed {
                            process: name,
                            error,
                        };
                        token.cancel();
                    } else {
                        tracing::warn!(process = %name, "app process error during shutdown: {:#}", error);
                    }
                }
                Err(err) => {
                    tracing::error!("app process panicked: {}", err);
                    if !token.is_cancelled() {
                        outcome = RunOutcome::Failed {
                            process: "unknown".to_string(),
                            error: anyhow::anyhow!("app process panicked: {err}"),
                        };
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // let the remaining processes observe the cancellation and finish
        while let Some(joined) = join_set.join_next().await {
            if let Ok((name, Err(error))) = joined {
                tracing::warn!(process = %name, "app process error during shutdown: {:#}", error);
            }
        }

        if !closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", closer_timeout);
            match tokio::time::timeout(closer_timeout, run_closers(closers)).await {
                Ok(()) => tracing::info!("All closers completed"),
                Err(_) => tracing::error!("Closers timed out after {:?}", closer_timeout),
            }
        }

        outcome
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                tracing::error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
                token.cancel();
            }
            Err(err) => {
                tracing::error!("Error setting up SIGTERM handler: {}", err);
            }
        }
    });
}

async fn run_closers(closers: Vec<Closer>) {
    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(async move { closer().await });
    }

    while let Some(result) = closer_set.join_next().await {
        match result {
            Ok(Ok(())) => tracing::debug!("Closer completed successfully"),
            Ok(Err(err)) => tracing::error!("Closer error: {:#}", err),
            Err(err) => tracing::error!("Closer panicked: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn wait_for_cancel(ctx: CancellationToken) -> Result<(), anyhow::Error> {
        ctx.cancelled().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_processes_and_runs_closers() {
        let closer_called = Arc::new(AtomicBool::new(false));
        let flag = closer_called.clone();
        let token = CancellationToken::new();

        let runner = Runner::new()
            .without_signal_handlers()
            .with_named_process("a", wait_for_cancel)
            .with_named_process("b", wait_for_cancel)
            .with_closer(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token.clone());

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        let outcome = runner.run_until_stopped().await;
        assert!(matches!(outcome, RunOutcome::Stopped));
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_process_cancels_siblings() {
        let sibling_stopped = Arc::new(AtomicBool::new(false));
        let flag = sibling_stopped.clone();

        let outcome = Runner::new()
            .without_signal_handlers()
            .with_named_process("sibling", move |ctx| async move {
                ctx.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_named_process("broken", |_ctx| async move {
                Err(anyhow::anyhow!("feed closed"))
            })
            .run_until_stopped()
            .await;

        match outcome {
            RunOutcome::Failed { process, error } => {
                assert_eq!(process, "broken");
                assert_eq!(error.to_string(), "feed closed");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(sibling_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_all_closers_run_even_when_one_fails() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = counter.clone();
        let second = counter.clone();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = Runner::new()
            .without_signal_handlers()
            .with_cancellation_token(token)
            .with_app_process(wait_for_cancel)
            .with_closer(move || async move {
                first.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("flush failed"))
            })
            .with_closer(move || async move {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .with_closer_timeout(Duration::from_secs(1))
            .run_until_stopped()
            .await;

        assert!(!outcome.is_failure());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_closers_are_abandoned_after_timeout() {
        let token = CancellationToken::new();
        token.cancel();

        let started = std::time::Instant::now();
        Runner::new()
            .without_signal_handlers()
            .with_cancellation_token(token)
            .with_closer(|| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .with_closer_timeout(Duration::from_millis(50))
            .run_until_stopped()
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
