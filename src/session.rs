//! The operator-facing command loop.
//!
//! [`SessionLoop`] owns the browser session for its whole lifetime. It
//! bootstraps the start page, reads one command at a time from a
//! [`CommandSource`], decomposes paragraphs into steps and runs each step
//! through synthesis and execution. The session is terminated on every exit
//! path, including errors.

use std::collections::VecDeque;
use std::future::{self, Future};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::time::sleep;

use crate::browser::{BrowserSession, SessionError};
use crate::config::{CommandMode, HelmsmanConfig, Timings};
use crate::decomposer::InstructionDecomposer;
use crate::executor::ActionExecutor;
use crate::llm::{ChatCompletionProvider, MetricsCallback, ModelClient};
use crate::logging::{CATEGORY_SESSION, HelmsmanLogger};
use crate::metrics::HelmsmanMetrics;
use crate::obstacles::ObstacleHandler;
use crate::resolver::ElementResolver;
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::synthesizer::ActionSynthesizer;
use crate::types::{Command, ExecutionResult, Step};

#[derive(Debug, Error)]
pub enum SessionLoopError {
    #[error("failed to prepare output directory: {0}")]
    OutputDir(#[from] SnapshotError),
    #[error("failed to open start page {url}: {source}")]
    Navigate {
        url: String,
        #[source]
        source: SessionError,
    },
    #[error("failed to read operator command: {0}")]
    Input(#[from] io::Error),
    #[error("failed to terminate browser session: {0}")]
    Terminate(#[source] SessionError),
    #[error("session already terminated")]
    AlreadyTerminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Bootstrapping,
    AwaitingCommand,
    Decomposing,
    ExecutingStep,
    ObstacleCheck,
    Terminated,
}

/// Where operator commands come from. `Ok(None)` means end of input.
#[async_trait]
pub trait CommandSource: Send {
    async fn next_command(&mut self) -> io::Result<Option<String>>;
}

/// Reads commands from standard input behind a `> ` prompt.
pub struct StdinCommands {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinCommands {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinCommands {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandSource for StdinCommands {
    async fn next_command(&mut self) -> io::Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        self.lines.next_line().await
    }
}

/// A fixed list of commands, for scripted runs and tests.
#[derive(Debug, Default, Clone)]
pub struct ScriptedCommands {
    lines: VecDeque<String>,
}

impl ScriptedCommands {
    pub fn new<I, T>(lines: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CommandSource for ScriptedCommands {
    async fn next_command(&mut self) -> io::Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// Summary returned when the loop terminates.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub commands: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub aborted_commands: usize,
    pub pages_described: usize,
    /// The loop was stopped by a shutdown signal rather than by the operator.
    pub interrupted: bool,
    pub metrics: HelmsmanMetrics,
}

pub struct SessionLoop<S: BrowserSession, P: ChatCompletionProvider> {
    session: S,
    start_url: String,
    exit_keyword: String,
    describe_keyword: String,
    command_mode: CommandMode,
    timings: Timings,
    snapshots: Arc<SnapshotStore>,
    obstacles: Arc<ObstacleHandler>,
    executor: ActionExecutor,
    synthesizer: ActionSynthesizer<P>,
    decomposer: InstructionDecomposer<P>,
    metrics: Arc<Mutex<HelmsmanMetrics>>,
    report: SessionReport,
    state: LoopState,
    logger: Arc<HelmsmanLogger>,
}

impl<S: BrowserSession, P: ChatCompletionProvider> SessionLoop<S, P> {
    /// Wire every component around `session` and `client`. Any metrics
    /// callback already on the client is replaced by the loop's own.
    pub fn new(
        config: &HelmsmanConfig,
        session: S,
        client: ModelClient<P>,
        logger: Arc<HelmsmanLogger>,
    ) -> Self {
        let timings = config.timings();
        let metrics = Arc::new(Mutex::new(HelmsmanMetrics::default()));
        let client = Arc::new(
            client
                .with_logger(Some(Arc::clone(&logger)))
                .with_metrics_callback(Some(metrics_recorder(Arc::clone(&metrics)))),
        );

        let snapshots = Arc::new(SnapshotStore::new(config.output_dir.clone()));
        let resolver = Arc::new(ElementResolver::new(timings, Arc::clone(&logger)));
        let obstacles = Arc::new(ObstacleHandler::new(timings, Arc::clone(&logger)));
        let executor = ActionExecutor::new(
            resolver,
            Arc::clone(&obstacles),
            timings,
            Arc::clone(&logger),
        );
        let synthesizer = ActionSynthesizer::new(
            Arc::clone(&client),
            Arc::clone(&snapshots),
            timings.action_settle,
            Arc::clone(&logger),
        );
        let decomposer = InstructionDecomposer::new(client, Arc::clone(&logger));

        Self {
            session,
            start_url: config.start_url.clone(),
            exit_keyword: config.exit_keyword.clone(),
            describe_keyword: config.describe_keyword.clone(),
            command_mode: config.command_mode,
            timings,
            snapshots,
            obstacles,
            executor,
            synthesizer,
            decomposer,
            metrics,
            report: SessionReport::default(),
            state: LoopState::Bootstrapping,
            logger,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until the exit keyword, end of input, or an unrecoverable error,
    /// then tear the session down.
    pub async fn run<C>(&mut self, commands: &mut C) -> Result<SessionReport, SessionLoopError>
    where
        C: CommandSource + ?Sized,
    {
        self.run_until(commands, future::pending()).await
    }

    /// Like [`run`](Self::run), but stops as soon as `shutdown` completes.
    /// Whatever step is in flight is abandoned and the session is still torn
    /// down.
    pub async fn run_until<C, F>(
        &mut self,
        commands: &mut C,
        shutdown: F,
    ) -> Result<SessionReport, SessionLoopError>
    where
        C: CommandSource + ?Sized,
        F: Future<Output = ()>,
    {
        if self.state == LoopState::Terminated {
            return Err(SessionLoopError::AlreadyTerminated);
        }

        let finished = tokio::select! {
            outcome = self.drive(commands) => Some(outcome),
            () = shutdown => None,
        };
        let outcome = match finished {
            Some(outcome) => outcome,
            None => {
                self.logger
                    .info("Interrupted; shutting down", Some(CATEGORY_SESSION), None);
                self.report.interrupted = true;
                Ok(())
            }
        };
        let teardown = self.terminate().await;

        match (outcome, teardown) {
            (Err(err), Err(teardown_err)) => {
                self.logger.error(
                    format!("Teardown after failure also failed: {teardown_err}"),
                    Some(CATEGORY_SESSION),
                    None,
                );
                Err(err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(self.report.clone()),
        }
    }

    async fn drive<C>(&mut self, commands: &mut C) -> Result<(), SessionLoopError>
    where
        C: CommandSource + ?Sized,
    {
        self.bootstrap().await?;

        loop {
            self.state = LoopState::AwaitingCommand;
            let Some(line) = commands.next_command().await? else {
                self.logger
                    .info("End of input; exiting", Some(CATEGORY_SESSION), None);
                return Ok(());
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case(&self.exit_keyword) {
                self.logger.info("Exiting...", Some(CATEGORY_SESSION), None);
                return Ok(());
            }
            if line.eq_ignore_ascii_case(&self.describe_keyword) {
                self.describe().await;
                continue;
            }

            self.report.commands += 1;
            let command = Command::classify(line, self.command_mode);
            if !self.handle_command(command).await {
                self.report.aborted_commands += 1;
            }
        }
    }

    async fn bootstrap(&mut self) -> Result<(), SessionLoopError> {
        self.state = LoopState::Bootstrapping;
        self.snapshots.ensure_dir().await?;

        self.logger.info(
            format!("Navigating to {}", self.start_url),
            Some(CATEGORY_SESSION),
            None,
        );
        self.session
            .navigate(&self.start_url)
            .await
            .map_err(|source| SessionLoopError::Navigate {
                url: self.start_url.clone(),
                source,
            })?;
        sleep(self.timings.page_load_settle).await;

        self.state = LoopState::ObstacleCheck;
        if self.obstacles.clear_obstacles(&self.session).await {
            self.logger
                .info("Cleared initial obstacles", Some(CATEGORY_SESSION), None);
        }
        Ok(())
    }

    /// `true` when every step of the command succeeded.
    async fn handle_command(&mut self, command: Command) -> bool {
        let steps = match command {
            Command::Atomic(text) => vec![Step::new(text)],
            Command::Paragraph(text) => {
                self.state = LoopState::Decomposing;
                let steps = self.decomposer.decompose(&text).await;
                if steps.is_empty() {
                    self.logger.info(
                        "Could not break down instructions; please try again",
                        Some(CATEGORY_SESSION),
                        None,
                    );
                    return false;
                }
                steps
            }
        };

        let total = steps.len();
        for (idx, step) in steps.iter().enumerate() {
            self.logger.info(
                format!("Executing step {}/{total}: {step}", idx + 1),
                Some(CATEGORY_SESSION),
                None,
            );
            if !self.run_step(step).await {
                if idx + 1 < total {
                    self.logger.info(
                        format!("Skipping the remaining {} step(s)", total - idx - 1),
                        Some(CATEGORY_SESSION),
                        None,
                    );
                }
                return false;
            }
        }
        true
    }

    async fn run_step(&mut self, step: &Step) -> bool {
        self.state = LoopState::ObstacleCheck;
        self.obstacles.clear_obstacles(&self.session).await;

        self.state = LoopState::ExecutingStep;
        let Some(fragment) = self.synthesizer.synthesize(&self.session, step.text()).await else {
            self.logger.error(
                format!("Failed to generate actions for step: {step}"),
                Some(CATEGORY_SESSION),
                None,
            );
            self.report.steps_failed += 1;
            return false;
        };

        let result = self.executor.execute(&self.session, &fragment).await;

        self.state = LoopState::ObstacleCheck;
        self.obstacles.clear_obstacles(&self.session).await;

        match result {
            ExecutionResult::Success => {
                self.report.steps_succeeded += 1;
                sleep(self.timings.step_settle).await;
                true
            }
            ExecutionResult::Failure(reason) => {
                self.logger.error(
                    format!("Step failed: {reason}"),
                    Some(CATEGORY_SESSION),
                    Some(json!({ "step": step })),
                );
                self.report.steps_failed += 1;
                false
            }
        }
    }

    async fn describe(&mut self) {
        match self.synthesizer.describe_page(&self.session).await {
            Some(description) => {
                self.report.pages_described += 1;
                self.logger.info(
                    format!("Page description: {description}"),
                    Some(CATEGORY_SESSION),
                    None,
                );
            }
            None => self
                .logger
                .info("Could not describe the page", Some(CATEGORY_SESSION), None),
        }
    }

    async fn terminate(&mut self) -> Result<(), SessionLoopError> {
        self.state = LoopState::Terminated;
        self.report.metrics = self
            .metrics
            .lock()
            .map(|metrics| metrics.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        self.logger.info(
            "Session metrics",
            Some(CATEGORY_SESSION),
            Some(json!(self.report)),
        );
        self.session
            .terminate()
            .await
            .map_err(SessionLoopError::Terminate)
    }
}

/// Metrics callback that accumulates usage into `metrics`.
pub fn metrics_recorder(metrics: Arc<Mutex<HelmsmanMetrics>>) -> MetricsCallback {
    Arc::new(move |response, elapsed, function| {
        let (Some(function), Some(usage)) = (function, response.usage.as_ref()) else {
            return;
        };
        let mut metrics = metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        metrics.record(
            function,
            u64::from(usage.prompt_tokens),
            u64::from(usage.completion_tokens),
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::Verbosity;
    use crate::logging::capturing_logger;
    use crate::testing::{Call, FakeElement, FakeSession, ScriptedProvider};

    fn config(dir: &std::path::Path, mode: CommandMode) -> HelmsmanConfig {
        HelmsmanConfig {
            start_url: "https://shop.test".into(),
            output_dir: dir.join("outputs"),
            command_mode: mode,
            ..HelmsmanConfig::default()
        }
    }

    fn session_loop(
        config: &HelmsmanConfig,
        session: FakeSession,
        replies: Vec<Result<String, String>>,
    ) -> SessionLoop<FakeSession, ScriptedProvider> {
        let (logger, _) = capturing_logger(Verbosity::Detailed);
        let client = ModelClient::new("gpt-4o-mini", ScriptedProvider::replying(replies));
        SessionLoop::new(config, session, client, logger)
    }

    #[tokio::test(start_paused = true)]
    async fn exit_keyword_is_case_insensitive_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let mut session_loop = session_loop(
            &config(dir.path(), CommandMode::Auto),
            FakeSession::new(),
            vec![],
        );

        let mut commands = ScriptedCommands::new(["  ", "QUIT", "never read"]);
        let report = session_loop.run(&mut commands).await.expect("report");

        assert_eq!(report.commands, 0);
        assert_eq!(session_loop.state(), LoopState::Terminated);
        let calls = session_loop.session().calls();
        assert_eq!(calls.first(), Some(&Call::Navigate("https://shop.test".into())));
        assert_eq!(calls.last(), Some(&Call::Terminate));
        assert!(dir.path().join("outputs").is_dir());
        assert_eq!(commands.next_command().await.unwrap().as_deref(), Some("never read"));
    }

    #[tokio::test(start_paused = true)]
    async fn atomic_command_runs_synthesized_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::new();
        session.add("//button[contains(., 'Sofas')]", FakeElement::visible("button"));
        let mut session_loop = session_loop(
            &config(dir.path(), CommandMode::Atomic),
            session,
            vec![Ok(r#"{"action":"click","target":"Sofas"}"#.into())],
        );

        let report = session_loop
            .run(&mut ScriptedCommands::new(["open the sofas, please"]))
            .await
            .expect("report");

        assert_eq!(report.commands, 1);
        assert_eq!(report.steps_succeeded, 1);
        assert_eq!(report.aborted_commands, 0);
        assert_eq!(report.metrics.synthesize_prompt_tokens, 3);
        assert_eq!(report.metrics.total_requests, 1);
        assert!(
            session_loop
                .session()
                .calls()
                .contains(&Call::Click("//button[contains(., 'Sofas')]".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_synthesis_abandons_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut session_loop = session_loop(
            &config(dir.path(), CommandMode::Auto),
            FakeSession::new(),
            vec![
                Ok("1. open the menu\n2. click settings".into()),
                Ok("I cannot see a menu on this page.".into()),
            ],
        );

        let report = session_loop
            .run(&mut ScriptedCommands::new(["open the menu and click settings"]))
            .await
            .expect("report");

        assert_eq!(report.commands, 1);
        assert_eq!(report.steps_failed, 1);
        assert_eq!(report.steps_succeeded, 0);
        assert_eq!(report.aborted_commands, 1);
        // One decomposition and one synthesis; step two never reached the model.
        assert_eq!(report.metrics.total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn describe_keyword_requests_page_description() {
        let dir = tempfile::tempdir().unwrap();
        let mut session_loop = session_loop(
            &config(dir.path(), CommandMode::Auto),
            FakeSession::new(),
            vec![Ok("A furniture store home page.".into())],
        );

        let report = session_loop
            .run(&mut ScriptedCommands::new(["Describe"]))
            .await
            .expect("report");

        assert_eq!(report.pages_described, 1);
        assert_eq!(report.commands, 0);
        assert_eq!(report.metrics.describe_completion_tokens, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_loop_cannot_run_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut session_loop = session_loop(
            &config(dir.path(), CommandMode::Auto),
            FakeSession::new(),
            vec![],
        );
        session_loop
            .run(&mut ScriptedCommands::default())
            .await
            .expect("first run");
        assert!(matches!(
            session_loop.run(&mut ScriptedCommands::default()).await,
            Err(SessionLoopError::AlreadyTerminated)
        ));
    }

    struct BrokenInput;

    /// Never produces a line, like an operator sitting at the prompt.
    struct IdleOperator;

    #[async_trait]
    impl CommandSource for IdleOperator {
        async fn next_command(&mut self) -> io::Result<Option<String>> {
            future::pending().await
        }
    }

    #[async_trait]
    impl CommandSource for BrokenInput {
        async fn next_command(&mut self) -> io::Result<Option<String>> {
            Err(io::Error::other("terminal went away"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_failure_still_terminates_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::new();
        session.fail_navigation("net::ERR_NAME_NOT_RESOLVED");
        let mut session_loop =
            session_loop(&config(dir.path(), CommandMode::Auto), session, vec![]);

        let mut commands = ScriptedCommands::new(["search for a couch"]);
        let err = session_loop.run(&mut commands).await.expect_err("navigate fails");

        match err {
            SessionLoopError::Navigate { url, source } => {
                assert_eq!(url, "https://shop.test");
                assert!(source.to_string().contains("ERR_NAME_NOT_RESOLVED"));
            }
            other => panic!("expected navigate error, got {other:?}"),
        }
        assert_eq!(session_loop.state(), LoopState::Terminated);
        assert_eq!(
            session_loop.session().calls(),
            vec![Call::Navigate("https://shop.test".into()), Call::Terminate]
        );
        assert_eq!(
            commands.next_command().await.unwrap().as_deref(),
            Some("search for a couch")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn input_error_still_terminates_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session_loop = session_loop(
            &config(dir.path(), CommandMode::Auto),
            FakeSession::new(),
            vec![],
        );

        let err = session_loop
            .run(&mut BrokenInput)
            .await
            .expect_err("input fails");

        assert!(matches!(
            err,
            SessionLoopError::Input(ref io_err) if io_err.to_string() == "terminal went away"
        ));
        assert_eq!(session_loop.state(), LoopState::Terminated);
        assert_eq!(session_loop.session().calls().last(), Some(&Call::Terminate));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_awaiting_command_terminates_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session_loop = session_loop(
            &config(dir.path(), CommandMode::Auto),
            FakeSession::new(),
            vec![],
        );

        let report = session_loop
            .run_until(&mut IdleOperator, sleep(Duration::from_secs(60)))
            .await
            .expect("report");

        assert!(report.interrupted);
        assert_eq!(report.commands, 0);
        assert_eq!(session_loop.state(), LoopState::Terminated);
        let calls = session_loop.session().calls();
        assert_eq!(calls.first(), Some(&Call::Navigate("https://shop.test".into())));
        assert_eq!(calls.last(), Some(&Call::Terminate));
    }
}
