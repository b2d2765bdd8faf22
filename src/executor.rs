//! Fragment execution under the obstacle-aware retry policy.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use crate::browser::{BrowserSession, SessionError};
use crate::config::Timings;
use crate::logging::{CATEGORY_EXECUTE, HelmsmanLogger};
use crate::obstacles::ObstacleHandler;
use crate::resolver::ElementResolver;
use crate::types::{Action, ActionFragment, ExecutionResult, Resolution};

/// Failure texts that indicate something was in the way of the target.
const OBSTACLE_MARKERS: &[&str] = &["click intercepted", "not interactable"];

pub fn is_obstacle_failure(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    OBSTACLE_MARKERS.iter().any(|marker| reason.contains(marker))
}

/// The only operations a fragment can reach: resolve, click, clear, type,
/// scroll and wait.
pub struct ActionContext<'a, S: BrowserSession + ?Sized> {
    session: &'a S,
    resolver: &'a ElementResolver,
    logger: &'a HelmsmanLogger,
}

impl<'a, S: BrowserSession + ?Sized> ActionContext<'a, S> {
    pub fn new(session: &'a S, resolver: &'a ElementResolver, logger: &'a HelmsmanLogger) -> Self {
        Self {
            session,
            resolver,
            logger,
        }
    }

    pub async fn resolve(&self, description: &str) -> Resolution {
        self.resolver.resolve(self.session, description).await
    }

    pub async fn click(&self, target: &str) -> Result<(), SessionError> {
        match self.resolve(target).await {
            Resolution::Found(element) => self.session.click(&element).await,
            Resolution::NotFound => {
                self.skip("click", target);
                Ok(())
            }
        }
    }

    pub async fn clear(&self, target: &str) -> Result<(), SessionError> {
        match self.resolve(target).await {
            Resolution::Found(element) => self.session.clear(&element).await,
            Resolution::NotFound => {
                self.skip("clear", target);
                Ok(())
            }
        }
    }

    pub async fn type_text(&self, target: &str, text: &str) -> Result<(), SessionError> {
        match self.resolve(target).await {
            Resolution::Found(element) => self.session.type_text(&element, text).await,
            Resolution::NotFound => {
                self.skip("type", target);
                Ok(())
            }
        }
    }

    pub async fn scroll(&self, pixels: i64) -> Result<(), SessionError> {
        self.session.scroll_by(pixels).await
    }

    pub async fn wait(&self, ms: u64) {
        sleep(Duration::from_millis(ms)).await;
    }

    /// Run every action in order, stopping at the first error.
    pub async fn run(&self, fragment: &ActionFragment) -> Result<(), SessionError> {
        for action in fragment.actions() {
            self.logger.debug(
                format!("Running {} action", action.name()),
                Some(CATEGORY_EXECUTE),
                Some(json!(action)),
            );
            match action {
                Action::Click { target } => self.click(target).await?,
                Action::Clear { target } => self.clear(target).await?,
                Action::Type { target, text } => self.type_text(target, text).await?,
                Action::Scroll { pixels } => self.scroll(*pixels).await?,
                Action::Wait { ms } => self.wait(*ms).await,
            }
        }
        Ok(())
    }

    fn skip(&self, action: &str, target: &str) {
        self.logger.info(
            format!("Skipping {action}: no element found for {target:?}"),
            Some(CATEGORY_EXECUTE),
            None,
        );
    }
}

pub struct ActionExecutor {
    resolver: Arc<ElementResolver>,
    obstacles: Arc<ObstacleHandler>,
    timings: Timings,
    logger: Arc<HelmsmanLogger>,
}

impl ActionExecutor {
    pub fn new(
        resolver: Arc<ElementResolver>,
        obstacles: Arc<ObstacleHandler>,
        timings: Timings,
        logger: Arc<HelmsmanLogger>,
    ) -> Self {
        Self {
            resolver,
            obstacles,
            timings,
            logger,
        }
    }

    /// Execute `fragment`, retrying once after clearing obstacles when the
    /// first failure looks like something covered the target.
    pub async fn execute<S>(&self, session: &S, fragment: &ActionFragment) -> ExecutionResult
    where
        S: BrowserSession + ?Sized,
    {
        if self.obstacles.clear_obstacles(session).await {
            self.logger.info(
                "Closed popup before executing action",
                Some(CATEGORY_EXECUTE),
                None,
            );
        }

        let err = match self.run_once(session, fragment).await {
            Ok(()) => return ExecutionResult::Success,
            Err(err) => err,
        };

        let reason = err.to_string();
        if !is_obstacle_failure(&reason) {
            self.logger.error(
                format!("Error executing actions: {reason}"),
                Some(CATEGORY_EXECUTE),
                None,
            );
            return ExecutionResult::Failure(reason);
        }

        self.logger.info(
            "Click was intercepted, attempting to close popups and retry...",
            Some(CATEGORY_EXECUTE),
            Some(json!({ "reason": reason })),
        );
        self.obstacles.clear_obstacles(session).await;

        match self.run_once(session, fragment).await {
            Ok(()) => ExecutionResult::Success,
            Err(retry_err) => {
                self.logger.error(
                    format!("Retry failed: {retry_err}"),
                    Some(CATEGORY_EXECUTE),
                    Some(json!({ "original": reason })),
                );
                ExecutionResult::Failure(reason)
            }
        }
    }

    async fn run_once<S>(&self, session: &S, fragment: &ActionFragment) -> Result<(), SessionError>
    where
        S: BrowserSession + ?Sized,
    {
        ActionContext::new(session, &self.resolver, &self.logger)
            .run(fragment)
            .await?;
        sleep(self.timings.action_settle).await;
        if self.obstacles.clear_obstacles(session).await {
            self.logger.info(
                "Closed popup after executing action",
                Some(CATEGORY_EXECUTE),
                None,
            );
        }
        Ok(())
    }
}
