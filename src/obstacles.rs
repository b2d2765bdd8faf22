//! Detection and dismissal of transient page obstacles.
//!
//! Two kinds are handled on every call: visible overlays (newsletter modals,
//! cookie walls, generic dialogs) and the "press and hold" bot challenge.
//! Detection failures are never errors; they simply mean nothing was there.

use std::sync::Arc;

use serde_json::json;
use tokio::time::sleep;

use crate::browser::{
    BrowserSession, ElementHandle, SessionError, wait_for_clickable, wait_for_element,
};
use crate::config::Timings;
use crate::logging::{CATEGORY_OBSTACLE, HelmsmanLogger};
use crate::types::ObstacleKind;

pub const CHALLENGE_SELECTOR: &str = "//button[contains(text(), 'Press & Hold')]";

const CHALLENGE_SELECTORS: &[&str] = &[CHALLENGE_SELECTOR];

pub const OVERLAY_SELECTORS: &[&str] = &[
    "//div[contains(@class, 'overlay')]",
    "//div[contains(@class, 'modal')]",
    "//div[contains(@class, 'popup')]",
    "//div[@role='dialog']",
];

pub const CLOSE_BUTTON_SELECTORS: &[&str] = &[
    "//button[contains(@class, 'CloseButton')]",
    "//button[contains(@class, 'close-button')]",
    "//button[contains(@class, 'dismiss')]",
    "//button[contains(@aria-label, 'Close')]",
    "//button[contains(@aria-label, 'close')]",
    "//button[contains(@title, 'Close')]",
    "//button[contains(text(), '×')]",
    "//button[contains(text(), 'X')]",
    "//div[contains(@class, 'modal')]//button[contains(@class, 'close')]",
    "//div[contains(@class, 'popup')]//button",
    "//div[contains(@class, 'email-signup')]//button",
    "//div[contains(@class, 'newsletter')]//button",
    "//*[contains(@class, 'overlay')]//button",
    "//button[@data-testid='overlay-close']",
    "//button[@data-testid='close-button']",
];

impl ObstacleKind {
    pub fn detection_selectors(self) -> &'static [&'static str] {
        match self {
            ObstacleKind::Overlay => OVERLAY_SELECTORS,
            ObstacleKind::BotChallenge => CHALLENGE_SELECTORS,
        }
    }
}

pub struct ObstacleHandler {
    timings: Timings,
    logger: Arc<HelmsmanLogger>,
}

impl ObstacleHandler {
    pub fn new(timings: Timings, logger: Arc<HelmsmanLogger>) -> Self {
        Self { timings, logger }
    }

    /// Check for both obstacle kinds; `true` when anything was dismissed.
    pub async fn clear_obstacles<S>(&self, session: &S) -> bool
    where
        S: BrowserSession + ?Sized,
    {
        let challenge = self.handle_bot_challenge(session).await;
        let overlay = self.dismiss_overlay(session).await;
        challenge || overlay
    }

    /// Press and hold the challenge button if it shows up within the timeout.
    pub async fn handle_bot_challenge<S>(&self, session: &S) -> bool
    where
        S: BrowserSession + ?Sized,
    {
        let button = match wait_for_element(
            session,
            CHALLENGE_SELECTOR,
            self.timings.challenge_timeout,
            self.timings.poll_interval,
        )
        .await
        {
            Ok(Some(button)) => button,
            Ok(None) => return false,
            Err(err) => {
                self.logger.debug(
                    format!("Bot challenge probe failed: {err}"),
                    Some(CATEGORY_OBSTACLE),
                    None,
                );
                return false;
            }
        };

        self.logger.info(
            "Bot detection found. Attempting to verify...",
            Some(CATEGORY_OBSTACLE),
            Some(json!({ "kind": ObstacleKind::BotChallenge.to_string() })),
        );

        if let Err(err) = session
            .press_and_hold(&button, self.timings.hold_duration)
            .await
        {
            self.logger.info(
                format!("Could not complete press and hold: {err}"),
                Some(CATEGORY_OBSTACLE),
                None,
            );
            return false;
        }

        sleep(self.timings.challenge_settle).await;
        true
    }

    /// First visible overlay container, if any.
    pub async fn detect_overlay<S>(&self, session: &S) -> Option<&'static str>
    where
        S: BrowserSession + ?Sized,
    {
        for selector in OVERLAY_SELECTORS {
            let Ok(Some(overlay)) = session.find_element(selector).await else {
                continue;
            };
            if matches!(session.element_state(&overlay).await, Ok(state) if state.displayed) {
                self.logger.info(
                    format!("Detected visible overlay/popup: {selector}"),
                    Some(CATEGORY_OBSTACLE),
                    None,
                );
                return Some(selector);
            }
        }
        None
    }

    /// Close a visible overlay, trying each close-button selector in order.
    pub async fn dismiss_overlay<S>(&self, session: &S) -> bool
    where
        S: BrowserSession + ?Sized,
    {
        if self.detect_overlay(session).await.is_none() {
            return false;
        }

        for selector in CLOSE_BUTTON_SELECTORS {
            let button = match wait_for_clickable(
                session,
                selector,
                self.timings.close_button_timeout,
                self.timings.poll_interval,
            )
            .await
            {
                Ok(Some(button)) => button,
                Ok(None) | Err(_) => continue,
            };

            self.logger.info(
                format!("Found close button with selector: {selector}"),
                Some(CATEGORY_OBSTACLE),
                None,
            );

            if let Err(err) = self.press_close_button(session, &button).await {
                self.logger.debug(
                    format!("Close button {selector} could not be clicked: {err}"),
                    Some(CATEGORY_OBSTACLE),
                    None,
                );
                continue;
            }

            sleep(self.timings.popup_settle).await;

            if self.is_gone(session, selector).await {
                self.logger.info(
                    "Popup successfully closed",
                    Some(CATEGORY_OBSTACLE),
                    Some(json!({ "kind": ObstacleKind::Overlay.to_string() })),
                );
                return true;
            }
        }

        false
    }

    async fn press_close_button<S>(
        &self,
        session: &S,
        button: &ElementHandle,
    ) -> Result<(), SessionError>
    where
        S: BrowserSession + ?Sized,
    {
        match session.script_click(button).await {
            Ok(()) => {
                self.logger.debug(
                    "Closed popup using script click",
                    Some(CATEGORY_OBSTACLE),
                    None,
                );
                Ok(())
            }
            Err(err) => {
                self.logger.debug(
                    format!("Script click failed ({err}); falling back to native click"),
                    Some(CATEGORY_OBSTACLE),
                    None,
                );
                session.click(button).await
            }
        }
    }

    /// Positive recheck: the button is absent, hidden, or can no longer be inspected.
    async fn is_gone<S>(&self, session: &S, selector: &str) -> bool
    where
        S: BrowserSession + ?Sized,
    {
        match session.find_element(selector).await {
            Ok(None) | Err(_) => true,
            Ok(Some(button)) => match session.element_state(&button).await {
                Ok(state) => !state.displayed,
                Err(_) => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verbosity;
    use crate::logging::capturing_logger;
    use crate::testing::{Call, FakeElement, FakeSession};
    use std::time::Duration;
    use tokio::time::Instant;

    fn handler() -> ObstacleHandler {
        let (logger, _) = capturing_logger(Verbosity::Detailed);
        ObstacleHandler::new(Timings::default(), logger)
    }

    const NEWSLETTER_MODAL: &str = "//div[contains(@class, 'modal')]";
    const NEWSLETTER_CLOSE: &str = "//button[contains(@aria-label, 'Close')]";

    #[tokio::test(start_paused = true)]
    async fn nothing_present_is_not_an_obstacle() {
        let session = FakeSession::new();
        let start = Instant::now();
        assert!(!handler().clear_obstacles(&session).await);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_with_nothing_new_returns_false() {
        let session = FakeSession::new();
        session.add(NEWSLETTER_MODAL, FakeElement::visible("div"));
        session.add(
            NEWSLETTER_CLOSE,
            FakeElement::visible("button").dismissing(&[NEWSLETTER_MODAL, NEWSLETTER_CLOSE]),
        );

        let handler = handler();
        assert!(handler.clear_obstacles(&session).await);
        assert!(!handler.clear_obstacles(&session).await);
        assert!(session.calls().contains(&Call::ScriptClick(NEWSLETTER_CLOSE.to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn close_buttons_are_ignored_without_visible_overlay() {
        let session = FakeSession::new();
        session.add(NEWSLETTER_CLOSE, FakeElement::visible("button"));
        assert!(!handler().dismiss_overlay(&session).await);
        assert!(session.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lingering_close_button_tries_next_selector() {
        let session = FakeSession::new();
        let dismiss = "//button[contains(@class, 'dismiss')]";
        let testid = "//button[@data-testid='close-button']";
        session.add(NEWSLETTER_MODAL, FakeElement::visible("div"));
        session.add(dismiss, FakeElement::visible("button"));
        session.add(
            testid,
            FakeElement::visible("button").dismissing(&[NEWSLETTER_MODAL, testid]),
        );

        assert!(handler().dismiss_overlay(&session).await);
        let clicks: Vec<_> = session
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::ScriptClick(_)))
            .collect();
        assert_eq!(
            clicks,
            vec![
                Call::ScriptClick(dismiss.to_string()),
                Call::ScriptClick(testid.to_string())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn press_and_hold_challenge_is_detected_and_held() {
        let session = FakeSession::new();
        session.add(
            CHALLENGE_SELECTOR,
            FakeElement::visible("button").dismissing(&[CHALLENGE_SELECTOR]),
        );

        let handler = handler();
        let start = Instant::now();
        assert!(handler.clear_obstacles(&session).await);
        // 3 s hold plus 4 s settle; the button was present immediately.
        assert!(start.elapsed() < Duration::from_secs(5) + Duration::from_secs(7));
        assert!(session.calls().contains(&Call::PressAndHold(
            CHALLENGE_SELECTOR.to_string(),
            Duration::from_secs(3)
        )));

        assert!(!handler.clear_obstacles(&session).await);
    }

    #[test]
    fn detection_selectors_per_kind() {
        assert_eq!(ObstacleKind::Overlay.detection_selectors().len(), 4);
        assert_eq!(
            ObstacleKind::BotChallenge.detection_selectors(),
            &[CHALLENGE_SELECTOR]
        );
    }
}
