//! Browser session primitives.
//!
//! [`BrowserSession`] is the seam between the command loop and the browser
//! engine: every component borrows a session for a single call and drives it
//! through the small set of primitives declared here. [`LaunchPlan`] turns the
//! configuration into a strongly-typed description of the local browser to
//! start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::config::HelmsmanConfig;

type JsonObject = JsonMap<String, JsonValue>;

const DEFAULT_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--start-maximized",
];

/// Errors surfaced by browser primitives.
///
/// The `Display` text of the interaction variants mirrors the wording browser
/// drivers use, so callers can classify failures by message.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("element click intercepted: {0}")]
    ClickIntercepted(String),
    #[error("element not interactable: {0}")]
    NotInteractable(String),
    #[error("stale element reference: {0}")]
    StaleElement(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("browser session not initialized")]
    NotInitialized,
    #[error("browser session feature unsupported: {0}")]
    Unsupported(String),
    #[error("browser session error: {0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while preparing or launching the local browser.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to parse local browser launch options: {source}")]
    InvalidLocalOptions {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to build browser configuration: {0}")]
    Config(String),
    #[error("failed to launch browser: {0}")]
    Launch(String),
}

/// Handle to a DOM element located by XPath.
///
/// The handle only stores the locator; implementations re-resolve it for every
/// operation so a handle never outlives the node it was created from silently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    xpath: String,
}

impl ElementHandle {
    pub fn new(xpath: impl Into<String>) -> Self {
        Self {
            xpath: xpath.into(),
        }
    }

    pub fn xpath(&self) -> &str {
        &self.xpath
    }
}

/// Observable state of an element at the time it was probed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub tag: String,
    pub displayed: bool,
    pub enabled: bool,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default, rename = "disabledAttr")]
    pub disabled_attr: Option<String>,
}

impl ElementState {
    /// Displayed and enabled.
    pub fn is_clickable(&self) -> bool {
        self.displayed && self.enabled
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// Primitives the command loop needs from a live browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Capture the current viewport into an image file at `path`.
    async fn save_screenshot(&self, path: &Path) -> Result<(), SessionError>;

    async fn evaluate(&self, script: &str) -> Result<JsonValue, SessionError>;

    /// First element matching `xpath`, or `None` when nothing matches right now.
    async fn find_element(&self, xpath: &str) -> Result<Option<ElementHandle>, SessionError>;

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState, SessionError>;

    /// Native pointer click.
    async fn click(&self, element: &ElementHandle) -> Result<(), SessionError>;

    /// Click dispatched from page script, bypassing hit testing.
    async fn script_click(&self, element: &ElementHandle) -> Result<(), SessionError>;

    async fn clear(&self, element: &ElementHandle) -> Result<(), SessionError>;

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), SessionError>;

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), SessionError>;

    async fn scroll_by(&self, pixels: i64) -> Result<(), SessionError> {
        self.evaluate(&format!("window.scrollBy(0, {pixels});"))
            .await
            .map(|_| ())
    }

    /// Move to the element, press, hold for `hold`, then release.
    async fn press_and_hold(
        &self,
        _element: &ElementHandle,
        _hold: Duration,
    ) -> Result<(), SessionError> {
        Err(SessionError::Unsupported(
            "press and hold not implemented".to_string(),
        ))
    }

    async fn terminate(&self) -> Result<(), SessionError>;
}

/// Poll for an element matching `xpath` until it appears or `timeout` elapses.
pub async fn wait_for_element<S>(
    session: &S,
    xpath: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<ElementHandle>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(element) = session.find_element(xpath).await? {
            return Ok(Some(element));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Poll until an element matching `xpath` is present, displayed and enabled.
pub async fn wait_for_clickable<S>(
    session: &S,
    xpath: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<ElementHandle>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(element) = session.find_element(xpath).await? {
            if session.element_state(&element).await?.is_clickable() {
                return Ok(Some(element));
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Viewport dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1288,
            height: 711,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchOverrides {
    #[serde(alias = "chrome_executable")]
    pub chrome_executable: Option<String>,
    #[serde(alias = "user_data_dir")]
    pub user_data_dir: Option<String>,
    pub headless: Option<bool>,
    #[serde(alias = "ignore_https_errors")]
    pub ignore_https_errors: Option<bool>,
    pub locale: Option<String>,
    #[serde(alias = "timezone_id")]
    pub timezone_id: Option<String>,
    pub args: Option<Vec<String>>,
    pub viewport: Option<Viewport>,
}

/// Normalised description of the local browser to launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
    pub args: Vec<String>,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone_id: String,
    pub ignore_https_errors: bool,
}

impl LaunchPlan {
    pub fn from_config(config: &HelmsmanConfig) -> Result<Self, LaunchError> {
        Self::from_options(&config.local_browser_launch_options, config.headless)
    }

    pub fn from_options(options: &JsonObject, headless: bool) -> Result<Self, LaunchError> {
        let overrides: LaunchOverrides = serde_json::from_value(JsonValue::Object(options.clone()))
            .map_err(|source| LaunchError::InvalidLocalOptions { source })?;

        Ok(LaunchPlan {
            headless: overrides.headless.unwrap_or(headless),
            chrome_executable: overrides.chrome_executable.map(PathBuf::from),
            user_data_dir: overrides.user_data_dir.map(PathBuf::from),
            args: overrides
                .args
                .unwrap_or_else(|| DEFAULT_ARGS.iter().map(|arg| arg.to_string()).collect()),
            viewport: overrides.viewport.unwrap_or_default(),
            locale: overrides.locale.unwrap_or_else(|| "en-US".to_string()),
            timezone_id: overrides
                .timezone_id
                .unwrap_or_else(|| "America/New_York".to_string()),
            ignore_https_errors: overrides.ignore_https_errors.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn plan_defaults_hide_automation_and_maximise() {
        let config = HelmsmanConfig::default();
        let plan = LaunchPlan::from_config(&config).expect("plan");
        assert!(!plan.headless);
        assert_eq!(
            plan.args,
            vec![
                "--disable-blink-features=AutomationControlled".to_string(),
                "--start-maximized".to_string()
            ]
        );
        assert_eq!(plan.viewport, Viewport::default());
        assert!(plan.chrome_executable.is_none());
        assert!(plan.ignore_https_errors);
    }

    #[test]
    fn plan_parses_overrides() {
        let mut config = HelmsmanConfig::default();
        config.headless = true;
        config.local_browser_launch_options = json!({
            "chromeExecutable": "/usr/bin/chromium",
            "user_data_dir": "/tmp/profile",
            "args": ["--foo"],
            "viewport": {"width": 1024, "height": 768},
            "locale": "fr-FR",
        })
        .as_object()
        .cloned()
        .unwrap();

        let plan = LaunchPlan::from_config(&config).expect("plan");
        assert!(plan.headless);
        assert_eq!(plan.chrome_executable, Some(PathBuf::from("/usr/bin/chromium")));
        assert_eq!(plan.user_data_dir, Some(PathBuf::from("/tmp/profile")));
        assert_eq!(plan.args, vec!["--foo".to_string()]);
        assert_eq!(
            plan.viewport,
            Viewport {
                width: 1024,
                height: 768
            }
        );
        assert_eq!(plan.locale, "fr-FR");
    }

    #[test]
    fn plan_rejects_malformed_options() {
        let options = json!({ "args": "not-a-list" }).as_object().cloned().unwrap();
        let err = LaunchPlan::from_options(&options, false).expect_err("invalid");
        assert!(matches!(err, LaunchError::InvalidLocalOptions { .. }));
    }

    #[test]
    fn interaction_errors_carry_driver_wording() {
        let intercepted = SessionError::ClickIntercepted("covered by div.modal".into());
        assert!(intercepted.to_string().contains("click intercepted"));
        let hidden = SessionError::NotInteractable("zero size".into());
        assert!(hidden.to_string().contains("not interactable"));
    }

    /// Element appears after a fixed number of lookups.
    struct DelayedSession {
        appear_after: usize,
        lookups: Mutex<usize>,
        state: ElementState,
    }

    #[async_trait]
    impl BrowserSession for DelayedSession {
        async fn navigate(&self, _url: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn save_screenshot(&self, _path: &Path) -> Result<(), SessionError> {
            Ok(())
        }
        async fn evaluate(&self, _script: &str) -> Result<JsonValue, SessionError> {
            Ok(JsonValue::Null)
        }
        async fn find_element(&self, xpath: &str) -> Result<Option<ElementHandle>, SessionError> {
            let mut lookups = self.lookups.lock().unwrap();
            *lookups += 1;
            Ok((*lookups > self.appear_after).then(|| ElementHandle::new(xpath)))
        }
        async fn element_state(&self, _el: &ElementHandle) -> Result<ElementState, SessionError> {
            Ok(self.state.clone())
        }
        async fn click(&self, _el: &ElementHandle) -> Result<(), SessionError> {
            Ok(())
        }
        async fn script_click(&self, _el: &ElementHandle) -> Result<(), SessionError> {
            Ok(())
        }
        async fn clear(&self, _el: &ElementHandle) -> Result<(), SessionError> {
            Ok(())
        }
        async fn type_text(&self, _el: &ElementHandle, _text: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn scroll_into_view(&self, _el: &ElementHandle) -> Result<(), SessionError> {
            Ok(())
        }
        async fn terminate(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn visible_button() -> ElementState {
        ElementState {
            tag: "button".into(),
            displayed: true,
            enabled: true,
            class: None,
            disabled_attr: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_element_returns_once_present() {
        let session = DelayedSession {
            appear_after: 2,
            lookups: Mutex::new(0),
            state: visible_button(),
        };
        let start = Instant::now();
        let found = wait_for_element(
            &session,
            "//button",
            Duration::from_secs(3),
            Duration::from_millis(250),
        )
        .await
        .expect("poll");
        assert_eq!(found, Some(ElementHandle::new("//button")));
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_element_gives_up_at_deadline() {
        let session = DelayedSession {
            appear_after: usize::MAX,
            lookups: Mutex::new(0),
            state: visible_button(),
        };
        let start = Instant::now();
        let found = wait_for_element(
            &session,
            "//button",
            Duration::from_secs(3),
            Duration::from_millis(400),
        )
        .await
        .expect("poll");
        assert!(found.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_clickable_ignores_hidden_elements() {
        let mut hidden = visible_button();
        hidden.displayed = false;
        let session = DelayedSession {
            appear_after: 0,
            lookups: Mutex::new(0),
            state: hidden,
        };
        let found = wait_for_clickable(
            &session,
            "//button",
            Duration::from_secs(2),
            Duration::from_millis(250),
        )
        .await
        .expect("poll");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn default_scroll_by_uses_script() {
        let session = DelayedSession {
            appear_after: 0,
            lookups: Mutex::new(0),
            state: visible_button(),
        };
        session.scroll_by(400).await.expect("scroll");
        let err = session
            .press_and_hold(&ElementHandle::new("//button"), Duration::from_secs(1))
            .await
            .expect_err("unsupported by default");
        assert!(matches!(err, SessionError::Unsupported(_)));
    }
}
