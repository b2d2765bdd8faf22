//! Chromiumoxide-based browser session.
//!
//! [`ChromiumoxideSession`] launches a local Chrome through the `chromiumoxide`
//! crate and implements [`BrowserSession`] on top of CDP. Elements are
//! re-resolved by XPath for every primitive, and native clicks are preceded by
//! a hit test so covered or hidden targets fail with the same wording a
//! WebDriver would use.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    page::{Page, ScreenshotParams},
};
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::browser::{
    BrowserSession, ElementHandle, ElementState, LaunchError, LaunchPlan, SessionError,
};
use crate::dom_scripts::{
    ELEMENT_NOT_FOUND, ElementProbe, Point, build_clear_script, build_presence_script,
    build_probe_script, build_script_click, build_scroll_into_view,
};
use crate::logging::{CATEGORY_BROWSER, HelmsmanLogger};

pub struct ChromiumoxideSession {
    state: Arc<Mutex<Option<SessionState>>>,
    logger: Arc<HelmsmanLogger>,
}

struct SessionState {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumoxideSession {
    /// Launch a local browser according to `plan` and open a blank page.
    pub async fn launch(
        plan: &LaunchPlan,
        logger: Arc<HelmsmanLogger>,
    ) -> Result<Self, LaunchError> {
        let config = build_config(plan)?;

        let (mut browser, handler) = Browser::launch(config)
            .await
            .map_err(|err| LaunchError::Launch(err.to_string()))?;
        let handler = spawn_handler(handler, Arc::clone(&logger));

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser.close().await;
                handler.abort();
                return Err(LaunchError::Launch(err.to_string()));
            }
        };

        logger.info(
            "Launched local browser",
            Some(CATEGORY_BROWSER),
            Some(serde_json::json!({
                "headless": plan.headless,
                "executable": plan.chrome_executable.as_ref().map(|p| p.display().to_string()),
            })),
        );

        Ok(Self {
            state: Arc::new(Mutex::new(Some(SessionState {
                browser,
                page,
                handler,
            }))),
            logger,
        })
    }

    async fn page(&self) -> Result<Page, SessionError> {
        let guard = self.state.lock().await;
        guard
            .as_ref()
            .map(|state| state.page.clone())
            .ok_or(SessionError::NotInitialized)
    }

    async fn run_script(&self, page: &Page, script: String) -> Result<JsonValue, SessionError> {
        let result = page.evaluate(script).await.map_err(map_script_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn probe(
        &self,
        page: &Page,
        element: &ElementHandle,
    ) -> Result<ElementProbe, SessionError> {
        let script = build_probe_script(element.xpath()).map_err(map_encode_error)?;
        let value = self.run_script(page, script).await?;
        serde_json::from_value(value)
            .map_err(|err| SessionError::Script(format!("malformed element probe: {err}")))
    }

    /// Scroll the target into view and make sure a pointer at its centre would land on it.
    async fn hit_test(&self, page: &Page, element: &ElementHandle) -> Result<Point, SessionError> {
        let script = build_scroll_into_view(element.xpath()).map_err(map_encode_error)?;
        self.run_script(page, script).await?;

        let probe = self.probe(page, element).await?;
        if !probe.displayed {
            return Err(SessionError::NotInteractable(format!(
                "{} is not displayed",
                element.xpath()
            )));
        }
        if !probe.enabled {
            return Err(SessionError::NotInteractable(format!(
                "{} is disabled",
                element.xpath()
            )));
        }
        if let Some(cover) = probe.obstructed_by {
            return Err(SessionError::ClickIntercepted(format!(
                "{} is covered by {cover}",
                element.xpath()
            )));
        }
        Ok(probe.center)
    }
}

#[async_trait]
impl BrowserSession for ChromiumoxideSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let page = self.page().await?;
        page.goto(url).await.map_err(map_chromiumoxide_error)?;
        self.logger
            .debug(format!("Navigated to {url}"), Some(CATEGORY_BROWSER), None);
        Ok(())
    }

    async fn save_screenshot(&self, path: &Path) -> Result<(), SessionError> {
        let page = self.page().await?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        page.save_screenshot(params, path)
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<JsonValue, SessionError> {
        let page = self.page().await?;
        self.run_script(&page, script.to_string()).await
    }

    async fn find_element(&self, xpath: &str) -> Result<Option<ElementHandle>, SessionError> {
        let page = self.page().await?;
        let script = build_presence_script(xpath).map_err(map_encode_error)?;
        let present = self.run_script(&page, script).await?;
        Ok(present
            .as_bool()
            .unwrap_or(false)
            .then(|| ElementHandle::new(xpath)))
    }

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState, SessionError> {
        let page = self.page().await?;
        Ok(self.probe(&page, element).await?.state())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), SessionError> {
        let page = self.page().await?;
        let point = self.hit_test(&page, element).await?;
        dispatch_mouse(&page, DispatchMouseEventType::MouseMoved, point).await?;
        dispatch_mouse(&page, DispatchMouseEventType::MousePressed, point).await?;
        dispatch_mouse(&page, DispatchMouseEventType::MouseReleased, point).await
    }

    async fn script_click(&self, element: &ElementHandle) -> Result<(), SessionError> {
        let page = self.page().await?;
        let script = build_script_click(element.xpath()).map_err(map_encode_error)?;
        self.run_script(&page, script).await.map(|_| ())
    }

    async fn clear(&self, element: &ElementHandle) -> Result<(), SessionError> {
        let page = self.page().await?;
        let script = build_clear_script(element.xpath()).map_err(map_encode_error)?;
        self.run_script(&page, script).await.map(|_| ())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), SessionError> {
        let page = self.page().await?;
        let probe = self.probe(&page, element).await?;
        if !probe.displayed || !probe.enabled {
            return Err(SessionError::NotInteractable(format!(
                "{} cannot receive keyboard input",
                element.xpath()
            )));
        }
        let target = page
            .find_xpath(element.xpath())
            .await
            .map_err(map_chromiumoxide_error)?;
        target.focus().await.map_err(map_chromiumoxide_error)?;
        target.type_str(text).await.map_err(map_chromiumoxide_error)?;
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), SessionError> {
        let page = self.page().await?;
        let script = build_scroll_into_view(element.xpath()).map_err(map_encode_error)?;
        self.run_script(&page, script).await.map(|_| ())
    }

    async fn press_and_hold(
        &self,
        element: &ElementHandle,
        hold: Duration,
    ) -> Result<(), SessionError> {
        let page = self.page().await?;
        let point = self.hit_test(&page, element).await?;
        dispatch_mouse(&page, DispatchMouseEventType::MouseMoved, point).await?;
        dispatch_mouse(&page, DispatchMouseEventType::MousePressed, point).await?;
        tokio::time::sleep(hold).await;
        dispatch_mouse(&page, DispatchMouseEventType::MouseReleased, point).await
    }

    async fn terminate(&self) -> Result<(), SessionError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        let Some(mut state) = state else {
            return Ok(());
        };

        let closed = state.browser.close().await.map(|_| ());
        let _ = state.browser.wait().await;
        state.handler.abort();
        self.logger
            .info("Browser session terminated", Some(CATEGORY_BROWSER), None);
        closed.map_err(map_chromiumoxide_error)
    }
}

fn build_config(plan: &LaunchPlan) -> Result<BrowserConfig, LaunchError> {
    let viewport = chromiumoxide::handler::viewport::Viewport {
        width: plan.viewport.width,
        height: plan.viewport.height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: plan.viewport.width >= plan.viewport.height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder();

    if let Some(path) = &plan.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    builder = builder.viewport(viewport).args(plan.args.clone());

    if !plan.headless {
        builder = builder.with_head();
    }
    if !plan.ignore_https_errors {
        builder = builder.respect_https_errors();
    }
    if let Some(dir) = &plan.user_data_dir {
        builder = builder.user_data_dir(dir);
    }
    if !plan.locale.is_empty() {
        builder = builder.arg(format!("--lang={}", plan.locale));
    }
    if !plan.timezone_id.is_empty() {
        builder = builder.arg(format!("--timezone={}", plan.timezone_id));
    }

    builder.build().map_err(LaunchError::Config)
}

async fn dispatch_mouse(
    page: &Page,
    kind: DispatchMouseEventType,
    point: Point,
) -> Result<(), SessionError> {
    let mut builder = DispatchMouseEventParams::builder()
        .r#type(kind.clone())
        .x(point.x)
        .y(point.y);
    if !matches!(kind, DispatchMouseEventType::MouseMoved) {
        builder = builder.button(MouseButton::Left).click_count(1);
    }
    let params = builder.build().map_err(SessionError::Message)?;
    page.execute(params).await.map_err(map_chromiumoxide_error)?;
    Ok(())
}

fn spawn_handler(
    mut handler: chromiumoxide::handler::Handler,
    logger: Arc<HelmsmanLogger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                logger.debug(
                    format!("chromiumoxide handler error: {err}"),
                    Some(CATEGORY_BROWSER),
                    None,
                );
            }
        }
    })
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> SessionError {
    let message = err.to_string();
    if message.contains(ELEMENT_NOT_FOUND) {
        SessionError::StaleElement(message)
    } else {
        SessionError::Message(message)
    }
}

fn map_script_error<E: std::fmt::Display>(err: E) -> SessionError {
    let message = err.to_string();
    if message.contains(ELEMENT_NOT_FOUND) {
        SessionError::StaleElement(message)
    } else if message.contains("not interactable") {
        SessionError::NotInteractable(message)
    } else {
        SessionError::Script(message)
    }
}

fn map_encode_error(err: serde_json::Error) -> SessionError {
    SessionError::Script(format!("failed to encode script argument: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Viewport;
    use std::path::PathBuf;

    fn plan() -> LaunchPlan {
        LaunchPlan {
            headless: true,
            chrome_executable: Some(PathBuf::from("/usr/bin/chromium")),
            user_data_dir: None,
            args: vec!["--disable-blink-features=AutomationControlled".into()],
            viewport: Viewport::default(),
            locale: "en-US".into(),
            timezone_id: String::new(),
            ignore_https_errors: true,
        }
    }

    #[test]
    fn build_config_accepts_plan() {
        assert!(build_config(&plan()).is_ok());
    }

    #[test]
    fn script_errors_are_classified() {
        assert!(matches!(
            map_script_error(format!("Uncaught Error: {ELEMENT_NOT_FOUND}")),
            SessionError::StaleElement(_)
        ));
        assert!(matches!(
            map_script_error("element not interactable: cannot clear"),
            SessionError::NotInteractable(_)
        ));
        assert!(matches!(
            map_script_error("ReferenceError: foo"),
            SessionError::Script(_)
        ));
    }
}
