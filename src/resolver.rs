//! Natural-language element resolution.
//!
//! A description such as `"search"` or `"Add to Cart"` is turned into an
//! ordered catalogue of XPath strategies. Each strategy gets a bounded wait
//! for presence; the first match that passes the search-input guard wins.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use crate::browser::{BrowserSession, ElementHandle, wait_for_clickable, wait_for_element};
use crate::config::Timings;
use crate::logging::{CATEGORY_RESOLVE, HelmsmanLogger};
use crate::types::Resolution;

/// Pause after clicking a search input so focus handlers can run.
const FOCUS_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyFamily {
    TextContent,
    Attribute,
    ClassHeuristic,
    InputHeuristic,
}

/// One XPath query; its priority is its position in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorStrategy {
    pub family: StrategyFamily,
    pub xpath: String,
}

impl LocatorStrategy {
    fn new(family: StrategyFamily, xpath: String) -> Self {
        Self { family, xpath }
    }
}

/// Ordered strategies for `description`.
pub fn catalogue(description: &str) -> Vec<LocatorStrategy> {
    use StrategyFamily::*;

    let d = xpath_literal(description);
    vec![
        LocatorStrategy::new(TextContent, format!("//button[contains(., {d})]")),
        LocatorStrategy::new(TextContent, format!("//a[contains(., {d})]")),
        LocatorStrategy::new(TextContent, format!("//div[contains(., {d})]")),
        LocatorStrategy::new(TextContent, format!("//*[contains(text(), {d})]")),
        LocatorStrategy::new(Attribute, format!("//button[contains(@aria-label, {d})]")),
        LocatorStrategy::new(Attribute, format!("//button[contains(@title, {d})]")),
        LocatorStrategy::new(Attribute, format!("//a[contains(@aria-label, {d})]")),
        LocatorStrategy::new(ClassHeuristic, "//button[contains(@class, 'close')]".into()),
        LocatorStrategy::new(ClassHeuristic, "//button[contains(@class, 'dismiss')]".into()),
        LocatorStrategy::new(ClassHeuristic, "//div[contains(@class, 'modal')]//button".into()),
        LocatorStrategy::new(ClassHeuristic, "//div[contains(@class, 'popup')]//button".into()),
        LocatorStrategy::new(InputHeuristic, "//input[@type='search']".into()),
        LocatorStrategy::new(InputHeuristic, "//input[contains(@placeholder, 'Search')]".into()),
        LocatorStrategy::new(InputHeuristic, "//input[contains(@placeholder, 'Find')]".into()),
        LocatorStrategy::new(InputHeuristic, "//input[contains(@class, 'search')]".into()),
        LocatorStrategy::new(
            InputHeuristic,
            "//input[@type='text' and contains(@class, 'search')]".into(),
        ),
        LocatorStrategy::new(
            InputHeuristic,
            "//input[@type='text' and contains(@placeholder, 'search')]".into(),
        ),
        LocatorStrategy::new(InputHeuristic, "//form//input[@type='text']".into()),
    ]
}

/// Quote `value` as an XPath 1.0 string literal.
///
/// XPath has no escape sequences, so a value holding both quote kinds is
/// assembled with `concat()`.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value.split('\'').map(|part| format!("'{part}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

pub struct ElementResolver {
    timings: Timings,
    logger: Arc<HelmsmanLogger>,
}

impl ElementResolver {
    pub fn new(timings: Timings, logger: Arc<HelmsmanLogger>) -> Self {
        Self { timings, logger }
    }

    /// Walk the catalogue for `description` and return the first acceptable match.
    pub async fn resolve<S>(&self, session: &S, description: &str) -> Resolution
    where
        S: BrowserSession + ?Sized,
    {
        let description = description.trim();
        if description.is_empty() {
            self.logger
                .debug("Empty element description", Some(CATEGORY_RESOLVE), None);
            return Resolution::NotFound;
        }

        let wants_search_input = description.to_lowercase().contains("search");

        for (priority, strategy) in catalogue(description).into_iter().enumerate() {
            let element = match wait_for_element(
                session,
                &strategy.xpath,
                self.timings.element_timeout,
                self.timings.poll_interval,
            )
            .await
            {
                Ok(Some(element)) => element,
                Ok(None) => continue,
                Err(err) => {
                    self.logger.debug(
                        format!("Strategy {} failed: {err}", strategy.xpath),
                        Some(CATEGORY_RESOLVE),
                        None,
                    );
                    continue;
                }
            };

            let state = match session.element_state(&element).await {
                Ok(state) => state,
                Err(err) => {
                    self.logger.debug(
                        format!("Could not inspect {}: {err}", strategy.xpath),
                        Some(CATEGORY_RESOLVE),
                        None,
                    );
                    continue;
                }
            };

            self.logger.info(
                format!("Found element with selector: {}", strategy.xpath),
                Some(CATEGORY_RESOLVE),
                Some(json!({
                    "priority": priority,
                    "tag": state.tag,
                    "enabled": state.enabled,
                    "displayed": state.displayed,
                    "disabled": state.disabled_attr,
                    "class": state.class,
                })),
            );

            if !wants_search_input {
                return Resolution::Found(element);
            }

            if !state.is_tag("input") {
                self.logger.debug(
                    format!("Rejected <{}> for search description", state.tag),
                    Some(CATEGORY_RESOLVE),
                    None,
                );
                continue;
            }

            match self.focus_search_input(session, &element).await {
                Ok(Some(focused)) => return Resolution::Found(focused),
                Ok(None) => {
                    self.logger.debug(
                        format!("Search input {} never became clickable", strategy.xpath),
                        Some(CATEGORY_RESOLVE),
                        None,
                    );
                }
                Err(err) => {
                    self.logger.debug(
                        format!("Could not focus search input {}: {err}", strategy.xpath),
                        Some(CATEGORY_RESOLVE),
                        None,
                    );
                }
            }
        }

        self.logger.info(
            format!("No element found for description: {description}"),
            Some(CATEGORY_RESOLVE),
            None,
        );
        Resolution::NotFound
    }

    async fn focus_search_input<S>(
        &self,
        session: &S,
        element: &ElementHandle,
    ) -> Result<Option<ElementHandle>, crate::browser::SessionError>
    where
        S: BrowserSession + ?Sized,
    {
        session.scroll_into_view(element).await?;
        sleep(self.timings.action_settle).await;

        let Some(clickable) = wait_for_clickable(
            session,
            element.xpath(),
            self.timings.element_timeout,
            self.timings.poll_interval,
        )
        .await?
        else {
            return Ok(None);
        };

        session.click(&clickable).await?;
        sleep(FOCUS_SETTLE).await;
        Ok(Some(clickable))
    }
}
