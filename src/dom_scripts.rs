//! Page-context scripts evaluated by the chromiumoxide session.
//!
//! The element probe lives in its own `.js` file so editors can highlight it;
//! it is bundled as a string at compile time and wrapped around an XPath
//! lookup by [`build_xpath_script`].

use serde::{Deserialize, Serialize};

use crate::browser::ElementState;

/// Embedded contents of `scripts/element_probe.js`.
pub const ELEMENT_PROBE_BODY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/element_probe.js"
));

/// Marker thrown by [`build_xpath_script`] when the node has gone away.
pub const ELEMENT_NOT_FOUND: &str = "Element not found for xpath";

/// Wrap `body` in an IIFE that binds `el` to the first node matching `xpath`.
pub fn build_xpath_script(xpath: &str, body: &str) -> Result<String, serde_json::Error> {
    let xpath_json = serde_json::to_string(xpath)?;
    let marker = serde_json::to_string(ELEMENT_NOT_FOUND)?;
    Ok(format!(
        "(function() {{
            const result = document.evaluate({xpath_json}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
            const el = result.singleNodeValue;
            if (!el) {{
                throw new Error({marker});
            }}
            {body}
        }})()"
    ))
}

/// Script returning whether any node matches `xpath`; never throws on a miss.
pub fn build_presence_script(xpath: &str) -> Result<String, serde_json::Error> {
    let xpath_json = serde_json::to_string(xpath)?;
    Ok(format!(
        "(function() {{
            try {{
                const result = document.evaluate({xpath_json}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
                return result.singleNodeValue !== null;
            }} catch (err) {{
                return false;
            }}
        }})()"
    ))
}

pub fn build_probe_script(xpath: &str) -> Result<String, serde_json::Error> {
    build_xpath_script(xpath, ELEMENT_PROBE_BODY)
}

pub fn build_script_click(xpath: &str) -> Result<String, serde_json::Error> {
    build_xpath_script(xpath, "el.click(); return true;")
}

pub fn build_scroll_into_view(xpath: &str) -> Result<String, serde_json::Error> {
    build_xpath_script(
        xpath,
        "el.scrollIntoView({ behavior: 'instant', block: 'center', inline: 'center' }); return true;",
    )
}

/// Empty a form control and notify listeners the way user editing would.
pub fn build_clear_script(xpath: &str) -> Result<String, serde_json::Error> {
    build_xpath_script(
        xpath,
        "if (el.isContentEditable) {
            el.textContent = '';
        } else if ('value' in el) {
            el.value = '';
        } else {
            throw new Error('element not interactable: cannot clear a non-editable element');
        }
        el.dispatchEvent(new Event('input', { bubbles: true }));
        el.dispatchEvent(new Event('change', { bubbles: true }));
        return true;",
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Result of evaluating the element probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementProbe {
    pub tag: String,
    pub displayed: bool,
    pub enabled: bool,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub disabled_attr: Option<String>,
    #[serde(default)]
    pub obstructed_by: Option<String>,
    pub center: Point,
}

impl ElementProbe {
    pub fn state(&self) -> ElementState {
        ElementState {
            tag: self.tag.clone(),
            displayed: self.displayed,
            enabled: self.enabled,
            class: self.class.clone(),
            disabled_attr: self.disabled_attr.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_probe_reports_obstruction() {
        assert!(ELEMENT_PROBE_BODY.contains("elementFromPoint"));
        assert!(ELEMENT_PROBE_BODY.contains("obstructedBy"));
    }

    #[test]
    fn xpath_is_embedded_as_json_string() {
        let script = build_script_click(r#"//button[contains(., "Add")]"#).unwrap();
        assert!(script.contains(r#""//button[contains(., \"Add\")]""#));
        assert!(script.contains("el.click()"));
        assert!(script.contains(ELEMENT_NOT_FOUND));
    }

    #[test]
    fn presence_script_does_not_throw_on_miss() {
        let script = build_presence_script("//input").unwrap();
        assert!(script.contains("singleNodeValue !== null"));
        assert!(!script.contains("throw"));
    }

    #[test]
    fn probe_result_deserialises_into_state() {
        let probe: ElementProbe = serde_json::from_value(json!({
            "tag": "input",
            "displayed": true,
            "enabled": true,
            "class": "search-box",
            "disabledAttr": null,
            "obstructedBy": "div.modal-overlay",
            "center": {"x": 10.5, "y": 20.0}
        }))
        .unwrap();
        assert_eq!(probe.obstructed_by.as_deref(), Some("div.modal-overlay"));
        let state = probe.state();
        assert!(state.is_tag("INPUT"));
        assert_eq!(state.class.as_deref(), Some("search-box"));
        assert!(state.is_clickable());
    }
}
