use anyhow::{anyhow, bail};
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BrowserSession, Locator};
use crate::models::BrowserStep;
use crate::utils::error::CheckError;

/// Format used by `{% now %}` when none is given.
pub const DEFAULT_NOW_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

static NOW_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%\s*now\s+['"]([^'"]*)['"]\s*(?:,\s*['"]([^'"]*)['"]\s*)?%\}"#)
        .expect("valid now-tag pattern")
});
static NOW_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*now\s*\}\}").expect("valid now-var pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOperation {
    GotoUrl,
    ClickElement,
    ClickElementIfExists,
    EnterText,
    PressEnter,
    ExecuteJs,
    WaitForSeconds,
    WaitForText,
    ScrollDown,
    RemoveElements,
    CheckCheckbox,
    UncheckCheckbox,
}

impl StepOperation {
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name.trim() {
            "Goto URL" => StepOperation::GotoUrl,
            "Click element" => StepOperation::ClickElement,
            "Click element if exists" => StepOperation::ClickElementIfExists,
            "Enter text in field" => StepOperation::EnterText,
            "Press Enter" => StepOperation::PressEnter,
            "Execute JS" => StepOperation::ExecuteJs,
            "Wait for seconds" => StepOperation::WaitForSeconds,
            "Wait for text" => StepOperation::WaitForText,
            "Scroll down" => StepOperation::ScrollDown,
            "Remove elements" => StepOperation::RemoveElements,
            "Check checkbox" => StepOperation::CheckCheckbox,
            "Uncheck checkbox" => StepOperation::UncheckCheckbox,
            _ => return None,
        };
        Some(op)
    }
}

/// Steps the editor inserts as placeholders; never executed.
pub fn is_placeholder(step: &BrowserStep) -> bool {
    let op = step.operation.trim();
    op.is_empty() || op == "Choose one" || op == "Goto site"
}

pub fn valid_steps(steps: &[BrowserStep]) -> impl Iterator<Item = &BrowserStep> {
    steps.iter().filter(|s| !is_placeholder(s))
}

/// Screenshot and HTML taken around one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCapture {
    pub label: String,
    pub screenshot: Option<Vec<u8>>,
    pub html: Option<String>,
}

fn format_now(now: DateTime<Utc>, zone: &str, format: &str) -> Result<String, String> {
    let mut out = String::new();
    let written = if zone.eq_ignore_ascii_case("local") {
        write!(out, "{}", now.with_timezone(&Local).format(format))
    } else {
        if !zone.eq_ignore_ascii_case("utc") {
            warn!("Unsupported timezone '{}' in step template, using UTC", zone);
        }
        write!(out, "{}", now.format(format))
    };
    written.map_err(|_| format!("Invalid date format '{}'", format))?;
    Ok(out)
}

/// Expand the date helpers in a step value.
///
/// `{{ now }}` becomes an ISO-8601 UTC timestamp and
/// `{% now 'utc', '<strftime>' %}` renders with the given format.
pub fn render_template(input: &str, now: DateTime<Utc>) -> Result<String, String> {
    if !input.contains("{%") && !input.contains("{{") {
        return Ok(input.to_string());
    }

    let mut rendered = String::with_capacity(input.len());
    let mut last = 0;
    for caps in NOW_TAG.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        let zone = caps.get(1).map_or("utc", |m| m.as_str());
        let format = caps.get(2).map_or(DEFAULT_NOW_FORMAT, |m| m.as_str());
        rendered.push_str(&input[last..whole.start()]);
        rendered.push_str(&format_now(now, zone, format)?);
        last = whole.end();
    }
    rendered.push_str(&input[last..]);

    Ok(NOW_VAR
        .replace_all(&rendered, now.to_rfc3339().as_str())
        .into_owned())
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// JS expression evaluating to an array of the elements matched by `selector`.
fn elements_js(selector: &str) -> String {
    match Locator::parse(selector) {
        Locator::Css(css) => format!("Array.from(document.querySelectorAll({}))", js_string(&css)),
        Locator::XPath(xpath) => format!(
            "(function() {{ var r = document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); var out = []; for (var i = 0; i < r.snapshotLength; i++) {{ out.push(r.snapshotItem(i)); }} return out; }})()",
            js_string(&xpath)
        ),
    }
}

/// Result of one interpreter pass.
#[derive(Debug)]
pub struct StepRun {
    pub captures: Vec<StepCapture>,
    /// The step that stopped the run, if any.
    pub failure: Option<CheckError>,
}

impl StepRun {
    pub fn into_result(self) -> Result<Vec<StepCapture>, CheckError> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.captures),
        }
    }
}

/// Drives a browser session through a watch's configured steps.
#[derive(Debug, Clone)]
pub struct StepInterpreter {
    wait_for_text_timeout: Duration,
    poll_interval: Duration,
}

impl Default for StepInterpreter {
    fn default() -> Self {
        Self {
            wait_for_text_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl StepInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.wait_for_text_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Run every non-placeholder step in order. Stops at the first failure;
    /// captures taken up to that point are kept.
    pub async fn run(&self, session: &dyn BrowserSession, steps: &[BrowserStep]) -> StepRun {
        let mut captures = Vec::new();

        for (index, step) in valid_steps(steps).enumerate() {
            let step_n = index + 1;
            debug!(">> Iterating check - browser Step n {} - {}...", step_n, step.operation);

            captures.push(self.capture(session, format!("before-{}", step_n)).await);

            if let Err(e) = self.run_step(session, step).await {
                return StepRun {
                    captures,
                    failure: Some(CheckError::BrowserStepFailed {
                        step_n,
                        cause: e.to_string(),
                    }),
                };
            }

            captures.push(self.capture(session, step_n.to_string()).await);
        }

        StepRun {
            captures,
            failure: None,
        }
    }

    async fn run_step(&self, session: &dyn BrowserSession, step: &BrowserStep) -> anyhow::Result<()> {
        let operation = StepOperation::from_name(&step.operation)
            .ok_or_else(|| anyhow!("Unknown browser step operation '{}'", step.operation))?;

        let now = Utc::now();
        let selector = render_template(&step.selector, now).map_err(|e| anyhow!(e))?;
        let value = render_template(&step.optional_value, now).map_err(|e| anyhow!(e))?;

        self.execute(session, operation, &selector, &value).await
    }

    async fn execute(
        &self,
        session: &dyn BrowserSession,
        operation: StepOperation,
        selector: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        match operation {
            StepOperation::GotoUrl => session.navigate(value).await,
            StepOperation::ClickElement => session.click(selector).await,
            StepOperation::ClickElementIfExists => {
                if let Err(e) = session.click(selector).await {
                    debug!("Optional click on '{}' skipped: {}", selector, e);
                }
                Ok(())
            }
            StepOperation::EnterText => session.type_text(selector, value).await,
            StepOperation::PressEnter => session.press_enter().await,
            StepOperation::ExecuteJs => session.execute_script(value).await.map(|_| ()),
            StepOperation::WaitForSeconds => {
                let seconds: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("Invalid number of seconds '{}'", value))?;
                let pause = Duration::try_from_secs_f64(seconds)
                    .map_err(|e| anyhow!("Invalid number of seconds '{}': {}", value, e))?;
                tokio::time::sleep(pause).await;
                Ok(())
            }
            StepOperation::WaitForText => self.wait_for_text(session, value).await,
            StepOperation::ScrollDown => session
                .execute_script("window.scrollBy(0, Math.max(window.innerHeight, 500)); return null;")
                .await
                .map(|_| ()),
            StepOperation::RemoveElements => {
                let script = format!(
                    "var els = {}; els.forEach(function(e) {{ e.parentNode && e.parentNode.removeChild(e); }}); return els.length;",
                    elements_js(selector)
                );
                session.execute_script(&script).await.map(|_| ())
            }
            StepOperation::CheckCheckbox | StepOperation::UncheckCheckbox => {
                let checked = operation == StepOperation::CheckCheckbox;
                let script = format!(
                    "var els = {}; if (!els.length) {{ throw new Error('No checkbox found'); }} els.forEach(function(e) {{ e.checked = {}; e.dispatchEvent(new Event('change', {{ bubbles: true }})); }}); return els.length;",
                    elements_js(selector),
                    checked
                );
                session.execute_script(&script).await.map(|_| ())
            }
        }
    }

    async fn wait_for_text(&self, session: &dyn BrowserSession, text: &str) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + self.wait_for_text_timeout;
        loop {
            let source = session.page_source().await?;
            if source.contains(text) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("Timed out waiting for text '{}'", text);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn capture(&self, session: &dyn BrowserSession, label: String) -> StepCapture {
        let screenshot = match session.screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Step capture {} screenshot failed: {}", label, e);
                None
            }
        };
        let html = match session.page_source().await {
            Ok(html) => Some(html),
            Err(e) => {
                warn!("Step capture {} HTML failed: {}", label, e);
                None
            }
        };
        StepCapture {
            label,
            screenshot,
            html,
        }
    }
}
