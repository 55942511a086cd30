use anyhow::{anyhow, Context};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use reqwest::Url;
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::error::AlertError;

const READY_POLL: Duration = Duration::from_millis(250);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra time the async side waits past the deadline before giving up on the capture thread.
const BACKSTOP_GRACE: Duration = Duration::from_secs(5);
const OVERALL_DEADLINE: &str = "overall render deadline";

#[derive(Debug, Clone)]
pub struct Screenshot {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub url: String,
    pub station_id: String,
}

/// Produces an image of the dashboard panel for one station.
#[async_trait]
pub trait PanelRenderer: Send + Sync {
    async fn render(&self, target: &RenderTarget) -> Result<Screenshot, AlertError>;
}

#[derive(Debug, Clone)]
struct RenderSettings {
    selector: String,
    ready_element_id: String,
    placeholder: String,
    width: u32,
    height: u32,
    scale_factor: u32,
    selector_timeout: Duration,
    ready_timeout: Duration,
    settle: Duration,
    overall_timeout: Duration,
    backstop_grace: Duration,
    chrome_path: Option<PathBuf>,
}

/// The browser steps one capture needs. Dropping the page releases the browser.
trait PanelPage {
    fn open(&mut self, url: &Url, timeout: Duration) -> Result<(), AlertError>;
    fn wait_for_panel(&mut self, selector: &str, timeout: Duration) -> Result<(), AlertError>;
    fn ready_value(&mut self, script: &str) -> Result<Option<Value>, AlertError>;
    fn screenshot(&mut self, selector: &str) -> Result<Vec<u8>, AlertError>;
}

type Launch = fn(&RenderSettings) -> Result<Box<dyn PanelPage>, AlertError>;

pub struct ChromeRenderer {
    settings: RenderSettings,
    launch: Launch,
}

impl ChromeRenderer {
    pub fn new(config: &PanelConfig) -> Self {
        Self {
            settings: RenderSettings {
                selector: config.selector.clone(),
                ready_element_id: config.ready_element_id.clone(),
                placeholder: config.placeholder.clone(),
                width: config.width,
                height: config.height,
                scale_factor: config.scale_factor,
                selector_timeout: Duration::from_millis(config.selector_timeout_ms),
                ready_timeout: Duration::from_millis(config.ready_timeout_ms),
                settle: Duration::from_millis(config.settle_ms),
                overall_timeout: Duration::from_secs(config.timeout_secs),
                backstop_grace: BACKSTOP_GRACE,
                chrome_path: config.chrome_path.clone(),
            },
            launch: ChromePage::launch,
        }
    }
}

#[async_trait]
impl PanelRenderer for ChromeRenderer {
    async fn render(&self, target: &RenderTarget) -> Result<Screenshot, AlertError> {
        let settings = self.settings.clone();
        let target = target.clone();
        let launch = self.launch;
        let overall = settings.overall_timeout;
        let backstop = overall + settings.backstop_grace;
        let deadline = Instant::now() + overall;

        // headless_chrome is blocking. Every step inside is capped by `deadline`, so the
        // capture normally returns its own RenderTimeout after closing the browser.
        let mut task =
            tokio::task::spawn_blocking(move || capture(launch, &settings, &target, deadline));
        let joined = match tokio::time::timeout(backstop, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    backstop_ms = backstop.as_millis() as u64,
                    "Capture overran its deadline, waiting for the browser to close"
                );
                // Joined only so the browser is gone before we report.
                let _ = task.await;
                return Err(AlertError::RenderTimeout {
                    condition: OVERALL_DEADLINE.to_string(),
                    waited_ms: overall.as_millis() as u64,
                });
            }
        };
        match joined {
            Ok(result) => result,
            Err(join_err) => Err(AlertError::Render(anyhow!(
                "render task aborted: {}",
                join_err
            ))),
        }
    }
}

/// Launch a page, drive it, and close it before returning, whatever the outcome.
fn capture(
    launch: Launch,
    settings: &RenderSettings,
    target: &RenderTarget,
    deadline: Instant,
) -> Result<Screenshot, AlertError> {
    let mut page = launch(settings)?;
    let result = drive(page.as_mut(), settings, target, deadline);
    drop(page);
    result
}

fn drive(
    page: &mut dyn PanelPage,
    settings: &RenderSettings,
    target: &RenderTarget,
    deadline: Instant,
) -> Result<Screenshot, AlertError> {
    let url = target_url(&target.url, &target.station_id).map_err(AlertError::Render)?;
    info!(url = %url, station = %target.station_id, "Navigating to panel");
    page.open(&url, budget(NAVIGATION_TIMEOUT, deadline, settings)?)?;

    page.wait_for_panel(
        &settings.selector,
        budget(settings.selector_timeout, deadline, settings)?,
    )?;

    wait_until_ready(page, settings, deadline)?;

    let settle = budget(settings.settle, deadline, settings)?;
    debug!(settle_ms = settle.as_millis() as u64, "Panel ready, letting chart settle");
    std::thread::sleep(settle);

    budget(Duration::ZERO, deadline, settings)?;
    let bytes = page.screenshot(&settings.selector)?;
    info!(bytes = bytes.len(), "Panel captured");

    Ok(Screenshot {
        bytes,
        content_type: "image/jpeg",
    })
}

/// A step's own timeout, cut down to what is left before the deadline.
fn budget(
    step: Duration,
    deadline: Instant,
    settings: &RenderSettings,
) -> Result<Duration, AlertError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(AlertError::RenderTimeout {
            condition: OVERALL_DEADLINE.to_string(),
            waited_ms: settings.overall_timeout.as_millis() as u64,
        });
    }
    Ok(step.min(remaining))
}

/// Poll the readiness field until it leaves the placeholder or a deadline passes.
fn wait_until_ready(
    page: &mut dyn PanelPage,
    settings: &RenderSettings,
    deadline: Instant,
) -> Result<(), AlertError> {
    let script = ready_script(&settings.ready_element_id);
    let started = Instant::now();
    let give_up = (started + settings.ready_timeout).min(deadline);
    loop {
        let value = page.ready_value(&script)?;
        if is_ready(value.as_ref(), &settings.placeholder) {
            return Ok(());
        }
        let now = Instant::now();
        if now >= give_up {
            return Err(AlertError::RenderTimeout {
                condition: format!(
                    "#{} still shows '{}'",
                    settings.ready_element_id, settings.placeholder
                ),
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        std::thread::sleep(READY_POLL.min(give_up - now));
    }
}

/// Owns the browser process for one capture. Dropping it closes the browser.
struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    fn launch(settings: &RenderSettings) -> Result<Box<dyn PanelPage>, AlertError> {
        let scale_arg = format!("--force-device-scale-factor={}", settings.scale_factor);
        let launch_options = LaunchOptions {
            headless: true,
            sandbox: false,
            window_size: Some((settings.width, settings.height)),
            path: settings.chrome_path.clone(),
            args: vec![OsStr::new(&scale_arg), OsStr::new("--hide-scrollbars")],
            idle_browser_timeout: settings.overall_timeout,
            ..Default::default()
        };
        let browser = Browser::new(launch_options)
            .context("Failed to launch headless browser")
            .map_err(AlertError::Render)?;
        info!("Browser launched");
        let tab = browser
            .new_tab()
            .context("Failed to create new tab")
            .map_err(AlertError::Render)?;
        Ok(Box::new(ChromePage {
            _browser: browser,
            tab,
        }))
    }
}

impl PanelPage for ChromePage {
    fn open(&mut self, url: &Url, timeout: Duration) -> Result<(), AlertError> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url.as_str())
            .and_then(|t| t.wait_until_navigated())
            .map(|_| ())
            .with_context(|| format!("Failed to load {}", url))
            .map_err(AlertError::Render)
    }

    fn wait_for_panel(&mut self, selector: &str, timeout: Duration) -> Result<(), AlertError> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(|e| AlertError::RenderTimeout {
                condition: format!("element {} never appeared ({})", selector, e),
                waited_ms: timeout.as_millis() as u64,
            })
    }

    fn ready_value(&mut self, script: &str) -> Result<Option<Value>, AlertError> {
        let result = self
            .tab
            .evaluate(script, false)
            .context("Failed to evaluate readiness check")
            .map_err(AlertError::Render)?;
        Ok(result.value)
    }

    fn screenshot(&mut self, selector: &str) -> Result<Vec<u8>, AlertError> {
        self.tab
            .find_element(selector)
            .and_then(|panel| panel.capture_screenshot(CaptureScreenshotFormatOption::Jpeg))
            .context("Failed to capture panel screenshot")
            .map_err(AlertError::Render)
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        info!("Browser closed");
    }
}

/// JS expression yielding the trimmed text of the element, or null when absent.
fn ready_script(element_id: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    let id = Value::String(element_id.to_string()).to_string();
    format!(
        "(function() {{ const el = document.getElementById({}); \
         return el ? el.textContent.trim() : null; }})()",
        id
    )
}

fn is_ready(value: Option<&Value>, placeholder: &str) -> bool {
    match value {
        Some(Value::String(text)) => !text.is_empty() && text != placeholder,
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

/// Panel URL with the station passed along as a query parameter.
pub fn target_url(panel_url: &str, station_id: &str) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(panel_url).with_context(|| format!("Invalid panel URL: {}", panel_url))?;
    url.query_pairs_mut().append_pair("station", station_id);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_target_url_adds_station() {
        let url = target_url("https://whatsairegpt.netlify.app", "TUL").unwrap();
        assert_eq!(url.as_str(), "https://whatsairegpt.netlify.app/?station=TUL");

        let url = target_url("https://panel.example.com/view?lang=es", "A B").unwrap();
        assert_eq!(url.as_str(), "https://panel.example.com/view?lang=es&station=A+B");
    }

    #[test]
    fn test_target_url_invalid() {
        assert!(target_url("whatsairegpt", "TUL").is_err());
    }

    #[test]
    fn test_is_ready() {
        assert!(!is_ready(None, "--"));
        assert!(!is_ready(Some(&Value::Null), "--"));
        assert!(!is_ready(Some(&json!("--")), "--"));
        assert!(!is_ready(Some(&json!("")), "--"));
        assert!(is_ready(Some(&json!("185")), "--"));
        assert!(is_ready(Some(&json!(185)), "--"));
    }

    #[test]
    fn test_ready_script_quotes_id() {
        let script = ready_script("iasValue");
        assert!(script.contains(r#"document.getElementById("iasValue")"#));
        let tricky = ready_script(r#"a"b"#);
        assert!(tricky.contains(r#"getElementById("a\"b")"#));
    }

    #[test]
    fn test_settings_from_config() {
        let renderer = ChromeRenderer::new(&PanelConfig::default());
        assert_eq!(renderer.settings.selector, ".whatsapp-alert-panel");
        assert_eq!(renderer.settings.ready_timeout, Duration::from_secs(15));
        assert_eq!(renderer.settings.overall_timeout, Duration::from_secs(45));
        assert_eq!((renderer.settings.width, renderer.settings.height), (480, 1200));
    }

    // Each launcher below counts drops in its own static so parallel tests stay independent.
    static STUCK_DROPS: AtomicUsize = AtomicUsize::new(0);
    static HUNG_DROPS: AtomicUsize = AtomicUsize::new(0);
    static READY_DROPS: AtomicUsize = AtomicUsize::new(0);

    struct FakePage {
        drops: &'static AtomicUsize,
        open_delay: Duration,
        ready: bool,
    }

    impl Drop for FakePage {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl PanelPage for FakePage {
        fn open(&mut self, _url: &Url, _timeout: Duration) -> Result<(), AlertError> {
            // Ignores its timeout, like a browser call that hangs.
            std::thread::sleep(self.open_delay);
            Ok(())
        }

        fn wait_for_panel(
            &mut self,
            _selector: &str,
            _timeout: Duration,
        ) -> Result<(), AlertError> {
            Ok(())
        }

        fn ready_value(&mut self, _script: &str) -> Result<Option<Value>, AlertError> {
            Ok(Some(if self.ready { json!("185") } else { json!("--") }))
        }

        fn screenshot(&mut self, _selector: &str) -> Result<Vec<u8>, AlertError> {
            Ok(vec![0xFF, 0xD8, 0xFF])
        }
    }

    fn launch_stuck(_settings: &RenderSettings) -> Result<Box<dyn PanelPage>, AlertError> {
        Ok(Box::new(FakePage {
            drops: &STUCK_DROPS,
            open_delay: Duration::ZERO,
            ready: false,
        }))
    }

    fn launch_hung(_settings: &RenderSettings) -> Result<Box<dyn PanelPage>, AlertError> {
        Ok(Box::new(FakePage {
            drops: &HUNG_DROPS,
            open_delay: Duration::from_millis(600),
            ready: false,
        }))
    }

    fn launch_ready(_settings: &RenderSettings) -> Result<Box<dyn PanelPage>, AlertError> {
        Ok(Box::new(FakePage {
            drops: &READY_DROPS,
            open_delay: Duration::ZERO,
            ready: true,
        }))
    }

    fn renderer(launch: Launch, overall: Duration, grace: Duration) -> ChromeRenderer {
        let mut renderer = ChromeRenderer::new(&PanelConfig::default());
        renderer.settings.overall_timeout = overall;
        renderer.settings.backstop_grace = grace;
        renderer.settings.settle = Duration::from_millis(10);
        renderer.launch = launch;
        renderer
    }

    fn target() -> RenderTarget {
        RenderTarget {
            url: "https://whatsairegpt.netlify.app".into(),
            station_id: "TUL".into(),
        }
    }

    #[tokio::test]
    async fn test_overall_deadline_cuts_readiness_wait_and_closes_page() {
        // Readiness alone would wait 15 s; the 400 ms overall deadline wins.
        let r = renderer(launch_stuck, Duration::from_millis(400), BACKSTOP_GRACE);
        let started = Instant::now();
        let result = r.render(&target()).await;

        assert!(matches!(result, Err(AlertError::RenderTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(STUCK_DROPS.load(Ordering::SeqCst), 1, "page closed before render returned");
    }

    #[tokio::test]
    async fn test_hung_step_still_closes_page_before_returning() {
        // The step ignores its budget, so the async backstop fires first.
        let r = renderer(launch_hung, Duration::from_millis(100), Duration::from_millis(50));
        let started = Instant::now();
        let result = r.render(&target()).await;

        match result {
            Err(AlertError::RenderTimeout { condition, .. }) => {
                assert_eq!(condition, OVERALL_DEADLINE)
            }
            other => panic!("expected render timeout, got {:?}", other),
        }
        // Returned only once the hung step finished and the page was dropped.
        assert!(started.elapsed() >= Duration::from_millis(600));
        assert_eq!(HUNG_DROPS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_panel_is_captured_and_closed() {
        let r = renderer(launch_ready, Duration::from_secs(5), BACKSTOP_GRACE);
        let shot = r.render(&target()).await.unwrap();
        assert_eq!(shot.bytes, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(shot.content_type, "image/jpeg");
        assert_eq!(READY_DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_budget_caps_step_and_fails_after_deadline() {
        let settings = ChromeRenderer::new(&PanelConfig::default()).settings;
        let soon = Instant::now() + Duration::from_millis(200);
        let capped = budget(Duration::from_secs(10), soon, &settings).unwrap();
        assert!(capped <= Duration::from_millis(200));
        assert_eq!(
            budget(Duration::from_millis(50), soon, &settings).unwrap(),
            Duration::from_millis(50)
        );
        let past = Instant::now() - Duration::from_millis(1);
        assert!(matches!(
            budget(Duration::from_secs(1), past, &settings),
            Err(AlertError::RenderTimeout { .. })
        ));
    }
}
