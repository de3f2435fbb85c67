//! W3C WebDriver backend over blocking HTTP

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use qarun_common::{BrowserConfig, BrowserKind};

use crate::backend::{
    BackendError, BackendErrorKind, BackendResult, BrowserBackend, ElementRef, ElementState,
    Locator, SessionFactory, W3C_ELEMENT_KEY,
};
use crate::error::E2eResult;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::new(BackendErrorKind::Transport, e.to_string())
}

/// Issue one command and unwrap the `value` member
fn command(client: &Client, method: Method, url: &str, body: Option<Value>) -> BackendResult<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().map_err(transport)?;
    let status = response.status();
    let payload: Value = response.json().map_err(transport)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }
    let code = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    Err(BackendError::new(BackendErrorKind::from_w3c(code), message))
}

/// Capabilities for a new session
pub fn capabilities(kind: BrowserKind, headless: bool, width: u32, height: u32) -> Value {
    let window = format!("--window-size={},{}", width, height);
    let chromium_args = |headless: bool| {
        let mut args = vec![
            "--disable-notifications".to_string(),
            "--disable-popup-blocking".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            window.clone(),
        ];
        if headless {
            args.push("--headless=new".to_string());
            args.push("--disable-gpu".to_string());
        }
        args
    };

    let always_match = match kind {
        BrowserKind::Chrome => json!({
            "browserName": "chrome",
            "goog:chromeOptions": { "args": chromium_args(headless) }
        }),
        BrowserKind::Edge => json!({
            "browserName": "MicrosoftEdge",
            "ms:edgeOptions": { "args": chromium_args(headless) }
        }),
        BrowserKind::Firefox => {
            let mut args = vec![format!("--width={}", width), format!("--height={}", height)];
            if headless {
                args.push("-headless".to_string());
            }
            json!({
                "browserName": "firefox",
                "moz:firefoxOptions": {
                    "args": args,
                    "prefs": {
                        "dom.webnotifications.enabled": false,
                        "dom.disable_open_during_load": false
                    }
                }
            })
        }
        BrowserKind::Safari => json!({ "browserName": "safari" }),
    };
    json!({ "capabilities": { "alwaysMatch": always_match } })
}

/// Creates sessions against a running driver endpoint
pub struct WebDriverFactory {
    client: Client,
    base_url: String,
    width: u32,
    height: u32,
}

impl WebDriverFactory {
    pub fn new(base_url: &str, config: &BrowserConfig) -> E2eResult<Self> {
        let client = Client::builder().timeout(COMMAND_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            width: config.window_width,
            height: config.window_height,
        })
    }
}

impl SessionFactory for WebDriverFactory {
    fn create(&self, kind: BrowserKind, headless: bool) -> BackendResult<Box<dyn BrowserBackend>> {
        if kind == BrowserKind::Safari && headless {
            warn!("Safari has no headless mode; starting a visible session");
        }
        let value = command(
            &self.client,
            Method::POST,
            &format!("{}/session", self.base_url),
            Some(capabilities(kind, headless, self.width, self.height)),
        )
        .map_err(|e| BackendError::new(BackendErrorKind::Session, e.to_string()))?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::new(BackendErrorKind::Session, "new session response has no sessionId"))?
            .to_string();
        info!("WebDriver session {} started ({})", session_id, kind);

        let mut backend = WebDriverBackend {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
        };
        if !headless {
            let rect = json!({ "width": self.width, "height": self.height });
            if let Err(e) = backend.call(Method::POST, "/window/rect", Some(rect)) {
                debug!("Window resize failed: {}", e);
            }
        }
        Ok(Box::new(backend))
    }
}

/// One WebDriver session
pub struct WebDriverBackend {
    client: Client,
    session_url: String,
}

impl WebDriverBackend {
    fn call(&mut self, method: Method, path: &str, body: Option<Value>) -> BackendResult<Value> {
        command(&self.client, method, &format!("{}{}", self.session_url, path), body)
    }

    fn element_call(&mut self, method: Method, element: &ElementRef, path: &str, body: Option<Value>) -> BackendResult<Value> {
        self.call(method, &format!("/element/{}{}", element.0, path), body)
    }
}

impl BrowserBackend for WebDriverBackend {
    fn navigate(&mut self, url: &str) -> BackendResult<()> {
        self.call(Method::POST, "/url", Some(json!({ "url": url })))?;
        Ok(())
    }

    fn current_url(&mut self) -> BackendResult<String> {
        Ok(self
            .call(Method::GET, "/url", None)?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    fn find(&mut self, locator: &Locator) -> BackendResult<Option<ElementRef>> {
        let (using, value) = locator.to_w3c();
        let found = self.call(
            Method::POST,
            "/elements",
            Some(json!({ "using": using, "value": value })),
        )?;
        Ok(found
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| item.get(W3C_ELEMENT_KEY))
            .and_then(Value::as_str)
            .map(|id| ElementRef(id.to_string())))
    }

    fn element_state(&mut self, element: &ElementRef) -> BackendResult<ElementState> {
        let displayed = self.element_call(Method::GET, element, "/displayed", None)?;
        let enabled = self.element_call(Method::GET, element, "/enabled", None)?;
        Ok(ElementState {
            displayed: displayed.as_bool().unwrap_or(false),
            enabled: enabled.as_bool().unwrap_or(false),
        })
    }

    fn click(&mut self, element: &ElementRef) -> BackendResult<()> {
        self.element_call(Method::POST, element, "/click", Some(json!({})))?;
        Ok(())
    }

    fn clear(&mut self, element: &ElementRef) -> BackendResult<()> {
        self.element_call(Method::POST, element, "/clear", Some(json!({})))?;
        Ok(())
    }

    fn send_keys(&mut self, element: &ElementRef, text: &str) -> BackendResult<()> {
        self.element_call(Method::POST, element, "/value", Some(json!({ "text": text })))?;
        Ok(())
    }

    fn text(&mut self, element: &ElementRef) -> BackendResult<String> {
        Ok(self
            .element_call(Method::GET, element, "/text", None)?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    fn attribute(&mut self, element: &ElementRef, name: &str) -> BackendResult<Option<String>> {
        // the live value is a property, the attribute only holds the initial one
        let path = if name == "value" {
            "/property/value".to_string()
        } else {
            format!("/attribute/{}", name)
        };
        let value = self.element_call(Method::GET, element, &path, None)?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    fn screenshot(&mut self) -> BackendResult<Vec<u8>> {
        let encoded = self.call(Method::GET, "/screenshot", None)?;
        STANDARD
            .decode(encoded.as_str().unwrap_or_default())
            .map_err(|e| BackendError::new(BackendErrorKind::Other, format!("screenshot decode: {}", e)))
    }

    fn execute_script(&mut self, script: &str, args: Vec<Value>) -> BackendResult<Value> {
        self.call(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
    }

    fn quit(&mut self) -> BackendResult<()> {
        self.call(Method::DELETE, "", None)?;
        Ok(())
    }
}
