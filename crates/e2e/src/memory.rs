//! In-memory implementations of the browser and test-management seams
//!
//! Pages, sessions and the remote service are scripted in process so the
//! orchestration core can be driven with injected faults.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use qarun_common::{BrowserKind, RunStatus};

use crate::backend::{
    BackendError, BackendErrorKind, BackendResult, BrowserBackend, ElementRef, ElementState,
    Locator, SessionFactory, W3C_ELEMENT_KEY,
};
use crate::sync::{ApiError, ApiErrorKind, ApiResult, CaseDefinition, ResultSubmission, TestManagementApi};

/// Smallest valid PNG header, returned as the screenshot payload
pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Body the service returns for a result whose case is not part of the run
const CASE_NOT_IN_RUN: &str = r#"{"error":"No (active) test found for the run/case combination."}"#;

/// One element on a [`MemoryPage`]
#[derive(Debug, Clone)]
pub struct MemoryElement {
    text: String,
    value: String,
    attributes: HashMap<String, String>,
    displayed: bool,
    enabled: bool,
    accepts_keys: bool,
}

impl Default for MemoryElement {
    fn default() -> Self {
        Self {
            text: String::new(),
            value: String::new(),
            attributes: HashMap::new(),
            displayed: true,
            enabled: true,
            accepts_keys: true,
        }
    }
}

impl MemoryElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Keystrokes are accepted but never reach the element's value
    pub fn rejecting_keys(mut self) -> Self {
        self.accepts_keys = false;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct PageState {
    url: String,
    elements: HashMap<String, MemoryElement>,
    faults: HashMap<String, VecDeque<BackendError>>,
    calls: Vec<String>,
}

/// Scripted page shared between a test and the backend driving it
#[derive(Debug, Clone, Default)]
pub struct MemoryPage {
    state: Arc<Mutex<PageState>>,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(self, locator: &Locator, element: MemoryElement) -> Self {
        self.state.lock().elements.insert(locator.to_string(), element);
        self
    }

    /// Queue errors returned by the next calls of `op`
    ///
    /// `op` is one of `navigate`, `find`, `click`, `clear`, `send_keys`,
    /// `text`, `attribute`, `screenshot`, `execute_script`, `script_click`,
    /// `quit`.
    pub fn fail_times(&self, op: &str, errors: Vec<BackendError>) {
        self.state
            .lock()
            .faults
            .entry(op.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail every call of `op` until the queue is replaced
    pub fn fail_always(&self, op: &str, error: BackendError) {
        self.fail_times(op, vec![error; 1024]);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn value_of(&self, locator: &Locator) -> Option<String> {
        self.state
            .lock()
            .elements
            .get(&locator.to_string())
            .map(|e| e.value.clone())
    }

    pub fn attribute_of(&self, locator: &Locator, name: &str) -> Option<String> {
        self.state
            .lock()
            .elements
            .get(&locator.to_string())
            .and_then(|e| e.attributes.get(name).cloned())
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    /// Independent copy with an empty call log
    pub fn fork(&self) -> Self {
        let mut state = self.state.lock().clone();
        state.calls.clear();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

/// [`BrowserBackend`] over a [`MemoryPage`]
pub struct MemoryBackend {
    page: MemoryPage,
    quits: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new(page: MemoryPage) -> Self {
        Self {
            page,
            quits: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn enter(&self, op: &str, detail: &str) -> BackendResult<()> {
        let mut state = self.page.state.lock();
        state.calls.push(if detail.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, detail)
        });
        match state.faults.get_mut(op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_element<T>(
        &self,
        element: &ElementRef,
        f: impl FnOnce(&mut MemoryElement) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut state = self.page.state.lock();
        match state.elements.get_mut(&element.0) {
            Some(el) => f(el),
            None => Err(BackendError::new(
                BackendErrorKind::StaleElement,
                format!("element {} is no longer attached", element.0),
            )),
        }
    }

    fn script_target(args: &[Value]) -> Option<ElementRef> {
        args.first()
            .and_then(|v| v.get(W3C_ELEMENT_KEY))
            .and_then(Value::as_str)
            .map(|id| ElementRef(id.to_string()))
    }
}

impl BrowserBackend for MemoryBackend {
    fn navigate(&mut self, url: &str) -> BackendResult<()> {
        self.enter("navigate", url)?;
        self.page.state.lock().url = url.to_string();
        Ok(())
    }

    fn current_url(&mut self) -> BackendResult<String> {
        Ok(self.page.url())
    }

    fn find(&mut self, locator: &Locator) -> BackendResult<Option<ElementRef>> {
        let key = locator.to_string();
        self.enter("find", &key)?;
        let state = self.page.state.lock();
        if state.elements.contains_key(&key) {
            Ok(Some(ElementRef(key)))
        } else {
            Ok(None)
        }
    }

    fn element_state(&mut self, element: &ElementRef) -> BackendResult<ElementState> {
        self.with_element(element, |el| {
            Ok(ElementState {
                displayed: el.displayed,
                enabled: el.enabled,
            })
        })
    }

    fn click(&mut self, element: &ElementRef) -> BackendResult<()> {
        self.enter("click", &element.0)?;
        self.with_element(element, |_| Ok(()))
    }

    fn clear(&mut self, element: &ElementRef) -> BackendResult<()> {
        self.enter("clear", &element.0)?;
        self.with_element(element, |el| {
            el.value.clear();
            Ok(())
        })
    }

    fn send_keys(&mut self, element: &ElementRef, text: &str) -> BackendResult<()> {
        self.enter("send_keys", &element.0)?;
        self.with_element(element, |el| {
            if el.accepts_keys {
                el.value.push_str(text);
            }
            Ok(())
        })
    }

    fn text(&mut self, element: &ElementRef) -> BackendResult<String> {
        self.enter("text", &element.0)?;
        self.with_element(element, |el| Ok(el.text.clone()))
    }

    fn attribute(&mut self, element: &ElementRef, name: &str) -> BackendResult<Option<String>> {
        self.enter("attribute", &format!("{} {}", element.0, name))?;
        self.with_element(element, |el| {
            if name == "value" {
                Ok(Some(el.value.clone()))
            } else {
                Ok(el.attributes.get(name).cloned())
            }
        })
    }

    fn screenshot(&mut self) -> BackendResult<Vec<u8>> {
        self.enter("screenshot", "")?;
        Ok(FAKE_PNG.to_vec())
    }

    fn execute_script(&mut self, script: &str, args: Vec<Value>) -> BackendResult<Value> {
        self.enter("execute_script", script)?;
        let target = Self::script_target(&args);

        if script.contains("document.readyState") {
            return Ok(Value::Bool(true));
        }
        if let Some(element) = target {
            if script.contains(".click()") {
                self.enter("script_click", &element.0)?;
                return self.with_element(&element, |_| Ok(Value::Null));
            }
            if script.contains("setAttribute('style'") {
                let style = args.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
                return self.with_element(&element, |el| {
                    el.attributes.insert("style".to_string(), style);
                    Ok(Value::Null)
                });
            }
            if script.contains("removeAttribute('style')") {
                return self.with_element(&element, |el| {
                    el.attributes.remove("style");
                    Ok(Value::Null)
                });
            }
            if script.contains(".value = arguments[1]") {
                let value = args.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
                return self.with_element(&element, |el| {
                    el.value = value;
                    Ok(Value::Null)
                });
            }
        }
        Ok(Value::Null)
    }

    fn quit(&mut self) -> BackendResult<()> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        self.enter("quit", "")
    }
}

/// [`SessionFactory`] handing out forks of a template page
pub struct MemorySessionFactory {
    template: MemoryPage,
    pages: Mutex<Vec<MemoryPage>>,
    creation_error: Mutex<Option<String>>,
    quits: Arc<AtomicUsize>,
}

impl MemorySessionFactory {
    pub fn new(template: MemoryPage) -> Self {
        Self {
            template,
            pages: Mutex::new(Vec::new()),
            creation_error: Mutex::new(None),
            quits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_creation(&self, reason: &str) {
        *self.creation_error.lock() = Some(reason.to_string());
    }

    pub fn created(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    /// Pages of every session created so far, in creation order
    pub fn pages(&self) -> Vec<MemoryPage> {
        self.pages.lock().clone()
    }
}

impl SessionFactory for MemorySessionFactory {
    fn create(&self, _kind: BrowserKind, _headless: bool) -> BackendResult<Box<dyn BrowserBackend>> {
        if let Some(reason) = self.creation_error.lock().clone() {
            return Err(BackendError::new(BackendErrorKind::Session, reason));
        }
        let page = self.template.fork();
        self.pages.lock().push(page.clone());
        Ok(Box::new(MemoryBackend {
            page,
            quits: Arc::clone(&self.quits),
        }))
    }
}

/// A run held by [`MemoryTestManagement`]
#[derive(Debug, Clone)]
pub struct MemoryRun {
    pub id: u64,
    pub name: String,
    pub case_ids: Vec<u64>,
    pub status: RunStatus,
}

/// A result held by [`MemoryTestManagement`]
#[derive(Debug, Clone)]
pub struct MemoryResult {
    pub id: u64,
    pub run_id: u64,
    pub case_id: u64,
    pub submission: ResultSubmission,
}

#[derive(Debug, Default)]
struct TmState {
    next_id: u64,
    runs: BTreeMap<u64, MemoryRun>,
    results: Vec<MemoryResult>,
    attachments: Vec<(u64, String, usize)>,
    cases: BTreeMap<u64, CaseDefinition>,
    labels: BTreeMap<String, Vec<u64>>,
    fail_uploads: bool,
    submit_faults: VecDeque<ApiError>,
    create_faults: VecDeque<ApiError>,
}

impl TmState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory remote test-management service
#[derive(Debug, Default)]
pub struct MemoryTestManagement {
    state: Mutex<TmState>,
}

impl MemoryTestManagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_case(self, case: CaseDefinition) -> Self {
        self.state.lock().cases.insert(case.id, case);
        self
    }

    pub fn with_label(self, label: &str, case_ids: &[u64]) -> Self {
        self.state
            .lock()
            .labels
            .insert(label.to_ascii_lowercase(), case_ids.to_vec());
        self
    }

    /// Close a run behind the synchronizer's back
    pub fn close_remotely(&self, run_id: u64) {
        if let Some(run) = self.state.lock().runs.get_mut(&run_id) {
            run.status = RunStatus::Closed;
        }
    }

    pub fn fail_uploads(&self) {
        self.state.lock().fail_uploads = true;
    }

    pub fn fail_next_submit(&self, error: ApiError) {
        self.state.lock().submit_faults.push_back(error);
    }

    pub fn fail_next_create(&self, error: ApiError) {
        self.state.lock().create_faults.push_back(error);
    }

    pub fn runs(&self) -> Vec<MemoryRun> {
        self.state.lock().runs.values().cloned().collect()
    }

    pub fn results(&self) -> Vec<MemoryResult> {
        self.state.lock().results.clone()
    }

    pub fn attachments(&self) -> Vec<(u64, String, usize)> {
        self.state.lock().attachments.clone()
    }
}

impl TestManagementApi for MemoryTestManagement {
    fn create_run(&self, name: &str, case_ids: &[u64]) -> ApiResult<u64> {
        let mut state = self.state.lock();
        if let Some(err) = state.create_faults.pop_front() {
            return Err(err);
        }
        let id = state.next_id();
        state.runs.insert(
            id,
            MemoryRun {
                id,
                name: name.to_string(),
                case_ids: case_ids.to_vec(),
                status: RunStatus::Open,
            },
        );
        Ok(id)
    }

    fn close_run(&self, run_id: u64) -> ApiResult<()> {
        let mut state = self.state.lock();
        match state.runs.get_mut(&run_id) {
            Some(run) => {
                run.status = RunStatus::Closed;
                Ok(())
            }
            None => Err(ApiError::new(
                ApiErrorKind::RunInvalid,
                Some(400),
                format!("Field :run_id is not a valid test run ({})", run_id),
            )),
        }
    }

    fn get_case(&self, case_id: u64) -> ApiResult<CaseDefinition> {
        self.state.lock().cases.get(&case_id).cloned().ok_or_else(|| {
            ApiError::new(
                ApiErrorKind::NotFound,
                Some(400),
                format!("Field :case_id is not a valid test case ({})", case_id),
            )
        })
    }

    fn get_cases_by_label(&self, label: &str) -> ApiResult<Vec<u64>> {
        Ok(self
            .state
            .lock()
            .labels
            .get(&label.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    fn submit_result(&self, run_id: u64, case_id: u64, result: &ResultSubmission) -> ApiResult<u64> {
        let mut state = self.state.lock();
        if let Some(err) = state.submit_faults.pop_front() {
            return Err(err);
        }
        let Some(run) = state.runs.get(&run_id).filter(|r| r.status == RunStatus::Open) else {
            return Err(ApiError::new(
                ApiErrorKind::RunInvalid,
                Some(400),
                format!("Field :run_id is not a valid or active test run ({})", run_id),
            ));
        };
        if !run.case_ids.contains(&case_id) {
            return Err(ApiError::from_response(400, CASE_NOT_IN_RUN));
        }
        let id = state.next_id();
        state.results.push(MemoryResult {
            id,
            run_id,
            case_id,
            submission: result.clone(),
        });
        Ok(id)
    }

    fn upload_attachment(&self, result_id: u64, file_name: &str, bytes: &[u8]) -> ApiResult<()> {
        let mut state = self.state.lock();
        if state.fail_uploads {
            return Err(ApiError::new(
                ApiErrorKind::Rejected,
                Some(500),
                "attachment storage unavailable",
            ));
        }
        state
            .attachments
            .push((result_id, file_name.to_string(), bytes.len()));
        Ok(())
    }
}

/// Case definition with a BDD template, for generator tests
pub fn sample_case(id: u64, title: &str, steps: &str) -> CaseDefinition {
    CaseDefinition {
        id,
        title: title.to_string(),
        raw: json!({
            "id": id,
            "title": title,
            "custom_testrail_bdd_scenario": steps,
        }),
    }
}
