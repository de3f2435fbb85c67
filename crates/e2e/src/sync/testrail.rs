//! TestRail API v2 client

use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, info};

use qarun_common::SyncConfig;

use super::api::{
    ApiError, ApiErrorKind, ApiResult, CaseDefinition, ResultSubmission, TestManagementApi,
};
use crate::error::E2eResult;

const STATUS_PASSED: u8 = 1;
const STATUS_FAILED: u8 = 5;

/// Blocking HTTP client for `index.php?/api/v2/`
pub struct TestRailClient {
    client: Client,
    base: String,
    username: String,
    api_key: String,
    project_id: u64,
    suite_id: u64,
}

impl TestRailClient {
    pub fn new(config: &SyncConfig) -> E2eResult<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("qarun/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base: format!("{}/index.php?/api/v2/", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
            project_id: config.project_id,
            suite_id: config.suite_id,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn send(&self, request: RequestBuilder, path: &str) -> ApiResult<Value> {
        debug!("TestRail request: {}", path);
        let response = request
            .basic_auth(&self.username, Some(&self.api_key))
            .send()
            .map_err(|e| ApiError::new(ApiErrorKind::Transport, None, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ApiError::new(ApiErrorKind::Transport, Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            return Err(ApiError::from_response(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ApiError::new(ApiErrorKind::Decode, Some(status.as_u16()), e.to_string()))
    }

    fn get(&self, path: &str) -> ApiResult<Value> {
        self.send(self.client.get(self.endpoint(path)), path)
    }

    fn post(&self, path: &str, body: &Value) -> ApiResult<Value> {
        self.send(self.client.post(self.endpoint(path)).json(body), path)
    }

    fn id_of(value: &Value, what: &str) -> ApiResult<u64> {
        value
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ApiError::new(ApiErrorKind::Decode, None, format!("{} response has no id", what)))
    }
}

/// Whether a case carries a label with this title
fn has_label(case: &Value, label: &str) -> bool {
    case.get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels.iter().any(|l| {
                l.get("title")
                    .and_then(Value::as_str)
                    .or_else(|| l.as_str())
                    .map(|t| t.eq_ignore_ascii_case(label))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

impl TestManagementApi for TestRailClient {
    fn create_run(&self, name: &str, case_ids: &[u64]) -> ApiResult<u64> {
        let mut body = json!({
            "name": name,
            "include_all": false,
            "case_ids": case_ids,
        });
        if self.suite_id > 0 {
            body["suite_id"] = json!(self.suite_id);
        }
        let response = self.post(&format!("add_run/{}", self.project_id), &body)?;
        let id = Self::id_of(&response, "add_run")?;
        info!("Created run {} '{}' with {} case(s)", id, name, case_ids.len());
        Ok(id)
    }

    fn close_run(&self, run_id: u64) -> ApiResult<()> {
        self.post(&format!("close_run/{}", run_id), &json!({}))?;
        Ok(())
    }

    fn get_case(&self, case_id: u64) -> ApiResult<CaseDefinition> {
        let raw = self.get(&format!("get_case/{}", case_id))?;
        let title = raw
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Untitled")
            .to_string();
        Ok(CaseDefinition {
            id: case_id,
            title,
            raw,
        })
    }

    fn get_cases_by_label(&self, label: &str) -> ApiResult<Vec<u64>> {
        let mut path = format!("get_cases/{}&suite_id={}", self.project_id, self.suite_id);
        let mut ids = Vec::new();
        loop {
            let page = self.get(&path)?;
            let cases = match &page {
                Value::Array(items) => items.as_slice(),
                other => other
                    .get("cases")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default(),
            };
            ids.extend(
                cases
                    .iter()
                    .filter(|c| has_label(c, label))
                    .filter_map(|c| c.get("id").and_then(Value::as_u64)),
            );

            match page
                .get("_links")
                .and_then(|l| l.get("next"))
                .and_then(Value::as_str)
            {
                Some(next) => path = next.trim_start_matches("/api/v2/").to_string(),
                None => break,
            }
        }
        info!("Label '{}' matched {} case(s)", label, ids.len());
        Ok(ids)
    }

    fn submit_result(&self, run_id: u64, case_id: u64, result: &ResultSubmission) -> ApiResult<u64> {
        let mut body = json!({
            "status_id": if result.passed { STATUS_PASSED } else { STATUS_FAILED },
            "comment": result.comment,
        });
        if let Some(defects) = &result.defects {
            body["defects"] = json!(defects);
        }
        let response = self.post(&format!("add_result_for_case/{}/{}", run_id, case_id), &body)?;
        Self::id_of(&response, "add_result_for_case")
    }

    fn upload_attachment(&self, result_id: u64, file_name: &str, bytes: &[u8]) -> ApiResult<()> {
        let path = format!("add_attachment_to_result/{}", result_id);
        let part = multipart::Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
        let form = multipart::Form::new().part("attachment", part);
        self.send(self.client.post(self.endpoint(&path)).multipart(form), &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> TestRailClient {
        TestRailClient::new(&SyncConfig {
            enabled: true,
            url: server.base_url(),
            username: "qa@example.com".to_string(),
            api_key: "key".to_string(),
            project_id: 3,
            suite_id: 7,
            ..SyncConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_create_run() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/index.php")
                .header_exists("authorization")
                .json_body_includes(json!({ "name": "AutoRun - now", "case_ids": [296, 297], "suite_id": 7 }).to_string());
            then.status(200).json_body(json!({ "id": 41, "name": "AutoRun - now" }));
        });

        let id = client(&server).create_run("AutoRun - now", &[296, 297]).unwrap();
        assert_eq!(id, 41);
        mock.assert();
    }

    #[test]
    fn test_submit_result_status_and_defects() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/index.php")
                .json_body_includes(json!({ "status_id": 5, "defects": "AUTO-DEFECT-C296-1" }).to_string());
            then.status(200).json_body(json!({ "id": 900 }));
        });

        let id = client(&server)
            .submit_result(
                41,
                296,
                &ResultSubmission {
                    passed: false,
                    comment: "failed".to_string(),
                    defects: Some("AUTO-DEFECT-C296-1".to_string()),
                },
            )
            .unwrap();
        assert_eq!(id, 900);
        mock.assert();
    }

    #[test]
    fn test_invalid_run_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/index.php");
            then.status(400)
                .json_body(json!({ "error": "Field :run_id is not a valid test run." }));
        });

        let err = client(&server)
            .submit_result(
                41,
                296,
                &ResultSubmission {
                    passed: true,
                    comment: String::new(),
                    defects: None,
                },
            )
            .unwrap_err();
        assert!(err.is_run_invalid());
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn test_cases_by_label_accepts_both_shapes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/index.php");
            then.status(200).json_body(json!({
                "offset": 0,
                "cases": [
                    { "id": 1, "labels": [{ "id": 5, "title": "Smoke" }] },
                    { "id": 2, "labels": [] },
                    { "id": 3, "labels": [{ "id": 6, "title": "smoke" }] }
                ],
                "_links": { "next": null }
            }));
        });
        assert_eq!(client(&server).get_cases_by_label("SMOKE").unwrap(), vec![1, 3]);

        let bare = MockServer::start();
        bare.mock(|when, then| {
            when.method(GET).path("/index.php");
            then.status(200)
                .json_body(json!([{ "id": 8, "labels": [{ "title": "regression" }] }]));
        });
        assert_eq!(client(&bare).get_cases_by_label("regression").unwrap(), vec![8]);
    }

    #[test]
    fn test_get_case() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/index.php");
            then.status(200).json_body(json!({
                "id": 296,
                "title": "Login works",
                "custom_testrail_bdd_scenario": "Given x"
            }));
        });
        let case = client(&server).get_case(296).unwrap();
        assert_eq!(case.title, "Login works");
        assert_eq!(case.raw["custom_testrail_bdd_scenario"], "Given x");
    }

    #[test]
    fn test_upload_attachment_multipart() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/index.php")
                .body_includes("name=\"attachment\"");
            then.status(200).json_body(json!({ "attachment_id": 1 }));
        });
        client(&server)
            .upload_attachment(900, "report.json", b"{}")
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_transport_error() {
        let err = TestRailClient::new(&SyncConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..SyncConfig::default()
        })
        .unwrap()
        .close_run(1)
        .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Transport);
    }
}
