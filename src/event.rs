// Event translation - normalizes raw runner lifecycle payloads into
// remote item start/finish requests

use crate::client::{
    Attribute, EntityType, FinishItemRequest, Issue, ItemStartRequest, ItemStatus, LogLevel,
};
use crate::attachment::Attachment;
use std::path::PathBuf;

/// Remote item names are capped by the service.
const MAX_ITEM_NAME_LEN: usize = 255;

/// Suite lifecycle payload, already carrying its translated start fields.
#[derive(Debug, Clone)]
pub struct SuiteStartEvent {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub start_time: i64,
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
    pub code_ref: Option<String>,
    pub test_file_name: Option<String>,
}

/// Suite end payload as reported by the runner.
#[derive(Debug, Clone)]
pub struct SuiteEndEvent {
    pub id: String,
    pub title: String,
    pub status: Option<ItemStatus>,
}

/// Test lifecycle payload.
#[derive(Debug, Clone)]
pub struct TestEvent {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub status: Option<ItemStatus>,
    pub code_ref: Option<String>,
    pub tags: Vec<Attribute>,
    pub err: Option<String>,
    pub test_file_name: Option<String>,
}

/// Hook kinds as the runner names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    BeforeAll,
    BeforeEach,
    AfterEach,
    AfterAll,
}

impl HookType {
    /// Runner-side hook name, as it appears inside hook titles.
    pub fn runner_name(self) -> &'static str {
        match self {
            HookType::BeforeAll => "before all",
            HookType::BeforeEach => "before each",
            HookType::AfterEach => "after each",
            HookType::AfterAll => "after all",
        }
    }

    /// Remote entity type this hook reports as.
    pub fn entity_type(self) -> EntityType {
        match self {
            HookType::BeforeAll => EntityType::BeforeSuite,
            HookType::BeforeEach => EntityType::BeforeMethod,
            HookType::AfterEach => EntityType::AfterMethod,
            HookType::AfterAll => EntityType::AfterSuite,
        }
    }
}

/// Hook completion payload. The runner reports a hook as one event; the
/// reporter synthesizes the remote start/finish pair from it.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub hook_type: HookType,
    pub status: Option<ItemStatus>,
    pub err: Option<String>,
    pub code_ref: Option<String>,
}

/// Screenshot metadata handed over by the runner.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotInfo {
    pub path: Option<PathBuf>,
}

/// Log submission payload.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub file: Option<Attachment>,
    /// Defaults to call time when absent.
    pub time: Option<i64>,
}

/// Finish-time overrides staged for the currently active test or suite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestFinishParams {
    pub attributes: Vec<Attribute>,
    pub description: Option<String>,
    pub test_case_id: Option<String>,
    pub status: Option<ItemStatus>,
}

/// Cap an item name to what the remote service accepts.
pub fn truncate_title(title: &str) -> String {
    title.chars().take(MAX_ITEM_NAME_LEN).collect()
}

/// Build a code reference from a spec file path and the item's title path.
pub fn code_ref(test_file_name: &str, title_path: &[String]) -> String {
    format!("{}/{}", test_file_name.replace('\\', "/"), title_path.join("/"))
}

/// Split a space-separated tag string into value attributes.
pub fn tags_from_string(tags: Option<&str>) -> Vec<Attribute> {
    tags.map(|tags| tags.split_whitespace().map(Attribute::value).collect())
        .unwrap_or_default()
}

pub fn suite_start_request(suite: &SuiteStartEvent) -> ItemStartRequest {
    ItemStartRequest {
        name: truncate_title(&suite.title),
        item_type: EntityType::Suite,
        start_time: suite.start_time,
        code_ref: suite.code_ref.clone(),
        description: suite.description.clone(),
        attributes: suite.attributes.clone(),
    }
}

pub fn test_start_request(test: &TestEvent, start_time: i64) -> ItemStartRequest {
    ItemStartRequest {
        name: truncate_title(&test.title),
        item_type: EntityType::Step,
        start_time,
        code_ref: test.code_ref.clone(),
        description: None,
        attributes: test.tags.clone(),
    }
}

/// Hook titles arrive as `"before each" hook: <name>`; the remote item is
/// named after the bare hook name.
pub fn hook_start_request(hook: &HookEvent, start_time: i64) -> ItemStartRequest {
    let prefix = format!("\"{}\" hook:", hook.hook_type.runner_name());
    let name = hook.title.replace(&prefix, "").trim().to_string();
    ItemStartRequest {
        name: truncate_title(&name),
        item_type: hook.hook_type.entity_type(),
        start_time,
        code_ref: hook.code_ref.clone(),
        description: None,
        attributes: Vec::new(),
    }
}

/// Build a test finish request from the merged finish parameters.
///
/// A skipped test gets an explicit non-issue marker when issue tracking for
/// skipped tests is disabled in the configuration.
pub fn test_end_request(
    finish: TestFinishParams,
    end_time: i64,
    skipped_issue: bool,
) -> FinishItemRequest {
    let issue = match finish.status {
        Some(ItemStatus::Skipped) if !skipped_issue => Some(Issue::not_issue()),
        _ => None,
    };
    FinishItemRequest {
        end_time,
        status: finish.status,
        attributes: Some(finish.attributes),
        description: finish.description,
        test_case_id: finish.test_case_id,
        issue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event(title: &str) -> TestEvent {
        TestEvent {
            id: "t1".to_string(),
            parent_id: Some("s1".to_string()),
            title: title.to_string(),
            status: None,
            code_ref: Some("spec.cy.js/suite/test".to_string()),
            tags: Vec::new(),
            err: None,
            test_file_name: Some("spec.cy.js".to_string()),
        }
    }

    #[test]
    fn test_truncate_title_caps_at_limit() {
        let long = "x".repeat(300);
        assert_eq!(truncate_title(&long).chars().count(), 255);
        assert_eq!(truncate_title("short"), "short");
    }

    #[test]
    fn test_code_ref_normalizes_separators() {
        let path = ["root suite".to_string(), "test".to_string()];
        assert_eq!(
            code_ref("cypress\\e2e\\spec.cy.js", &path),
            "cypress/e2e/spec.cy.js/root suite/test"
        );
    }

    #[test]
    fn test_tags_from_string() {
        let tags = tags_from_string(Some("@smoke @regression"));
        assert_eq!(tags, vec![Attribute::value("@smoke"), Attribute::value("@regression")]);
        assert!(tags_from_string(None).is_empty());
    }

    #[test]
    fn test_test_start_request_is_step() {
        let request = test_start_request(&test_event("login works"), 1000);
        assert_eq!(request.item_type, EntityType::Step);
        assert_eq!(request.name, "login works");
        assert_eq!(request.start_time, 1000);
    }

    #[test]
    fn test_hook_start_request_strips_prefix() {
        let hook = HookEvent {
            id: "h1_t1".to_string(),
            parent_id: Some("s1".to_string()),
            title: "\"before each\" hook: prepare session".to_string(),
            hook_type: HookType::BeforeEach,
            status: None,
            err: None,
            code_ref: None,
        };
        let request = hook_start_request(&hook, 1000);
        assert_eq!(request.name, "prepare session");
        assert_eq!(request.item_type, EntityType::BeforeMethod);
    }

    #[test]
    fn test_test_end_request_skipped_without_issue_tracking() {
        let finish = TestFinishParams {
            status: Some(ItemStatus::Skipped),
            ..TestFinishParams::default()
        };
        let request = test_end_request(finish, 2000, false);
        assert_eq!(request.issue, Some(Issue::not_issue()));

        let finish = TestFinishParams {
            status: Some(ItemStatus::Skipped),
            ..TestFinishParams::default()
        };
        let request = test_end_request(finish, 2000, true);
        assert!(request.issue.is_none());
    }

    #[test]
    fn test_test_end_request_keeps_overrides() {
        let finish = TestFinishParams {
            attributes: vec![Attribute::pair("env", "ci")],
            description: Some("custom".to_string()),
            test_case_id: Some("TC-1".to_string()),
            status: Some(ItemStatus::Failed),
        };
        let request = test_end_request(finish, 2000, true);
        assert_eq!(request.status, Some(ItemStatus::Failed));
        assert_eq!(request.description.as_deref(), Some("custom"));
        assert_eq!(request.test_case_id.as_deref(), Some("TC-1"));
        assert_eq!(request.attributes, Some(vec![Attribute::pair("env", "ci")]));
    }
}
