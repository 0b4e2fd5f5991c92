// Remote reporting client boundary
// Wire types and the SDK trait the agent reports through

use crate::attachment::Attachment;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a launch or item on the remote side.
///
/// The SDK returns a provisional handle synchronously so later calls can
/// chain on it before the start request has completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemHandle(pub String);

impl ItemHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Item status as the remote service spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Passed,
    Failed,
    Skipped,
}

/// Log severity levels accepted by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Reportable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Suite,
    Step,
    BeforeMethod,
    AfterMethod,
    BeforeSuite,
    AfterSuite,
}

/// Key/value attribute attached to launches and items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub system: bool,
}

impl Attribute {
    /// Plain value-only attribute.
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            key: None,
            value: value.into(),
            system: false,
        }
    }

    /// Keyed attribute.
    pub fn pair(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
            system: false,
        }
    }

    /// System attribute (hidden from regular filters on the remote side).
    pub fn system(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
            system: true,
        }
    }
}

/// Issue marker for a finished item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "issueType")]
    pub issue_type: String,
}

impl Issue {
    /// Marker that suppresses issue tracking for a skipped item.
    pub fn not_issue() -> Self {
        Self {
            issue_type: "NOT_ISSUE".to_string(),
        }
    }
}

/// Launch start payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchStartRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
    pub start_time: i64,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub rerun: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rerun_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<String>,
}

/// Launch finish payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FinishLaunchRequest {
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

/// Item (suite/test/hook) start payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemStartRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: EntityType,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

/// Item finish payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishItemRequest {
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<Issue>,
}

impl FinishItemRequest {
    /// Finish with nothing but an end timestamp.
    pub fn at(end_time: i64) -> Self {
        Self {
            end_time,
            status: None,
            attributes: None,
            description: None,
            test_case_id: None,
            issue: None,
        }
    }
}

/// Log payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRequest {
    pub message: String,
    pub level: LogLevel,
    pub time: i64,
}

/// Remote call failure as surfaced by the SDK.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request rejected by service: {0}")]
    Rejected(String),
}

/// Deferred outcome of a remote call.
///
/// The agent never awaits these inline; they are spawned through a
/// catch-and-log combinator so a remote rejection cannot stall the runner.
pub type Completion = BoxFuture<'static, Result<(), ClientError>>;

/// Provisional handle plus the deferred outcome of the start call.
pub struct StartedItem {
    pub handle: ItemHandle,
    pub completion: Completion,
}

/// The remote reporting SDK surface consumed by the agent.
///
/// Implementations own transport, batching, and their own timeouts. Every
/// start call hands back a usable handle synchronously.
pub trait ReportingClient: Send + Sync + 'static {
    fn start_launch(&self, launch: LaunchStartRequest) -> StartedItem;

    fn finish_launch(&self, launch: &ItemHandle, request: FinishLaunchRequest) -> Completion;

    fn start_test_item(
        &self,
        item: ItemStartRequest,
        launch: &ItemHandle,
        parent: Option<&ItemHandle>,
    ) -> StartedItem;

    fn finish_test_item(&self, item: &ItemHandle, request: FinishItemRequest) -> Completion;

    fn send_log(
        &self,
        item: &ItemHandle,
        log: LogRequest,
        attachment: Option<Attachment>,
    ) -> Completion;

    /// Merge all finished launches that share this launch name.
    fn merge_launches(&self, launch_name: &str) -> Completion;
}
