// Run state tracking - the lifecycle state machine between the test runner
// and the remote reporting client

use crate::attachment;
use crate::client::{
    Attribute, Completion, EntityType, FinishItemRequest, FinishLaunchRequest, ItemHandle,
    ItemStartRequest, ItemStatus, LogLevel, LogRequest, ReportingClient, StartedItem,
};
use crate::config::ReporterOptions;
use crate::event::{
    self, HookEvent, LogEntry, ScreenshotInfo, SuiteEndEvent, SuiteStartEvent, TestEvent,
    TestFinishParams,
};
use crate::merge::{self, MergeLockDir};
use crate::time;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Detach a remote completion; a rejection is logged and otherwise ignored
/// so a remote failure can never stall or abort the test run.
fn spawn_error_logged(completion: Completion, context: &'static str) {
    tokio::spawn(async move {
        if let Err(err) = completion.await {
            error!("{context}: {err}");
        }
    });
}

/// One open suite. The bottom of the stack is the root suite for the spec
/// file currently executing; only the root carries video responsibility.
#[derive(Debug)]
struct SuiteFrame {
    handle: ItemHandle,
    start_time: i64,
    title: String,
    id: String,
    test_file_name: Option<String>,
    status: Option<ItemStatus>,
    description: Option<String>,
    attributes: Option<Vec<Attribute>>,
}

/// The single test currently executing. The runner model is sequential, so
/// at most one test is active at a time.
#[derive(Debug)]
struct CurrentTest {
    handle: ItemHandle,
    start_time: i64,
    #[allow(dead_code)]
    id: String,
}

/// Tracks the run's open items and mirrors every lifecycle transition to
/// the remote reporting client.
///
/// All methods are synchronous from the runner's viewpoint; remote calls
/// are fire-and-forget tasks, so the reporter must live inside a tokio
/// runtime. `run_end` is the single awaited chain.
pub struct Reporter<C: ReportingClient> {
    client: Arc<C>,
    options: ReporterOptions,
    locks: MergeLockDir,
    launch: Option<ItemHandle>,
    launch_status: Option<ItemStatus>,
    /// Logical item id to remote handle. Insert-once, kept for the whole
    /// run so late hook and test references still resolve.
    item_handles: HashMap<String, ItemHandle>,
    /// Hooks staged at hook start, opened and closed together at hook end.
    hooks: HashMap<String, ItemStartRequest>,
    suite_stack: Vec<SuiteFrame>,
    /// Suite overrides keyed by title. Titles are assumed unique within a
    /// run; a colliding title would cross-apply the override.
    suite_test_case_ids: HashMap<String, String>,
    suite_statuses: HashMap<String, ItemStatus>,
    /// Tests whose end was reported before their start.
    pending_test_ids: Vec<String>,
    current_test: Option<CurrentTest>,
    finish_params: TestFinishParams,
}

impl<C: ReportingClient> Reporter<C> {
    pub fn new(client: C, options: ReporterOptions) -> Self {
        Self::with_lock_dir(client, options, MergeLockDir::in_cwd())
    }

    pub fn with_lock_dir(client: C, options: ReporterOptions, locks: MergeLockDir) -> Self {
        Self {
            client: Arc::new(client),
            options,
            locks,
            launch: None,
            launch_status: None,
            item_handles: HashMap::new(),
            hooks: HashMap::new(),
            suite_stack: Vec::new(),
            suite_test_case_ids: HashMap::new(),
            suite_statuses: HashMap::new(),
            pending_test_ids: Vec::new(),
            current_test: None,
            finish_params: TestFinishParams::default(),
        }
    }

    pub fn options(&self) -> &ReporterOptions {
        &self.options
    }

    /// Open the launch and, when merging is configured, register this run
    /// for the cross-process merge.
    pub fn run_start(&mut self) {
        let request = self.options.launch_start_request();
        let StartedItem { handle, completion } = self.client.start_launch(request);
        if self.options.is_launch_merge_required {
            if let Err(err) = self.locks.create(&self.options.launch, &handle) {
                error!("Failed to create merge lock file: {err:#}");
            }
        }
        spawn_error_logged(completion, "Failed to start launch");
        self.launch = Some(handle);
    }

    /// Close the launch: finish-launch completion, then lock cleanup, then
    /// (for parallel auto-merged runs) the launch merge. The only chain the
    /// caller is expected to await.
    pub async fn run_end(&mut self) {
        let Some(launch) = self.launch.take() else {
            return;
        };
        let request = FinishLaunchRequest {
            end_time: time::now_unix_millis(),
            status: self.launch_status,
        };
        match self.client.finish_launch(&launch, request).await {
            Ok(()) => {
                self.release_merge_lock(&launch, false);
                if self.options.parallel && self.options.auto_merge {
                    let merged =
                        merge::merge_parallel_launches(&*self.client, &self.options, &self.locks)
                            .await;
                    if let Err(err) = merged {
                        error!("Failed to merge launches: {err:#}");
                    }
                }
            }
            Err(err) => {
                error!("Failed to finish launch: {err}");
                self.release_merge_lock(&launch, true);
            }
        }
    }

    fn release_merge_lock(&self, launch_handle: &ItemHandle, after_error: bool) {
        if !self.options.is_launch_merge_required {
            return;
        }
        if after_error {
            warn!(
                "Deleting merge lock file for launch {} with id {launch_handle} after a failed finish",
                self.options.launch
            );
        }
        if let Err(err) = self.locks.remove(&self.options.launch, launch_handle) {
            error!("Failed to remove merge lock file: {err:#}");
        }
    }

    pub fn suite_start(&mut self, suite: &SuiteStartEvent) {
        let Some(launch) = self.launch.clone() else {
            warn!("Suite started before the launch; dropping: {}", suite.title);
            return;
        };
        let request = event::suite_start_request(suite);
        let parent = suite
            .parent_id
            .as_ref()
            .and_then(|id| self.item_handles.get(id));
        let StartedItem { handle, completion } =
            self.client.start_test_item(request, &launch, parent);
        spawn_error_logged(completion, "Failed to start suite");
        self.item_handles
            .entry(suite.id.clone())
            .or_insert_with(|| handle.clone());
        self.suite_stack.push(SuiteFrame {
            handle,
            start_time: suite.start_time,
            title: suite.title.clone(),
            id: suite.id.clone(),
            test_file_name: suite.test_file_name.clone(),
            status: None,
            description: None,
            attributes: None,
        });
    }

    pub fn suite_end(&mut self, suite: &SuiteEndEvent) {
        // A failing descendant suite always taints the root suite, unless
        // an explicit passed override was set for this suite's title.
        let override_status = self.suite_statuses.get(&suite.title).copied();
        if suite.status == Some(ItemStatus::Failed) && override_status != Some(ItemStatus::Passed) {
            if let Some(root) = self.suite_stack.first_mut() {
                root.status = Some(ItemStatus::Failed);
            }
        }
        self.send_video_on_finish_suite(suite);

        let test_case_id = self.suite_test_case_ids.remove(&suite.title);
        let status = self.suite_statuses.remove(&suite.title);
        let frame = self.suite_stack.pop();

        let Some(handle) = self.item_handles.get(&suite.id) else {
            // The runner may report suites the tracker never opened.
            return;
        };
        let mut request = FinishItemRequest::at(time::now_unix_millis());
        request.test_case_id = test_case_id;
        // The title-keyed override wins over the frame status, so a custom
        // passed verdict survives a runner-reported failure. The frame
        // status is what taint propagation wrote.
        request.status = status.or(frame.as_ref().and_then(|frame| frame.status));
        if let Some(frame) = frame {
            request.description = frame.description;
            request.attributes = frame.attributes;
        }
        spawn_error_logged(
            self.client.finish_test_item(handle, request),
            "Failed to finish suite",
        );
    }

    /// Upload the spec recording onto the root suite when it closes.
    ///
    /// Nested suites never trigger a video check, and a passing root only
    /// uploads when `video_upload_on_passes` is set.
    fn send_video_on_finish_suite(&self, suite: &SuiteEndEvent) {
        let Some(root) = self.suite_stack.first() else {
            return;
        };
        if root.id != suite.id {
            return;
        }
        let failed = root.status == Some(ItemStatus::Failed);
        if !failed && !self.options.video_upload_on_passes {
            return;
        }
        let Some(test_file_name) = root.test_file_name.as_deref() else {
            return;
        };
        let spec_file_name = test_file_name
            .rsplit('/')
            .next()
            .unwrap_or(test_file_name)
            .to_string();
        let video = attachment::find_video(self.options.videos_folder.as_deref(), &spec_file_name);
        let Some(video) = video else {
            return;
        };
        let Some(handle) = self.item_handles.get(&suite.id) else {
            return;
        };
        let request = LogRequest {
            message: format!("Video: '{}' ({spec_file_name}.mp4)", suite.title),
            level: LogLevel::Info,
            time: time::now_unix_millis(),
        };
        spawn_error_logged(
            self.client.send_log(handle, request, Some(video)),
            "Failed to save video",
        );
    }

    pub fn test_start(&mut self, test: &TestEvent) {
        let Some(launch) = self.launch.clone() else {
            warn!("Test started before the launch; dropping: {}", test.title);
            return;
        };
        let start_time = time::now_unix_millis();
        let request = event::test_start_request(test, start_time);
        let parent = test
            .parent_id
            .as_ref()
            .and_then(|id| self.item_handles.get(id));
        let StartedItem { handle, completion } =
            self.client.start_test_item(request, &launch, parent);
        spawn_error_logged(completion, "Failed to start test");
        self.item_handles
            .entry(test.id.clone())
            .or_insert_with(|| handle.clone());
        self.current_test = Some(CurrentTest {
            handle,
            start_time,
            id: test.id.clone(),
        });
        // An end observed before this start is replayed now, so the test
        // still gets exactly one start and one finish, in that order.
        if let Some(index) = self.pending_test_ids.iter().position(|id| id == &test.id) {
            self.pending_test_ids.remove(index);
            self.test_end(test);
        }
    }

    pub fn test_end(&mut self, test: &TestEvent) {
        if !self.item_handles.contains_key(&test.id) {
            // Synthesize the start. Any pending marker is consumed first so
            // the synthesized start cannot re-enter and finish twice.
            self.pending_test_ids.retain(|id| id != &test.id);
            self.test_start(test);
        }
        let Some(handle) = self.item_handles.get(&test.id) else {
            return;
        };
        let staged = std::mem::take(&mut self.finish_params);
        let finish = TestFinishParams {
            attributes: staged.attributes,
            description: staged.description,
            test_case_id: staged.test_case_id,
            status: staged.status.or(test.status),
        };
        let request =
            event::test_end_request(finish, time::now_unix_millis(), self.options.skipped_issue);
        spawn_error_logged(
            self.client.finish_test_item(handle, request),
            "Failed to finish test",
        );
        self.current_test = None;
    }

    /// A pending test that already started finishes immediately; one that
    /// has not is deferred until its start arrives.
    pub fn test_pending(&mut self, test: &TestEvent) {
        if self.item_handles.contains_key(&test.id) {
            self.test_end(test);
        } else {
            self.pending_test_ids.push(test.id.clone());
        }
    }

    /// Stage a hook descriptor. No remote call happens until `hook_end`;
    /// the runner reports hook completion as a single event while the
    /// remote protocol wants distinct open and close calls.
    ///
    /// Guard hooks are backdated one millisecond before the item they
    /// guard, so the remote timeline orders them first even when the runner
    /// reports coincident timestamps.
    pub fn hook_start(&mut self, hook: &HookEvent) {
        let mut request = event::hook_start_request(hook, time::now_unix_millis());
        match hook.hook_type.entity_type() {
            EntityType::BeforeSuite => {
                if let Some(frame) = self.suite_stack.last() {
                    request.start_time = frame.start_time - 1;
                }
            }
            EntityType::BeforeMethod => {
                if let Some(current) = self.current_test.as_ref() {
                    request.start_time = current.start_time - 1;
                }
            }
            _ => {}
        }
        self.hooks.insert(hook.id.clone(), request);
    }

    /// Open and close the staged hook in one step. A hook that was never
    /// staged, or was already closed, is a no-op.
    pub fn hook_end(&mut self, hook: &HookEvent) {
        let Some(staged) = self.hooks.remove(&hook.id) else {
            return;
        };
        let Some(launch) = self.launch.clone() else {
            return;
        };
        let parent = hook
            .parent_id
            .as_ref()
            .and_then(|id| self.item_handles.get(id));
        let StartedItem { handle, completion } =
            self.client.start_test_item(staged, &launch, parent);
        spawn_error_logged(completion, "Failed to start hook");
        let mut request = FinishItemRequest::at(time::now_unix_millis());
        request.status = hook.status;
        spawn_error_logged(
            self.client.finish_test_item(&handle, request),
            "Failed to finish hook",
        );
    }

    pub fn send_log(&self, handle: &ItemHandle, log: LogEntry) {
        let request = LogRequest {
            message: log.message,
            level: log.level,
            time: log.time.unwrap_or_else(time::now_unix_millis),
        };
        spawn_error_logged(
            self.client.send_log(handle, request, log.file),
            "Failed to send log",
        );
    }

    /// Attach a log to the current test, or the current suite when no test
    /// is active. Dropped when nothing is open.
    pub fn send_log_to_current_item(&self, log: LogEntry) {
        let handle = self
            .current_test
            .as_ref()
            .map(|current| current.handle.clone())
            .or_else(|| self.suite_stack.last().map(|frame| frame.handle.clone()));
        if let Some(handle) = handle {
            self.send_log(&handle, log);
        }
    }

    pub fn send_launch_log(&self, log: LogEntry) {
        if let Some(launch) = self.launch.clone() {
            self.send_log(&launch, log);
        }
    }

    /// Dual target: accumulate onto the current test's finish parameters,
    /// or set on the current suite frame when no test is active.
    pub fn add_attributes(&mut self, attributes: Vec<Attribute>) {
        if self.current_test.is_none() {
            if let Some(frame) = self.suite_stack.last_mut() {
                frame.attributes = Some(attributes);
                return;
            }
        }
        self.finish_params.attributes.extend(attributes);
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        if self.current_test.is_none() {
            if let Some(frame) = self.suite_stack.last_mut() {
                frame.description = Some(description.into());
                return;
            }
        }
        self.finish_params.description = Some(description.into());
    }

    /// With a suite title the id is staged in the title-keyed override map
    /// (consumed at that suite's end); without one it applies to the
    /// current test.
    pub fn set_test_case_id(&mut self, test_case_id: impl Into<String>, suite_title: Option<&str>) {
        match suite_title {
            Some(title) => {
                self.suite_test_case_ids
                    .insert(title.to_string(), test_case_id.into());
            }
            None => self.finish_params.test_case_id = Some(test_case_id.into()),
        }
    }

    /// Same dual target as `set_test_case_id`. A failed suite override
    /// taints the root suite immediately.
    pub fn set_test_item_status(&mut self, status: ItemStatus, suite_title: Option<&str>) {
        match suite_title {
            Some(title) => {
                self.suite_statuses.insert(title.to_string(), status);
                if status == ItemStatus::Failed {
                    if let Some(root) = self.suite_stack.first_mut() {
                        root.status = Some(ItemStatus::Failed);
                    }
                }
            }
            None => self.finish_params.status = Some(status),
        }
    }

    /// Terminal status override for the whole launch, applied at `run_end`.
    pub fn set_launch_status(&mut self, status: ItemStatus) {
        self.launch_status = Some(status);
    }

    /// Attach a screenshot to the current test. No-op without metadata, a
    /// resolvable file, or an active test. Failure-variant filenames are
    /// logged at error level.
    pub fn send_screenshot(&self, info: &ScreenshotInfo, message: Option<String>) {
        let Some(path) = info.path.as_deref() else {
            return;
        };
        let Some(current) = self.current_test.as_ref() else {
            return;
        };
        let level = if path.to_string_lossy().contains("(failed)") {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        let Some(file) = attachment::screenshot(path) else {
            return;
        };
        let message = message.unwrap_or_else(|| format!("screenshot {}", file.name));
        let request = LogRequest {
            message,
            level,
            time: time::now_unix_millis(),
        };
        spawn_error_logged(
            self.client.send_log(&current.handle, request, Some(file)),
            "Failed to save screenshot",
        );
    }
}
