// Configuration file handling and launch request construction

use crate::client::{Attribute, LaunchStartRequest};
use crate::time;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Environment overrides
pub const ENV_API_TOKEN: &str = "RP_TOKEN";
pub const ENV_CI_BUILD_ID: &str = "CI_BUILD_ID";

/// Recognized reporter options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterOptions {
    /// Launch name reported to the remote service
    #[serde(default = "default_launch")]
    pub launch: String,

    /// Launch description
    #[serde(default)]
    pub description: Option<String>,

    /// User attributes attached to the launch
    #[serde(default)]
    pub attributes: Vec<Attribute>,

    /// Create a merge lock file for this run
    #[serde(default)]
    pub is_launch_merge_required: bool,

    /// Run is one of several parallel processes
    #[serde(default)]
    pub parallel: bool,

    /// Merge parallel launches automatically at run end
    #[serde(default)]
    pub auto_merge: bool,

    /// Folder the runner writes spec recordings into
    #[serde(default)]
    pub videos_folder: Option<PathBuf>,

    /// Upload videos even when the root suite passed
    #[serde(default)]
    pub video_upload_on_passes: bool,

    /// Track skipped tests as issues on the remote side
    #[serde(default = "default_skipped_issue")]
    pub skipped_issue: bool,

    /// Launch mode passthrough (e.g. "DEBUG")
    #[serde(default)]
    pub mode: Option<String>,

    /// Rerun flags passed through to the launch
    #[serde(default)]
    pub rerun: bool,

    #[serde(default)]
    pub rerun_of: Option<String>,

    /// Service api key; the environment override wins
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self {
            launch: default_launch(),
            description: None,
            attributes: Vec::new(),
            is_launch_merge_required: false,
            parallel: false,
            auto_merge: false,
            videos_folder: None,
            video_upload_on_passes: false,
            skipped_issue: default_skipped_issue(),
            mode: None,
            rerun: false,
            rerun_of: None,
            api_key: None,
        }
    }
}

fn default_launch() -> String {
    String::from("Test run")
}

fn default_skipped_issue() -> bool {
    true
}

impl ReporterOptions {
    /// Load options from default locations.
    pub fn load() -> Option<Self> {
        // Check locations in order:
        // 1. .reportalrc.toml (current directory)
        // 2. ~/.reportalrc.toml (home directory)

        let cwd = std::env::current_dir().ok()?;
        let home = dirs::home_dir()?;

        let paths = [cwd.join(".reportalrc.toml"), home.join(".reportalrc.toml")];

        for path in &paths {
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        None
    }

    /// Load options from a specific file.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        Self::parse(&content)
    }

    /// Parse options from a TOML string.
    pub fn parse(content: &str) -> Option<Self> {
        toml::from_str(content).ok()
    }

    /// Apply environment overrides.
    ///
    /// `RP_TOKEN` replaces the configured api key. Parallel auto-merged runs
    /// pick up `CI_BUILD_ID` as a launch attribute so sibling launches can
    /// be correlated after the merge.
    pub fn normalize(mut self) -> Self {
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            self.api_key = Some(token);
        }
        if self.parallel && self.auto_merge {
            if let Ok(build_id) = std::env::var(ENV_CI_BUILD_ID) {
                self.attributes.push(Attribute::value(build_id));
            }
        }
        self
    }

    /// Attributes the agent always reports about itself.
    pub fn system_attributes(&self) -> Vec<Attribute> {
        let mut attributes = vec![Attribute::system(
            "agent",
            format!("{}|{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        )];
        if !self.skipped_issue {
            attributes.push(Attribute::system("skippedIssue", "false"));
        }
        attributes
    }

    /// Build the launch start payload for this run.
    pub fn launch_start_request(&self) -> LaunchStartRequest {
        let mut attributes = self.attributes.clone();
        attributes.extend(self.system_attributes());
        LaunchStartRequest {
            name: self.launch.clone(),
            description: self.description.clone(),
            attributes,
            start_time: time::now_unix_millis(),
            rerun: self.rerun,
            rerun_of: self.rerun_of.clone(),
            mode: self.mode.clone(),
        }
    }
}
