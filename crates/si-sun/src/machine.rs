//! Machine registry and remote job dispatcher
//!
//! Machines and jobs are JSON objects in the sun store (kinds `si_machine`
//! and `si_machine_job`). Every update carries the revision it was read at,
//! so a claim or ACL change that lost a race fails with 409 instead of
//! overwriting.
//!
//! Job lifecycle:
//!
//! ```text
//! queued ──claim──▶ running ──exit 0──▶ succeeded
//!    │                 ├─────exit≠0──▶ failed
//!    └──────denied◀────┘
//! ```

use crate::client::SunClient;
use crate::error::{JobError, Result, SunError};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use si_config::Settings;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

pub const MACHINE_KIND: &str = "si_machine";
pub const JOB_KIND: &str = "si_machine_job";

/// Captured stdout/stderr are cut at this many bytes.
pub const OUTPUT_MAX_BYTES: usize = 64 * 1024;
pub const MIN_JOB_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 900;
pub const LIST_LIMIT: usize = 200;
/// Lost claims tolerated per poll before giving up until the next one.
pub const CLAIM_CONFLICT_BUDGET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Denied,
}

impl JobStatus {
    /// Canonical status for `raw`, accepting the legacy spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "queued" | "pending" => Some(Self::Queued),
            "running" | "claimed" => Some(Self::Running),
            "succeeded" | "success" | "ok" => Some(Self::Succeeded),
            "failed" | "error" => Some(Self::Failed),
            "denied" | "forbidden" => Some(Self::Denied),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Denied => "denied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Denied)
    }

    /// Edges of the job lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Denied)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Denied)
        )
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("unknown job status {raw:?}"))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub can_control_others: bool,
    #[serde(default)]
    pub can_be_controlled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_operators: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_seen_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub owner_operator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registered_at: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub acl: AccessControl,
    #[serde(default)]
    pub heartbeat: Heartbeat,
}

impl MachineRecord {
    /// Owner or listed operator, case-insensitively.
    pub fn allows(&self, operator_id: &str) -> bool {
        let operator_id = operator_id.trim();
        if operator_id.is_empty() {
            return false;
        }
        operator_id.eq_ignore_ascii_case(self.owner_operator.trim())
            || self
                .acl
                .allowed_operators
                .iter()
                .any(|allowed| allowed.trim().eq_ignore_ascii_case(operator_id))
    }

    fn normalized(mut self, fallback_id: &str) -> Self {
        self.version = self.version.max(1);
        let id = if self.machine_id.trim().is_empty() {
            fallback_id
        } else {
            &self.machine_id
        };
        self.machine_id = sanitize_machine_id(id);
        self.owner_operator = sanitize_operator_id(&self.owner_operator);
        self.display_name = self.display_name.trim().to_string();
        let mut operators = std::mem::take(&mut self.acl.allowed_operators);
        if !self.owner_operator.is_empty() {
            operators.push(self.owner_operator.clone());
        }
        self.acl.allowed_operators = normalize_operator_ids(&operators);
        self
    }

    fn object_metadata(&self) -> Map<String, Value> {
        let Value::Object(map) = json!({
            "machine_id": self.machine_id,
            "owner_operator": self.owner_operator,
            "can_control_others": self.capabilities.can_control_others,
            "can_be_controlled": self.capabilities.can_be_controlled,
            "allowed_operators_n": self.acl.allowed_operators.len(),
        }) else {
            return Map::new();
        };
        map
    }
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineJob {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_machine: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default = "queued")]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requested_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub claimed_by: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub claimed_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub started_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub completed_at: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn queued() -> JobStatus {
    JobStatus::Queued
}

impl MachineJob {
    fn normalized(mut self) -> Self {
        self.version = self.version.max(1);
        self.job_id = self.job_id.trim().to_string();
        self.machine_id = sanitize_machine_id(&self.machine_id);
        self.requested_by = sanitize_operator_id(&self.requested_by);
        self.source_machine = sanitize_machine_id(&self.source_machine);
        self.timeout_seconds = self.timeout_seconds.max(MIN_JOB_TIMEOUT_SECS);
        self.command = clean_args(&self.command);
        self
    }

    fn object_metadata(&self) -> Map<String, Value> {
        let Value::Object(map) = json!({
            "machine_id": self.machine_id,
            "job_id": self.job_id,
            "status": self.status.as_str(),
            "requested_by": self.requested_by,
        }) else {
            return Map::new();
        };
        map
    }

    /// Move along the lifecycle, refusing edges it does not have.
    pub fn transition(&mut self, next: JobStatus, at: &str) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SunError::machine(format!(
                "job {} cannot move from {} to {}",
                self.job_id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = at.to_string();
        if next.is_terminal() {
            self.completed_at = at.to_string();
        }
        Ok(())
    }

    /// Typed error for a terminal state other than `succeeded`.
    pub fn failure(&self) -> Option<JobError> {
        (self.status != JobStatus::Succeeded).then(|| JobError {
            job_id: self.job_id.clone(),
            status: self.status.to_string(),
            exit_code: self.exit_code,
            error: self.error.clone(),
        })
    }

    fn deny(&mut self, reason: String) -> Result<()> {
        self.transition(JobStatus::Denied, &timestamp(Utc::now()))?;
        self.exit_code = 1;
        self.error = reason;
        Ok(())
    }
}

/// Result of `serve`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServeSummary {
    pub machine_id: String,
    pub processed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_ids: Vec<String>,
}

/// A job this machine won the claim for, with the revision it holds.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub name: String,
    pub job: MachineJob,
    pub revision: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub machine_id: String,
    pub operator_id: String,
    pub display_name: String,
    pub allow_operators: Vec<String>,
    /// `None` keeps the stored value (or the default on create).
    pub can_control_others: Option<bool>,
    pub can_be_controlled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub target_machine: String,
    pub source_machine: String,
    pub operator_id: String,
    pub command: Vec<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub machine_id: String,
    pub requested_by: String,
    pub status: Option<JobStatus>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub machine_id: String,
    pub poll_interval: Duration,
    pub once: bool,
    /// Zero means unlimited.
    pub max_jobs: usize,
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Lowercase `[a-z0-9._-]`, everything else becomes `-`, outer dashes trimmed.
pub fn sanitize_machine_id(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// `[A-Za-z0-9._:@-]`, everything else becomes `-`, outer dashes trimmed.
pub fn sanitize_operator_id(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@') {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').trim().to_string()
}

/// Sanitized, deduplicated case-insensitively, sorted.
pub fn normalize_operator_ids(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<String> = values
        .iter()
        .map(|v| sanitize_operator_id(v))
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .collect();
    out.sort();
    out
}

fn clean_args(args: &[String]) -> Vec<String> {
    args.iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

/// Positional `si` arguments of a dispatched command: a leading `--` and a
/// leading `si` are dropped.
pub fn command_args(raw: &[String]) -> Vec<String> {
    let mut args: &[String] = raw;
    if args.first().is_some_and(|a| a.trim() == "--") {
        args = &args[1..];
    }
    if args.first().is_some_and(|a| a.trim().eq_ignore_ascii_case("si")) {
        args = &args[1..];
    }
    args.to_vec()
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn hostname() -> String {
    env_value("HOSTNAME")
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .unwrap_or_default()
}

/// flag, `SI_SUN_MACHINE_ID`, settings, hostname.
pub fn resolve_machine_id(settings: &Settings, explicit: &str) -> String {
    [
        explicit.to_string(),
        env_value("SI_SUN_MACHINE_ID").unwrap_or_default(),
        settings.sun.machine_id.clone(),
        hostname(),
    ]
    .iter()
    .map(|candidate| sanitize_machine_id(candidate))
    .find(|id| !id.is_empty())
    .unwrap_or_else(|| "machine-unknown".to_string())
}

/// flag, `SI_SUN_OPERATOR_ID`, settings, then `op:<user>@<machine>`.
pub fn resolve_operator_id(settings: &Settings, explicit: &str, machine_id: &str) -> String {
    let configured = [
        explicit.to_string(),
        env_value("SI_SUN_OPERATOR_ID").unwrap_or_default(),
        settings.sun.operator_id.clone(),
    ]
    .iter()
    .map(|candidate| sanitize_operator_id(candidate))
    .find(|id| !id.is_empty());
    if let Some(operator) = configured {
        return operator;
    }
    let user = env_value("USER")
        .or_else(|| env_value("USERNAME"))
        .unwrap_or_else(|| "user".to_string());
    sanitize_operator_id(&format!(
        "op:{}@{}",
        sanitize_machine_id(&user),
        sanitize_machine_id(machine_id)
    ))
}

/// `job-YYYYmmdd-HHMMSS-xxx` with a random base36 suffix.
pub fn new_job_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n: usize = rand::thread_rng().gen_range(0..36 * 36 * 36);
    let mut suffix = [b'0'; 3];
    for slot in suffix.iter_mut().rev() {
        *slot = ALPHABET[n % 36];
        n /= 36;
    }
    format!(
        "job-{}-{}",
        now.format("%Y%m%d-%H%M%S"),
        String::from_utf8_lossy(&suffix)
    )
}

pub fn job_name_prefix(machine_id: &str) -> String {
    format!("{}--", sanitize_machine_id(machine_id))
}

pub fn job_object_name(machine_id: &str, job_id: &str) -> String {
    format!("{}{}", job_name_prefix(machine_id), job_id.trim())
}

/// Cut at [`OUTPUT_MAX_BYTES`] on a char boundary, marking the cut.
pub fn truncate_output(raw: &str) -> String {
    if raw.len() <= OUTPUT_MAX_BYTES {
        return raw.to_string();
    }
    let mut end = OUTPUT_MAX_BYTES;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated]", &raw[..end])
}

/// Runs claimed jobs as a child `si` process.
#[derive(Debug, Clone)]
pub struct JobRunner {
    program: PathBuf,
}

impl JobRunner {
    /// The running executable.
    pub fn current() -> Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
        })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `args` with a hard timeout. Returns stdout, stderr, exit code and
    /// an error message when the process could not run to completion.
    pub async fn run(&self, args: &[String], timeout: Duration) -> (String, String, i32, Option<String>) {
        let args = clean_args(args);
        if args.is_empty() {
            return (String::new(), String::new(), 1, Some("empty si command".to_string()));
        }
        let child = tokio::process::Command::new(&self.program)
            .args(&args)
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(err) => return (String::new(), String::new(), 1, Some(err.to_string())),
        };
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => (
                String::new(),
                String::new(),
                -1,
                Some(format!("command timed out after {}s", timeout.as_secs())),
            ),
            Ok(Err(err)) => (String::new(), String::new(), 1, Some(err.to_string())),
            Ok(Ok(output)) => (
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                output.status.code().unwrap_or(-1),
                None,
            ),
        }
    }

    /// Execute a claimed job on `machine`, returning its terminal state. The
    /// ACL is checked again at dequeue time.
    pub async fn execute(&self, mut job: MachineJob, machine: &MachineRecord) -> Result<MachineJob> {
        let now = timestamp(Utc::now());
        if job.started_at.is_empty() {
            job.started_at = now.clone();
        }
        if !machine.allows(&job.requested_by) {
            let reason = format!(
                "operator {:?} is not allowed by machine {:?} ACL",
                job.requested_by, machine.machine_id
            );
            job.deny(reason)?;
            return Ok(job);
        }
        if !machine.capabilities.can_be_controlled {
            job.deny(format!("machine {:?} refuses remote control", machine.machine_id))?;
            return Ok(job);
        }

        let timeout = Duration::from_secs(job.timeout_seconds.max(MIN_JOB_TIMEOUT_SECS));
        tracing::info!(job_id = job.job_id.as_str(), command = ?job.command, "running remote job");
        let (stdout, stderr, exit_code, run_error) = self.run(&job.command, timeout).await;
        job.stdout = truncate_output(&stdout);
        job.stderr = truncate_output(&stderr);
        job.exit_code = exit_code;
        let done = timestamp(Utc::now());
        match run_error {
            Some(message) => {
                job.transition(JobStatus::Failed, &done)?;
                job.error = message;
            }
            None if exit_code != 0 => {
                job.transition(JobStatus::Failed, &done)?;
                job.error = format!("command exited with code {exit_code}");
            }
            None => {
                job.transition(JobStatus::Succeeded, &done)?;
                job.error.clear();
            }
        }
        if job.claimed_by.is_empty() {
            job.claimed_by = machine.machine_id.clone();
        }
        if job.claimed_at.is_empty() {
            job.claimed_at = now;
        }
        Ok(job)
    }
}

/// Machine and job operations over one sun client.
pub struct Dispatcher<'a> {
    client: &'a SunClient,
}

impl<'a> Dispatcher<'a> {
    pub fn new(client: &'a SunClient) -> Self {
        Self { client }
    }

    /// Record and revision, or `None` when not registered.
    pub async fn load(&self, machine_id: &str) -> Result<Option<(MachineRecord, i64)>> {
        let id = sanitize_machine_id(machine_id);
        if id.is_empty() {
            return Err(SunError::machine("machine id is required"));
        }
        let Some(meta) = self.client.lookup_object(MACHINE_KIND, &id).await? else {
            return Ok(None);
        };
        let payload = self.client.get_payload(MACHINE_KIND, &meta.name).await?;
        let record: MachineRecord = serde_json::from_slice(&payload)
            .map_err(|e| SunError::Decode(format!("machine payload invalid: {e}")))?;
        Ok(Some((record.normalized(&id), meta.latest_revision)))
    }

    async fn require(&self, machine_id: &str) -> Result<(MachineRecord, i64)> {
        self.load(machine_id)
            .await?
            .ok_or_else(|| SunError::machine(format!("machine {machine_id:?} is not registered")))
    }

    /// Write `record`; `revision` is the one it was read at, `None` on create.
    pub async fn persist(&self, record: MachineRecord, revision: Option<i64>) -> Result<(MachineRecord, i64)> {
        let id = record.machine_id.clone();
        let record = record.normalized(&id);
        let payload = serde_json::to_vec_pretty(&record)?;
        let put = self
            .client
            .put_object(
                MACHINE_KIND,
                &record.machine_id,
                &payload,
                "application/json",
                Some(&record.object_metadata()),
                revision,
            )
            .await?;
        Ok((record, put.revision()))
    }

    pub async fn load_job(&self, name: &str) -> Result<Option<(MachineJob, i64)>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SunError::machine("job name is required"));
        }
        let Some(meta) = self.client.lookup_object(JOB_KIND, name).await? else {
            return Ok(None);
        };
        let payload = self.client.get_payload(JOB_KIND, &meta.name).await?;
        let job: MachineJob = serde_json::from_slice(&payload)
            .map_err(|e| SunError::Decode(format!("machine job payload invalid: {e}")))?;
        Ok(Some((job.normalized(), meta.latest_revision)))
    }

    pub async fn persist_job(&self, name: &str, job: MachineJob, revision: Option<i64>) -> Result<(MachineJob, i64)> {
        let job = job.normalized();
        let payload = serde_json::to_vec_pretty(&job)?;
        let put = self
            .client
            .put_object(
                JOB_KIND,
                name.trim(),
                &payload,
                "application/json",
                Some(&job.object_metadata()),
                revision,
            )
            .await?;
        Ok((job, put.revision()))
    }

    /// Create or update a machine. The owner is always allowed; capability
    /// flags only change when given.
    pub async fn register(&self, req: &RegisterRequest) -> Result<(MachineRecord, i64)> {
        let machine_id = sanitize_machine_id(&req.machine_id);
        let operator_id = sanitize_operator_id(&req.operator_id);
        if machine_id.is_empty() {
            return Err(SunError::machine("machine id is required"));
        }
        if operator_id.is_empty() {
            return Err(SunError::machine("operator id is required"));
        }
        let now = timestamp(Utc::now());
        let existing = self.load(&machine_id).await?;
        let revision = existing.as_ref().map(|(_, rev)| *rev);
        let mut record = match existing {
            Some((record, _)) => record,
            None => MachineRecord {
                version: 1,
                machine_id: machine_id.clone(),
                owner_operator: operator_id.clone(),
                registered_at: now.clone(),
                capabilities: Capabilities {
                    can_control_others: false,
                    can_be_controlled: true,
                },
                ..Default::default()
            },
        };
        record.machine_id = machine_id;
        if record.owner_operator.trim().is_empty() {
            record.owner_operator = operator_id.clone();
        }
        if !req.display_name.trim().is_empty() {
            record.display_name = req.display_name.trim().to_string();
        }
        if let Some(value) = req.can_control_others {
            record.capabilities.can_control_others = value;
        }
        if let Some(value) = req.can_be_controlled {
            record.capabilities.can_be_controlled = value;
        }
        let mut operators = record.acl.allowed_operators.clone();
        operators.push(operator_id);
        operators.push(record.owner_operator.clone());
        operators.extend(req.allow_operators.iter().cloned());
        record.acl.allowed_operators = normalize_operator_ids(&operators);
        record.updated_at = now.clone();
        record.heartbeat = Heartbeat {
            last_seen_at: now,
            last_state: "registered".to_string(),
        };
        let (record, revision) = self.persist(record, revision).await?;
        tracing::info!(machine_id = record.machine_id.as_str(), revision, "registered machine");
        Ok((record, revision))
    }

    pub async fn status(&self, machine_id: &str) -> Result<MachineRecord> {
        Ok(self.require(machine_id).await?.0)
    }

    /// Registered machines, sorted by id. Unreadable records are skipped.
    pub async fn list(&self, limit: usize) -> Result<Vec<MachineRecord>> {
        let items = self.client.list_objects(MACHINE_KIND, "", limit).await?;
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            match self.load(&item.name).await {
                Ok(Some((record, _))) => rows.push(record),
                Ok(None) => {}
                Err(err) => tracing::warn!(name = item.name.as_str(), error = %err, "skipping machine record"),
            }
        }
        rows.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
        Ok(rows)
    }

    /// Grant `operator` on `machine_id`. Only the owner may do this.
    pub async fn allow(&self, machine_id: &str, operator: &str, caller: &str) -> Result<(MachineRecord, i64)> {
        let operator = operator.trim();
        if operator.is_empty() {
            return Err(SunError::machine("--grant is required"));
        }
        let (mut record, revision) = self.require(machine_id).await?;
        if !record.owner_operator.trim().eq_ignore_ascii_case(caller.trim()) {
            return Err(SunError::machine(format!(
                "only machine owner {:?} can grant operators",
                record.owner_operator
            )));
        }
        let mut operators = record.acl.allowed_operators.clone();
        operators.push(operator.to_string());
        record.acl.allowed_operators = normalize_operator_ids(&operators);
        record.updated_at = timestamp(Utc::now());
        self.persist(record, Some(revision)).await
    }

    /// Revoke `operator` on `machine_id`. The owner cannot be revoked.
    pub async fn deny(&self, machine_id: &str, operator: &str, caller: &str) -> Result<(MachineRecord, i64)> {
        let operator = operator.trim();
        if operator.is_empty() {
            return Err(SunError::machine("--revoke is required"));
        }
        let (mut record, revision) = self.require(machine_id).await?;
        if operator.eq_ignore_ascii_case(record.owner_operator.trim()) {
            return Err(SunError::machine(format!(
                "cannot revoke owner operator {:?}",
                record.owner_operator
            )));
        }
        if !record.owner_operator.trim().eq_ignore_ascii_case(caller.trim()) {
            return Err(SunError::machine(format!(
                "only machine owner {:?} can revoke operators",
                record.owner_operator
            )));
        }
        let remaining: Vec<String> = record
            .acl
            .allowed_operators
            .iter()
            .filter(|op| !op.trim().eq_ignore_ascii_case(operator))
            .cloned()
            .collect();
        record.acl.allowed_operators = normalize_operator_ids(&remaining);
        record.updated_at = timestamp(Utc::now());
        self.persist(record, Some(revision)).await
    }

    /// Queue a job on the target machine.
    ///
    /// A target that refuses the operator still gets the job persisted, as
    /// `denied`, and the call fails with the corresponding [`JobError`].
    pub async fn dispatch(&self, req: &DispatchRequest) -> Result<(String, MachineJob)> {
        let command = clean_args(&command_args(&req.command));
        if command.is_empty() {
            return Err(SunError::machine("a command to run is required"));
        }
        let target = sanitize_machine_id(&req.target_machine);
        let source = sanitize_machine_id(&req.source_machine);
        let operator = sanitize_operator_id(&req.operator_id);
        let (target_record, _) = self
            .load(&target)
            .await?
            .ok_or_else(|| SunError::machine(format!("target machine {target:?} is not registered")))?;

        let now = Utc::now();
        let mut job = MachineJob {
            version: 1,
            job_id: new_job_id(now),
            machine_id: target.clone(),
            requested_by: operator.clone(),
            source_machine: source.clone(),
            command,
            timeout_seconds: req.timeout_seconds.max(MIN_JOB_TIMEOUT_SECS),
            status: JobStatus::Queued,
            requested_at: timestamp(now),
            updated_at: timestamp(now),
            claimed_by: String::new(),
            claimed_at: String::new(),
            started_at: String::new(),
            completed_at: String::new(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            error: String::new(),
        };
        let name = job_object_name(&target, &job.job_id);

        let refusal = if !target_record.capabilities.can_be_controlled {
            Some(format!(
                "target machine {target:?} does not accept remote control (can_be_controlled=false)"
            ))
        } else if !target_record.allows(&operator) {
            Some(format!(
                "operator {operator:?} is not allowed to control machine {target:?}"
            ))
        } else {
            None
        };
        if let Some(reason) = refusal {
            job.deny(reason)?;
            let (job, _) = self.persist_job(&name, job, None).await?;
            tracing::info!(job_id = job.job_id.as_str(), "persisted denied job");
            return Err(job
                .failure()
                .map(SunError::Job)
                .unwrap_or_else(|| SunError::machine("job denied")));
        }

        let (source_record, _) = self.load(&source).await?.ok_or_else(|| {
            SunError::machine(format!(
                "source machine {source:?} is not registered; run `si sun machine register --machine {source} --can-control-others` first"
            ))
        })?;
        if !source_record.allows(&operator) {
            return Err(SunError::machine(format!(
                "operator {operator:?} is not allowed on source machine {source:?}"
            )));
        }
        if !source_record.capabilities.can_control_others {
            return Err(SunError::machine(format!(
                "source machine {source:?} cannot control other machines (can_control_others=false)"
            )));
        }

        let (job, _) = self.persist_job(&name, job, None).await?;
        tracing::info!(job_id = job.job_id.as_str(), machine_id = target.as_str(), "queued remote job");
        Ok((name, job))
    }

    /// Jobs matching `filter`, oldest first.
    pub async fn jobs(&self, filter: &JobFilter) -> Result<Vec<MachineJob>> {
        let limit = if filter.limit == 0 { LIST_LIMIT } else { filter.limit };
        let items = self.client.list_objects(JOB_KIND, "", limit).await?;
        let machine = sanitize_machine_id(&filter.machine_id);
        let mut rows = Vec::new();
        for item in items {
            let job = match self.load_job(&item.name).await {
                Ok(Some((job, _))) => job,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(name = item.name.as_str(), error = %err, "skipping machine job");
                    continue;
                }
            };
            if !machine.is_empty() && !job.machine_id.eq_ignore_ascii_case(&machine) {
                continue;
            }
            if !filter.requested_by.trim().is_empty()
                && !job.requested_by.eq_ignore_ascii_case(filter.requested_by.trim())
            {
                continue;
            }
            if filter.status.is_some_and(|status| status != job.status) {
                continue;
            }
            rows.push(job);
        }
        sort_jobs(&mut rows);
        Ok(rows)
    }

    /// Claim the oldest queued job for `machine_id`. A lost race (409) moves
    /// on to the next candidate.
    pub async fn claim_next(&self, machine_id: &str) -> Result<Option<ClaimedJob>> {
        let prefix = job_name_prefix(machine_id).to_lowercase();
        let items = self.client.list_objects(JOB_KIND, "", LIST_LIMIT).await?;
        let mut candidates = Vec::new();
        for item in items {
            if !item.name.trim().to_lowercase().starts_with(&prefix) {
                continue;
            }
            if let Ok(Some((job, _))) = self.load_job(&item.name).await
                && job.status == JobStatus::Queued
            {
                candidates.push((item.name.trim().to_string(), job));
            }
        }
        candidates.sort_by(|(_, a), (_, b)| job_order(a, b));

        let mut conflicts = 0;
        for (name, _) in candidates {
            let Some((mut job, revision)) = self.load_job(&name).await? else {
                continue;
            };
            if job.status != JobStatus::Queued {
                continue;
            }
            let now = timestamp(Utc::now());
            job.transition(JobStatus::Running, &now)?;
            job.claimed_by = sanitize_machine_id(machine_id);
            job.claimed_at = now.clone();
            job.started_at = now;
            match self.persist_job(&name, job, Some(revision)).await {
                Ok((job, revision)) => {
                    tracing::info!(job_id = job.job_id.as_str(), revision, "claimed job");
                    return Ok(Some(ClaimedJob { name, job, revision }));
                }
                Err(err) if err.is_conflict() => {
                    conflicts += 1;
                    tracing::debug!(name = name.as_str(), "lost claim race");
                    if conflicts >= CLAIM_CONFLICT_BUDGET {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Process queued jobs for this machine until `once`, `max_jobs` or
    /// `shutdown` stops the loop. A job already running when shutdown fires
    /// finishes and is persisted first.
    pub async fn serve<F>(&self, opts: &ServeOptions, runner: &JobRunner, shutdown: F) -> Result<ServeSummary>
    where
        F: Future<Output = ()>,
    {
        let machine_id = sanitize_machine_id(&opts.machine_id);
        let (mut record, revision) = self.load(&machine_id).await?.ok_or_else(|| {
            SunError::machine(format!(
                "machine {machine_id:?} is not registered; run `si sun machine register --machine {machine_id}` first"
            ))
        })?;
        if !record.capabilities.can_be_controlled {
            return Err(SunError::machine(format!(
                "machine {machine_id:?} is not accepting remote jobs (can_be_controlled=false)"
            )));
        }
        let now = timestamp(Utc::now());
        record.heartbeat = Heartbeat {
            last_seen_at: now.clone(),
            last_state: "serving".to_string(),
        };
        record.updated_at = now;
        let (record, _) = self.persist(record, Some(revision)).await?;

        let poll = opts.poll_interval.max(Duration::from_secs(1));
        let mut summary = ServeSummary {
            machine_id: machine_id.clone(),
            ..Default::default()
        };
        let limit_reached = |summary: &ServeSummary| opts.max_jobs > 0 && summary.processed >= opts.max_jobs;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = std::future::ready(()) => {}
            }
            match self.claim_next(&machine_id).await? {
                None => {
                    if opts.once || limit_reached(&summary) {
                        break;
                    }
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
                Some(claimed) => {
                    let finished = runner.execute(claimed.job, &record).await?;
                    let (finished, _) = self
                        .persist_job(&claimed.name, finished, Some(claimed.revision))
                        .await?;
                    tracing::info!(job_id = finished.job_id.as_str(), status = %finished.status, "job finished");
                    summary.processed += 1;
                    summary.job_ids.push(finished.job_id);
                    if opts.once || limit_reached(&summary) {
                        break;
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Poll `name` until it reaches a terminal state or `timeout` elapses.
    pub async fn wait(&self, name: &str, poll: Duration, timeout: Duration) -> Result<MachineJob> {
        let poll = poll.max(Duration::from_secs(1));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (job, _) = self
                .load_job(name)
                .await?
                .ok_or_else(|| SunError::machine(format!("remote job {:?} not found", name.trim())))?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if tokio::time::Instant::now() + poll > deadline {
                return Err(SunError::machine(format!(
                    "timed out waiting for remote job {:?}",
                    job.job_id
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn job_order(a: &MachineJob, b: &MachineJob) -> std::cmp::Ordering {
    let left = parse_timestamp(&a.requested_at);
    let right = parse_timestamp(&b.requested_at);
    left.cmp(&right).then_with(|| a.job_id.cmp(&b.job_id))
}

fn sort_jobs(jobs: &mut [MachineJob]) {
    jobs.sort_by(job_order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubSun;
    use serial_test::serial;

    fn client(stub: &StubSun) -> SunClient {
        SunClient::new(stub.base_url(), StubSun::TOKEN, Duration::from_secs(5)).unwrap()
    }

    fn register(machine: &str, operator: &str, control: Option<bool>) -> RegisterRequest {
        RegisterRequest {
            machine_id: machine.to_string(),
            operator_id: operator.to_string(),
            can_control_others: control,
            ..Default::default()
        }
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sanitizers() {
        assert_eq!(sanitize_machine_id("  My Laptop!! "), "my-laptop");
        assert_eq!(sanitize_machine_id("build_01.local"), "build_01.local");
        assert_eq!(sanitize_operator_id("op:Alice@m1 "), "op:Alice@m1");
        assert_eq!(sanitize_operator_id("a b"), "a-b");
        assert_eq!(
            normalize_operator_ids(&args(&["op2", "OP2", " op1 ", ""])),
            vec!["op1", "op2"]
        );
    }

    #[test]
    fn test_job_id_and_names() {
        let now = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = new_job_id(now);
        assert!(id.starts_with("job-20260304-050607-"));
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 3);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_eq!(job_object_name("M2", "job-1"), "m2--job-1");
    }

    #[test]
    fn test_command_args_strip_prefixes() {
        assert_eq!(command_args(&args(&["--", "si", "sun", "auth", "status"])), args(&["sun", "auth", "status"]));
        assert_eq!(command_args(&args(&["SI", "vault", "status"])), args(&["vault", "status"]));
        assert_eq!(command_args(&args(&["aws", "si"])), args(&["aws", "si"]));
    }

    #[test]
    fn test_truncate_output() {
        let small = "ok".to_string();
        assert_eq!(truncate_output(&small), "ok");
        let big = "é".repeat(OUTPUT_MAX_BYTES);
        let cut = truncate_output(&big);
        assert!(cut.ends_with("\n[truncated]"));
        assert!(cut.len() <= OUTPUT_MAX_BYTES + "\n[truncated]".len());
    }

    #[test]
    fn test_status_dag() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Denied));
        assert!(Running.can_transition_to(Failed));
        for terminal in [Succeeded, Failed, Denied] {
            for next in [Queued, Running, Succeeded, Failed, Denied] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Queued.can_transition_to(Succeeded));
        assert_eq!(JobStatus::parse("PENDING"), Some(Queued));
        assert_eq!(JobStatus::parse("forbidden"), Some(Denied));
        assert_eq!(JobStatus::parse("weird"), None);
        assert!(serde_json::from_str::<JobStatus>("\"weird\"").is_err());
    }

    #[test]
    #[serial]
    fn test_resolve_ids() {
        let mut settings = Settings::default();
        settings.sun.machine_id = "Desk Top".to_string();
        temp_env::with_vars(
            [
                ("SI_SUN_MACHINE_ID", None::<&str>),
                ("SI_SUN_OPERATOR_ID", None),
                ("USER", Some("Alice")),
            ],
            || {
                assert_eq!(resolve_machine_id(&settings, ""), "desk-top");
                assert_eq!(resolve_machine_id(&settings, "m9"), "m9");
                assert_eq!(resolve_operator_id(&settings, "", "m1"), "op:alice@m1");
            },
        );
        temp_env::with_var("SI_SUN_OPERATOR_ID", Some("ops-bot"), || {
            assert_eq!(resolve_operator_id(&settings, "", "m1"), "ops-bot");
            assert_eq!(resolve_operator_id(&settings, "me", "m1"), "me");
        });
    }

    #[tokio::test]
    async fn test_register_defaults_and_updates() {
        let stub = StubSun::start();
        let client = client(&stub);
        let dispatcher = Dispatcher::new(&client);

        let (record, rev) = dispatcher.register(&register("m1", "op1", None)).await.unwrap();
        assert_eq!(rev, 1);
        assert!(record.capabilities.can_be_controlled);
        assert!(!record.capabilities.can_control_others);
        assert_eq!(record.acl.allowed_operators, vec!["op1"]);

        let (record, rev) = dispatcher.register(&register("m1", "op2", Some(true))).await.unwrap();
        assert_eq!(rev, 2);
        assert_eq!(record.owner_operator, "op1");
        assert!(record.capabilities.can_control_others);
        assert!(record.capabilities.can_be_controlled);
        assert_eq!(record.acl.allowed_operators, vec!["op1", "op2"]);
        assert_eq!(stub.json(MACHINE_KIND, "m1").unwrap()["heartbeat"]["last_state"], "registered");
    }

    #[tokio::test]
    async fn test_allow_and_deny_owner_rules() {
        let stub = StubSun::start();
        let client = client(&stub);
        let dispatcher = Dispatcher::new(&client);
        dispatcher.register(&register("m1", "owner", None)).await.unwrap();

        let err = dispatcher.allow("m1", "op2", "intruder").await.unwrap_err();
        assert!(err.to_string().contains("only machine owner"));
        let (record, _) = dispatcher.allow("m1", "op2", "OWNER").await.unwrap();
        assert!(record.allows("op2"));

        let err = dispatcher.deny("m1", "owner", "owner").await.unwrap_err();
        assert!(err.to_string().contains("cannot revoke owner"));
        let (record, _) = dispatcher.deny("m1", "op2", "owner").await.unwrap();
        assert!(!record.allows("op2"));
        assert!(record.allows("owner"));
    }

    #[tokio::test]
    async fn test_dispatch_denied_by_target_acl_is_persisted() {
        let stub = StubSun::start();
        let client = client(&stub);
        let dispatcher = Dispatcher::new(&client);
        dispatcher.register(&register("m1", "op1", Some(true))).await.unwrap();
        dispatcher.register(&register("m2", "op2", None)).await.unwrap();

        let err = dispatcher
            .dispatch(&DispatchRequest {
                target_machine: "m2".to_string(),
                source_machine: "m1".to_string(),
                operator_id: "op1".to_string(),
                command: args(&["--", "sun", "auth", "status"]),
                timeout_seconds: 30,
            })
            .await
            .unwrap_err();
        let SunError::Job(job_err) = err else {
            panic!("expected job error");
        };
        assert_eq!(job_err.status, "denied");
        assert_eq!(job_err.exit_code, 1);

        let names = stub.names(JOB_KIND);
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("m2--job-"));
        let stored = stub.json(JOB_KIND, &names[0]).unwrap();
        assert_eq!(stored["status"], "denied");
        assert_eq!(stored["command"], json!(["sun", "auth", "status"]));
    }

    #[tokio::test]
    async fn test_dispatch_requires_controlling_source() {
        let stub = StubSun::start();
        let client = client(&stub);
        let dispatcher = Dispatcher::new(&client);
        dispatcher.register(&register("m1", "op1", None)).await.unwrap();
        let mut target = register("m2", "op2", None);
        target.allow_operators = vec!["op1".to_string()];
        dispatcher.register(&target).await.unwrap();

        let req = DispatchRequest {
            target_machine: "m2".to_string(),
            source_machine: "m1".to_string(),
            operator_id: "op1".to_string(),
            command: args(&["vault", "status"]),
            timeout_seconds: 0,
        };
        let err = dispatcher.dispatch(&req).await.unwrap_err();
        assert!(err.to_string().contains("can_control_others=false"));
        assert!(stub.names(JOB_KIND).is_empty());

        dispatcher.register(&register("m1", "op1", Some(true))).await.unwrap();
        let (name, job) = dispatcher.dispatch(&req).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.timeout_seconds, MIN_JOB_TIMEOUT_SECS);
        assert_eq!(stub.json(JOB_KIND, &name).unwrap()["status"], "queued");
    }

    fn seed_job(stub: &StubSun, machine: &str, job_id: &str, requested_at: &str, status: &str) -> String {
        let name = job_object_name(machine, job_id);
        let payload = json!({
            "version": 1,
            "job_id": job_id,
            "machine_id": machine,
            "requested_by": "op1",
            "command": ["providers", "list"],
            "timeout_seconds": 30,
            "status": status,
            "requested_at": requested_at,
        });
        stub.seed(JOB_KIND, &name, payload.to_string().as_bytes(), "application/json", Map::new());
        name
    }

    #[tokio::test]
    async fn test_claim_order_and_cas() {
        let stub = StubSun::start();
        let client = client(&stub);
        let dispatcher = Dispatcher::new(&client);
        seed_job(&stub, "m1", "job-b", "2026-01-01T00:00:05Z", "queued");
        seed_job(&stub, "m1", "job-a", "2026-01-01T00:00:05Z", "queued");
        seed_job(&stub, "m1", "job-0", "2026-01-01T00:00:01Z", "succeeded");
        seed_job(&stub, "m2", "job-z", "2025-01-01T00:00:00Z", "queued");

        let claimed = dispatcher.claim_next("m1").await.unwrap().unwrap();
        assert_eq!(claimed.job.job_id, "job-a");
        assert_eq!(claimed.job.status, JobStatus::Running);
        assert_eq!(claimed.job.claimed_by, "m1");
        assert_eq!(claimed.revision, 2);

        let stale = dispatcher
            .persist_job(&claimed.name, claimed.job.clone(), Some(1))
            .await
            .unwrap_err();
        assert!(stale.is_conflict());

        let next = dispatcher.claim_next("m1").await.unwrap().unwrap();
        assert_eq!(next.job.job_id, "job-b");
        assert!(dispatcher.claim_next("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_records_exit_status() {
        let runner = JobRunner::with_program("sh");
        let machine = MachineRecord {
            machine_id: "m1".to_string(),
            owner_operator: "op1".to_string(),
            capabilities: Capabilities {
                can_control_others: false,
                can_be_controlled: true,
            },
            ..Default::default()
        };
        let mut job: MachineJob = serde_json::from_value(json!({
            "job_id": "job-1",
            "machine_id": "m1",
            "requested_by": "op1",
            "command": ["-c", "echo out; echo err >&2; test \"$NO_COLOR\" = 1"],
            "timeout_seconds": 10,
            "status": "running",
        }))
        .unwrap();
        let done = runner.execute(job.clone(), &machine).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.stdout, "out\n");
        assert_eq!(done.stderr, "err\n");
        assert!(done.failure().is_none());

        job.command = args(&["-c", "exit 3"]);
        let done = runner.execute(job.clone(), &machine).await.unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.exit_code, 3);
        assert!(done.failure().unwrap().to_string().contains("exit code 3"));

        job.requested_by = "stranger".to_string();
        let done = runner.execute(job, &machine).await.unwrap();
        assert_eq!(done.status, JobStatus::Denied);
        assert!(done.error.contains("not allowed"));
    }

    #[tokio::test]
    async fn test_serve_once_runs_and_persists() {
        let stub = StubSun::start();
        let client = client(&stub);
        let dispatcher = Dispatcher::new(&client);
        dispatcher.register(&register("m1", "op1", None)).await.unwrap();
        let name = job_object_name("m1", "job-1");
        let payload = json!({
            "job_id": "job-1",
            "machine_id": "m1",
            "requested_by": "op1",
            "command": ["-c", "echo served"],
            "timeout_seconds": 10,
            "status": "queued",
            "requested_at": "2026-01-01T00:00:00Z",
        });
        stub.seed(JOB_KIND, &name, payload.to_string().as_bytes(), "application/json", Map::new());

        let opts = ServeOptions {
            machine_id: "m1".to_string(),
            poll_interval: Duration::from_secs(1),
            once: true,
            max_jobs: 0,
        };
        let summary = dispatcher
            .serve(&opts, &JobRunner::with_program("sh"), std::future::pending())
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.job_ids, vec!["job-1"]);
        let stored = stub.json(JOB_KIND, &name).unwrap();
        assert_eq!(stored["status"], "succeeded");
        assert_eq!(stored["stdout"], "served\n");
        assert_eq!(stub.latest_revision(JOB_KIND, &name), Some(3));
        assert_eq!(stub.json(MACHINE_KIND, "m1").unwrap()["heartbeat"]["last_state"], "serving");

        let done = dispatcher.wait(&name, Duration::from_secs(1), Duration::from_secs(2)).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let stub = StubSun::start();
        let client = client(&stub);
        let dispatcher = Dispatcher::new(&client);
        dispatcher.register(&register("m1", "op1", None)).await.unwrap();
        let opts = ServeOptions {
            machine_id: "m1".to_string(),
            poll_interval: Duration::from_secs(1),
            once: false,
            max_jobs: 0,
        };
        let summary = dispatcher
            .serve(&opts, &JobRunner::with_program("sh"), tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
    }

    #[tokio::test]
    async fn test_wait_times_out_on_queued_job() {
        let stub = StubSun::start();
        let client = client(&stub);
        let name = seed_job(&stub, "m1", "job-q", "2026-01-01T00:00:00Z", "queued");
        let err = Dispatcher::new(&client)
            .wait(&name, Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out waiting for remote job"));
    }
}
