use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::actions::ActionExecutor;
use crate::core::{Action, ResourceDescriptor, ResourceKind, ResourceStatus};
use crate::providers::{first_stderr_line, format_cmdline, run_command};
use crate::source::{ResourceSource, SourceUnavailable};

pub const RESTARTS_TAG: &str = "pod/restarts";
pub const WAITING_REASON_TAG: &str = "pod/waiting-reason";

/// Shared invocation settings for `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlCli {
    pub namespace: Option<String>,
    pub timeout: Duration,
}

impl KubectlCli {
    pub fn new(namespace: Option<String>, timeout: Duration) -> Self {
        Self { namespace, timeout }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = run_command("kubectl", args, self.timeout)?;
        if output.exit_code != 0 {
            bail!(
                "{} failed (exit {}): {}",
                format_cmdline("kubectl", args),
                output.exit_code,
                first_stderr_line(&output)
            );
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<RawPod>,
}

#[derive(Debug, Deserialize)]
struct RawPod {
    metadata: RawPodMetadata,
    #[serde(default)]
    status: RawPodStatus,
}

#[derive(Debug, Deserialize)]
struct RawPodMetadata {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(rename = "creationTimestamp")]
    creation_timestamp: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPodStatus {
    #[serde(default)]
    phase: String,
    #[serde(rename = "containerStatuses", default)]
    container_statuses: Vec<RawContainerStatus>,
    #[serde(default)]
    conditions: Vec<RawPodCondition>,
}

#[derive(Debug, Deserialize)]
struct RawContainerStatus {
    #[serde(default)]
    name: String,
    #[serde(rename = "restartCount", default)]
    restart_count: u32,
    #[serde(default)]
    state: RawContainerState,
}

#[derive(Debug, Default, Deserialize)]
struct RawContainerState {
    waiting: Option<RawStateWaiting>,
    terminated: Option<RawStateTerminated>,
}

#[derive(Debug, Deserialize)]
struct RawStateWaiting {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RawStateTerminated {
    #[serde(rename = "exitCode", default)]
    exit_code: i32,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RawPodCondition {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    status: String,
}

const PROBLEM_WAITING_REASONS: &[&str] = &["CrashLoopBackOff", "ImagePullBackOff", "ErrImagePull"];

/// Collects the human-readable problems a pod exhibits, in the order a
/// `kubectl describe` reader would notice them.
fn pod_issues(pod: &RawPod) -> Vec<String> {
    let mut issues = Vec::new();
    match pod.status.phase.as_str() {
        "Failed" => issues.push("pod phase is Failed".to_string()),
        "Unknown" => issues.push("pod phase is Unknown".to_string()),
        _ => {}
    }
    for container in &pod.status.container_statuses {
        if container.restart_count > 5 {
            issues.push(format!(
                "container {} restarted {} times",
                container.name, container.restart_count
            ));
        }
        if let Some(waiting) = &container.state.waiting {
            if PROBLEM_WAITING_REASONS.contains(&waiting.reason.as_str()) {
                issues.push(format!(
                    "container {} waiting: {}",
                    container.name, waiting.reason
                ));
            }
        }
        if let Some(terminated) = &container.state.terminated {
            if terminated.exit_code != 0 {
                issues.push(format!(
                    "container {} terminated with exit {} ({})",
                    container.name, terminated.exit_code, terminated.reason
                ));
            }
        }
    }
    for condition in &pod.status.conditions {
        if (condition.kind == "Ready" || condition.kind == "PodScheduled")
            && condition.status == "False"
        {
            issues.push(format!("condition {} is False", condition.kind));
        }
    }
    issues
}

fn pod_descriptor(pod: RawPod) -> ResourceDescriptor {
    let status = match pod.status.phase.as_str() {
        "Running" | "Pending" => ResourceStatus::Active,
        "Succeeded" => ResourceStatus::Stopped,
        "Failed" => ResourceStatus::Failed,
        _ => ResourceStatus::Unknown,
    };
    let issues = pod_issues(&pod);

    let mut tags = pod.metadata.labels;
    let restarts: u32 = pod
        .status
        .container_statuses
        .iter()
        .map(|c| c.restart_count)
        .sum();
    tags.insert(RESTARTS_TAG.to_string(), restarts.to_string());
    // Benign startup states (ContainerCreating, PodInitializing) are not
    // tagged; only reasons that indicate a stuck pod are.
    if let Some(reason) = pod
        .status
        .container_statuses
        .iter()
        .filter_map(|c| c.state.waiting.as_ref())
        .map(|w| w.reason.as_str())
        .find(|r| PROBLEM_WAITING_REASONS.contains(r))
    {
        tags.insert(WAITING_REASON_TAG.to_string(), reason.to_string());
    }

    ResourceDescriptor {
        id: format!("{}/{}", pod.metadata.namespace, pod.metadata.name),
        kind: ResourceKind::Pod,
        created: pod
            .metadata
            .creation_timestamp
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok()),
        last_used: None,
        tags,
        status,
        details: issues.join("; "),
    }
}

/// Lists pods via `kubectl get pods -o json`. The list API returns everything
/// at once, so a single page.
pub struct PodSource {
    cli: KubectlCli,
    selector: Option<String>,
    done: bool,
}

impl PodSource {
    pub fn new(cli: KubectlCli, selector: Option<String>) -> Self {
        Self {
            cli,
            selector,
            done: false,
        }
    }
}

impl ResourceSource for PodSource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pod
    }

    fn describe(&self) -> String {
        match &self.cli.namespace {
            Some(ns) => format!("kubernetes pods (namespace {ns})"),
            None => "kubernetes pods (all namespaces)".to_string(),
        }
    }

    fn next_page(&mut self) -> Result<Option<Vec<ResourceDescriptor>>, SourceUnavailable> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut args = vec!["get", "pods", "-o", "json"];
        match &self.cli.namespace {
            Some(ns) => {
                args.push("-n");
                args.push(ns);
            }
            None => args.push("--all-namespaces"),
        }
        if let Some(selector) = &self.selector {
            args.push("-l");
            args.push(selector);
        }
        let stdout = self
            .cli
            .run(&args)
            .map_err(|err| SourceUnavailable::new("kubectl", format!("{err:#}")))?;
        let list: PodList = serde_json::from_str(&stdout)
            .map_err(|err| SourceUnavailable::new("kubectl", format!("bad response: {err}")))?;
        Ok(Some(list.items.into_iter().map(pod_descriptor).collect()))
    }
}

/// Deletes pods with `kubectl delete pod`. `--wait=false` keeps one slow
/// graceful termination from stalling the whole worker pool.
pub struct PodExecutor {
    cli: KubectlCli,
}

impl PodExecutor {
    pub fn new(cli: KubectlCli) -> Self {
        Self { cli }
    }
}

impl ActionExecutor for PodExecutor {
    fn apply(&self, resource: &ResourceDescriptor, action: Action) -> Result<()> {
        if action != Action::Delete {
            bail!("unsupported action {action} for {}", resource.kind);
        }
        let (namespace, name) = resource
            .id
            .split_once('/')
            .unwrap_or(("default", resource.id.as_str()));
        self.cli.run(&[
            "delete",
            "pod",
            name,
            "-n",
            namespace,
            "--wait=false",
        ])?;
        Ok(())
    }
}
