use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::actions::ActionExecutor;
use crate::core::{Action, ResourceDescriptor, ResourceKind, ResourceStatus};
use crate::providers::{first_stderr_line, format_cmdline, run_command};
use crate::source::{ResourceSource, SourceUnavailable};

pub const REFERENCE_TAG: &str = "image/reference";
pub const DANGLING_TAG: &str = "image/dangling";

// "2026-01-15 09:30:00 +0000 UTC" as printed by `docker image ls`.
const CREATED_AT_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

/// Shared invocation settings for the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    pub timeout: Duration,
}

impl DockerCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = run_command("docker", args, self.timeout)?;
        if output.exit_code != 0 {
            bail!(
                "{} failed (exit {}): {}",
                format_cmdline("docker", args),
                output.exit_code,
                first_stderr_line(&output)
            );
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Repository", default)]
    repository: String,
    #[serde(rename = "Tag", default)]
    tag: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
    #[serde(rename = "Size", default)]
    size: String,
}

fn parse_created_at(raw: &str) -> Option<OffsetDateTime> {
    // Docker appends the zone name after the numeric offset; drop it.
    let trimmed = raw.trim().trim_end_matches(|c: char| c.is_ascii_alphabetic());
    OffsetDateTime::parse(trimmed.trim_end(), CREATED_AT_FORMAT).ok()
}

fn image_descriptor(raw: RawImage) -> ResourceDescriptor {
    let dangling = raw.repository == "<none>";
    let mut tags = BTreeMap::new();
    tags.insert(
        REFERENCE_TAG.to_string(),
        format!("{}:{}", raw.repository, raw.tag),
    );
    if dangling {
        tags.insert(DANGLING_TAG.to_string(), "true".to_string());
    }
    let details = if dangling {
        format!("dangling, {}", raw.size)
    } else {
        raw.size.clone()
    };
    ResourceDescriptor {
        id: raw.id,
        kind: ResourceKind::Image,
        created: parse_created_at(&raw.created_at),
        last_used: None,
        tags,
        status: ResourceStatus::Unknown,
        details,
    }
}

/// Lists local images via `docker image ls --format '{{json .}}'`, which
/// emits one JSON object per line.
pub struct ImageSource {
    cli: DockerCli,
    done: bool,
}

impl ImageSource {
    pub fn new(cli: DockerCli) -> Self {
        Self { cli, done: false }
    }
}

impl ResourceSource for ImageSource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    fn describe(&self) -> String {
        "docker images (local daemon)".to_string()
    }

    fn next_page(&mut self) -> Result<Option<Vec<ResourceDescriptor>>, SourceUnavailable> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let stdout = self
            .cli
            .run(&["image", "ls", "--all", "--format", "{{json .}}"])
            .map_err(|err| SourceUnavailable::new("docker", format!("{err:#}")))?;
        let mut descriptors = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let raw: RawImage = serde_json::from_str(line).map_err(|err| {
                SourceUnavailable::new("docker", format!("bad image line: {err}"))
            })?;
            descriptors.push(image_descriptor(raw));
        }
        Ok(Some(descriptors))
    }
}

/// Removes images with `docker rmi --force`. Force is required for dangling
/// layers still referenced by stopped containers.
pub struct ImageExecutor {
    cli: DockerCli,
}

impl ImageExecutor {
    pub fn new(cli: DockerCli) -> Self {
        Self { cli }
    }
}

impl ActionExecutor for ImageExecutor {
    fn apply(&self, resource: &ResourceDescriptor, action: Action) -> Result<()> {
        if action != Action::Delete {
            bail!("unsupported action {action} for {}", resource.kind);
        }
        self.cli.run(&["rmi", "--force", &resource.id])?;
        Ok(())
    }
}
