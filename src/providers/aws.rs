use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::actions::ActionExecutor;
use crate::core::{
    Action, Disposition, ResourceDescriptor, ResourceKind, ResourceStatus, ScanRecord,
};
use crate::providers::{first_stderr_line, format_cmdline, run_command};
use crate::source::{ResourceSource, SourceUnavailable};

const VOLUME_PAGE_SIZE: u32 = 200;

/// Monthly per-GB cost of EBS volume types, us-east-1 on-demand pricing.
const VOLUME_COST_PER_GB: &[(&str, f64)] = &[
    ("gp2", 0.10),
    ("gp3", 0.08),
    ("io1", 0.125),
    ("io2", 0.125),
    ("st1", 0.045),
    ("sc1", 0.025),
    ("standard", 0.05),
];

const ADDRESS_COST_PER_MONTH: f64 = 3.60;
const LOAD_BALANCER_COST_PER_MONTH: f64 = 22.0;

pub const COST_TAG: &str = "cost/monthly-usd";
pub const ALLOCATION_ID_TAG: &str = "aws/allocation-id";

/// Shared invocation settings for the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCli {
    pub region: Option<String>,
    pub timeout: Duration,
}

impl AwsCli {
    pub fn new(region: Option<String>, timeout: Duration) -> Self {
        Self { region, timeout }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 3);
        full.extend_from_slice(args);
        if let Some(region) = &self.region {
            full.push("--region");
            full.push(region);
        }
        full.push("--output");
        full.push("json");
        let output = run_command("aws", &full, self.timeout)?;
        if output.exit_code != 0 {
            bail!(
                "{} failed (exit {}): {}",
                format_cmdline("aws", args),
                output.exit_code,
                first_stderr_line(&output)
            );
        }
        Ok(output.stdout)
    }

    fn scope_suffix(&self) -> String {
        match &self.region {
            Some(region) => format!(" (region {region})"),
            None => String::new(),
        }
    }
}

fn volume_monthly_cost(volume_type: &str, size_gb: u64) -> f64 {
    let per_gb = VOLUME_COST_PER_GB
        .iter()
        .find(|(name, _)| *name == volume_type)
        .map(|(_, rate)| *rate)
        .unwrap_or(0.10);
    per_gb * size_gb as f64
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

fn cost_tags(base: BTreeMap<String, String>, monthly_usd: f64) -> BTreeMap<String, String> {
    let mut tags = base;
    tags.insert(COST_TAG.to_string(), format!("{monthly_usd:.2}"));
    tags
}

#[derive(Debug, Deserialize)]
struct DescribeVolumesPage {
    #[serde(rename = "Volumes", default)]
    volumes: Vec<RawVolume>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVolume {
    #[serde(rename = "VolumeId")]
    volume_id: String,
    #[serde(rename = "Size", default)]
    size: u64,
    #[serde(rename = "VolumeType", default)]
    volume_type: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "CreateTime")]
    create_time: Option<String>,
    #[serde(rename = "Tags", default)]
    tags: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default)]
    value: String,
}

fn tag_map(raw: Vec<RawTag>) -> BTreeMap<String, String> {
    raw.into_iter().map(|t| (t.key, t.value)).collect()
}

fn volume_descriptor(raw: RawVolume) -> ResourceDescriptor {
    let status = match raw.state.as_str() {
        "in-use" => ResourceStatus::Active,
        "available" => ResourceStatus::Stopped,
        "error" => ResourceStatus::Failed,
        _ => ResourceStatus::Unknown,
    };
    let cost = volume_monthly_cost(&raw.volume_type, raw.size);
    ResourceDescriptor {
        id: raw.volume_id,
        kind: ResourceKind::Volume,
        created: raw.create_time.as_deref().and_then(parse_timestamp),
        last_used: None,
        tags: cost_tags(tag_map(raw.tags), cost),
        status,
        details: format!("{}GB {} (~${:.2}/mo)", raw.size, raw.volume_type, cost),
    }
}

/// Lists unattached EBS volumes, one `describe-volumes` page at a time.
pub struct VolumeSource {
    cli: AwsCli,
    next_token: Option<String>,
    done: bool,
}

impl VolumeSource {
    pub fn new(cli: AwsCli) -> Self {
        Self {
            cli,
            next_token: None,
            done: false,
        }
    }
}

impl ResourceSource for VolumeSource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    fn describe(&self) -> String {
        format!("aws ec2 volumes{}", self.cli.scope_suffix())
    }

    fn next_page(&mut self) -> Result<Option<Vec<ResourceDescriptor>>, SourceUnavailable> {
        if self.done {
            return Ok(None);
        }
        let page_size = VOLUME_PAGE_SIZE.to_string();
        let mut args: Vec<&str> = vec![
            "ec2",
            "describe-volumes",
            "--filters",
            "Name=status,Values=available",
            "--max-items",
            page_size.as_str(),
        ];
        if let Some(token) = &self.next_token {
            args.push("--starting-token");
            args.push(token.as_str());
        }
        let stdout = self
            .cli
            .run(&args)
            .map_err(|err| SourceUnavailable::new("aws ec2", format!("{err:#}")))?;
        let page: DescribeVolumesPage = serde_json::from_str(&stdout)
            .map_err(|err| SourceUnavailable::new("aws ec2", format!("bad response: {err}")))?;
        self.next_token = page.next_token;
        self.done = self.next_token.is_none();
        Ok(Some(page.volumes.into_iter().map(volume_descriptor).collect()))
    }
}

#[derive(Debug, Deserialize)]
struct DescribeAddressesPage {
    #[serde(rename = "Addresses", default)]
    addresses: Vec<RawAddress>,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(rename = "PublicIp", default)]
    public_ip: String,
    #[serde(rename = "AllocationId")]
    allocation_id: Option<String>,
    #[serde(rename = "AssociationId")]
    association_id: Option<String>,
    #[serde(rename = "InstanceId")]
    instance_id: Option<String>,
    #[serde(rename = "Tags", default)]
    tags: Vec<RawTag>,
}

fn address_descriptor(raw: RawAddress) -> ResourceDescriptor {
    let associated = raw.association_id.is_some() || raw.instance_id.is_some();
    let mut tags = tag_map(raw.tags);
    if let Some(allocation_id) = raw.allocation_id {
        tags.insert(ALLOCATION_ID_TAG.to_string(), allocation_id);
    }
    let details = if associated {
        "associated".to_string()
    } else {
        format!("unassociated (~${ADDRESS_COST_PER_MONTH:.2}/mo)")
    };
    ResourceDescriptor {
        id: raw.public_ip,
        kind: ResourceKind::Address,
        created: None,
        last_used: None,
        tags: if associated {
            tags
        } else {
            cost_tags(tags, ADDRESS_COST_PER_MONTH)
        },
        status: if associated {
            ResourceStatus::Active
        } else {
            ResourceStatus::Stopped
        },
        details,
    }
}

/// Lists Elastic IPs. The API has no pagination, so everything arrives in one
/// page.
pub struct AddressSource {
    cli: AwsCli,
    done: bool,
}

impl AddressSource {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli, done: false }
    }
}

impl ResourceSource for AddressSource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Address
    }

    fn describe(&self) -> String {
        format!("aws elastic ips{}", self.cli.scope_suffix())
    }

    fn next_page(&mut self) -> Result<Option<Vec<ResourceDescriptor>>, SourceUnavailable> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let stdout = self
            .cli
            .run(&["ec2", "describe-addresses"])
            .map_err(|err| SourceUnavailable::new("aws ec2", format!("{err:#}")))?;
        let page: DescribeAddressesPage = serde_json::from_str(&stdout)
            .map_err(|err| SourceUnavailable::new("aws ec2", format!("bad response: {err}")))?;
        Ok(Some(
            page.addresses.into_iter().map(address_descriptor).collect(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct DescribeLoadBalancersPage {
    #[serde(rename = "LoadBalancers", default)]
    load_balancers: Vec<RawLoadBalancer>,
}

#[derive(Debug, Deserialize)]
struct RawLoadBalancer {
    #[serde(rename = "LoadBalancerArn")]
    arn: String,
    #[serde(rename = "LoadBalancerName", default)]
    name: String,
    #[serde(rename = "Type", default)]
    lb_type: String,
    #[serde(rename = "State")]
    state: Option<RawLoadBalancerState>,
    #[serde(rename = "CreatedTime")]
    created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLoadBalancerState {
    #[serde(rename = "Code", default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct DescribeTargetGroupsPage {
    #[serde(rename = "TargetGroups", default)]
    target_groups: Vec<RawTargetGroup>,
}

#[derive(Debug, Deserialize)]
struct RawTargetGroup {
    #[serde(rename = "TargetGroupArn")]
    arn: String,
}

#[derive(Debug, Deserialize)]
struct DescribeTargetHealthPage {
    #[serde(rename = "TargetHealthDescriptions", default)]
    descriptions: Vec<RawTargetHealth>,
}

#[derive(Debug, Deserialize)]
struct RawTargetHealth {
    #[serde(rename = "TargetHealth")]
    health: Option<RawTargetHealthState>,
}

#[derive(Debug, Deserialize)]
struct RawTargetHealthState {
    #[serde(rename = "State", default)]
    state: String,
}

/// Lists ELBv2 load balancers and probes each one's target groups so a
/// balancer with no healthy target can be surfaced as idle.
pub struct LoadBalancerSource {
    cli: AwsCli,
    done: bool,
}

impl LoadBalancerSource {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli, done: false }
    }

    fn healthy_target_count(&self, lb_arn: &str) -> Result<u64> {
        let stdout = self.cli.run(&[
            "elbv2",
            "describe-target-groups",
            "--load-balancer-arn",
            lb_arn,
        ])?;
        let groups: DescribeTargetGroupsPage = serde_json::from_str(&stdout)
            .map_err(|err| anyhow!("bad target group response: {err}"))?;
        let mut healthy = 0;
        for group in groups.target_groups {
            let stdout = self.cli.run(&[
                "elbv2",
                "describe-target-health",
                "--target-group-arn",
                &group.arn,
            ])?;
            let health: DescribeTargetHealthPage = serde_json::from_str(&stdout)
                .map_err(|err| anyhow!("bad target health response: {err}"))?;
            healthy += health
                .descriptions
                .iter()
                .filter(|d| d.health.as_ref().is_some_and(|h| h.state == "healthy"))
                .count() as u64;
        }
        Ok(healthy)
    }
}

impl ResourceSource for LoadBalancerSource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    fn describe(&self) -> String {
        format!("aws load balancers{}", self.cli.scope_suffix())
    }

    fn next_page(&mut self) -> Result<Option<Vec<ResourceDescriptor>>, SourceUnavailable> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let stdout = self
            .cli
            .run(&["elbv2", "describe-load-balancers"])
            .map_err(|err| SourceUnavailable::new("aws elbv2", format!("{err:#}")))?;
        let page: DescribeLoadBalancersPage = serde_json::from_str(&stdout)
            .map_err(|err| SourceUnavailable::new("aws elbv2", format!("bad response: {err}")))?;

        let mut descriptors = Vec::with_capacity(page.load_balancers.len());
        for raw in page.load_balancers {
            let healthy = self
                .healthy_target_count(&raw.arn)
                .map_err(|err| SourceUnavailable::new("aws elbv2", format!("{err:#}")))?;
            let active = raw.state.as_ref().is_some_and(|s| s.code == "active");
            let mut tags = BTreeMap::new();
            tags.insert("aws/arn".to_string(), raw.arn);
            let (status, details, tags) = if healthy == 0 {
                (
                    ResourceStatus::Stopped,
                    format!(
                        "{} lb, no healthy targets (~${LOAD_BALANCER_COST_PER_MONTH:.2}/mo)",
                        raw.lb_type
                    ),
                    cost_tags(tags, LOAD_BALANCER_COST_PER_MONTH),
                )
            } else {
                (
                    if active {
                        ResourceStatus::Active
                    } else {
                        ResourceStatus::Unknown
                    },
                    format!("{} lb, {healthy} healthy targets", raw.lb_type),
                    tags,
                )
            };
            descriptors.push(ResourceDescriptor {
                id: raw.name,
                kind: ResourceKind::LoadBalancer,
                created: raw.created_time.as_deref().and_then(parse_timestamp),
                last_used: None,
                tags,
                status,
                details,
            });
        }
        Ok(Some(descriptors))
    }
}

/// Applies delete actions through the `aws` CLI. One mutation per call.
pub struct AwsExecutor {
    cli: AwsCli,
}

impl AwsExecutor {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

impl ActionExecutor for AwsExecutor {
    fn apply(&self, resource: &ResourceDescriptor, action: Action) -> Result<()> {
        match (resource.kind, action) {
            (ResourceKind::Volume, Action::Delete) => {
                self.cli
                    .run(&["ec2", "delete-volume", "--volume-id", &resource.id])?;
                Ok(())
            }
            (ResourceKind::Address, Action::Delete) => {
                let allocation_id = resource
                    .tag(ALLOCATION_ID_TAG)
                    .ok_or_else(|| anyhow!("address {} has no allocation id", resource.id))?;
                self.cli
                    .run(&["ec2", "release-address", "--allocation-id", allocation_id])?;
                Ok(())
            }
            (ResourceKind::LoadBalancer, Action::Delete) => {
                let arn = resource
                    .tag("aws/arn")
                    .ok_or_else(|| anyhow!("load balancer {} has no arn", resource.id))?;
                self.cli.run(&[
                    "elbv2",
                    "delete-load-balancer",
                    "--load-balancer-arn",
                    arn,
                ])?;
                Ok(())
            }
            (kind, action) => bail!("unsupported action {action} for {kind}"),
        }
    }
}

/// Sums the monthly cost tags of everything the pass did not keep, for the
/// report's notes line.
pub fn monthly_savings_note(records: &[ScanRecord]) -> Option<String> {
    let total: f64 = records
        .iter()
        .filter(|r| r.classification.disposition != Disposition::Keep)
        .filter_map(|r| r.resource.tag(COST_TAG))
        .filter_map(|v| v.parse::<f64>().ok())
        .sum();
    if total > 0.0 {
        Some(format!("potential monthly savings: ~${total:.2}"))
    } else {
        None
    }
}
