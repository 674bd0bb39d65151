//! AWS ECS and CloudWatch integration module.
//!
//! This module provides a client wrapper for ECS and CloudWatch with methods
//! for listing services and tasks together with their utilization, and for
//! rendering CloudWatch metric graphs.

use crate::model::{GraphMetric, Service, ServiceMetrics, Task, TaskInstance};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Datapoint, Dimension, Statistic};
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_ecs::Client;
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Maximum number of services DescribeServices accepts per call.
pub const DESCRIBE_SERVICES_BATCH: usize = 10;

/// Maximum number of tasks DescribeTasks accepts per call.
const DESCRIBE_TASKS_BATCH: usize = 100;

/// Trailing window for the utilization snapshot.
const METRICS_WINDOW_SECS: i64 = 120;

/// Statistics period within the snapshot window.
const METRICS_PERIOD_SECS: i32 = 60;

/// Statistics period for graph images.
const GRAPH_PERIOD_SECS: u64 = 300;

/// The cluster queries the front ends depend on.
///
/// Implemented by [`EcsClient`]; the chat bot is written against this trait so
/// it can run without AWS.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Lists every service of `cluster` with metrics and tasks.
    async fn list_services(&self, cluster: &str) -> Result<Vec<Service>>;

    /// Renders a PNG graph of `metric` for a service over the trailing `window`.
    async fn service_graph(
        &self,
        cluster: &str,
        service: &str,
        metric: GraphMetric,
        window: Duration,
    ) -> Result<Vec<u8>>;
}

/// Client for ECS and CloudWatch Metrics.
///
/// Bound to one region; the cluster is chosen per call.
pub struct EcsClient {
    /// AWS ECS SDK client
    client: Client,
    /// AWS CloudWatch Metrics SDK client
    metrics_client: CloudWatchClient,
}

impl EcsClient {
    /// Creates a new client with optional region and profile configuration.
    ///
    /// # Arguments
    /// * `region` - Optional AWS region override (e.g., "us-east-1")
    /// * `profile` - Optional AWS profile name from ~/.aws/credentials
    ///
    /// # Errors
    /// This function will return an error if AWS SDK initialization fails.
    pub async fn new(region: Option<String>, profile: Option<String>) -> Result<Self> {
        let mut config_loader = aws_config::from_env();

        if let Some(region_str) = region {
            config_loader = config_loader.region(aws_config::Region::new(region_str));
        }

        if let Some(profile_name) = profile {
            config_loader = config_loader.profile_name(profile_name);
        }

        let config = config_loader.load().await;
        Ok(Self::from_clients(
            Client::new(&config),
            CloudWatchClient::new(&config),
        ))
    }

    /// Wraps already configured SDK clients.
    pub fn from_clients(client: Client, metrics_client: CloudWatchClient) -> Self {
        Self {
            client,
            metrics_client,
        }
    }

    /// Lists all services in a cluster with their utilization and tasks.
    ///
    /// Service ARNs are collected across every ListServices page, then
    /// described in batches of [`DESCRIBE_SERVICES_BATCH`]. Any failure,
    /// including a metrics call for a single service, fails the whole listing.
    ///
    /// # Errors
    /// This function will return an error if any ECS or CloudWatch call fails.
    pub async fn list_services(&self, cluster: &str) -> Result<Vec<Service>> {
        let service_arns = self.list_service_arns(cluster).await?;
        debug!(cluster, count = service_arns.len(), "listed service ARNs");

        let mut services = Vec::with_capacity(service_arns.len());
        for batch in service_arns.chunks(DESCRIBE_SERVICES_BATCH) {
            let resp = self
                .client
                .describe_services()
                .cluster(cluster)
                .set_services(Some(batch.to_vec()))
                .send()
                .await
                .with_context(|| format!("failed to describe services in cluster {cluster}"))?;

            for svc in resp.services() {
                let name = svc.service_name().unwrap_or("unknown").to_string();
                let metrics = self
                    .service_metrics(cluster, &name)
                    .await
                    .with_context(|| format!("failed to fetch metrics for service {name}"))?;
                let tasks = self.list_tasks(cluster, &name).await?;

                services.push(Service {
                    arn: svc.service_arn().unwrap_or_default().to_string(),
                    running_count: svc.running_count(),
                    pending_count: svc.pending_count(),
                    task_definition: svc.task_definition().unwrap_or_default().to_string(),
                    metrics,
                    tasks,
                    name,
                });
            }
        }

        Ok(services)
    }

    async fn list_service_arns(&self, cluster: &str) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_services()
                .cluster(cluster)
                .max_results(100)
                .set_next_token(next_token.take())
                .send()
                .await
                .with_context(|| format!("failed to list services in cluster {cluster}"))?;

            arns.extend(resp.service_arns().iter().cloned());
            match resp.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(arns)
    }

    /// Lists all tasks for a service, with instance metrics for tasks placed
    /// on a container instance.
    ///
    /// # Errors
    /// This function will return an error if any ECS or CloudWatch call fails.
    pub async fn list_tasks(&self, cluster: &str, service: &str) -> Result<Vec<Task>> {
        let mut task_arns = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_tasks()
                .cluster(cluster)
                .service_name(service)
                .set_next_token(next_token.take())
                .send()
                .await
                .with_context(|| format!("failed to list tasks for service {service}"))?;

            task_arns.extend(resp.task_arns().iter().cloned());
            match resp.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        let mut tasks = Vec::with_capacity(task_arns.len());
        for batch in task_arns.chunks(DESCRIBE_TASKS_BATCH) {
            let resp = self
                .client
                .describe_tasks()
                .cluster(cluster)
                .set_tasks(Some(batch.to_vec()))
                .send()
                .await
                .with_context(|| format!("failed to describe tasks for service {service}"))?;

            for t in resp.tasks() {
                let instance = match t.container_instance_arn() {
                    Some(arn) if !arn.is_empty() => {
                        Some(self.instance_metrics(cluster, arn).await?)
                    }
                    _ => None,
                };

                let task = Task {
                    arn: t.task_arn().unwrap_or_default().to_string(),
                    status: t.last_status().unwrap_or_default().to_string(),
                    desired_status: t.desired_status().unwrap_or_default().to_string(),
                    task_definition: t.task_definition_arn().unwrap_or_default().to_string(),
                    created_at: t.created_at().and_then(to_local_time),
                    instance,
                };
                debug!(task = %task.arn, instance = task.instance_arn(), "described task");
                tasks.push(task);
            }
        }

        Ok(tasks)
    }

    /// Resolves a container instance to its EC2 instance and fetches the
    /// instance's CPU utilization.
    ///
    /// # Errors
    /// Fails if the container instance cannot be described or the metrics
    /// call fails.
    pub async fn instance_metrics(
        &self,
        cluster: &str,
        instance_arn: &str,
    ) -> Result<TaskInstance> {
        let resp = self
            .client
            .describe_container_instances()
            .cluster(cluster)
            .container_instances(instance_arn)
            .send()
            .await
            .with_context(|| format!("failed to describe container instance {instance_arn}"))?;

        let ec2_instance_id = resp
            .container_instances()
            .first()
            .and_then(|ci| ci.ec2_instance_id())
            .ok_or_else(|| anyhow!("container instance {instance_arn} not found"))?
            .to_string();

        let cpu = self
            .average_utilization(
                "AWS/EC2",
                "CPUUtilization",
                vec![dimension("InstanceId", &ec2_instance_id)],
            )
            .await?;

        Ok(TaskInstance {
            arn: instance_arn.to_string(),
            ec2_instance_id,
            cpu,
        })
    }

    /// Fetches service CPU and memory utilization over the trailing window.
    ///
    /// # Errors
    /// Fails if either CloudWatch call fails.
    pub async fn service_metrics(&self, cluster: &str, service: &str) -> Result<ServiceMetrics> {
        let dims = vec![
            dimension("ClusterName", cluster),
            dimension("ServiceName", service),
        ];
        let cpu = self
            .average_utilization("AWS/ECS", "CPUUtilization", dims.clone())
            .await?;
        let memory = self
            .average_utilization("AWS/ECS", "MemoryUtilization", dims)
            .await?;
        Ok(ServiceMetrics { cpu, memory })
    }

    async fn average_utilization(
        &self,
        namespace: &str,
        metric_name: &str,
        dimensions: Vec<Dimension>,
    ) -> Result<f64> {
        let end_time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
        let start_time = end_time - METRICS_WINDOW_SECS;

        let resp = self
            .metrics_client
            .get_metric_statistics()
            .namespace(namespace)
            .metric_name(metric_name)
            .set_dimensions(Some(dimensions))
            .start_time(AwsDateTime::from_secs(start_time))
            .end_time(AwsDateTime::from_secs(end_time))
            .period(METRICS_PERIOD_SECS)
            .statistics(Statistic::Average)
            .send()
            .await
            .with_context(|| format!("failed to fetch {namespace} {metric_name}"))?;

        Ok(latest_average(resp.datapoints()))
    }

    /// Renders a service metric graph as PNG bytes.
    ///
    /// # Errors
    /// Fails if the GetMetricWidgetImage call fails or returns no image.
    pub async fn service_graph(
        &self,
        cluster: &str,
        service: &str,
        metric: GraphMetric,
        window: Duration,
    ) -> Result<Vec<u8>> {
        let widget = metric_widget(cluster, service, metric, window);
        let resp = self
            .metrics_client
            .get_metric_widget_image()
            .metric_widget(widget.to_string())
            .output_format("png")
            .send()
            .await
            .with_context(|| format!("failed to render {metric} graph for service {service}"))?;

        match resp.metric_widget_image() {
            Some(image) if !image.as_ref().is_empty() => Ok(image.as_ref().to_vec()),
            _ => bail!("CloudWatch returned an empty graph for service {service}"),
        }
    }
}

#[async_trait]
impl ClusterSource for EcsClient {
    async fn list_services(&self, cluster: &str) -> Result<Vec<Service>> {
        EcsClient::list_services(self, cluster).await
    }

    async fn service_graph(
        &self,
        cluster: &str,
        service: &str,
        metric: GraphMetric,
        window: Duration,
    ) -> Result<Vec<u8>> {
        EcsClient::service_graph(self, cluster, service, metric, window).await
    }
}

fn dimension(name: &str, value: &str) -> Dimension {
    Dimension::builder().name(name).value(value).build()
}

fn to_local_time(ts: &aws_sdk_ecs::primitives::DateTime) -> Option<DateTime<Local>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).map(|utc| utc.with_timezone(&Local))
}

/// Average of the most recent datapoint, or `0.0` when there is none.
pub fn latest_average(datapoints: &[Datapoint]) -> f64 {
    datapoints
        .iter()
        .max_by_key(|dp| dp.timestamp().map(|t| t.secs()).unwrap_or(i64::MIN))
        .and_then(|dp| dp.average())
        .unwrap_or(0.0)
}

/// Builds the CloudWatch metric widget definition for a service graph.
///
/// Plots average, maximum and minimum of the metric on a 0-100 axis.
pub fn metric_widget(cluster: &str, service: &str, metric: GraphMetric, window: Duration) -> Value {
    let name = metric.cloudwatch_name();
    json!({
        "title": format!("{service} {name}"),
        "start": iso8601_lookback(window),
        "end": "P0D",
        "period": GRAPH_PERIOD_SECS,
        "yAxis": {
            "left": { "min": 0, "max": 100 }
        },
        "metrics": [
            ["AWS/ECS", name, "ClusterName", cluster, "ServiceName", service,
                { "id": "m1", "stat": "Average" }],
            [".", ".", ".", ".", ".", ".", { "id": "m2", "stat": "Maximum" }],
            [".", ".", ".", ".", ".", ".", { "id": "m3", "stat": "Minimum" }]
        ]
    })
}

/// Negative ISO-8601 duration for a trailing window, e.g. `-PT24H`.
fn iso8601_lookback(window: Duration) -> String {
    let secs = window.as_secs().max(60);
    if secs % 3600 == 0 {
        format!("-PT{}H", secs / 3600)
    } else {
        format!("-PT{}M", secs / 60)
    }
}
