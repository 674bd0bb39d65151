//! Cluster data model.
//!
//! Every query rebuilds these values from scratch; nothing here is cached or
//! persisted between refreshes.

use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

use crate::error::CommandError;

/// An ECS service together with its current utilization and tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    /// Service name
    pub name: String,
    /// Full service ARN
    pub arn: String,
    /// Number of tasks currently running
    pub running_count: i32,
    /// Number of tasks pending startup
    pub pending_count: i32,
    /// Task definition ARN the service deploys
    pub task_definition: String,
    /// CPU and memory utilization over the trailing metrics window
    pub metrics: ServiceMetrics,
    /// Tasks belonging to the service, in the order ECS described them
    pub tasks: Vec<Task>,
}

/// Service-level utilization, both on a 0-100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServiceMetrics {
    pub cpu: f64,
    pub memory: f64,
}

/// A single task of a service.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Full task ARN
    pub arn: String,
    /// Last reported lifecycle status (e.g., RUNNING, PENDING)
    pub status: String,
    /// Desired lifecycle status
    pub desired_status: String,
    /// Task definition ARN the task runs
    pub task_definition: String,
    /// Creation time, if ECS reported one
    pub created_at: Option<DateTime<Local>>,
    /// Backing container instance; `None` for tasks without one (e.g., Fargate)
    pub instance: Option<TaskInstance>,
}

/// The container instance a task is placed on, with its CPU utilization.
///
/// Only exists for tasks that report a non-empty container instance ARN, so a
/// task without an instance can never carry metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInstance {
    /// Container instance ARN
    pub arn: String,
    /// EC2 instance identifier backing the container instance
    pub ec2_instance_id: String,
    /// EC2 CPU utilization over the trailing metrics window (0-100)
    pub cpu: f64,
}

impl Task {
    /// Container instance ARN, or `""` when the task has no instance.
    pub fn instance_arn(&self) -> &str {
        self.instance
            .as_ref()
            .map(|instance| instance.arn.as_str())
            .unwrap_or("")
    }
}

/// Metric selectable for service graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphMetric {
    Cpu,
    Memory,
}

impl GraphMetric {
    /// CloudWatch metric name in the `AWS/ECS` namespace.
    pub fn cloudwatch_name(self) -> &'static str {
        match self {
            GraphMetric::Cpu => "CPUUtilization",
            GraphMetric::Memory => "MemoryUtilization",
        }
    }

    /// Token used on the command line and in chat commands.
    pub fn as_str(self) -> &'static str {
        match self {
            GraphMetric::Cpu => "cpu",
            GraphMetric::Memory => "mem",
        }
    }
}

impl fmt::Display for GraphMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphMetric {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(GraphMetric::Cpu),
            "mem" => Ok(GraphMetric::Memory),
            other => Err(CommandError::UnknownMetric(other.to_string())),
        }
    }
}
