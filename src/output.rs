//! Tabular rendering of services and tasks.
//!
//! Output is built as tab-separated rows, aligned into fixed-width columns
//! and, for the color style, passed through the markup compiler so header
//! rows come out bold and colored.

use anyhow::{Context, Result};
use std::io::Write;
use tabwriter::TabWriter;

use crate::error::MarkupError;
use crate::markup::{Delimiters, Markup};
use crate::model::{Service, Task};

/// Creation time format used in task tables.
pub const TIME_FORMAT: &str = "%m-%d-%Y %H:%M";

/// Spaces added after the widest cell of each column.
const COLUMN_PADDING: usize = 5;

/// Placeholder for values a task does not have.
const NOT_AVAILABLE: &str = "n/a";

const SERVICE_HEADER: [&str; 6] = ["Name", "Running", "Pending", "Task", "CPU%", "Memory%"];

const SERVICE_TASK_HEADER: [&str; 7] = [
    "Service",
    "Status",
    "Desired",
    "Task",
    "Created At",
    "Instance ID",
    "Instance CPU%",
];

const TASK_HEADER: [&str; 6] = [
    "Status",
    "Desired",
    "Task",
    "Created At",
    "Instance ID",
    "Instance CPU%",
];

/// Reduces an ARN to its second `/`-delimited segment when `enabled`.
///
/// `arn:aws:ecs:us-east-1:123:task-definition/api:12` becomes `api:12`.
/// Input without a `/` is returned unchanged.
pub fn truncate_arn(arn: &str, enabled: bool) -> &str {
    if !enabled {
        return arn;
    }
    arn.split('/').nth(1).unwrap_or(arn)
}

/// How header rows are rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStyle {
    /// Plain text
    Basic,
    /// Headers wrapped in markup with these delimiters, compiled to ANSI
    Color(Delimiters),
}

/// The two rendered sections of a cluster report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    pub services: String,
    pub tasks: String,
}

/// Renders services and tasks as aligned tables.
#[derive(Debug, Clone)]
pub struct ServiceFormatter {
    short_arns: bool,
    style: OutputStyle,
}

impl ServiceFormatter {
    pub fn basic(short_arns: bool) -> Self {
        Self {
            short_arns,
            style: OutputStyle::Basic,
        }
    }

    pub fn color(short_arns: bool, delimiters: Delimiters) -> Self {
        Self {
            short_arns,
            style: OutputStyle::Color(delimiters),
        }
    }

    /// One tab-separated row per service, without header.
    pub fn service_rows(&self, services: &[Service]) -> Vec<String> {
        services
            .iter()
            .map(|s| {
                format!(
                    "{}\t{}\t{}\t{}\t{:.6}\t{:.6}",
                    s.name,
                    s.running_count,
                    s.pending_count,
                    truncate_arn(&s.task_definition, self.short_arns),
                    s.metrics.cpu,
                    s.metrics.memory
                )
            })
            .collect()
    }

    /// One tab-separated row per task across all services, prefixed with the
    /// owning service name.
    pub fn task_rows(&self, services: &[Service]) -> Vec<String> {
        services
            .iter()
            .flat_map(|svc| {
                svc.tasks
                    .iter()
                    .map(move |task| format!("{}\t{}", svc.name, self.task_row(task)))
            })
            .collect()
    }

    fn task_row(&self, task: &Task) -> String {
        let created_at = task
            .created_at
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let (instance_id, instance_cpu) = match &task.instance {
            Some(instance) => (
                instance.ec2_instance_id.clone(),
                format!("{:.6}%", instance.cpu),
            ),
            None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
        };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            task.status,
            task.desired_status,
            truncate_arn(&task.task_definition, self.short_arns),
            created_at,
            instance_id,
            instance_cpu
        )
    }

    /// Renders the services table and the tasks table separately.
    pub fn render_tables(&self, services: &[Service]) -> Result<Tables, MarkupError> {
        Ok(Tables {
            services: self.render_section(&SERVICE_HEADER, &self.service_rows(services))?,
            tasks: self.render_section(&SERVICE_TASK_HEADER, &self.task_rows(services))?,
        })
    }

    /// Writes the services table, a blank line, then the tasks table.
    pub fn display_services(&self, services: &[Service], out: &mut impl Write) -> Result<()> {
        let tables = self
            .render_tables(services)
            .context("error formatting output")?;
        write!(out, "{}\n{}", tables.services, tables.tasks).context("error writing output")?;
        Ok(())
    }

    /// Writes a tasks table for tasks of a single service.
    pub fn display_tasks(&self, tasks: &[Task], out: &mut impl Write) -> Result<()> {
        let rows: Vec<String> = tasks.iter().map(|task| self.task_row(task)).collect();
        let table = self
            .render_section(&TASK_HEADER, &rows)
            .context("error formatting output")?;
        out.write_all(table.as_bytes())
            .context("error writing output")?;
        Ok(())
    }

    fn render_section(&self, header: &[&str], rows: &[String]) -> Result<String, MarkupError> {
        let header = header.join("\t");
        match &self.style {
            OutputStyle::Basic => align_columns(&section_text(header, rows)),
            OutputStyle::Color(delimiters) => {
                let markup = Markup::new(delimiters)?;
                let (l, r) = (&delimiters.left, &delimiters.right);
                let styled = format!("{l}fg 13{r}{l}bold{r}{header}{l}reset{r}");
                let compiled = markup.compile(&section_text(styled, rows))?;
                align_columns(&compiled)
            }
        }
    }
}

fn section_text(header: String, rows: &[String]) -> String {
    let mut text = header;
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

/// Aligns tab-terminated cells the way Go's `text/tabwriter` does.
///
/// Escape sequences do not count toward a cell's width, so compiled headers
/// line up with plain rows.
fn align_columns(text: &str) -> Result<String, MarkupError> {
    let mut buf = Vec::with_capacity(text.len() * 2);
    {
        let mut tw = TabWriter::new(&mut buf)
            .minwidth(0)
            .padding(COLUMN_PADDING)
            .ansi(true);
        tw.write_all(text.as_bytes())?;
        tw.flush()?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
