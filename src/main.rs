//! ecstools - operator tools for AWS ECS clusters
//!
//! One binary with a subcommand per front end: one-shot service and task
//! reports, PNG metric graphs, a full-screen refreshing dashboard, and a
//! Keybase chat bot that answers the same queries in conversations.

mod app;
mod aws;
mod bot;
mod chat;
mod config;
mod error;
mod markup;
mod model;
mod output;
mod ui;

use anyhow::{Context, Result};
use app::{spawn_refresh_worker, Dashboard, RefreshHandle};
use aws::{ClusterSource, EcsClient};
use bot::{BotOptions, BotServer};
use chat::keybase::{KeybaseChat, KeybaseOptions};
use clap::{Parser, Subcommand};
use config::Config;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use model::GraphMetric;
use output::ServiceFormatter;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Exit status of the one-shot tools and the dashboard on failure.
const QUERY_FAILURE_EXIT: i32 = 3;

/// Exit status of the bot when its loop terminates.
const BOT_FAILURE_EXIT: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "ecstools", version, about = "Operator tools for AWS ECS clusters")]
struct Cli {
    /// Cluster to query
    #[arg(long, global = true)]
    cluster: Option<String>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// AWS profile from ~/.aws/credentials
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Show only the resource part of task definition ARNs
    #[arg(long, global = true, value_name = "BOOL", action = clap::ArgAction::Set)]
    short_arns: Option<bool>,

    /// Configuration file (default: ~/.ecstools/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every service of the cluster followed by all their tasks
    List {
        /// Plain headers without ANSI styling
        #[arg(long)]
        no_color: bool,
    },
    /// Print the tasks of one service
    Tasks {
        #[arg(long)]
        service: String,
    },
    /// Write a PNG graph of a service metric
    Graph {
        #[arg(long)]
        service: String,

        /// Metric to graph: cpu or mem
        metric: String,

        /// Trailing window in hours
        #[arg(long, default_value_t = 24)]
        hours: u64,

        /// Write the image here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Full-screen dashboard refreshed on an interval
    Top,
    /// Answer !ecslist and !ecssvcgraph in Keybase chat
    Bot {
        /// keybase executable
        #[arg(long)]
        keybase: Option<String>,

        /// Team to advertise commands to
        #[arg(long)]
        teamname: Option<String>,

        /// Alternate keybase home directory
        #[arg(long)]
        home: Option<PathBuf>,

        /// Subscribe to live messages instead of polling
        #[arg(long)]
        listen: bool,

        /// Seconds between polls
        #[arg(long)]
        poll_interval: Option<u64>,
    },
}

/// Settings shared by every subcommand once flags and file are merged.
#[derive(Debug, Clone)]
struct Settings {
    cluster: String,
    short_arns: bool,
    region: Option<String>,
    profile: Option<String>,
}

impl Settings {
    fn merge(cli: &Cli, config: &Config) -> Self {
        Self {
            cluster: cli
                .cluster
                .clone()
                .unwrap_or_else(|| config.cluster.name.clone()),
            short_arns: cli.short_arns.unwrap_or(config.cluster.short_arns),
            region: cli.region.clone().or_else(|| config.aws.region.clone()),
            profile: cli.profile.clone().or_else(|| config.aws.profile.clone()),
        }
    }

    async fn client(&self) -> Result<EcsClient> {
        EcsClient::new(self.region.clone(), self.profile.clone())
            .await
            .context("failed to configure AWS client")
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let failure_exit = match cli.command {
        Commands::Bot { .. } => BOT_FAILURE_EXIT,
        _ => QUERY_FAILURE_EXIT,
    };

    if let Err(err) = init_tracing(&cli.command) {
        eprintln!("Error: {err:#}");
        std::process::exit(failure_exit);
    }

    if let Err(err) = run(cli).await {
        error!(error = %format!("{err:#}"), "command failed");
        eprintln!("Error: {err:#}");
        std::process::exit(failure_exit);
    }
}

/// Logs go to stderr so stdout stays clean for reports and images. The
/// dashboard owns the terminal, so it logs to a file instead.
fn init_tracing(command: &Commands) -> Result<()> {
    let default_level = match command {
        Commands::Bot { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    if let Commands::Top = command {
        let log_file = open_log_file()?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(log_file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
    Ok(())
}

fn open_log_file() -> Result<File> {
    let dir = Config::config_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {dir:?}"))?;
    let path = dir.join("ecstools.log");
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file: {path:?}"))
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let settings = Settings::merge(&cli, &config);

    match cli.command {
        Commands::List { no_color } => {
            let client = settings.client().await?;
            let services = client
                .list_services(&settings.cluster)
                .await
                .context("error listing services")?;
            let formatter = if no_color {
                ServiceFormatter::basic(settings.short_arns)
            } else {
                ServiceFormatter::color(settings.short_arns, config.output.delimiters.clone())
            };
            formatter.display_services(&services, &mut io::stdout().lock())
        }
        Commands::Tasks { ref service } => {
            let client = settings.client().await?;
            let tasks = client
                .list_tasks(&settings.cluster, service)
                .await
                .context("error listing tasks")?;
            ServiceFormatter::color(settings.short_arns, config.output.delimiters.clone())
                .display_tasks(&tasks, &mut io::stdout().lock())
        }
        Commands::Graph {
            ref service,
            ref metric,
            hours,
            ref output,
        } => {
            let metric: GraphMetric = metric.parse()?;
            let client = settings.client().await?;
            let image = client
                .service_graph(
                    &settings.cluster,
                    service,
                    metric,
                    graph_window(hours),
                )
                .await
                .context("error getting service graph")?;
            write_image(&image, output.as_ref())
        }
        Commands::Top => {
            let client = settings.client().await?;
            let interval = Duration::from_secs(config.dashboard.refresh_interval);
            run_top(Arc::new(client), &settings, interval).await
        }
        Commands::Bot {
            keybase,
            teamname,
            home,
            listen,
            poll_interval,
        } => {
            let chat = KeybaseChat::start(KeybaseOptions {
                binary: keybase.unwrap_or(config.bot.keybase),
                home: home.or(config.bot.home),
            })
            .context("error starting keybase chat api")?;
            let source = settings.client().await?;
            let opts = BotOptions {
                default_cluster: settings.cluster.clone(),
                short_arns: settings.short_arns,
                poll_interval: Duration::from_secs(
                    poll_interval.unwrap_or(config.bot.poll_interval),
                ),
            };

            let mut server = BotServer::new(chat, source, opts);
            let team_name = teamname.or(config.bot.team_name);
            server.advertise(team_name.as_deref()).await?;
            info!(cluster = %settings.cluster, "ecs bot started");
            if listen || config.bot.listen {
                server.run_listening().await
            } else {
                server.run_polling().await
            }
        }
    }
}

/// Trailing graph window for `--hours`, saturating on absurd values.
fn graph_window(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(60 * 60))
}

fn write_image(image: &[u8], path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, image)
            .with_context(|| format!("error writing graph to {path:?}")),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(image).context("error writing graph")?;
            stdout.flush().context("error writing graph")
        }
    }
}

/// Runs the dashboard, restoring the terminal even if the loop fails.
async fn run_top(
    source: Arc<dyn ClusterSource>,
    settings: &Settings,
    refresh_interval: Duration,
) -> Result<()> {
    let formatter = ServiceFormatter::basic(settings.short_arns);
    let mut handle = spawn_refresh_worker(source, settings.cluster.clone(), formatter);
    let mut dash = Dashboard::new(settings.cluster.clone(), refresh_interval);
    if handle.request() {
        dash.begin_refresh();
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_dashboard(&mut terminal, &mut dash, &mut handle).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

/// Draws the dashboard and handles keys until the user quits.
///
/// Keys are polled every 100 ms. The gauge advances once per second and a
/// refresh is requested each time it wraps, unless one is still running.
async fn run_dashboard<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    dash: &mut Dashboard,
    handle: &mut RefreshHandle,
) -> Result<()> {
    let mut last_tick = Instant::now();
    loop {
        if let Some(result) = handle.try_result() {
            dash.apply(result);
        }

        terminal.draw(|f| ui::draw(f, dash))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            return Ok(())
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= Duration::from_secs(1) {
            last_tick = Instant::now();
            if dash.on_tick() && !dash.refreshing && handle.request() {
                dash.begin_refresh();
            }
        }
    }
}
