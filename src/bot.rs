//! Chat command bot.
//!
//! Messages move through parse → dispatch → reply one at a time; a message is
//! fully answered before the next one is looked at. Problems with a command
//! or with the cluster query are answered in the conversation. Only chat
//! transport failures end the loop.

use anyhow::{Context, Result};
use std::fmt::Display;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aws::ClusterSource;
use crate::chat::{ChatTransport, CommandAdvertisement, Message};
use crate::error::{ChatError, CommandError};
use crate::model::GraphMetric;
use crate::output::ServiceFormatter;

pub const LIST_COMMAND: &str = "!ecslist";
pub const GRAPH_COMMAND: &str = "!ecssvcgraph";

/// Trailing window plotted by service graphs.
pub const GRAPH_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

const REACTION_ACK: &str = ":eyes:";
const REACTION_OK: &str = ":+1:";
const REACTION_FAIL: &str = ":-1:";

/// A recognized chat command with its arguments resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List {
        cluster: String,
    },
    ServiceGraph {
        cluster: String,
        service: String,
        metric: GraphMetric,
    },
}

/// Parses a message body.
///
/// Returns `None` when the body is not a bot command, and `Some(Err(_))` when
/// it is one but its arguments are wrong.
pub fn parse_command(body: &str, default_cluster: &str) -> Option<Result<Command, CommandError>> {
    let mut tokens = body.split_whitespace();
    let command = tokens.next()?;
    let args: Vec<&str> = tokens.collect();

    match command {
        LIST_COMMAND => Some(match args.as_slice() {
            [] => Ok(Command::List {
                cluster: default_cluster.to_string(),
            }),
            [cluster] => Ok(Command::List {
                cluster: cluster.to_string(),
            }),
            _ => Err(CommandError::ListUsage),
        }),
        GRAPH_COMMAND => Some(match args.as_slice() {
            [cluster, service, metric] => metric.parse().map(|metric| Command::ServiceGraph {
                cluster: cluster.to_string(),
                service: service.to_string(),
                metric,
            }),
            _ => Err(CommandError::GraphUsage),
        }),
        _ => None,
    }
}

/// One matched command and where to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub conversation_id: String,
    pub message_id: u64,
    pub author: String,
    pub command: Command,
}

/// Commands published to chat clients at startup.
pub fn advertisements() -> Vec<CommandAdvertisement> {
    vec![
        CommandAdvertisement {
            name: LIST_COMMAND.trim_start_matches('!').to_string(),
            description: "List services and tasks of an ECS cluster".to_string(),
            usage: "[cluster]".to_string(),
        },
        CommandAdvertisement {
            name: GRAPH_COMMAND.trim_start_matches('!').to_string(),
            description: "Graph a service's CPU or memory over the last day".to_string(),
            usage: "<cluster> <service> <cpu|mem>".to_string(),
        },
    ]
}

#[derive(Debug, Clone)]
pub struct BotOptions {
    /// Cluster used by `!ecslist` without arguments
    pub default_cluster: String,
    /// Truncate ARNs in list replies
    pub short_arns: bool,
    /// Sleep between polls in polling mode
    pub poll_interval: Duration,
}

pub struct BotServer<C, S> {
    chat: C,
    source: S,
    opts: BotOptions,
    formatter: ServiceFormatter,
}

impl<C: ChatTransport, S: ClusterSource> BotServer<C, S> {
    pub fn new(chat: C, source: S, opts: BotOptions) -> Self {
        let formatter = ServiceFormatter::basic(opts.short_arns);
        Self {
            chat,
            source,
            opts,
            formatter,
        }
    }

    /// Publishes the command list.
    ///
    /// # Errors
    /// Fails if the chat transport fails.
    pub async fn advertise(&mut self, team_name: Option<&str>) -> Result<()> {
        self.chat
            .advertise_commands(&advertisements(), team_name)
            .await
            .context("failed to advertise commands")?;
        Ok(())
    }

    /// Polls for unread messages forever.
    ///
    /// # Errors
    /// Returns when the chat transport fails.
    pub async fn run_polling(&mut self) -> Result<()> {
        info!(interval = ?self.opts.poll_interval, "starting chat poll loop");
        loop {
            let handled = self.poll_once().await?;
            if handled > 0 {
                debug!(handled, "poll cycle finished");
            }
            tokio::time::sleep(self.opts.poll_interval).await;
        }
    }

    /// Answers messages from a live subscription until the stream ends.
    ///
    /// # Errors
    /// Returns when the chat transport fails.
    pub async fn run_listening(&mut self) -> Result<()> {
        self.chat
            .subscribe()
            .await
            .context("failed to subscribe to chat messages")?;
        info!("listening for chat messages");
        while let Some(msg) = self.chat.next_message().await? {
            self.handle_message(&msg.conversation_id, &msg).await?;
        }
        anyhow::bail!("chat message stream ended")
    }

    /// Reads every unread conversation once and answers the commands found.
    /// Returns the number of commands handled.
    ///
    /// # Errors
    /// Fails if listing, reading or replying through the chat transport fails.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let conversations = self
            .chat
            .list_conversations(true)
            .await
            .context("failed to list conversations")?;

        let mut handled = 0;
        for conv in conversations {
            let messages = self
                .chat
                .read_messages(&conv.id, true)
                .await
                .with_context(|| format!("failed to read conversation {}", conv.id))?;
            for msg in &messages {
                if self.handle_message(&conv.id, msg).await? {
                    handled += 1;
                }
            }
        }
        Ok(handled)
    }

    /// Parses and answers a single message. Returns whether it was a command.
    ///
    /// # Errors
    /// Fails only if replying through the chat transport fails.
    pub async fn handle_message(&mut self, conversation_id: &str, msg: &Message) -> Result<bool> {
        let Some(body) = msg.text_body() else {
            return Ok(false);
        };
        let Some(parsed) = parse_command(body, &self.opts.default_cluster) else {
            return Ok(false);
        };

        match parsed {
            Ok(command) => {
                let spec = RunSpec {
                    conversation_id: conversation_id.to_string(),
                    message_id: msg.id,
                    author: msg.sender.username.clone(),
                    command,
                };
                info!(
                    conversation_id,
                    author = %spec.author,
                    command = ?spec.command,
                    "dispatching command"
                );
                self.dispatch(&spec).await?;
            }
            Err(err) => {
                info!(
                    conversation_id,
                    author = %msg.sender.username,
                    error = %err,
                    "rejected command"
                );
                self.reply_error(conversation_id, msg.id, &err).await?;
            }
        }
        Ok(true)
    }

    async fn dispatch(&mut self, spec: &RunSpec) -> Result<()> {
        self.chat
            .react(&spec.conversation_id, spec.message_id, REACTION_ACK)
            .await?;

        let outcome = match &spec.command {
            Command::List { cluster } => self.run_list(spec, cluster).await?,
            Command::ServiceGraph {
                cluster,
                service,
                metric,
            } => self.run_graph(spec, cluster, service, *metric).await?,
        };

        match outcome {
            Ok(()) => {
                self.chat
                    .react(&spec.conversation_id, spec.message_id, REACTION_OK)
                    .await?;
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(conversation_id = %spec.conversation_id, error = %message, "command failed");
                self.reply_error(&spec.conversation_id, spec.message_id, message)
                    .await?;
            }
        }
        Ok(())
    }

    /// Outer error: chat transport failure. Inner error: query failure to
    /// report back to the conversation.
    async fn run_list(&mut self, spec: &RunSpec, cluster: &str) -> Result<Result<()>> {
        let rendered = self
            .source
            .list_services(cluster)
            .await
            .with_context(|| format!("failed to list services for cluster {cluster}"))
            .and_then(|services| {
                let mut out = Vec::new();
                self.formatter.display_services(&services, &mut out)?;
                Ok(String::from_utf8_lossy(&out).into_owned())
            });

        match rendered {
            Ok(text) => {
                let sent = self
                    .chat
                    .send_message(&spec.conversation_id, &format!("```{text}```"))
                    .await;
                rejected_as_reply(sent, "failed to send service list")
            }
            Err(err) => Ok(Err(err)),
        }
    }

    async fn run_graph(
        &mut self,
        spec: &RunSpec,
        cluster: &str,
        service: &str,
        metric: GraphMetric,
    ) -> Result<Result<()>> {
        let image = match self
            .source
            .service_graph(cluster, service, metric, GRAPH_WINDOW)
            .await
        {
            Ok(image) => image,
            Err(err) => return Ok(Err(err.context("failed to get graph"))),
        };

        let file = match write_temp_png(&image) {
            Ok(file) => file,
            Err(err) => return Ok(Err(err)),
        };

        let title = format!("{cluster}/{service} {metric}");
        let sent = self
            .chat
            .send_attachment(&spec.conversation_id, file.path(), &title)
            .await;
        rejected_as_reply(sent, "failed to send graph attachment")
    }

    async fn reply_error(
        &mut self,
        conversation_id: &str,
        message_id: u64,
        err: impl Display,
    ) -> Result<()> {
        self.chat
            .react(conversation_id, message_id, REACTION_FAIL)
            .await?;
        self.chat
            .send_message(conversation_id, &err.to_string())
            .await?;
        Ok(())
    }
}

/// Splits a reply failure: a request the chat service refused is reported in
/// the conversation, anything else means the transport is gone.
fn rejected_as_reply(sent: Result<(), ChatError>, context: &'static str) -> Result<Result<()>> {
    match sent {
        Ok(()) => Ok(Ok(())),
        Err(err @ ChatError::Api(_)) => Ok(Err(anyhow::Error::new(err).context(context))),
        Err(err) => Err(anyhow::Error::new(err).context(context)),
    }
}

fn write_temp_png(image: &[u8]) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("ecssvcgraph-")
        .suffix(".png")
        .tempfile()
        .context("failed to create graph file")?;
    file.write_all(image).context("failed to write graph file")?;
    file.flush().context("failed to write graph file")?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{Content, Sender, Text};
    use crate::chat::Conversation;
    use crate::model::{Service, ServiceMetrics};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum ChatCall {
        Send(String, String),
        React(String, u64, String),
        Attach(String, String, bool),
    }

    #[derive(Default)]
    struct FakeChat {
        conversations: Vec<Conversation>,
        messages: Vec<Message>,
        live: VecDeque<Message>,
        fail_attach: bool,
        reject_fenced: bool,
        closed: bool,
        calls: Vec<ChatCall>,
    }

    #[async_trait]
    impl ChatTransport for FakeChat {
        async fn list_conversations(
            &mut self,
            _unread_only: bool,
        ) -> Result<Vec<Conversation>, ChatError> {
            Ok(self.conversations.clone())
        }

        async fn read_messages(
            &mut self,
            conversation_id: &str,
            _unread_only: bool,
        ) -> Result<Vec<Message>, ChatError> {
            Ok(self
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect())
        }

        async fn send_message(
            &mut self,
            conversation_id: &str,
            body: &str,
        ) -> Result<(), ChatError> {
            self.calls
                .push(ChatCall::Send(conversation_id.to_string(), body.to_string()));
            if self.closed {
                return Err(ChatError::Closed);
            }
            if self.reject_fenced && body.starts_with("```") {
                return Err(ChatError::Api("message too long".to_string()));
            }
            Ok(())
        }

        async fn react(
            &mut self,
            conversation_id: &str,
            message_id: u64,
            reaction: &str,
        ) -> Result<(), ChatError> {
            self.calls.push(ChatCall::React(
                conversation_id.to_string(),
                message_id,
                reaction.to_string(),
            ));
            Ok(())
        }

        async fn send_attachment(
            &mut self,
            conversation_id: &str,
            path: &Path,
            title: &str,
        ) -> Result<(), ChatError> {
            self.calls.push(ChatCall::Attach(
                conversation_id.to_string(),
                title.to_string(),
                path.exists(),
            ));
            if self.fail_attach {
                return Err(ChatError::Api("upload rejected".to_string()));
            }
            Ok(())
        }

        async fn advertise_commands(
            &mut self,
            _commands: &[CommandAdvertisement],
            _team_name: Option<&str>,
        ) -> Result<(), ChatError> {
            Ok(())
        }

        async fn subscribe(&mut self) -> Result<(), ChatError> {
            Ok(())
        }

        async fn next_message(&mut self) -> Result<Option<Message>, ChatError> {
            Ok(self.live.pop_front())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Query {
        List(String),
        Graph(String, String, GraphMetric, Duration),
    }

    #[derive(Clone, Default)]
    struct FakeSource {
        queries: Arc<Mutex<Vec<Query>>>,
        fail: bool,
    }

    impl FakeSource {
        fn queries(&self) -> Vec<Query> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClusterSource for FakeSource {
        async fn list_services(&self, cluster: &str) -> Result<Vec<Service>> {
            self.queries
                .lock()
                .unwrap()
                .push(Query::List(cluster.to_string()));
            if self.fail {
                anyhow::bail!("AccessDenied");
            }
            Ok(vec![Service {
                name: "gregord-api".to_string(),
                arn: "arn:aws:ecs:us-east-1:1:service/gregord/gregord-api".to_string(),
                running_count: 2,
                pending_count: 0,
                task_definition: "arn:aws:ecs:us-east-1:1:task-definition/gregord-api:3"
                    .to_string(),
                metrics: ServiceMetrics {
                    cpu: 12.5,
                    memory: 30.0,
                },
                tasks: vec![],
            }])
        }

        async fn service_graph(
            &self,
            cluster: &str,
            service: &str,
            metric: GraphMetric,
            window: Duration,
        ) -> Result<Vec<u8>> {
            self.queries.lock().unwrap().push(Query::Graph(
                cluster.to_string(),
                service.to_string(),
                metric,
                window,
            ));
            if self.fail {
                anyhow::bail!("throttled");
            }
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    fn text_message(id: u64, conversation_id: &str, body: &str) -> Message {
        Message {
            id,
            conversation_id: conversation_id.to_string(),
            sender: Sender {
                username: "alice".to_string(),
                device_name: String::new(),
            },
            content: Content {
                kind: "text".to_string(),
                text: Some(Text {
                    body: body.to_string(),
                }),
            },
            ..Default::default()
        }
    }

    fn options() -> BotOptions {
        BotOptions {
            default_cluster: "gregord".to_string(),
            short_arns: true,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn bot(chat: FakeChat, source: FakeSource) -> BotServer<FakeChat, FakeSource> {
        BotServer::new(chat, source, options())
    }

    fn react(id: u64, reaction: &str) -> ChatCall {
        ChatCall::React("c1".to_string(), id, reaction.to_string())
    }

    #[test]
    fn test_parse_list_default_cluster() {
        assert_eq!(
            parse_command("!ecslist", "gregord"),
            Some(Ok(Command::List {
                cluster: "gregord".to_string()
            }))
        );
    }

    #[test]
    fn test_parse_list_explicit_cluster() {
        assert_eq!(
            parse_command("!ecslist kbfs", "gregord"),
            Some(Ok(Command::List {
                cluster: "kbfs".to_string()
            }))
        );
    }

    #[test]
    fn test_parse_list_too_many_args() {
        assert_eq!(
            parse_command("!ecslist a b", "gregord"),
            Some(Err(CommandError::ListUsage))
        );
    }

    #[test]
    fn test_parse_graph() {
        assert_eq!(
            parse_command("!ecssvcgraph gregord svcA cpu", "x"),
            Some(Ok(Command::ServiceGraph {
                cluster: "gregord".to_string(),
                service: "svcA".to_string(),
                metric: GraphMetric::Cpu,
            }))
        );
    }

    #[test]
    fn test_parse_graph_unknown_metric() {
        assert_eq!(
            parse_command("!ecssvcgraph gregord svcA disk", "x"),
            Some(Err(CommandError::UnknownMetric("disk".to_string())))
        );
    }

    #[test]
    fn test_parse_graph_wrong_arity() {
        assert_eq!(
            parse_command("!ecssvcgraph gregord svcA", "x"),
            Some(Err(CommandError::GraphUsage))
        );
        assert_eq!(
            parse_command("!ecssvcgraph gregord svcA cpu extra", "x"),
            Some(Err(CommandError::GraphUsage))
        );
    }

    #[test]
    fn test_parse_ignores_other_messages() {
        assert_eq!(parse_command("hello there", "gregord"), None);
        assert_eq!(parse_command("", "gregord"), None);
        assert_eq!(parse_command("!ecslisting", "gregord"), None);
        assert_eq!(parse_command("please !ecslist", "gregord"), None);
    }

    #[test]
    fn test_advertisements_strip_prefix() {
        let ads = advertisements();
        assert_eq!(ads[0].name, "ecslist");
        assert_eq!(ads[1].name, "ecssvcgraph");
    }

    #[tokio::test]
    async fn test_list_uses_default_cluster_and_replies() {
        let source = FakeSource::default();
        let mut bot = bot(FakeChat::default(), source.clone());

        let handled = bot
            .handle_message("c1", &text_message(5, "c1", "!ecslist"))
            .await
            .unwrap();

        assert!(handled);
        assert_eq!(source.queries(), vec![Query::List("gregord".to_string())]);
        let calls = &bot.chat.calls;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], react(5, REACTION_ACK));
        match &calls[1] {
            ChatCall::Send(conv, body) => {
                assert_eq!(conv, "c1");
                assert!(body.starts_with("```Name"));
                assert!(body.ends_with("```"));
                assert!(body.contains("gregord-api     2"));
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(calls[2], react(5, REACTION_OK));
    }

    #[tokio::test]
    async fn test_list_explicit_cluster() {
        let source = FakeSource::default();
        let mut bot = bot(FakeChat::default(), source.clone());
        bot.handle_message("c1", &text_message(1, "c1", "!ecslist kbfs"))
            .await
            .unwrap();
        assert_eq!(source.queries(), vec![Query::List("kbfs".to_string())]);
    }

    #[tokio::test]
    async fn test_list_bad_arity_replies_error_without_query() {
        let source = FakeSource::default();
        let mut bot = bot(FakeChat::default(), source.clone());

        let handled = bot
            .handle_message("c1", &text_message(9, "c1", "!ecslist a b"))
            .await
            .unwrap();

        assert!(handled);
        assert!(source.queries().is_empty());
        assert_eq!(
            bot.chat.calls,
            vec![
                react(9, REACTION_FAIL),
                ChatCall::Send("c1".to_string(), CommandError::ListUsage.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_query_failure_is_reported() {
        let source = FakeSource {
            fail: true,
            ..Default::default()
        };
        let mut bot = bot(FakeChat::default(), source);

        bot.handle_message("c1", &text_message(2, "c1", "!ecslist"))
            .await
            .unwrap();

        let calls = &bot.chat.calls;
        assert_eq!(calls[0], react(2, REACTION_ACK));
        assert_eq!(calls[1], react(2, REACTION_FAIL));
        match &calls[2] {
            ChatCall::Send(_, body) => {
                assert!(body.contains("failed to list services for cluster gregord"));
                assert!(body.contains("AccessDenied"));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_graph_attaches_24h_cpu_graph() {
        let source = FakeSource::default();
        let mut bot = bot(FakeChat::default(), source.clone());

        bot.handle_message("c1", &text_message(3, "c1", "!ecssvcgraph gregord svcA cpu"))
            .await
            .unwrap();

        assert_eq!(
            source.queries(),
            vec![Query::Graph(
                "gregord".to_string(),
                "svcA".to_string(),
                GraphMetric::Cpu,
                Duration::from_secs(24 * 3600),
            )]
        );
        assert_eq!(
            bot.chat.calls,
            vec![
                react(3, REACTION_ACK),
                ChatCall::Attach("c1".to_string(), "gregord/svcA cpu".to_string(), true),
                react(3, REACTION_OK),
            ]
        );
    }

    #[tokio::test]
    async fn test_graph_unknown_metric_no_request() {
        let source = FakeSource::default();
        let mut bot = bot(FakeChat::default(), source.clone());

        bot.handle_message("c1", &text_message(4, "c1", "!ecssvcgraph gregord svcA disk"))
            .await
            .unwrap();

        assert!(source.queries().is_empty());
        assert_eq!(bot.chat.calls[0], react(4, REACTION_FAIL));
        match &bot.chat.calls[1] {
            ChatCall::Send(_, body) => assert!(body.contains("unknown metric: disk")),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_graph_fetch_failure_is_reported() {
        let source = FakeSource {
            fail: true,
            ..Default::default()
        };
        let mut bot = bot(FakeChat::default(), source);

        bot.handle_message("c1", &text_message(6, "c1", "!ecssvcgraph gregord svcA mem"))
            .await
            .unwrap();

        let calls = &bot.chat.calls;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], react(6, REACTION_FAIL));
        assert!(matches!(
            &calls[2],
            ChatCall::Send(_, body) if body.contains("failed to get graph")
        ));
    }

    #[tokio::test]
    async fn test_graph_attachment_failure_is_reported() {
        let chat = FakeChat {
            fail_attach: true,
            ..Default::default()
        };
        let mut bot = bot(chat, FakeSource::default());

        let handled = bot
            .handle_message("c1", &text_message(7, "c1", "!ecssvcgraph gregord svcA cpu"))
            .await
            .unwrap();

        assert!(handled);
        let calls = &bot.chat.calls;
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2], react(7, REACTION_FAIL));
        assert!(matches!(&calls[3], ChatCall::Send(_, body) if body.contains("upload rejected")));
    }

    #[tokio::test]
    async fn test_non_command_is_ignored() {
        let source = FakeSource::default();
        let mut bot = bot(FakeChat::default(), source.clone());
        let handled = bot
            .handle_message("c1", &text_message(1, "c1", "good morning"))
            .await
            .unwrap();
        assert!(!handled);
        assert!(bot.chat.calls.is_empty());
        assert!(source.queries().is_empty());
    }

    #[tokio::test]
    async fn test_poll_once_handles_messages_in_order() {
        let chat = FakeChat {
            conversations: vec![
                Conversation {
                    id: "c1".to_string(),
                    unread: true,
                    ..Default::default()
                },
                Conversation {
                    id: "c2".to_string(),
                    unread: true,
                    ..Default::default()
                },
            ],
            messages: vec![
                text_message(1, "c1", "!ecslist"),
                text_message(2, "c1", "unrelated"),
                text_message(3, "c2", "!ecslist kbfs"),
            ],
            ..Default::default()
        };
        let source = FakeSource::default();
        let mut bot = bot(chat, source.clone());

        let handled = bot.poll_once().await.unwrap();

        assert_eq!(handled, 2);
        assert_eq!(
            source.queries(),
            vec![
                Query::List("gregord".to_string()),
                Query::List("kbfs".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_run_listening_ends_with_stream() {
        let chat = FakeChat {
            live: VecDeque::from(vec![
                text_message(1, "c1", "!ecslist"),
                text_message(2, "c1", "!ecslist a b"),
            ]),
            ..Default::default()
        };
        let source = FakeSource::default();
        let mut bot = bot(chat, source.clone());

        let err = bot.run_listening().await.unwrap_err();

        assert!(err.to_string().contains("stream ended"));
        assert_eq!(source.queries(), vec![Query::List("gregord".to_string())]);
        assert_eq!(
            bot.chat.calls.last(),
            Some(&ChatCall::Send("c1".to_string(), CommandError::ListUsage.to_string()))
        );
    }

    #[tokio::test]
    async fn test_rejected_list_reply_is_reported_and_polling_continues() {
        let chat = FakeChat {
            conversations: vec![Conversation {
                id: "c1".to_string(),
                unread: true,
                ..Default::default()
            }],
            messages: vec![
                text_message(1, "c1", "!ecslist"),
                text_message(2, "c1", "!ecslist a b"),
            ],
            reject_fenced: true,
            ..Default::default()
        };
        let mut bot = bot(chat, FakeSource::default());

        let handled = bot.poll_once().await.unwrap();

        assert_eq!(handled, 2);
        let calls = &bot.chat.calls;
        assert_eq!(calls[0], react(1, REACTION_ACK));
        assert!(matches!(&calls[1], ChatCall::Send(_, body) if body.starts_with("```")));
        assert_eq!(calls[2], react(1, REACTION_FAIL));
        match &calls[3] {
            ChatCall::Send(_, body) => {
                assert!(body.contains("failed to send service list"));
                assert!(body.contains("message too long"));
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(calls[4], react(2, REACTION_FAIL));
    }

    #[tokio::test]
    async fn test_closed_transport_during_list_reply_is_fatal() {
        let chat = FakeChat {
            closed: true,
            ..Default::default()
        };
        let mut bot = bot(chat, FakeSource::default());

        let err = bot
            .handle_message("c1", &text_message(4, "c1", "!ecslist"))
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("closed"));
        assert!(!bot.chat.calls.contains(&react(4, REACTION_FAIL)));
    }
}
