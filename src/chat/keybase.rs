//! Keybase chat binding over the `keybase chat api` JSON interface.
//!
//! Requests are written to the child's stdin as one JSON document per line
//! and each is answered by exactly one line on stdout. Live messages come from
//! a second child running `keybase chat api-listen`.

use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::types::{Inbox, ListenEvent, Response, Thread};
use super::{ChatTransport, CommandAdvertisement, Conversation, Message};
use crate::error::ChatError;

/// How to launch the keybase binary.
#[derive(Debug, Clone)]
pub struct KeybaseOptions {
    /// Path or name of the keybase executable
    pub binary: String,
    /// Alternate keybase home directory (`--home`)
    pub home: Option<PathBuf>,
}

struct ApiProcess {
    // Held so the process is killed when the transport is dropped.
    _child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ApiProcess {
    fn spawn(options: &KeybaseOptions, args: &[&str], with_stdin: bool) -> Result<Self, ChatError> {
        let mut cmd = Command::new(&options.binary);
        if let Some(home) = &options.home {
            cmd.arg("--home").arg(home);
        }
        cmd.args(args)
            .stdin(if with_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let command = format!("{} {}", options.binary, args.join(" "));
        let mut child = cmd.spawn().map_err(|source| ChatError::Spawn {
            command: command.clone(),
            source,
        })?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or(ChatError::Closed)?;
        info!(%command, "started chat api process");

        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

/// [`ChatTransport`] backed by the keybase CLI.
pub struct KeybaseChat {
    options: KeybaseOptions,
    api: ApiProcess,
    listener: Option<ApiProcess>,
}

impl KeybaseChat {
    /// Launches `keybase chat api`.
    ///
    /// # Errors
    /// Fails if the process cannot be started.
    pub fn start(options: KeybaseOptions) -> Result<Self, ChatError> {
        let api = ApiProcess::spawn(&options, &["chat", "api"], true)?;
        Ok(Self {
            options,
            api,
            listener: None,
        })
    }

    async fn call<T: DeserializeOwned>(&mut self, request: Value) -> Result<T, ChatError> {
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        debug!(method = %request["method"], "chat api request");

        let stdin = self.api.stdin.as_mut().ok_or(ChatError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        let raw = self
            .api
            .stdout
            .next_line()
            .await?
            .ok_or(ChatError::Closed)?;
        decode_response(&raw)
    }
}

#[async_trait]
impl ChatTransport for KeybaseChat {
    async fn list_conversations(
        &mut self,
        unread_only: bool,
    ) -> Result<Vec<Conversation>, ChatError> {
        let inbox: Inbox = self.call(list_request(unread_only)).await?;
        Ok(inbox.conversations.unwrap_or_default())
    }

    async fn read_messages(
        &mut self,
        conversation_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Message>, ChatError> {
        let thread: Thread = self.call(read_request(conversation_id, unread_only)).await?;

        let mut messages: Vec<Message> = thread
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|holder| {
                if let Some(err) = holder.error {
                    warn!(conversation_id, error = %err, "skipping undecodable message");
                }
                holder.msg
            })
            .filter(|msg| msg.text_body().is_some())
            .collect();
        // The API returns newest first.
        messages.sort_by_key(|msg| msg.id);
        Ok(messages)
    }

    async fn send_message(&mut self, conversation_id: &str, body: &str) -> Result<(), ChatError> {
        let _: IgnoredAny = self.call(send_request(conversation_id, body)).await?;
        Ok(())
    }

    async fn react(
        &mut self,
        conversation_id: &str,
        message_id: u64,
        reaction: &str,
    ) -> Result<(), ChatError> {
        let _: IgnoredAny = self
            .call(reaction_request(conversation_id, message_id, reaction))
            .await?;
        Ok(())
    }

    async fn send_attachment(
        &mut self,
        conversation_id: &str,
        path: &Path,
        title: &str,
    ) -> Result<(), ChatError> {
        let _: IgnoredAny = self
            .call(attach_request(conversation_id, path, title))
            .await?;
        Ok(())
    }

    async fn advertise_commands(
        &mut self,
        commands: &[CommandAdvertisement],
        team_name: Option<&str>,
    ) -> Result<(), ChatError> {
        let _: IgnoredAny = self.call(advertise_request(commands, team_name)).await?;
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<(), ChatError> {
        if self.listener.is_none() {
            self.listener = Some(ApiProcess::spawn(
                &self.options,
                &["chat", "api-listen"],
                false,
            )?);
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<Message>, ChatError> {
        let listener = self.listener.as_mut().ok_or(ChatError::NotSubscribed)?;
        while let Some(line) = listener.stdout.next_line().await? {
            match parse_listen_line(&line) {
                Ok(Some(msg)) => return Ok(Some(msg)),
                Ok(None) => continue,
                Err(err) => warn!(error = %err, "ignoring malformed chat event"),
            }
        }
        Ok(None)
    }
}

fn decode_response<T: DeserializeOwned>(raw: &str) -> Result<T, ChatError> {
    let resp: Response<T> = serde_json::from_str(raw)?;
    if let Some(err) = resp.error {
        return Err(ChatError::Api(format!("{} (code {})", err.message, err.code)));
    }
    resp.result
        .ok_or_else(|| ChatError::Api("response carried neither result nor error".to_string()))
}

/// Returns the text message carried by a listen event, if any.
fn parse_listen_line(line: &str) -> Result<Option<Message>, ChatError> {
    let event: ListenEvent = serde_json::from_str(line)?;
    if event.kind != "chat" {
        return Ok(None);
    }
    Ok(event.msg.filter(|msg| msg.text_body().is_some()))
}

fn list_request(unread_only: bool) -> Value {
    json!({
        "method": "list",
        "params": { "options": { "unread_only": unread_only } }
    })
}

fn read_request(conversation_id: &str, unread_only: bool) -> Value {
    json!({
        "method": "read",
        "params": { "options": {
            "conversation_id": conversation_id,
            "unread_only": unread_only
        } }
    })
}

fn send_request(conversation_id: &str, body: &str) -> Value {
    json!({
        "method": "send",
        "params": { "options": {
            "conversation_id": conversation_id,
            "message": { "body": body }
        } }
    })
}

fn reaction_request(conversation_id: &str, message_id: u64, reaction: &str) -> Value {
    json!({
        "method": "reaction",
        "params": { "options": {
            "conversation_id": conversation_id,
            "message_id": message_id,
            "message": { "body": reaction }
        } }
    })
}

fn attach_request(conversation_id: &str, path: &Path, title: &str) -> Value {
    json!({
        "method": "attach",
        "params": { "options": {
            "conversation_id": conversation_id,
            "filename": path.to_string_lossy(),
            "title": title
        } }
    })
}

fn advertise_request(commands: &[CommandAdvertisement], team_name: Option<&str>) -> Value {
    let advertisement = match team_name {
        Some(team) => json!({ "type": "teamconvs", "team_name": team, "commands": commands }),
        None => json!({ "type": "public", "commands": commands }),
    };
    json!({
        "method": "advertisecommands",
        "params": { "options": { "advertisements": [advertisement] } }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_request() {
        let req = list_request(true);
        assert_eq!(req["method"], "list");
        assert_eq!(req["params"]["options"]["unread_only"], true);
    }

    #[test]
    fn test_send_request_escapes_body() {
        let req = send_request("c1", "```line one\nline \"two\"```");
        let line = serde_json::to_string(&req).unwrap();
        assert!(!line.contains('\n'));
        let back: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            back["params"]["options"]["message"]["body"],
            "```line one\nline \"two\"```"
        );
    }

    #[test]
    fn test_reaction_request() {
        let req = reaction_request("c1", 42, ":+1:");
        assert_eq!(req["method"], "reaction");
        assert_eq!(req["params"]["options"]["message_id"], 42);
        assert_eq!(req["params"]["options"]["message"]["body"], ":+1:");
    }

    #[test]
    fn test_attach_request() {
        let req = attach_request("c1", Path::new("/tmp/graph.png"), "gregord/svcA cpu");
        assert_eq!(req["method"], "attach");
        assert_eq!(req["params"]["options"]["filename"], "/tmp/graph.png");
        assert_eq!(req["params"]["options"]["title"], "gregord/svcA cpu");
    }

    #[test]
    fn test_advertise_request_scopes() {
        let commands = vec![CommandAdvertisement {
            name: "ecslist".to_string(),
            description: "List services".to_string(),
            usage: "[cluster]".to_string(),
        }];
        let public = advertise_request(&commands, None);
        let ad = &public["params"]["options"]["advertisements"][0];
        assert_eq!(ad["type"], "public");
        assert_eq!(ad["commands"][0]["name"], "ecslist");

        let team = advertise_request(&commands, Some("ops"));
        let ad = &team["params"]["options"]["advertisements"][0];
        assert_eq!(ad["type"], "teamconvs");
        assert_eq!(ad["team_name"], "ops");
    }

    #[test]
    fn test_decode_response_error() {
        let err = decode_response::<IgnoredAny>(r#"{"error":{"code":5,"message":"boom"}}"#)
            .unwrap_err();
        assert!(matches!(err, ChatError::Api(msg) if msg.contains("boom")));
    }

    #[test]
    fn test_decode_response_garbage() {
        let err = decode_response::<IgnoredAny>("not json").unwrap_err();
        assert!(matches!(err, ChatError::Decode(_)));
    }

    #[test]
    fn test_parse_listen_line_filters_events() {
        let text = r#"{"type":"chat","msg":{"id":1,"conversation_id":"c1",
            "sender":{"username":"a"},"content":{"type":"text","text":{"body":"!ecslist"}}}}"#;
        let msg = parse_listen_line(text).unwrap().unwrap();
        assert_eq!(msg.id, 1);

        let reaction = r#"{"type":"chat","msg":{"id":2,"content":{"type":"reaction"}}}"#;
        assert!(parse_listen_line(reaction).unwrap().is_none());

        let other = r#"{"type":"wallet","notification":{}}"#;
        assert!(parse_listen_line(other).unwrap().is_none());
    }

    /// Stand-in for the keybase CLI: answers `chat api` requests by method and
    /// replays two events for `chat api-listen`. It exits without answering
    /// `attach`.
    #[cfg(unix)]
    const FAKE_KEYBASE: &str = r#"#!/bin/sh
case "$*" in
  *api-listen*)
    echo '{"type":"wallet","notification":{}}'
    echo '{"type":"chat","msg":{"id":9,"conversation_id":"c1","sender":{"username":"bob"},'\
'"content":{"type":"text","text":{"body":"!ecslist"}}}}'
    exit 0
    ;;
esac
while IFS= read -r line; do
  case "$line" in
    *'"method":"list"'*)
      echo '{"result":{"conversations":[{"id":"c1","unread":true,"channel":{"name":"ops"}}]}}'
      ;;
    *'"method":"read"'*)
      echo '{"result":{"messages":['\
'{"msg":{"id":3,"conversation_id":"c1","content":{"type":"text","text":{"body":"third"}}}},'\
'{"error":"unable to unbox"},'\
'{"msg":{"id":2,"conversation_id":"c1","content":{"type":"reaction"}}},'\
'{"msg":{"id":1,"conversation_id":"c1","content":{"type":"text","text":{"body":"first"}}}}'\
']}}'
      ;;
    *'"method":"send"'*)
      echo '{"result":{"message":"message sent","id":10}}'
      ;;
    *'"method":"reaction"'*)
      echo '{"error":{"code":2,"message":"no such message"}}'
      ;;
    *)
      exit 0
      ;;
  esac
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_keybase_chat_against_fake_cli() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("keybase");
        std::fs::write(&script, FAKE_KEYBASE).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut chat = KeybaseChat::start(KeybaseOptions {
            binary: script.to_string_lossy().into_owned(),
            home: None,
        })
        .unwrap();

        let conversations = chat.list_conversations(true).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, "c1");

        // Newest-first input comes back oldest first, text only.
        let messages = chat.read_messages("c1", true).await.unwrap();
        let ids: Vec<u64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(messages[0].text_body(), Some("first"));

        chat.send_message("c1", "```ok```").await.unwrap();

        let err = chat.react("c1", 42, ":+1:").await.unwrap_err();
        assert!(matches!(err, ChatError::Api(msg) if msg.contains("no such message")));

        assert!(matches!(
            chat.next_message().await.unwrap_err(),
            ChatError::NotSubscribed
        ));
        chat.subscribe().await.unwrap();
        let live = chat.next_message().await.unwrap().unwrap();
        assert_eq!(live.id, 9);
        assert_eq!(live.text_body(), Some("!ecslist"));
        assert!(chat.next_message().await.unwrap().is_none());

        let err = chat
            .send_attachment("c1", Path::new("/tmp/graph.png"), "gregord/svcA cpu")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Closed));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = KeybaseChat::start(KeybaseOptions {
            binary: "/nonexistent/keybase".to_string(),
            home: None,
        })
        .err()
        .unwrap();
        assert!(matches!(err, ChatError::Spawn { .. }));
    }
}
