use crate::error::ArchiveError;
use crate::slack::{ChannelEntry, ChatApi};
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const CHANNEL_PAGE_LIMIT: &str = "200";

pub struct SlackClient {
    client: Client,
    api_base: String,
    token: String,
    history_limit: u32,
}

impl SlackClient {
    pub fn new(api_base: &str, token: &str, history_limit: u32, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build slack http client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            history_limit,
        })
    }

    fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{method}", self.api_base);
        debug!(method, "slack api call");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .map_err(|err| ArchiveError::chat_api(method, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::chat_api(method, format!("http status {status}")).into());
        }

        let json: Value = response
            .json()
            .map_err(|err| ArchiveError::chat_api(method, format!("invalid json: {err}")))?;
        if json.get("ok").and_then(Value::as_bool) != Some(true) {
            let reason = json
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(ArchiveError::chat_api(method, reason).into());
        }
        Ok(json)
    }
}

fn messages_of(method: &str, json: &Value) -> Result<Vec<Value>> {
    json.get("messages")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ArchiveError::chat_api(method, "response missing `messages`").into())
}

fn next_cursor(json: &Value) -> Option<String> {
    json.get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToOwned::to_owned)
}

impl ChatApi for SlackClient {
    fn list_channels(&self) -> Result<Vec<ChannelEntry>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![("limit", CHANNEL_PAGE_LIMIT)];
            if let Some(c) = cursor.as_deref() {
                params.push(("cursor", c));
            }
            let json = self.call("conversations.list", &params)?;
            let channels = json
                .get("channels")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    ArchiveError::chat_api("conversations.list", "response missing `channels`")
                })?;
            for channel in channels {
                let name = channel.get("name").and_then(Value::as_str);
                let id = channel.get("id").and_then(Value::as_str);
                if let (Some(name), Some(id)) = (name, id) {
                    out.push(ChannelEntry {
                        name: name.to_string(),
                        id: id.to_string(),
                    });
                }
            }

            match next_cursor(&json) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    fn get_history(&self, channel_id: &str) -> Result<Vec<Value>> {
        let limit = self.history_limit.to_string();
        let json = self.call(
            "conversations.history",
            &[("channel", channel_id), ("limit", &limit)],
        )?;
        messages_of("conversations.history", &json)
    }

    fn get_thread_replies(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<Value>> {
        let json = self.call(
            "conversations.replies",
            &[("channel", channel_id), ("ts", thread_ts)],
        )?;
        messages_of("conversations.replies", &json)
    }

    fn get_user(&self, user_id: &str) -> Result<String> {
        let json = self.call("users.info", &[("user", user_id)])?;
        json.get("user")
            .and_then(|u| u.get("name"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| ArchiveError::chat_api("users.info", "response missing `user.name`").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> SlackClient {
        SlackClient::new(&server.url(), "xoxb-test", 50, 5).expect("client")
    }

    #[test]
    fn list_channels_follows_cursor_pages() {
        let mut server = mockito::Server::new();
        let first = server
            .mock("GET", Matcher::Regex(r"^/conversations\.list".into()))
            .match_query(Matcher::Exact("limit=200".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": true,
                    "channels": [{"name": "general", "id": "C1"}],
                    "response_metadata": {"next_cursor": "page2"}
                })
                .to_string(),
            )
            .create();
        let second = server
            .mock("GET", Matcher::Regex(r"^/conversations\.list".into()))
            .match_query(Matcher::Exact("limit=200&cursor=page2".into()))
            .match_header("authorization", "Bearer xoxb-test")
            .with_status(200)
            .with_body(
                json!({
                    "ok": true,
                    "channels": [{"name": "random", "id": "C2"}],
                    "response_metadata": {"next_cursor": ""}
                })
                .to_string(),
            )
            .create();

        let channels = client_for(&server).list_channels().expect("channels");
        assert_eq!(
            channels,
            vec![
                ChannelEntry { name: "general".into(), id: "C1".into() },
                ChannelEntry { name: "random".into(), id: "C2".into() },
            ]
        );
        first.assert();
        second.assert();
    }

    #[test]
    fn platform_error_surfaces_as_chat_api_error() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", Matcher::Regex(r"^/conversations\.history".into()))
            .with_status(200)
            .with_body(json!({"ok": false, "error": "channel_not_found"}).to_string())
            .create();

        let err = client_for(&server).get_history("C404").expect_err("error");
        let kind = err.downcast_ref::<ArchiveError>().expect("typed");
        assert!(kind.to_string().contains("channel_not_found"));
    }

    #[test]
    fn history_passes_channel_and_limit() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("GET", Matcher::Regex(r"^/conversations\.history".into()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("channel".into(), "C1".into()),
                Matcher::UrlEncoded("limit".into(), "50".into()),
            ]))
            .with_status(200)
            .with_body(json!({"ok": true, "messages": [{"ts": "100.0", "text": "hi"}]}).to_string())
            .create();

        let messages = client_for(&server).get_history("C1").expect("history");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["text"], "hi");
        m.assert();
    }

    #[test]
    fn rate_limited_user_lookup_is_an_error() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", Matcher::Regex(r"^/users\.info".into()))
            .with_status(429)
            .create();

        assert!(client_for(&server).get_user("U1").is_err());
    }
}
