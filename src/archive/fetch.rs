use crate::archive::timestamp::Timestamp;
use crate::error::ArchiveError;
use crate::slack::ChatApi;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Replies for every distinct thread in a history window, keyed and ordered
/// by the thread's originating `ts`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadBundle {
    pub threads: BTreeMap<Timestamp, Vec<Value>>,
}

impl ThreadBundle {
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Payload for the replies snapshot: one array per thread.
    pub fn as_snapshot_messages(&self) -> Vec<&Vec<Value>> {
        self.threads.values().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub history: Vec<Value>,
    pub threads: ThreadBundle,
}

fn distinct_thread_ts(history: &[Value]) -> Result<Vec<Timestamp>> {
    let mut seen = BTreeMap::new();
    for message in history {
        let Some(raw) = message.get("thread_ts").filter(|v| !v.is_null()) else {
            continue;
        };
        let ts = Timestamp::from_json(raw).ok_or_else(|| {
            ArchiveError::chat_api(
                "conversations.history",
                format!("message has unparsable thread_ts {raw}"),
            )
        })?;
        seen.entry(ts).or_insert(());
    }
    Ok(seen.into_keys().collect())
}

pub fn fetch(api: &dyn ChatApi, channel_id: &str) -> Result<FetchResult> {
    let history = api.get_history(channel_id)?;
    let mut threads = ThreadBundle::default();
    for thread_ts in distinct_thread_ts(&history)? {
        let replies = api.get_thread_replies(channel_id, thread_ts.as_str())?;
        debug!(channel_id, thread_ts = %thread_ts, replies = replies.len(), "fetched thread");
        threads.threads.insert(thread_ts, replies);
    }
    if threads.is_empty() {
        debug!(channel_id, "no threads in window");
    }
    Ok(FetchResult { history, threads })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::ChannelEntry;
    use serde_json::json;
    use std::cell::RefCell;

    struct FakeHistory {
        history: Vec<Value>,
        fail_replies: bool,
        reply_calls: RefCell<Vec<String>>,
    }

    impl ChatApi for FakeHistory {
        fn list_channels(&self) -> Result<Vec<ChannelEntry>> {
            Ok(Vec::new())
        }

        fn get_history(&self, _channel_id: &str) -> Result<Vec<Value>> {
            Ok(self.history.clone())
        }

        fn get_thread_replies(&self, _channel_id: &str, thread_ts: &str) -> Result<Vec<Value>> {
            self.reply_calls.borrow_mut().push(thread_ts.to_string());
            if self.fail_replies {
                return Err(ArchiveError::chat_api("conversations.replies", "thread_not_found").into());
            }
            Ok(vec![json!({"ts": thread_ts, "text": "parent"}), json!({"ts": "999.1", "thread_ts": thread_ts})])
        }

        fn get_user(&self, _user_id: &str) -> Result<String> {
            Ok("nobody".to_string())
        }
    }

    fn fake(history: Vec<Value>, fail_replies: bool) -> FakeHistory {
        FakeHistory {
            history,
            fail_replies,
            reply_calls: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn fetches_each_distinct_thread_once() {
        let api = fake(
            vec![
                json!({"ts": "300.0", "thread_ts": "100.5"}),
                json!({"ts": "200.0"}),
                json!({"ts": "100.5", "thread_ts": "100.5"}),
                json!({"ts": "400.0", "thread_ts": "350.0"}),
                json!({"ts": "401.0", "thread_ts": null}),
            ],
            false,
        );
        let result = fetch(&api, "C1").expect("fetch");

        assert_eq!(result.history.len(), 5);
        assert_eq!(*api.reply_calls.borrow(), vec!["100.5", "350.0"]);
        assert_eq!(result.threads.len(), 2);
        assert_eq!(result.threads.as_snapshot_messages()[0].len(), 2);
    }

    #[test]
    fn history_without_threads_makes_no_reply_calls() {
        let api = fake(vec![json!({"ts": "1.0"})], false);
        let result = fetch(&api, "C1").expect("fetch");
        assert!(result.threads.is_empty());
        assert!(api.reply_calls.borrow().is_empty());
    }

    #[test]
    fn replies_failure_fails_the_fetch() {
        let api = fake(vec![json!({"ts": "1.0", "thread_ts": "1.0"})], true);
        let err = fetch(&api, "C1").expect_err("should fail");
        assert!(err.to_string().contains("conversations.replies"));
    }

    #[test]
    fn unparsable_thread_ts_is_rejected() {
        let api = fake(vec![json!({"ts": "1.0", "thread_ts": "soon"})], false);
        assert!(fetch(&api, "C1").is_err());
    }
}
