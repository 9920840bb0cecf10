//! Best-effort Slack webhook notification. Never fails the message handler
//! it's called from: a missing or misconfigured webhook, or a network
//! error, is logged and swallowed.

use std::time::Duration;

use nowcast_protocol::{Message, SlackNotifications};
use tracing::debug;

/// Bound on the Slack POST so a flaky webhook can never stall the
/// manager's single-threaded message loop for long.
const SLACK_POST_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a notification for `msg` to every webhook whose worker list
/// includes `msg.source`, if any. Entirely best-effort: constructs its own
/// short-timeout client per call rather than threading one through, since
/// this is already the exceptional, infrequent path.
pub fn notify(notifications: &SlackNotifications, msg: &Message) {
    if notifications.is_empty() {
        return;
    }

    let mut text = format!("{}: {}", msg.source, msg.msg_type);
    if let Some(url) = &notifications.website_log_url {
        text.push_str(&format!("\nLog: {url}"));
    }
    if let Some(url) = &notifications.website_checklist_url {
        text.push_str(&format!("\nChecklist: {url}"));
    }

    for (envvar, workers) in &notifications.webhooks {
        if !workers.iter().any(|w| w == &msg.source) {
            continue;
        }
        let Ok(webhook_url) = std::env::var(envvar) else {
            debug!(envvar, "slack notification environment variable not found");
            continue;
        };
        post(&webhook_url, &text);
    }
}

fn post(webhook_url: &str, text: &str) {
    let client = match reqwest::blocking::Client::builder()
        .timeout(SLACK_POST_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "failed to build slack http client");
            return;
        }
    };

    let body = serde_json::json!({ "text": text });
    if let Err(e) = client.post(webhook_url).json(&body).send() {
        debug!(error = %e, "slack notification post failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn empty_config_sends_nothing() {
        let notifications = SlackNotifications::default();
        let msg = Message::new("sleep", "success", nowcast_protocol::Value::Null);
        // No assertion beyond "doesn't panic" -- there is no webhook to hit.
        notify(&notifications, &msg);
    }

    #[test]
    fn unrelated_worker_is_skipped() {
        let mut webhooks = BTreeMap::new();
        webhooks.insert("SLACK_TEST_URL".to_string(), vec!["awaken".to_string()]);
        let notifications = SlackNotifications {
            website_log_url: None,
            website_checklist_url: None,
            webhooks,
        };
        let msg = Message::new("sleep", "success", nowcast_protocol::Value::Null);
        // sleep isn't in the awaken-only worker list, so this is a no-op;
        // again, nothing to assert beyond not panicking without network access.
        notify(&notifications, &msg);
    }
}
