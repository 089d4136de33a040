//! Notification dispatch.
//!
//! A closed set of notifier kinds behind one dispatch: Slack and Discord
//! webhooks, mail over SMTP, and a generic JSON webhook that any unknown
//! service falls back to. Events below the configured minimum level are
//! dropped; in report mode only the final session report is sent.

pub mod smtp;
pub mod url;

use watchz_core::{EventLevel, Result, SessionReport, UpdateEvent, WatchError};

pub use smtp::SmtpNotifier;
pub use url::ServiceUrl;

/// One configured notification endpoint.
pub enum Notifier {
    Slack(SlackNotifier),
    Discord(DiscordNotifier),
    Smtp(SmtpNotifier),
    Webhook(WebhookNotifier),
}

impl Notifier {
    /// Build a notifier from a service URL. Unknown services fall back to
    /// the generic webhook.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = ServiceUrl::parse(raw)?;
        match url.service.as_str() {
            "slack" => Ok(Self::Slack(SlackNotifier::from_url(&url)?)),
            "discord" => Ok(Self::Discord(DiscordNotifier::from_url(&url)?)),
            "smtp" | "email" => Ok(Self::Smtp(SmtpNotifier::from_url(&url)?)),
            "webhook" | "generic" => Ok(Self::Webhook(WebhookNotifier::from_url(&url))),
            other => {
                tracing::warn!(service = other, "unknown notification service, using generic webhook");
                Ok(Self::Webhook(WebhookNotifier::from_url(&url)))
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Slack(_) => "slack",
            Self::Discord(_) => "discord",
            Self::Smtp(_) => "smtp",
            Self::Webhook(_) => "webhook",
        }
    }

    /// Send a plain-text message.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        match self {
            Self::Slack(n) => n.send(text).await,
            Self::Discord(n) => n.send(text).await,
            Self::Smtp(n) => n.send(text).await,
            Self::Webhook(n) => {
                n.post(&serde_json::json!({ "message": text })).await
            }
        }
    }

    /// Send a finished session report. Webhooks get the structured report;
    /// everything else gets its text summary.
    pub async fn send_report(&self, report: &SessionReport) -> Result<()> {
        match self {
            Self::Webhook(n) => n.post(&serde_json::to_value(report)?).await,
            _ => self.send_message(&report.summary()).await,
        }
    }
}

/// Fan-out to every configured notifier with level filtering.
pub struct NotificationDispatcher {
    notifiers: Vec<Notifier>,
    min_level: EventLevel,
}

impl NotificationDispatcher {
    /// Parse every URL; one bad URL is a configuration error.
    pub fn from_urls(urls: &[String], min_level: EventLevel) -> Result<Self> {
        let mut notifiers = Vec::new();
        for url in urls {
            notifiers.push(Notifier::from_url(url)?);
        }
        Ok(Self {
            notifiers,
            min_level,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Dispatch one event to every notifier; send failures are logged.
    pub async fn notify_event(&self, event: &UpdateEvent) {
        if event.level < self.min_level {
            return;
        }
        let text = format!("[{}] {}: {}", event.level, event.container_name, event.message);
        for notifier in &self.notifiers {
            if let Err(e) = notifier.send_message(&text).await {
                tracing::warn!(kind = notifier.kind(), error = %e, "notification failed");
            }
        }
    }

    /// Dispatch the session report to every notifier.
    pub async fn notify_report(&self, report: &SessionReport) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.send_report(report).await {
                tracing::warn!(kind = notifier.kind(), error = %e, "report notification failed");
            }
        }
    }
}

fn webhook_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .user_agent(format!("watchz/{}", watchz_core::VERSION))
        .build()
        .unwrap_or_default()
}

/// Slack incoming-webhook notifier: `slack://[botname@]tokenA/tokenB/tokenC`.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
    botname: Option<String>,
}

impl SlackNotifier {
    fn from_url(url: &ServiceUrl) -> Result<Self> {
        if url.path.len() != 2 {
            return Err(WatchError::Notification(format!(
                "slack URL needs three webhook tokens, got '{}/{}'",
                url.host,
                url.path.join("/")
            )));
        }
        Ok(Self {
            client: webhook_client(),
            webhook_url: format!(
                "https://hooks.slack.com/services/{}/{}/{}",
                url.host, url.path[0], url.path[1]
            ),
            botname: url.user.clone(),
        })
    }

    async fn send(&self, text: &str) -> Result<()> {
        let mut body = serde_json::json!({ "text": text });
        if let Some(botname) = &self.botname {
            body["username"] = serde_json::Value::String(botname.clone());
        }
        post_json(&self.client, &self.webhook_url, &body).await
    }
}

/// Discord webhook notifier: `discord://token@webhookid`.
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    fn from_url(url: &ServiceUrl) -> Result<Self> {
        let token = url.user.clone().ok_or_else(|| {
            WatchError::Notification("discord URL needs token@webhookid".to_string())
        })?;
        Ok(Self {
            client: webhook_client(),
            webhook_url: format!(
                "https://discord.com/api/webhooks/{}/{token}",
                url.host
            ),
        })
    }

    async fn send(&self, text: &str) -> Result<()> {
        post_json(
            &self.client,
            &self.webhook_url,
            &serde_json::json!({ "content": text }),
        )
        .await
    }
}

/// Generic JSON webhook: `webhook://host[:port]/path`. TLS by default;
/// `?disabletls=yes` switches to plain HTTP.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    fn from_url(url: &ServiceUrl) -> Self {
        let scheme = if matches!(url.param("disabletls"), Some("yes") | Some("true")) {
            "http"
        } else {
            "https"
        };
        let port = url.port.map(|p| format!(":{p}")).unwrap_or_default();
        let path = if url.path.is_empty() {
            String::new()
        } else {
            format!("/{}", url.path.join("/"))
        };
        Self {
            client: webhook_client(),
            url: format!("{scheme}://{}{port}{path}", url.host),
        }
    }

    async fn post(&self, body: &serde_json::Value) -> Result<()> {
        post_json(&self.client, &self.url, body).await
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<()> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| WatchError::Notification(format!("POST {url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(WatchError::Notification(format!(
            "POST {url} returned HTTP {}",
            status.as_u16()
        )));
    }
    Ok(())
}
