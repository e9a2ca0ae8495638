//! HTTP driver for the hosted pipeline service.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::{Client, Method, RequestBuilder},
    serde::{Deserialize, Serialize},
    tracing::debug,
    url::Url,
};

use {
    crate::{Driver, Error, Result},
    flowline_protocol::{Decoration, Event, ReceiveOptions, RouteLog, merge_decorations},
};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.flowline.dev";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
/// Poll timeout sent when the caller left it at zero.
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;
/// Headroom a fetch request gets beyond its long-poll timeout.
const POLL_GRACE_SECS: u64 = 5;
const STATUS_OK: u16 = 200;
const YES: &str = "yes";

/// Connection settings for [`HttpDriver`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Per-request timeout. Fetches get their poll timeout plus headroom
    /// instead.
    pub timeout: Duration,
}

impl HttpConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// [`Driver`] speaking the service's REST surface.
pub struct HttpDriver {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpDriver {
    pub fn new(config: HttpConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::config("api key is required"));
        }
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|error| {
                Error::config(format!("invalid endpoint url {}: {error}", config.endpoint))
            })?
            .as_str()
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| Error::transport("failed to build http client", source))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("api {}", self.api_key))
            .header("Accept", "application/json")
    }

    /// Send a request and decode the service's status envelope. A
    /// well-formed refusal comes back as `Refused` rather than an error.
    async fn envelope(&self, request: RequestBuilder, context: &str) -> Result<EnvelopeOutcome> {
        let resp = request
            .send()
            .await
            .map_err(|source| Error::transport(format!("failed to {context}"), source))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|source| {
            Error::transport(format!("failed to read {context} response"), source)
        })?;

        match serde_json::from_str::<StatusEnvelope>(&body) {
            Ok(envelope) if envelope.status == STATUS_OK => Ok(EnvelopeOutcome::Accepted(envelope)),
            Ok(envelope) => Ok(EnvelopeOutcome::Refused(envelope)),
            Err(_) if !status.is_success() => Err(Error::message(format!(
                "{context} returned HTTP {status}: {body}"
            ))),
            Err(source) => Err(Error::transport(
                format!("failed to parse {context} response"),
                source,
            )),
        }
    }
}

enum EnvelopeOutcome {
    Accepted(StatusEnvelope),
    Refused(StatusEnvelope),
}

#[async_trait]
impl Driver for HttpDriver {
    async fn send(&self, payload: &str, route: &[String]) -> Result<String> {
        let url = format!("{}/api/2/pipes", self.endpoint);
        let outcome = self
            .envelope(
                self.request(Method::POST, &url).json(&SendBody { payload, route }),
                "send message",
            )
            .await?;

        match outcome {
            EnvelopeOutcome::Accepted(envelope) => {
                debug!(id = %envelope.text, "sent message");
                Ok(envelope.text)
            }
            EnvelopeOutcome::Refused(envelope) => Err(Error::message(format!(
                "send refused: {}",
                envelope.text
            ))),
        }
    }

    async fn recv(&self, options: &ReceiveOptions) -> Result<Vec<Event>> {
        let url = format!("{}/api/2/pipe/{}", self.endpoint, options.step);
        let poll_timeout = effective_timeout(options.timeout);

        let resp = self
            .request(Method::GET, &url)
            .query(&receive_query(options, poll_timeout))
            // Leave the long poll room beyond the client default.
            .timeout(Duration::from_secs(poll_timeout + POLL_GRACE_SECS))
            .send()
            .await
            .map_err(|source| Error::transport("failed to fetch events", source))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::message(format!(
                "fetch returned HTTP {status}: {body}"
            )));
        }

        let body: EventsBody = resp
            .json()
            .await
            .map_err(|source| Error::transport("failed to parse fetched events", source))?;
        debug!(step = %options.step, count = body.events.len(), "fetched events");
        Ok(body.events)
    }

    async fn ack(&self, id: &str, step: &str) -> Result<bool> {
        let url = format!("{}/api/2/message/{id}/ack/{step}", self.endpoint);
        match self.envelope(self.request(Method::PUT, &url), "ack message").await? {
            EnvelopeOutcome::Accepted(_) => Ok(true),
            EnvelopeOutcome::Refused(envelope) => {
                Err(Error::message(format!("ack refused: {}", envelope.text)))
            }
        }
    }

    async fn complete(&self, id: &str, step: &str) -> Result<bool> {
        let url = format!("{}/api/2/message/{id}/complete/{step}", self.endpoint);
        match self
            .envelope(self.request(Method::PUT, &url), "complete message")
            .await?
        {
            EnvelopeOutcome::Accepted(_) => Ok(true),
            EnvelopeOutcome::Refused(envelope) => {
                debug!(id, step, reason = %envelope.text, "completion refused");
                Ok(false)
            }
        }
    }

    async fn append_log(&self, id: &str, entry: &RouteLog) -> Result<bool> {
        let url = format!("{}/api/2/message/{id}/log/{}", self.endpoint, entry.step);
        let body = LogBody {
            code: entry.code,
            message: &entry.message,
        };
        match self
            .envelope(self.request(Method::PATCH, &url).json(&body), "append route log")
            .await?
        {
            EnvelopeOutcome::Accepted(_) => Ok(true),
            EnvelopeOutcome::Refused(envelope) => Err(Error::message(format!(
                "route log refused: {}",
                envelope.text
            ))),
        }
    }

    async fn add_steps_after(&self, id: &str, after: &str, steps: &[String]) -> Result<bool> {
        let url = format!("{}/api/2/message/{id}/route", self.endpoint);
        let body = RouteBody {
            after,
            new_steps: steps,
        };
        match self
            .envelope(self.request(Method::PATCH, &url).json(&body), "edit route")
            .await?
        {
            EnvelopeOutcome::Accepted(_) => Ok(true),
            EnvelopeOutcome::Refused(envelope) => Err(Error::message(format!(
                "route edit refused: {}",
                envelope.text
            ))),
        }
    }

    async fn decorate(&self, id: &str, decorations: &[Decoration]) -> Result<Vec<bool>> {
        let url = format!("{}/api/2/message/{id}/decorations", self.endpoint);
        let resp = self
            .request(Method::PATCH, &url)
            .json(&DecorateBody { decorations })
            .send()
            .await
            .map_err(|source| Error::transport("failed to decorate message", source))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::message(format!(
                "decorate returned HTTP {status}: {body}"
            )));
        }

        let results: Vec<StatusEnvelope> = resp
            .json()
            .await
            .map_err(|source| Error::transport("failed to parse decorate response", source))?;
        Ok(results
            .iter()
            .map(|envelope| envelope.status == STATUS_OK)
            .collect())
    }

    async fn get_decorations(&self, id: &str, keys: &[String]) -> Result<serde_json::Value> {
        let url = format!("{}/api/2/message/{id}/decorations", self.endpoint);
        let resp = self
            .request(Method::GET, &url)
            .query(&[("keys", keys.join(","))])
            .send()
            .await
            .map_err(|source| Error::transport("failed to fetch decorations", source))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::message(format!(
                "decorations fetch returned HTTP {status}: {body}"
            )));
        }

        let body: DecorationsBody = resp
            .json()
            .await
            .map_err(|source| Error::transport("failed to parse decorations", source))?;
        Ok(merge_decorations(&body.decorations))
    }
}

fn effective_timeout(timeout: u64) -> u64 {
    if timeout == 0 {
        DEFAULT_POLL_TIMEOUT_SECS
    } else {
        timeout
    }
}

fn receive_query(options: &ReceiveOptions, poll_timeout: u64) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("pipe", options.step.clone()),
        ("count", options.count.to_string()),
        ("timeout", poll_timeout.to_string()),
    ];
    if options.redelivery_timeout > 0 {
        query.push(("redeliveryTimeout", options.redelivery_timeout.to_string()));
    }
    for (name, enabled) in [
        ("autoAck", options.auto_ack),
        ("block", options.block),
        ("excludeRouting", options.exclude_routing),
        ("excludeRouteLog", options.exclude_route_log),
        ("excludeDecoratedPayload", options.exclude_decorated_payload),
    ] {
        if enabled {
            query.push((name, YES.to_string()));
        }
    }
    query
}

// ── Wire bodies ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusEnvelope {
    #[allow(dead_code)]
    #[serde(default)]
    topic: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    status: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendBody<'a> {
    payload: &'a str,
    route: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LogBody<'a> {
    code: i32,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RouteBody<'a> {
    after: &'a str,
    new_steps: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DecorateBody<'a> {
    decorations: &'a [Decoration],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EventsBody {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DecorationsBody {
    #[serde(default)]
    decorations: Vec<Decoration>,
}
