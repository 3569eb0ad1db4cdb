use super::{ApiCall, Method, Transport};
use crate::error::{classify_failure, ScheduleError, ScheduleResult};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        auth_token: Option<String>,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("baseUrl must start with http:// or https://");
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, call: &ApiCall) -> ScheduleResult<Value> {
        let url = format!("{}/{}", self.base_url, call.path.trim_start_matches('/'));
        let mut builder = match call.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        if let Some(body) = call.body.as_ref() {
            builder = builder.json(body);
        }
        if let Some(token) = self.auth_token.as_deref() {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(op = call.op, method = call.method.as_str(), %url, "collaborator call");
        let response = builder.send()?;
        let status = response.status();
        let text = response.text()?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) if !status.is_success() => Value::String(text),
                Err(e) => {
                    return Err(ScheduleError::Decode(format!("{}: {}", call.op, e)));
                }
            }
        };

        if status.is_success() {
            Ok(body)
        } else {
            tracing::warn!(op = call.op, status = status.as_u16(), "collaborator call failed");
            Err(classify_failure(status.as_u16(), &body))
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.base_url)
    }
}
