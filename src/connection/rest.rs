//! The generic REST connection handler. Both network dialects ride on this:
//! it owns the HTTP client, authentication, the `"METHOD path"` command
//! form, response classification and the health counters.

use crate::{
    connection::{ConnectionHealth, HealthCounters},
    error::MachineError,
    traits::Connection,
};
use bytes::Bytes;
use http::Method;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

/// Header carrying the application key when [HttpAuth::ApiKey] is in use.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Deserialize a reply body into a dialect type, mapping shape mismatches
/// to a protocol error naming the offending field.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, MachineError> {
    serde_json::from_value(value).map_err(|err| MachineError::Protocol {
        status: 0,
        message: format!("unexpected reply shape: {err}"),
    })
}

/// Serialize a dialect request body.
pub(crate) fn encode<T: serde::Serialize>(body: &T) -> Result<Value, MachineError> {
    serde_json::to_value(body).map_err(|err| MachineError::Protocol {
        status: 0,
        message: format!("could not encode request body: {err}"),
    })
}

const BODY_SNIPPET_LEN: usize = 200;

/// How the handler authenticates against the endpoint.
#[derive(Clone, Debug)]
pub enum HttpAuth {
    /// Anonymous access.
    None,

    /// A fixed application key sent in the `X-Api-Key` header.
    ApiKey(String),

    /// Username and password credentials.
    Basic {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
}

/// A connection to one REST endpoint. The embedded client is built on
/// `open` and dropped on `close`; every request inherits the configured
/// deadline.
#[derive(Debug)]
pub struct RestConnection {
    base_url: String,
    auth: HttpAuth,
    timeout: Duration,
    client: Option<reqwest::Client>,
    health: Arc<HealthCounters>,
}

impl RestConnection {
    /// A closed connection to `base_url` (scheme and host, no trailing
    /// slash required).
    pub fn new(base_url: &str, auth: HttpAuth, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth,
            timeout,
            client: None,
            health: Arc::new(HealthCounters::default()),
        }
    }

    /// The endpoint this connection talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn client(&self) -> Result<reqwest::Client, MachineError> {
        self.client
            .clone()
            .ok_or_else(|| MachineError::Connection("connection is not open".into()))
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            HttpAuth::None => request,
            HttpAuth::ApiKey(key) => request.header(API_KEY_HEADER, key),
            HttpAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }

    fn classify_transport(&self, err: reqwest::Error) -> MachineError {
        if err.is_timeout() {
            MachineError::Timeout {
                waited: self.timeout,
            }
        } else {
            MachineError::Connection(err.to_string())
        }
    }

    async fn read_reply(&self, response: reqwest::Response) -> Result<Value, MachineError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = response.text().await.unwrap_or_default();
            return Err(MachineError::Auth(snippet(&body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MachineError::Protocol {
                status: status.as_u16(),
                message: snippet(&body),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| self.classify_transport(err))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|_| MachineError::Protocol {
            status: status.as_u16(),
            message: "response body was not JSON".into(),
        })
    }

    async fn dispatch(
        &mut self,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, MachineError> {
        match request.send().await {
            Ok(response) => match self.read_reply(response).await {
                Ok(value) => {
                    self.health.record_success();
                    Ok(value)
                }
                Err(err) => {
                    if err.is_transient() {
                        self.health.record_failure();
                    } else {
                        self.health.record_rejection();
                    }
                    Err(err)
                }
            },
            Err(err) => {
                self.health.record_failure();
                Err(self.classify_transport(err))
            }
        }
    }

    /// Perform `method` against `path` with an optional JSON body.
    pub async fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, MachineError> {
        let url = self.url_for(path);
        tracing::trace!(method = %method, url = %url, "http request");
        let mut request = self.apply_auth(self.client()?.request(method, &url));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.dispatch(request).await
    }

    /// Multipart form upload, for dialects that take uploads as forms.
    pub async fn upload_multipart(
        &mut self,
        path: &str,
        file_name: &str,
        content: Bytes,
    ) -> Result<Value, MachineError> {
        let url = self.url_for(path);
        let part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(file_name.to_owned());
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self.apply_auth(self.client()?.post(&url)).multipart(form);
        self.dispatch(request).await
    }

    /// Raw-body PUT, for dialects that upload by PUT. `headers` are sent
    /// verbatim on top of authentication.
    pub async fn put_bytes(
        &mut self,
        path: &str,
        content: Bytes,
        headers: &[(&str, String)],
    ) -> Result<Value, MachineError> {
        let url = self.url_for(path);
        let mut request = self.apply_auth(self.client()?.put(&url)).body(content);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        self.dispatch(request).await
    }
}

impl Connection for RestConnection {
    type Error = MachineError;

    async fn open(&mut self) -> Result<(), MachineError> {
        if self.client.is_some() {
            return Ok(());
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|err| MachineError::Connection(err.to_string()))?;
        self.client = Some(client);
        self.health.reset();
        tracing::debug!(base_url = %self.base_url, "http transport ready");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MachineError> {
        self.client = None;
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.client.is_some() && self.health.within_failure_limit()
    }

    fn health(&self) -> ConnectionHealth {
        self.health.snapshot()
    }

    async fn send(
        &mut self,
        command: &str,
        params: Option<&Value>,
    ) -> Result<Value, MachineError> {
        let (method, path) = parse_command(command)?;
        self.request(method, &path, params).await
    }
}

/// Split a `"METHOD /path"` command string.
fn parse_command(command: &str) -> Result<(Method, String), MachineError> {
    let Some((verb, path)) = command.trim().split_once(' ') else {
        return Err(MachineError::InvalidParameter(format!(
            "expected \"METHOD /path\", got {command:?}"
        )));
    };
    let method = match verb.to_uppercase().as_str() {
        "GET" => Method::GET,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        "PATCH" => Method::PATCH,
        "HEAD" => Method::HEAD,
        _ => {
            return Err(MachineError::InvalidParameter(format!(
                "unknown HTTP method {verb:?}"
            )))
        }
    };
    let path = path.trim();
    if path.is_empty() {
        return Err(MachineError::InvalidParameter(
            "command is missing a path".into(),
        ));
    }
    Ok((method, path.to_owned()))
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= BODY_SNIPPET_LEN {
        trimmed.to_owned()
    } else {
        let mut end = BODY_SNIPPET_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_parsing() {
        let (method, path) = parse_command("GET /api/job").unwrap();
        assert_eq!(method, Method::GET);
        assert_eq!(path, "/api/job");

        let (method, _) = parse_command("post /api/job").unwrap();
        assert_eq!(method, Method::POST);

        assert!(matches!(
            parse_command("/api/job"),
            Err(MachineError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_command("YEET /api/job"),
            Err(MachineError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_command("GET  "),
            Err(MachineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn urls_join_cleanly() {
        let conn = RestConnection::new(
            "http://printer.local/",
            HttpAuth::None,
            Duration::from_secs(5),
        );
        assert_eq!(conn.url_for("/api/version"), "http://printer.local/api/version");
        assert_eq!(conn.url_for("api/version"), "http://printer.local/api/version");
    }

    #[tokio::test]
    async fn closed_connection_refuses_commands() {
        let mut conn =
            RestConnection::new("http://printer.local", HttpAuth::None, Duration::from_secs(5));
        let result = conn.send("GET /api/version", None).await;
        assert!(matches!(result, Err(MachineError::Connection(_))));
        assert!(!conn.healthy());
    }

    #[test]
    fn long_bodies_are_snipped() {
        let body = "x".repeat(500);
        assert_eq!(snippet(&body).len(), BODY_SNIPPET_LEN + 3);
        assert_eq!(snippet("short"), "short");
    }
}
