//! [`HttpTransport`] over `reqwest`.

use shared::capabilities::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransport,
};
use tracing::{debug, warn};

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("smartinfoqueue/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> HttpResult {
        let method = match request.method() {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self
            .client
            .request(method, request.url().as_str())
            .timeout(request.timeout());
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await.map_err(|e| map_error(&e, request))?;
        let status = response.status().as_u16();

        let mut headers = HttpHeaders::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            if let Err(e) = headers.insert(name.as_str(), value) {
                debug!(header = name.as_str(), error = %e, "skipping response header");
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_error(&e, request))?;
        debug!(
            request_id = request.request_id(),
            status,
            bytes = body.len(),
            "response received"
        );
        Ok(HttpResponse::new(
            status,
            headers,
            body.to_vec(),
            request.request_id().to_string(),
        ))
    }
}

fn map_error(error: &reqwest::Error, request: &HttpRequest) -> HttpError {
    let host = request.url().host().to_string();
    let message = error.to_string();
    warn!(host = %host, error = %message, "transport error");

    if error.is_timeout() {
        HttpError::Timeout {
            timeout_ms: u64::try_from(request.timeout().as_millis()).unwrap_or(u64::MAX),
        }
    } else if error.is_builder() {
        HttpError::InvalidRequest { reason: message }
    } else if error.is_decode() || error.is_body() {
        HttpError::InvalidResponse { reason: message }
    } else {
        HttpError::Connection { host, message }
    }
}
