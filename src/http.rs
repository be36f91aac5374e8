//! Shared plumbing for the reqwest-based relay and registry clients

use std::time::Duration;

use crate::relay::ErrorBody;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A non-2xx response, decoded from `{error: {code, message}}` when possible
#[derive(Debug)]
pub(crate) struct HttpFailure {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
}

impl HttpFailure {
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        match response.json::<ErrorBody>().await {
            Ok(body) => Self {
                status,
                code: Some(body.error.code),
                message: body.error.message,
            },
            Err(_) => Self {
                status,
                code: None,
                message: format!("request failed with status {}", status),
            },
        }
    }
}

pub(crate) fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(endpoint("http://relay/", "/signal"), "http://relay/signal");
        assert_eq!(endpoint("http://relay", "/rooms/ab"), "http://relay/rooms/ab");
    }
}
