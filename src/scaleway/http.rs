//! Raw HTTP access to Scaleway endpoints the SDK does not cover.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{ScalewayBackend, ScalewayBackendError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_HEADER: &str = "X-Auth-Token";

pub(super) const INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
pub(super) const IAM_API_BASE: &str = "https://api.scaleway.com/iam/v1alpha1";
pub(super) const FILE_API_BASE: &str = "https://api.scaleway.com/file/v1alpha1";
pub(super) const NOT_FOUND: u16 = 404;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl ScalewayBackend {
    pub(super) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        HTTP_CLIENT
            .request(method, url)
            .header(AUTH_HEADER, &self.config.secret_key)
    }

    pub(super) fn instance_url(&self, path: &str) -> String {
        format!(
            "{INSTANCE_API_BASE}/zones/{}/{path}",
            self.config.default_zone
        )
    }
}

/// Sends `request` and returns the body of a successful response.
pub(super) async fn send(request: RequestBuilder) -> Result<Vec<u8>, ScalewayBackendError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    if status.is_success() {
        return Ok(body.to_vec());
    }
    Err(status_error(status.as_u16(), &body))
}

/// Sends `request` and decodes the JSON body of a successful response.
pub(super) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<T, ScalewayBackendError> {
    let body = send(request).await?;
    decode(&body)
}

pub(super) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ScalewayBackendError> {
    serde_json::from_slice(body).map_err(|err| ScalewayBackendError::Decode {
        message: err.to_string(),
    })
}

pub(super) fn status_error(status: u16, body: &[u8]) -> ScalewayBackendError {
    let message = match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(parsed) if parsed.kind.is_empty() => parsed.message,
        Ok(parsed) => format!("{}: {}", parsed.kind, parsed.message),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };
    ScalewayBackendError::Http { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct Probe {
        id: String,
    }

    #[test]
    fn status_error_prefers_the_api_message() {
        let err = status_error(
            404,
            br#"{"type":"not_found","message":"resource is not found"}"#,
        );
        assert_eq!(
            err,
            ScalewayBackendError::Http {
                status: 404,
                message: String::from("not_found: resource is not found"),
            }
        );
    }

    #[test]
    fn status_error_falls_back_to_the_raw_body() {
        let err = status_error(502, b"bad gateway");
        assert_eq!(
            err,
            ScalewayBackendError::Http {
                status: 502,
                message: String::from("bad gateway"),
            }
        );
    }

    #[test]
    fn decode_reports_malformed_bodies() {
        let err = decode::<Probe>(b"{").expect_err("malformed body");
        assert!(matches!(err, ScalewayBackendError::Decode { .. }));
        assert_eq!(
            decode::<Probe>(br#"{"id":"x"}"#).expect("decode"),
            Probe {
                id: String::from("x")
            }
        );
    }
}
