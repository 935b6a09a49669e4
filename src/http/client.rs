use reqwest::{redirect, Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use super::api::{
    ApiClient, ApiFuture, GetEvaluationsRequest, GetEvaluationsResponse, RegisterEventsRequest,
    RegisterEventsResponse,
};
use crate::core::FlagKitOptions;
use crate::error::{ErrorCode, FlagKitError, Result};
use crate::types::SDK_VERSION;

const GET_EVALUATIONS_PATH: &str = "get_evaluations";
const REGISTER_EVENTS_PATH: &str = "register_events";

/// HTTP implementation of [`ApiClient`].
pub struct HttpClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HttpClient {
    pub fn new(options: &FlagKitOptions) -> Result<Self> {
        // 3xx must reach the caller as `Redirect`, not be followed.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(format!("FlagKit-Rust-Mobile/{}", SDK_VERSION))
            .build()
            .map_err(|e| {
                FlagKitError::with_source(ErrorCode::Network, "Failed to create HTTP client", e)
            })?;

        Ok(Self {
            client,
            base_url: parse_base_url(&options.api_endpoint)?,
            api_key: options.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<(T, usize)> {
        let url = self.base_url.join(path).map_err(|e| {
            FlagKitError::with_source(ErrorCode::IllegalArgument, "Invalid request path", e)
        })?;

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Authorization", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(convert_error)?;

        handle_response(response).await
    }
}

impl ApiClient for HttpClient {
    fn get_evaluations(
        &self,
        request: GetEvaluationsRequest,
        timeout: Duration,
    ) -> ApiFuture<'_, GetEvaluationsResponse> {
        Box::pin(async move {
            let (mut response, size): (GetEvaluationsResponse, usize) =
                self.post(GET_EVALUATIONS_PATH, &request, timeout).await?;
            response.size_bytes = size;
            Ok(response)
        })
    }

    fn register_events(
        &self,
        request: RegisterEventsRequest,
        timeout: Duration,
    ) -> ApiFuture<'_, RegisterEventsResponse> {
        Box::pin(async move {
            let (response, _size) = self.post(REGISTER_EVENTS_PATH, &request, timeout).await?;
            Ok(response)
        })
    }
}

/// Parse the configured endpoint, ensuring relative joins append to its path.
pub fn parse_base_url(endpoint: &str) -> Result<Url> {
    let mut normalized = endpoint.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).map_err(|e| {
        FlagKitError::with_source(ErrorCode::IllegalArgument, "Invalid API endpoint", e)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(FlagKitError::config_error(format!(
            "Unsupported endpoint scheme: {}",
            scheme
        ))),
    }
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<(T, usize)> {
    let status = response.status();

    if status.is_success() {
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FlagKitError::with_source(ErrorCode::Timeout, "Timed out reading response", e)
            } else {
                FlagKitError::with_source(ErrorCode::Network, "Failed to read response", e)
            }
        })?;

        let value = serde_json::from_str(&body).map_err(|e| {
            FlagKitError::with_source(
                ErrorCode::Unknown,
                format!("Failed to parse response: {}", e),
                e,
            )
        })?;
        Ok((value, body.len()))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(status_to_error(status, &body))
    }
}

fn status_to_error(status: StatusCode, body: &str) -> FlagKitError {
    let error = FlagKitError::from_response(status.as_u16(), body);
    tracing::debug!("Request failed: {}", error);
    error
}

fn convert_error(error: reqwest::Error) -> FlagKitError {
    if error.is_timeout() {
        FlagKitError::with_source(ErrorCode::Timeout, "Request timed out", error)
    } else if error.is_connect() || error.is_request() {
        FlagKitError::with_source(ErrorCode::Network, "Connection failed", error)
    } else if error.is_redirect() {
        FlagKitError::with_source(ErrorCode::Redirect, "Redirect not followed", error)
    } else {
        FlagKitError::with_source(ErrorCode::Unknown, error.to_string(), error)
    }
}
