//! In-process HTTP fake for exercising fetch paths without a network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::http::{FetchedResponse, HttpTransport, TransportError};

#[derive(Debug, Clone)]
enum Route {
    Respond {
        status: StatusCode,
        content_type: Option<String>,
        body: Vec<u8>,
    },
    Fail(TransportError),
}

/// Routes are matched on the URL with its query string removed. Every call
/// is recorded with the full URL.
#[derive(Debug, Default)]
pub struct RouteTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
}

impl RouteTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route_key(url: &str) -> &str {
        url.split('?').next().unwrap_or(url)
    }

    pub fn respond(&self, url: &str, status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.routes.lock().unwrap().insert(
            Self::route_key(url).to_string(),
            Route::Respond {
                status,
                content_type: content_type.map(ToString::to_string),
                body: body.into(),
            },
        );
    }

    pub fn respond_json(&self, url: &str, body: &serde_json::Value) {
        self.respond(url, 200, Some("application/json"), body.to_string());
    }

    pub fn respond_image(&self, url: &str, bytes: &[u8]) {
        self.respond(url, 200, Some("image/jpeg"), bytes.to_vec());
    }

    pub fn fail(&self, url: &str, err: TransportError) {
        self.routes
            .lock()
            .unwrap()
            .insert(Self::route_key(url).to_string(), Route::Fail(err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        let key = Self::route_key(url);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| Self::route_key(c) == key)
            .count()
    }
}

#[async_trait]
impl HttpTransport for RouteTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<FetchedResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        let route = self.routes.lock().unwrap().get(Self::route_key(url)).cloned();
        match route {
            Some(Route::Respond {
                status,
                content_type,
                body,
            }) => Ok(FetchedResponse {
                status,
                final_url: url.to_string(),
                content_type,
                body,
            }),
            Some(Route::Fail(err)) => Err(err),
            None => Ok(FetchedResponse {
                status: StatusCode::NOT_FOUND,
                final_url: url.to_string(),
                content_type: None,
                body: Vec::new(),
            }),
        }
    }
}
