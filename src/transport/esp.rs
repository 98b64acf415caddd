//! ESP-IDF HTTP(S) client behind the transport gate.
//!
//! A fresh `EspHttpConnection` is opened per exchange with the call
//! profile's timeout and dropped in [`HttpClient::teardown`].  TLS uses the
//! built-in certificate bundle.

use embedded_svc::http::Method as SvcMethod;
use embedded_svc::http::client::Client;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration as HttpClientConfiguration, EspHttpConnection};
use log::debug;

use super::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::error::TransportError;

/// Response bodies beyond this are truncated (settings and command lists
/// are a few hundred bytes).
const MAX_BODY: usize = 8 * 1024;

#[derive(Default)]
pub struct EspHttpClient {
    client: Option<Client<EspHttpConnection>>,
}

impl EspHttpClient {
    pub fn new() -> Self {
        Self { client: None }
    }

    /// Map an ESP-IDF HTTP client error onto the transport taxonomy.
    #[allow(clippy::unnecessary_cast)]
    fn classify(err: &esp_idf_svc::io::EspIOError) -> TransportError {
        use esp_idf_svc::sys::{
            ESP_ERR_HTTP_CONNECT, ESP_ERR_HTTP_EAGAIN, ESP_ERR_HTTP_FETCH_HEADER,
            ESP_ERR_HTTP_WRITE_DATA, ESP_ERR_TIMEOUT,
        };

        let code = err.0.code();
        if code == ESP_ERR_HTTP_CONNECT as i32 {
            TransportError::ConnectionRefused
        } else if code == ESP_ERR_HTTP_EAGAIN as i32 || code == ESP_ERR_TIMEOUT as i32 {
            TransportError::Timeout
        } else if code == ESP_ERR_HTTP_WRITE_DATA as i32 {
            TransportError::SendPayloadFailed
        } else if code == ESP_ERR_HTTP_FETCH_HEADER as i32 {
            TransportError::ConnectionLost
        } else {
            TransportError::Io
        }
    }
}

impl HttpClient for EspHttpClient {
    fn execute(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        let conf = HttpClientConfiguration {
            timeout: Some(request.connect_timeout.max(request.response_timeout)),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&conf).map_err(|e| {
            debug!("Transport: connection setup failed: {e:?}");
            TransportError::NotConnected
        })?;
        let client = self.client.insert(Client::wrap(connection));

        let method = match request.method {
            Method::Get => SvcMethod::Get,
            Method::Post => SvcMethod::Post,
            Method::Patch => SvcMethod::Patch,
        };
        let body = request.body.unwrap_or("");
        let content_length = body.len().to_string();
        let mut headers = vec![
            ("Content-Type", "application/json"),
            ("x-device-key", request.device_key),
        ];
        if request.body.is_some() {
            headers.push(("Content-Length", content_length.as_str()));
        }

        let mut req = client
            .request(method, request.url, &headers)
            .map_err(|e| Self::classify(&e))?;
        if request.body.is_some() {
            req.write_all(body.as_bytes())
                .map_err(|_| TransportError::SendPayloadFailed)?;
            req.flush().map_err(|_| TransportError::SendPayloadFailed)?;
        }
        let mut response = req.submit().map_err(|e| Self::classify(&e))?;
        let status = response.status();

        let mut bytes = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = response
                .read(&mut chunk)
                .map_err(|_| TransportError::ConnectionLost)?;
            if n == 0 {
                break;
            }
            let room = MAX_BODY.saturating_sub(bytes.len());
            bytes.extend_from_slice(&chunk[..n.min(room)]);
        }

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    fn teardown(&mut self) {
        self.client = None;
    }
}
