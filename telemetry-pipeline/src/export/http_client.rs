//! OTLP over HTTP with the `reqwest` blocking client.
//!
//! Requests are sent from the batch worker thread. The blocking client must not
//! be created or used on a tokio worker thread, so it is built on a short-lived
//! thread of its own.
use super::{Protocol, ResolvedConfig};
use crate::error::{ConfigError, ExportError, ExportResult};
use crate::pipeline_debug;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Uri};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;
use std::time::Duration;

/// A request message that can be sent over HTTP.
pub(crate) trait HttpPayload: Message {
    #[cfg(feature = "http-json")]
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl HttpPayload for ExportTraceServiceRequest {
    #[cfg(feature = "http-json")]
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl HttpPayload for ExportLogsServiceRequest {
    #[cfg(feature = "http-json")]
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug)]
pub(crate) struct HttpClient {
    client: reqwest::blocking::Client,
    endpoint: Uri,
    headers: HeaderMap,
    protocol: Protocol,
    timeout: Duration,
}

impl HttpClient {
    pub(crate) fn new(config: ResolvedConfig) -> Result<Self, ConfigError> {
        let timeout = config.timeout;
        let client = std::thread::Builder::new()
            .name("telemetry.http.client-builder".into())
            .spawn(move || {
                reqwest::blocking::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| ConfigError::InvalidConfig {
                        name: "http client".into(),
                        reason: e.to_string(),
                    })
            })
            .map_err(|e| ConfigError::ThreadSpawnFailed(e.to_string()))?
            .join()
            .map_err(|_| ConfigError::ThreadSpawnFailed("http client builder panicked".into()))??;

        Ok(HttpClient {
            client,
            endpoint: config.endpoint,
            headers: config.headers,
            protocol: config.protocol,
            timeout,
        })
    }

    fn body<T: HttpPayload>(&self, request: &T) -> Result<(Vec<u8>, &'static str), ExportError> {
        match self.protocol {
            #[cfg(feature = "http-json")]
            Protocol::HttpJson => request
                .to_json()
                .map(|json| (json, "application/json"))
                .map_err(|e| ExportError::Encode(e.to_string())),
            _ => Ok((request.encode_to_vec(), "application/x-protobuf")),
        }
    }

    /// Send one request. A non-2xx answer is a rejection.
    pub(crate) fn send<T: HttpPayload>(&self, request: &T) -> ExportResult {
        let (body, content_type) = self.body(request)?;

        pipeline_debug!(
            name: "HttpClient.ExportStarted",
            endpoint = format!("{}", self.endpoint),
            size = format!("{}", body.len())
        );

        let response = self
            .client
            .post(self.endpoint.to_string())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .body(body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ExportError::Timeout(self.timeout)
                } else {
                    ExportError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            pipeline_debug!(name: "HttpClient.ExportSucceeded");
            Ok(())
        } else {
            let text = response.text().unwrap_or_default();
            pipeline_debug!(
                name: "HttpClient.ExportFailed",
                status = format!("{status}"),
                body = text.clone()
            );
            Err(ExportError::Rejected(format!("{status}: {text}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Incoming};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use tokio::runtime::Runtime;

    fn config(endpoint: String, protocol: Protocol) -> ResolvedConfig {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant", HeaderValue::from_static("blue"));
        ResolvedConfig {
            endpoint: endpoint.parse().unwrap(),
            headers,
            protocol,
            timeout: Duration::from_secs(2),
        }
    }

    struct Received {
        path: String,
        headers: HeaderMap,
        body: Bytes,
    }

    /// Answers every request with `status`. The runtime must outlive the
    /// requests sent to it.
    fn mock_collector(status: StatusCode) -> (String, mpsc::Receiver<Received>, Runtime) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let endpoint = format!("http://{}/v1/traces", listener.local_addr().unwrap());

        let (tx, rx) = mpsc::channel();
        runtime.spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let tx = tx.clone();
                        async move {
                            let (parts, body) = request.into_parts();
                            let body = body.collect().await?.to_bytes();
                            let _ = tx.send(Received {
                                path: parts.uri.path().to_string(),
                                headers: parts.headers,
                                body,
                            });
                            let mut response = Response::new(Full::new(Bytes::new()));
                            *response.status_mut() = status;
                            Ok::<_, hyper::Error>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        (endpoint, rx, runtime)
    }

    fn content_type(received: &Received) -> Option<&str> {
        received
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    #[test]
    fn protobuf_request_carries_headers_and_content_type() {
        let (endpoint, requests, _runtime) = mock_collector(StatusCode::OK);
        let client = HttpClient::new(config(endpoint, Protocol::HttpBinary)).unwrap();

        let request = ExportTraceServiceRequest::default();
        let result = client.send(&request);
        let received = requests.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(result, Ok(()));
        assert_eq!(received.path, "/v1/traces");
        assert_eq!(content_type(&received), Some("application/x-protobuf"));
        assert_eq!(
            received.headers.get("x-tenant").and_then(|v| v.to_str().ok()),
            Some("blue")
        );
        assert_eq!(received.body.as_ref(), request.encode_to_vec().as_slice());
    }

    #[test]
    fn non_success_status_is_a_rejection() {
        let (endpoint, _requests, _runtime) = mock_collector(StatusCode::BAD_REQUEST);
        let client = HttpClient::new(config(endpoint, Protocol::HttpBinary)).unwrap();

        let result = client.send(&ExportLogsServiceRequest::default());

        assert!(matches!(result, Err(ExportError::Rejected(msg)) if msg.starts_with("400")));
    }

    #[test]
    fn closed_port_is_a_transport_failure() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = HttpClient::new(config(
            format!("http://127.0.0.1:{port}/v1/logs"),
            Protocol::HttpBinary,
        ))
        .unwrap();

        let result = client.send(&ExportLogsServiceRequest::default());
        assert!(matches!(result, Err(ExportError::Transport(_))));
    }

    #[cfg(feature = "http-json")]
    #[test]
    fn json_protocol_sends_json() {
        let (endpoint, requests, _runtime) = mock_collector(StatusCode::OK);
        let client = HttpClient::new(config(endpoint, Protocol::HttpJson)).unwrap();

        let result = client.send(&ExportTraceServiceRequest::default());
        let received = requests.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(result, Ok(()));
        assert_eq!(content_type(&received), Some("application/json"));
        let json: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
        assert!(json.is_object());
    }
}
