//! # OTLP exporters
//!
//! [`OtlpSpanExporter`] and [`OtlpLogExporter`] send batches to an
//! OpenTelemetry collector over gRPC (`grpc-tonic` feature) or HTTP with
//! protobuf (`http-proto`) or JSON (`http-json`) payloads.
//!
//! Each export is a single attempt unless a [`RetryPolicy`] is configured.
//! Configuration is resolved when the exporter is built. Programmatic values
//! take precedence over `OTEL_EXPORTER_OTLP_*` environment variables, which
//! take precedence over the defaults.
//!
//! ```no_run
//! use std::time::Duration;
//! use telemetry_pipeline::export::{OtlpExporterBuilder, Protocol};
//!
//! # fn main() -> Result<(), telemetry_pipeline::error::ConfigError> {
//! let exporter = OtlpExporterBuilder::new()
//!     .with_protocol(Protocol::HttpBinary)
//!     .with_endpoint("http://collector:4318")
//!     .with_timeout(Duration::from_secs(3))
//!     .build_span_exporter()?;
//! # drop(exporter);
//! # Ok(())
//! # }
//! ```
use crate::error::{ConfigError, ExportError, ExportResult};
use crate::logs::{LogExporter, LogRecord};
use crate::trace::{SpanData, SpanExporter};
use crate::{pipeline_debug, pipeline_warn};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "grpc-tonic")]
mod grpc;
#[cfg(any(feature = "http-proto", feature = "http-json"))]
mod http_client;
mod retry;
pub(crate) mod transform;

pub use retry::RetryPolicy;

/// Base endpoint of the collector for every signal.
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Key-value pairs sent as headers (or gRPC metadata) with every request.
/// Example: `k1=v1,k2=v2`
pub const OTEL_EXPORTER_OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
/// Protocol the exporters use: `grpc`, `http/protobuf` or `http/json`.
pub const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
/// Max waiting time in milliseconds for the collector to process a batch.
pub const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
/// Default max waiting time for the collector to process a batch.
pub const OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT: Duration = Duration::from_millis(10_000);

/// Trace endpoint, used verbatim.
pub const OTEL_EXPORTER_OTLP_TRACES_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT";
/// Trace headers, preferred over [`OTEL_EXPORTER_OTLP_HEADERS`].
pub const OTEL_EXPORTER_OTLP_TRACES_HEADERS: &str = "OTEL_EXPORTER_OTLP_TRACES_HEADERS";
/// Trace export timeout, preferred over [`OTEL_EXPORTER_OTLP_TIMEOUT`].
pub const OTEL_EXPORTER_OTLP_TRACES_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TRACES_TIMEOUT";

/// Log endpoint, used verbatim.
pub const OTEL_EXPORTER_OTLP_LOGS_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_LOGS_ENDPOINT";
/// Log headers, preferred over [`OTEL_EXPORTER_OTLP_HEADERS`].
pub const OTEL_EXPORTER_OTLP_LOGS_HEADERS: &str = "OTEL_EXPORTER_OTLP_LOGS_HEADERS";
/// Log export timeout, preferred over [`OTEL_EXPORTER_OTLP_TIMEOUT`].
pub const OTEL_EXPORTER_OTLP_LOGS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_LOGS_TIMEOUT";

/// Protocol value for gRPC
pub const OTEL_EXPORTER_OTLP_PROTOCOL_GRPC: &str = "grpc";
/// Protocol value for HTTP with protobuf encoding
pub const OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF: &str = "http/protobuf";
/// Protocol value for HTTP with JSON encoding
pub const OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON: &str = "http/json";

/// Default collector endpoint for gRPC.
pub const OTEL_EXPORTER_OTLP_GRPC_ENDPOINT_DEFAULT: &str = "http://localhost:4317";
/// Default collector endpoint for HTTP.
pub const OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT: &str = "http://localhost:4318";

/// The wire protocol used to talk to the collector.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Protocol {
    /// OTLP over gRPC.
    #[default]
    Grpc,
    /// OTLP over HTTP with protobuf payloads.
    HttpBinary,
    /// OTLP over HTTP with JSON payloads.
    HttpJson,
}

impl Protocol {
    /// Read [`OTEL_EXPORTER_OTLP_PROTOCOL`]. Returns `Ok(None)` when unset.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        match env::var(OTEL_EXPORTER_OTLP_PROTOCOL) {
            Ok(value) => value.trim().parse().map(Some),
            Err(_) => Ok(None),
        }
    }

    fn is_enabled(self) -> bool {
        match self {
            Protocol::Grpc => cfg!(feature = "grpc-tonic"),
            Protocol::HttpBinary => cfg!(feature = "http-proto"),
            Protocol::HttpJson => cfg!(feature = "http-json"),
        }
    }

    fn default_endpoint(self) -> &'static str {
        match self {
            Protocol::Grpc => OTEL_EXPORTER_OTLP_GRPC_ENDPOINT_DEFAULT,
            Protocol::HttpBinary | Protocol::HttpJson => OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Grpc => OTEL_EXPORTER_OTLP_PROTOCOL_GRPC,
            Protocol::HttpBinary => OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF,
            Protocol::HttpJson => OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON,
        })
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            OTEL_EXPORTER_OTLP_PROTOCOL_GRPC => Ok(Protocol::Grpc),
            OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF => Ok(Protocol::HttpBinary),
            OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON => Ok(Protocol::HttpJson),
            other => Err(ConfigError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Configuration for the OTLP exporters.
#[derive(Clone, Debug, Default)]
pub struct ExportConfig {
    /// Base address of the collector. HTTP exporters append the signal path
    /// (`/v1/traces`, `/v1/logs`).
    ///
    /// Note: Programmatically setting this will override any value set via the environment variable.
    pub endpoint: Option<String>,

    /// Headers sent with every request, on top of the environment headers.
    pub headers: HashMap<String, String>,

    /// The protocol to use. `None` reads [`OTEL_EXPORTER_OTLP_PROTOCOL`] and
    /// falls back to gRPC.
    pub protocol: Option<Protocol>,

    /// The timeout of a single request. The default value is 10 seconds.
    ///
    /// Note: Programmatically setting this will override any value set via the environment variable.
    pub timeout: Option<Duration>,
}

/// Environment variables and paths of one signal.
struct Signal {
    name: &'static str,
    endpoint_var: &'static str,
    headers_var: &'static str,
    timeout_var: &'static str,
    http_path: &'static str,
}

const TRACES: Signal = Signal {
    name: "traces",
    endpoint_var: OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
    headers_var: OTEL_EXPORTER_OTLP_TRACES_HEADERS,
    timeout_var: OTEL_EXPORTER_OTLP_TRACES_TIMEOUT,
    http_path: "/v1/traces",
};

const LOGS: Signal = Signal {
    name: "logs",
    endpoint_var: OTEL_EXPORTER_OTLP_LOGS_ENDPOINT,
    headers_var: OTEL_EXPORTER_OTLP_LOGS_HEADERS,
    timeout_var: OTEL_EXPORTER_OTLP_LOGS_TIMEOUT,
    http_path: "/v1/logs",
};

/// Fully resolved settings of one exporter.
#[derive(Debug)]
pub(crate) struct ResolvedConfig {
    pub(crate) endpoint: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) protocol: Protocol,
    pub(crate) timeout: Duration,
}

/// Builder for [`OtlpSpanExporter`] and [`OtlpLogExporter`].
#[derive(Clone, Debug, Default)]
pub struct OtlpExporterBuilder {
    config: ExportConfig,
    retry: RetryPolicy,
}

impl OtlpExporterBuilder {
    /// A builder with nothing set programmatically.
    pub fn new() -> Self {
        OtlpExporterBuilder::default()
    }

    /// Set the base address of the collector.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    /// Set the protocol to use when communicating with the collector.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.config.protocol = Some(protocol);
        self
    }

    /// Set the timeout of a single request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Add a header. The value is percent-decoded when possible.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        self.config
            .headers
            .insert(key.into(), url_decode(&value).unwrap_or(value));
        self
    }

    /// Add several headers.
    pub fn with_headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        headers
            .into_iter()
            .fold(self, |builder, (k, v)| builder.with_header(k, v))
    }

    /// Retry failed exports with the given policy. The default is a single
    /// attempt.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set export config. This will override all previous configurations.
    pub fn with_export_config(mut self, config: ExportConfig) -> Self {
        self.config = config;
        self
    }

    /// The configuration collected so far.
    pub fn export_config(&self) -> &ExportConfig {
        &self.config
    }

    /// Build an exporter for spans.
    pub fn build_span_exporter(self) -> Result<OtlpSpanExporter, ConfigError> {
        let transport = self.build_transport(&TRACES)?;
        Ok(OtlpSpanExporter {
            transport: Some(transport),
            retry: self.retry,
        })
    }

    /// Build an exporter for log records.
    pub fn build_log_exporter(self) -> Result<OtlpLogExporter, ConfigError> {
        let transport = self.build_transport(&LOGS)?;
        Ok(OtlpLogExporter {
            transport: Some(transport),
            retry: self.retry,
        })
    }

    fn resolve(&self, signal: &Signal) -> Result<ResolvedConfig, ConfigError> {
        let protocol = match self.config.protocol {
            Some(protocol) => protocol,
            None => Protocol::from_env()?.unwrap_or_default(),
        };
        if !protocol.is_enabled() {
            return Err(ConfigError::UnsupportedProtocol(protocol.to_string()));
        }

        let path = match protocol {
            Protocol::Grpc => "",
            Protocol::HttpBinary | Protocol::HttpJson => signal.http_path,
        };
        let endpoint = resolve_endpoint(
            signal.endpoint_var,
            path,
            self.config.endpoint.as_deref(),
            protocol.default_endpoint(),
        )?;
        let timeout = resolve_timeout(signal.timeout_var, self.config.timeout.as_ref());
        let headers = resolve_headers(signal.headers_var, &self.config.headers)?;

        pipeline_debug!(
            name: "Exporter.Configured",
            signal = signal.name,
            protocol = format!("{protocol}"),
            endpoint = format!("{endpoint}"),
            timeout_in_millisecs = format!("{}", timeout.as_millis())
        );

        Ok(ResolvedConfig {
            endpoint,
            headers,
            protocol,
            timeout,
        })
    }

    fn build_transport(&self, signal: &Signal) -> Result<Transport, ConfigError> {
        let config = self.resolve(signal)?;
        match config.protocol {
            #[cfg(feature = "grpc-tonic")]
            Protocol::Grpc => grpc::GrpcClient::new(config, signal.name).map(Transport::Grpc),
            #[cfg(any(feature = "http-proto", feature = "http-json"))]
            Protocol::HttpBinary | Protocol::HttpJson => {
                http_client::HttpClient::new(config).map(Transport::Http)
            }
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// The client an exporter sends its requests through.
#[derive(Debug)]
enum Transport {
    #[cfg(feature = "grpc-tonic")]
    Grpc(grpc::GrpcClient),
    #[cfg(any(feature = "http-proto", feature = "http-json"))]
    Http(http_client::HttpClient),
    #[cfg(not(any(feature = "grpc-tonic", feature = "http-proto", feature = "http-json")))]
    #[allow(dead_code)]
    Unavailable,
}

impl Transport {
    async fn send_traces(
        &self,
        request: opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest,
    ) -> ExportResult {
        match self {
            #[cfg(feature = "grpc-tonic")]
            Transport::Grpc(client) => client.export_traces(request).await,
            #[cfg(any(feature = "http-proto", feature = "http-json"))]
            Transport::Http(client) => client.send(&request),
            #[cfg(not(any(feature = "grpc-tonic", feature = "http-proto", feature = "http-json")))]
            Transport::Unavailable => {
                let _ = request;
                Err(ExportError::Transport("no transport feature enabled".into()))
            }
        }
    }

    async fn send_logs(
        &self,
        request: opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest,
    ) -> ExportResult {
        match self {
            #[cfg(feature = "grpc-tonic")]
            Transport::Grpc(client) => client.export_logs(request).await,
            #[cfg(any(feature = "http-proto", feature = "http-json"))]
            Transport::Http(client) => client.send(&request),
            #[cfg(not(any(feature = "grpc-tonic", feature = "http-proto", feature = "http-json")))]
            Transport::Unavailable => {
                let _ = request;
                Err(ExportError::Transport("no transport feature enabled".into()))
            }
        }
    }
}

/// Sends spans to an OTLP collector.
#[derive(Debug)]
pub struct OtlpSpanExporter {
    transport: Option<Transport>,
    retry: RetryPolicy,
}

impl OtlpSpanExporter {
    /// Shortcut for [`OtlpExporterBuilder::new`].
    pub fn builder() -> OtlpExporterBuilder {
        OtlpExporterBuilder::new()
    }
}

impl SpanExporter for OtlpSpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> ExportResult {
        let transport = self.transport.as_ref().ok_or(ExportError::AlreadyShutdown)?;
        let request = transform::traces_request(batch);
        retry::retry_with_backoff(self.retry, "traces", || {
            transport.send_traces(request.clone())
        })
        .await
    }

    fn shutdown(&mut self) -> ExportResult {
        match self.transport.take() {
            Some(_) => Ok(()),
            None => Err(ExportError::AlreadyShutdown),
        }
    }
}

/// Sends log records to an OTLP collector.
#[derive(Debug)]
pub struct OtlpLogExporter {
    transport: Option<Transport>,
    retry: RetryPolicy,
}

impl OtlpLogExporter {
    /// Shortcut for [`OtlpExporterBuilder::new`].
    pub fn builder() -> OtlpExporterBuilder {
        OtlpExporterBuilder::new()
    }
}

impl LogExporter for OtlpLogExporter {
    async fn export(&self, batch: Vec<LogRecord>) -> ExportResult {
        let transport = self.transport.as_ref().ok_or(ExportError::AlreadyShutdown)?;
        let request = transform::logs_request(batch);
        retry::retry_with_backoff(self.retry, "logs", || transport.send_logs(request.clone()))
            .await
    }

    fn shutdown(&mut self) -> ExportResult {
        match self.transport.take() {
            Some(_) => Ok(()),
            None => Err(ExportError::AlreadyShutdown),
        }
    }
}

/// default user-agent headers
fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "telemetry-pipeline/{}",
        env!("CARGO_PKG_VERSION")
    )) {
        headers.insert(http::header::USER_AGENT, value);
    }
    headers
}

/// Default headers, then the environment headers, then the programmatic ones.
/// Malformed environment entries are skipped. A malformed programmatic header
/// is an error.
fn resolve_headers(
    signal_headers_var: &str,
    provided: &HashMap<String, String>,
) -> Result<HeaderMap, ConfigError> {
    let mut headers = default_headers();

    // signal specific env var is preferred over general
    if let Ok(input) =
        env::var(signal_headers_var).or_else(|_| env::var(OTEL_EXPORTER_OTLP_HEADERS))
    {
        add_header_from_string(&input, &mut headers);
    }

    for (key, value) in provided {
        let name = HeaderName::from_str(key.trim())
            .map_err(|_| ConfigError::InvalidHeader(key.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(key.clone()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn add_header_from_string(input: &str, headers: &mut HeaderMap) {
    for (key, value) in parse_header_string(input) {
        match (HeaderName::from_str(key), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => {
                pipeline_warn!(name: "Exporter.InvalidEnvHeaderSkipped", key = key);
            }
        }
    }
}

fn build_endpoint_uri(endpoint: &str, path: &str) -> Result<Uri, ConfigError> {
    let path = if endpoint.ends_with('/') && path.starts_with('/') {
        &path[1..]
    } else {
        path
    };
    let full = format!("{endpoint}{path}");
    let uri: Uri = full
        .parse()
        .map_err(|e: http::uri::InvalidUri| ConfigError::InvalidUri(full.clone(), e.to_string()))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(ConfigError::InvalidUri(
            full,
            "missing scheme or authority".into(),
        ));
    }
    Ok(uri)
}

/// Programmatic endpoint (plus path), then the signal variable verbatim, then
/// the generic variable (plus path), then the protocol default (plus path).
/// A variable that is set but does not parse is an error, not skipped.
fn resolve_endpoint(
    signal_endpoint_var: &str,
    signal_endpoint_path: &str,
    provided_endpoint: Option<&str>,
    default_endpoint: &str,
) -> Result<Uri, ConfigError> {
    if let Some(endpoint) = provided_endpoint.filter(|e| !e.trim().is_empty()) {
        return build_endpoint_uri(endpoint.trim(), signal_endpoint_path);
    }

    // per signal env var is not modified
    if let Some(endpoint) = non_empty_env(signal_endpoint_var) {
        return build_endpoint_uri(&endpoint, "");
    }

    if let Some(endpoint) = non_empty_env(OTEL_EXPORTER_OTLP_ENDPOINT) {
        return build_endpoint_uri(&endpoint, signal_endpoint_path);
    }

    build_endpoint_uri(default_endpoint, signal_endpoint_path)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_timeout(signal_timeout_var: &str, provided_timeout: Option<&Duration>) -> Duration {
    // programmatic configuration overrides any value set via environment variables
    if let Some(timeout) = provided_timeout {
        *timeout
    } else if let Some(timeout) = env::var(signal_timeout_var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
    {
        Duration::from_millis(timeout)
    } else if let Some(timeout) = env::var(OTEL_EXPORTER_OTLP_TIMEOUT)
        .ok()
        .and_then(|s| s.trim().parse().ok())
    {
        Duration::from_millis(timeout)
    } else {
        OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT
    }
}

fn parse_header_string(value: &str) -> impl Iterator<Item = (&str, String)> {
    value
        .split_terminator(',')
        .map(str::trim)
        .filter_map(parse_header_key_value_string)
}

fn url_decode(value: &str) -> Option<String> {
    let mut result = String::with_capacity(value.len());
    let mut chars_to_decode = Vec::<u8>::new();
    let mut all_chars = value.chars();

    loop {
        let ch = all_chars.next();

        if ch == Some('%') {
            chars_to_decode.push(
                u8::from_str_radix(&format!("{}{}", all_chars.next()?, all_chars.next()?), 16)
                    .ok()?,
            );
            continue;
        }

        if !chars_to_decode.is_empty() {
            result.push_str(std::str::from_utf8(&chars_to_decode).ok()?);
            chars_to_decode.clear();
        }

        match ch {
            Some(c) => result.push(c),
            None => return Some(result),
        }
    }
}

fn parse_header_key_value_string(key_value_string: &str) -> Option<(&str, String)> {
    key_value_string
        .split_once('=')
        .map(|(key, value)| {
            (
                key.trim(),
                url_decode(value.trim()).unwrap_or_else(|| value.to_string()),
            )
        })
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
}
