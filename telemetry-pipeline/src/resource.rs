//! Representations of entities producing telemetry.
//!
//! A [`Resource`] is an immutable set of string attributes describing the
//! process that emits spans and log records, for example the service name and
//! version. It is created once, when the pipeline is built, and every span and
//! log record holds a cheap clone of it: the attributes live behind an [`Arc`]
//! and are never copied.
//!
//! Resources can be built from code, from the environment, or both:
//!
//! * `OTEL_SERVICE_NAME` sets `service.name`.
//! * `OTEL_RESOURCE_ATTRIBUTES` holds `key1=value1,key2=value2` pairs.
//!
//! Values set through [`ResourceBuilder`] take precedence over values read
//! from the environment.
use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

/// Environment variable holding additional resource attributes.
pub const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
/// Environment variable holding the service name.
pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Logical name of the service.
pub const SERVICE_NAME: &str = "service.name";
/// Version string of the service.
pub const SERVICE_VERSION: &str = "service.version";

const UNKNOWN_SERVICE: &str = "unknown_service";

/// An immutable representation of the entity producing telemetry as attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resource {
    attrs: Arc<BTreeMap<String, String>>,
}

impl Resource {
    /// Create a resource from the given attributes, without reading the
    /// environment.
    ///
    /// Later duplicates of a key overwrite earlier ones. An empty key, or a key
    /// containing control characters, is rejected.
    pub fn new<I, K, V>(attributes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut attrs = BTreeMap::new();
        for (key, value) in attributes {
            let key = key.into();
            validate_key(&key)?;
            attrs.insert(key, value.into());
        }
        Ok(Resource {
            attrs: Arc::new(attrs),
        })
    }

    /// Creates an empty resource.
    pub fn empty() -> Self {
        Resource::default()
    }

    /// Creates a [`ResourceBuilder`] pre-populated from the environment.
    ///
    /// `service.name` is always present; it falls back to `unknown_service`
    /// when neither the environment nor the builder provides one.
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            detect_env: true,
            attributes: Vec::new(),
        }
    }

    /// Creates a [`ResourceBuilder`] that does not read the environment.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            detect_env: false,
            attributes: Vec::new(),
        }
    }

    /// Reads the resource described by `OTEL_SERVICE_NAME` and
    /// `OTEL_RESOURCE_ATTRIBUTES`.
    pub fn from_env() -> Self {
        let mut attrs: BTreeMap<String, String> = env::var(OTEL_RESOURCE_ATTRIBUTES)
            .map(|s| parse_resource_attributes(&s).collect())
            .unwrap_or_default();

        let service_name = env::var(OTEL_SERVICE_NAME)
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| attrs.remove(SERVICE_NAME))
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());
        attrs.insert(SERVICE_NAME.to_string(), service_name);

        Resource {
            attrs: Arc::new(attrs),
        }
    }

    /// Create a new resource by combining two resources.
    ///
    /// Keys from `other` overwrite keys from `self`.
    pub fn merge(&self, other: &Resource) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut attrs = (*self.attrs).clone();
        attrs.extend(other.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Resource {
            attrs: Arc::new(attrs),
        }
    }

    /// Retrieve the value for the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// The `service.name` attribute, if set.
    pub fn service_name(&self) -> Option<&str> {
        self.get(SERVICE_NAME)
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Returns `true` if the resource contains no attributes.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Iterate over the attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether both handles share the same attribute storage.
    pub(crate) fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.attrs, &other.attrs)
    }
}

/// Builder for [`Resource`].
#[derive(Debug)]
pub struct ResourceBuilder {
    detect_env: bool,
    attributes: Vec<(String, String)>,
}

impl ResourceBuilder {
    /// Set the `service.name` attribute.
    pub fn with_service_name(self, name: impl Into<String>) -> Self {
        self.with_attribute(SERVICE_NAME, name)
    }

    /// Add a single attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Add several attributes.
    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Create a [`Resource`], failing on malformed attributes.
    pub fn build(self) -> Result<Resource, ConfigError> {
        let configured = Resource::new(self.attributes)?;
        if self.detect_env {
            Ok(Resource::from_env().merge(&configured))
        } else {
            Ok(configured)
        }
    }
}

fn validate_key(key: &str) -> Result<(), ConfigError> {
    if key.trim().is_empty() {
        return Err(ConfigError::InvalidResource {
            key: key.to_string(),
            reason: "key must not be empty",
        });
    }
    if key.chars().any(char::is_control) {
        return Err(ConfigError::InvalidResource {
            key: key.to_string(),
            reason: "key must not contain control characters",
        });
    }
    Ok(())
}

/// Parse `key1=value1,key2=value2`. Malformed entries are skipped.
fn parse_resource_attributes(s: &str) -> impl Iterator<Item = (String, String)> + '_ {
    s.split_terminator(',').filter_map(|entry| {
        let (key, value) = entry.split_once('=')?;
        let key = key.trim();
        if validate_key(key).is_err() {
            return None;
        }
        Some((key.to_owned(), value.trim().to_owned()))
    })
}
