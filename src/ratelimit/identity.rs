//! Identity resolution strategies.
//!
//! An identity is the string a request is counted under. The empty string is
//! meaningful: it tells the limiter that no limit applies to the request.

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use serde_json::Value;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Header consulted first by [`IpIdentity`] when running behind a proxy.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Errors raised while extracting an identity from a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("cannot split remote address {addr:?} into host and port")]
    AddressParse { addr: String },

    #[error("request context value {key:?} is a {found}, expected a string")]
    TypeMismatch { key: String, found: &'static str },
}

/// Extracts the identity a request is rate limited by.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, parts: &Parts) -> Result<String, IdentityError>;
}

/// Uses the value of a request header verbatim.
///
/// A missing header resolves to the empty identity. Bytes that are not valid
/// UTF-8 are replaced rather than dropped, so every present value is counted.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    name: String,
}

impl HeaderIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, parts: &Parts) -> Result<String, IdentityError> {
        Ok(parts
            .headers
            .get(self.name.as_str())
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .unwrap_or_default())
    }
}

/// The remote address of a connection as reported by a transport that does
/// not provide axum's `ConnectInfo`, e.g. `"127.0.0.1:9999"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

/// Identifies callers by source IP address.
///
/// The first entry of `X-Forwarded-For` that parses as an IP address wins.
/// Otherwise the host part of the connection's remote address is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpIdentity;

impl IpIdentity {
    fn forwarded_for(parts: &Parts) -> Option<IpAddr> {
        parts
            .headers
            .get_all(FORWARDED_FOR_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .find_map(|entry| entry.trim().parse::<IpAddr>().ok())
    }
}

impl IdentityResolver for IpIdentity {
    fn resolve(&self, parts: &Parts) -> Result<String, IdentityError> {
        if let Some(ip) = Self::forwarded_for(parts) {
            return Ok(ip.to_string());
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(addr.ip().to_string());
        }

        match parts.extensions.get::<RemoteAddr>() {
            Some(RemoteAddr(addr)) => split_host(addr),
            None => Err(IdentityError::AddressParse {
                addr: String::new(),
            }),
        }
    }
}

/// Host part of a `host:port` address.
fn split_host(addr: &str) -> Result<String, IdentityError> {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Ok(socket.ip().to_string());
    }

    match addr.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty()
                && !host.contains(':')
                && !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Ok(host.to_string())
        }
        _ => Err(IdentityError::AddressParse {
            addr: addr.to_string(),
        }),
    }
}

/// Per-request values attached by earlier middleware, such as an
/// authenticated user id.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    values: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`RequestContext::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Reads the identity from a [`RequestContext`] extension.
#[derive(Debug, Clone)]
pub struct ContextIdentity {
    key: String,
}

impl ContextIdentity {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl IdentityResolver for ContextIdentity {
    fn resolve(&self, parts: &Parts) -> Result<String, IdentityError> {
        let value = parts
            .extensions
            .get::<RequestContext>()
            .and_then(|context| context.get(&self.key));

        match value {
            None => Ok(String::new()),
            Some(Value::String(identity)) => Ok(identity.clone()),
            Some(other) => Err(IdentityError::TypeMismatch {
                key: self.key.clone(),
                found: json_kind(other),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
