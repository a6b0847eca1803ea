use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, header};

use crate::constants;

/// Operating system family of the sending machine, used in hierarchy namespaces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceType {
    #[default]
    Unix,
    Windows,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::Windows => "windows",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the sender of a write request, taken from request headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// The machine that sent the request, if identified.
    pub machine_id: Option<String>,
    /// The organization owning the machine, `Unauthorized` if unknown.
    pub org_id: String,
    pub source_type: SourceType,
    /// The `Authorization` header, forwarded unchanged to time-series backends.
    pub auth: Option<HeaderValue>,
}

impl Identity {
    /// Returns the machine id, or an empty string for unidentified requests.
    pub fn machine(&self) -> &str {
        self.machine_id.as_deref().unwrap_or_default()
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let source_type = match get(constants::SOURCE_TYPE_HEADER) {
            Some("windows") => SourceType::Windows,
            _ => SourceType::Unix,
        };

        Self {
            machine_id: get(constants::MACHINE_ID_HEADER).map(str::to_owned),
            org_id: get(constants::ORG_ID_HEADER)
                .unwrap_or(constants::UNAUTHORIZED_ORG)
                .to_owned(),
            source_type,
            auth: headers.get(header::AUTHORIZATION).cloned(),
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
