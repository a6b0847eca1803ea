use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use relay_metrics::{ParsePrecisionError, Precision};
use url::form_urlencoded;

/// Query parameters of a write request.
///
/// The parameters are forwarded to time-series backends, so all of them are retained, not only
/// the ones the relay interprets itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteQuery {
    params: Vec<(String, String)>,
}

impl WriteQuery {
    pub fn parse(query: &str) -> Self {
        let params = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Self { params }
    }

    /// Returns the first value of a parameter, treating empty values as missing.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Replaces all values of a parameter.
    pub fn set(&mut self, key: &str, value: &str) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_owned(), value.to_owned()));
    }

    /// The target database.
    pub fn db(&self) -> Option<&str> {
        self.get("db")
    }

    /// The timestamp precision, nanoseconds if not given.
    pub fn precision(&self) -> Result<Precision, ParsePrecisionError> {
        self.get("precision").unwrap_or_default().parse()
    }

    /// Sets the retention policy if the request does not specify one.
    pub fn default_retention_policy(&mut self, rp: Option<&str>) {
        let Some(rp) = rp.filter(|rp| !rp.is_empty()) else {
            return;
        };

        if self.get("rp").is_none() {
            self.set("rp", rp);
        }
    }

    /// Encodes the parameters sorted by key, keeping the order of repeated keys.
    pub fn encode(&self) -> String {
        let mut params: Vec<_> = self.params.iter().collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish()
    }
}

impl<S> FromRequestParts<S> for WriteQuery
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::parse(parts.uri.query().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_encode() {
        let query = WriteQuery::parse("precision=s&db=my%20db&u=admin");
        assert_eq!(query.db(), Some("my db"));
        assert_eq!(query.precision(), Ok(Precision::Seconds));
        assert_eq!(query.encode(), "db=my+db&precision=s&u=admin");
    }

    #[test]
    fn test_default_precision() {
        let query = WriteQuery::parse("db=x&precision=");
        assert_eq!(query.precision(), Ok(Precision::Nanoseconds));
        assert!(WriteQuery::parse("precision=fortnight").precision().is_err());
    }

    #[test]
    fn test_default_retention_policy() {
        let mut query = WriteQuery::parse("db=x");
        query.default_retention_policy(Some("weekly"));
        assert_eq!(query.encode(), "db=x&rp=weekly");

        let mut query = WriteQuery::parse("db=x&rp=daily");
        query.default_retention_policy(Some("weekly"));
        assert_eq!(query.encode(), "db=x&rp=daily");

        let mut query = WriteQuery::parse("db=x&rp=");
        query.default_retention_policy(Some("weekly"));
        assert_eq!(query.encode(), "db=x&rp=weekly");

        let mut query = WriteQuery::parse("db=x");
        query.default_retention_policy(None);
        assert_eq!(query.encode(), "db=x");
    }

    #[test]
    fn test_missing_db() {
        assert_eq!(WriteQuery::parse("db=").db(), None);
        assert_eq!(WriteQuery::parse("").db(), None);
    }
}
