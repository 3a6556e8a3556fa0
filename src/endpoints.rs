use std::fmt;

use url::Url;

use crate::error::{Error, Result};
use crate::registry::EntityType;

/// A typed representation of the data API endpoints.
///
/// Every endpoint lives under `{base}/v3/company/{realmId}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Create and update target.
    Collection(EntityType),
    Record(EntityType, String),
    /// `?operation=delete`
    Delete(EntityType),
    /// `?operation=void`
    Void(EntityType),
    Send {
        entity: EntityType,
        id: String,
        send_to: Option<String>,
    },
    Pdf(EntityType, String),
    Query(String),
}

impl Endpoint {
    /// Builds the absolute URL for this endpoint against `base`.
    pub fn to_url(&self, base: &Url, realm_id: &str) -> Result<Url> {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| Error::InvalidEndpoint)?;
            segments.pop_if_empty().extend(["v3", "company", realm_id]);
            match self {
                Self::Collection(entity) | Self::Delete(entity) | Self::Void(entity) => {
                    segments.push(entity.schema().resource);
                }
                Self::Record(entity, id) => {
                    segments.extend([entity.schema().resource, id.as_str()]);
                }
                Self::Send { entity, id, .. } => {
                    segments.extend([entity.schema().resource, id.as_str(), "send"]);
                }
                Self::Pdf(entity, id) => {
                    segments.extend([entity.schema().resource, id.as_str(), "pdf"]);
                }
                Self::Query(_) => {
                    segments.push("query");
                }
            }
        }

        match self {
            Self::Delete(_) => {
                url.query_pairs_mut().append_pair("operation", "delete");
            }
            Self::Void(_) => {
                url.query_pairs_mut().append_pair("operation", "void");
            }
            Self::Send {
                send_to: Some(email),
                ..
            } => {
                url.query_pairs_mut().append_pair("sendTo", email);
            }
            Self::Query(statement) => {
                url.query_pairs_mut().append_pair("query", statement);
            }
            _ => {}
        }
        Ok(url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection(entity) => write!(f, "{}", entity.schema().resource),
            Self::Record(entity, id) => write!(f, "{}/{id}", entity.schema().resource),
            Self::Delete(entity) => write!(f, "{}?operation=delete", entity.schema().resource),
            Self::Void(entity) => write!(f, "{}?operation=void", entity.schema().resource),
            Self::Send { entity, id, .. } => write!(f, "{}/{id}/send", entity.schema().resource),
            Self::Pdf(entity, id) => write!(f, "{}/{id}/pdf", entity.schema().resource),
            Self::Query(_) => write!(f, "query"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://sandbox-quickbooks.api.intuit.com/").unwrap()
    }

    #[test]
    fn test_record_url() {
        let url = Endpoint::Record(EntityType::Invoice, "130".to_string())
            .to_url(&base(), "9991")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sandbox-quickbooks.api.intuit.com/v3/company/9991/invoice/130"
        );
    }

    #[test]
    fn test_delete_url() {
        let url = Endpoint::Delete(EntityType::Bill).to_url(&base(), "9991").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sandbox-quickbooks.api.intuit.com/v3/company/9991/bill?operation=delete"
        );
    }

    #[test]
    fn test_ids_are_escaped() {
        let url = Endpoint::Record(EntityType::Customer, "a/b".to_string())
            .to_url(&base(), "9991")
            .unwrap();
        assert!(url.path().ends_with("/customer/a%2Fb"));
    }

    #[test]
    fn test_query_and_send_urls() {
        let query = Endpoint::Query("select * from Invoice".to_string())
            .to_url(&base(), "1")
            .unwrap();
        assert_eq!(query.path(), "/v3/company/1/query");
        assert_eq!(
            query.query_pairs().next().map(|(k, v)| (k.into_owned(), v.into_owned())),
            Some(("query".to_string(), "select * from Invoice".to_string()))
        );

        let send = Endpoint::Send {
            entity: EntityType::Invoice,
            id: "5".to_string(),
            send_to: Some("a@example.com".to_string()),
        }
        .to_url(&base(), "1")
        .unwrap();
        assert_eq!(send.path(), "/v3/company/1/invoice/5/send");
        assert_eq!(send.query(), Some("sendTo=a%40example.com"));
    }

    #[test]
    fn test_base_without_trailing_slash() {
        let base = Url::parse("http://127.0.0.1:8080").unwrap();
        let url = Endpoint::Pdf(EntityType::Estimate, "9".to_string())
            .to_url(&base, "1")
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/v3/company/1/estimate/9/pdf");
    }
}
