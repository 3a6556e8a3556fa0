use oauth2::Scope as OAuth2Scope;
use std::fmt;
use std::iter::FromIterator;
use std::str::FromStr;

/// Whether a scope grants access to company data or to the user's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeCategory {
    Data,
    Identity,
}

/// Scopes understood by the authorization server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeType {
    /// Read/write access to the accounting API.
    Accounting,
    /// Access to the payments API.
    Payments,
    OpenId,
    Profile,
    Email,
    Phone,
    Address,
}

impl ScopeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accounting => "com.intuit.quickbooks.accounting",
            Self::Payments => "com.intuit.quickbooks.payment",
            Self::OpenId => "openid",
            Self::Profile => "profile",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Address => "address",
        }
    }

    /// Get the category of this scope
    #[must_use]
    pub fn category(self) -> ScopeCategory {
        match self {
            Self::Accounting | Self::Payments => ScopeCategory::Data,
            Self::OpenId | Self::Profile | Self::Email | Self::Phone | Self::Address => {
                ScopeCategory::Identity
            }
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing a scope from a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScopeError(String);

impl fmt::Display for ParseScopeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid scope string: {}", self.0)
    }
}

impl std::error::Error for ParseScopeError {}

impl FromStr for ScopeType {
    type Err = ParseScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "com.intuit.quickbooks.accounting" => Ok(Self::Accounting),
            "com.intuit.quickbooks.payment" => Ok(Self::Payments),
            "openid" => Ok(Self::OpenId),
            "profile" => Ok(Self::Profile),
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            "address" => Ok(Self::Address),
            _ => Err(ParseScopeError(s.to_string())),
        }
    }
}

/// A set of scopes requested during authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    scopes: Vec<ScopeType>,
}

impl Scope {
    /// Creates a new scope collection
    #[must_use]
    pub fn new(scope_types: Vec<ScopeType>) -> Self {
        scope_types.into_iter().collect()
    }

    /// Creates a scope from a single scope type
    #[must_use]
    pub fn from_type(scope_type: ScopeType) -> Self {
        Self {
            scopes: vec![scope_type],
        }
    }

    /// Parses a space separated scope string as returned by the token endpoint.
    pub fn parse(scopes: &str) -> Result<Self, ParseScopeError> {
        scopes.split_whitespace().map(ScopeType::from_str).collect()
    }

    /// Add a scope to the collection. Duplicates are ignored.
    #[must_use]
    pub fn add(mut self, scope_type: ScopeType) -> Self {
        if !self.scopes.contains(&scope_type) {
            self.scopes.push(scope_type);
        }
        self
    }

    /// Combine with another scope collection
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        other.scopes.into_iter().fold(self, Self::add)
    }

    #[must_use]
    pub fn contains(&self, scope_type: ScopeType) -> bool {
        self.scopes.contains(&scope_type)
    }

    /// Whether the authorization will also return an OpenID `id_token`.
    #[must_use]
    pub fn requests_identity(&self) -> bool {
        self.contains(ScopeType::OpenId)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ScopeType> + '_ {
        self.scopes.iter().copied()
    }

    /// Converts the scopes into OAuth2 scopes.
    #[must_use]
    pub fn into_oauth2_scopes(self) -> Vec<OAuth2Scope> {
        self.scopes
            .into_iter()
            .map(|st| OAuth2Scope::new(st.as_str().to_string()))
            .collect()
    }

    /// Access to the accounting API only.
    #[must_use]
    pub fn accounting() -> Self {
        Self::from_type(ScopeType::Accounting)
    }

    /// Access to the payments API only.
    #[must_use]
    pub fn payments() -> Self {
        Self::from_type(ScopeType::Payments)
    }

    /// All OpenID Connect scopes.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(vec![
            ScopeType::OpenId,
            ScopeType::Profile,
            ScopeType::Email,
            ScopeType::Phone,
            ScopeType::Address,
        ])
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::accounting()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope_strs: Vec<&str> = self.scopes.iter().map(|s| s.as_str()).collect();
        write!(f, "{}", scope_strs.join(" "))
    }
}

impl From<ScopeType> for Scope {
    fn from(scope_type: ScopeType) -> Self {
        Self::from_type(scope_type)
    }
}

impl From<Vec<ScopeType>> for Scope {
    fn from(scope_types: Vec<ScopeType>) -> Self {
        Self::new(scope_types)
    }
}

impl FromIterator<ScopeType> for Scope {
    fn from_iter<I: IntoIterator<Item = ScopeType>>(iter: I) -> Self {
        iter.into_iter().fold(
            Self {
                scopes: Vec::new(),
            },
            Self::add,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_with_spaces() {
        let scope = Scope::accounting().combine(Scope::identity());
        assert_eq!(
            scope.to_string(),
            "com.intuit.quickbooks.accounting openid profile email phone address"
        );
        assert!(scope.requests_identity());
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let scope = Scope::accounting()
            .add(ScopeType::Accounting)
            .add(ScopeType::OpenId);
        assert_eq!(scope.iter().count(), 2);
    }

    #[test]
    fn test_parse_round_trip() {
        let scope = Scope::parse("com.intuit.quickbooks.accounting openid").unwrap();
        assert!(scope.contains(ScopeType::Accounting));
        assert!(scope.contains(ScopeType::OpenId));
        assert_eq!(ScopeType::OpenId.category(), ScopeCategory::Identity);
        assert!(Scope::parse("accounting.transactions").is_err());
    }
}
