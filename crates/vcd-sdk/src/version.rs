use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// API version negotiated with the remote, e.g. `37.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid API version '{0}', expected '<major>.<minor>'")]
pub struct VersionParseError(pub String);

impl ApiVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn parse(value: &str) -> Result<Self, VersionParseError> {
        let err = || VersionParseError(value.to_string());
        let (major, minor) = match value.trim().split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (value.trim(), "0"),
        };
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }

    pub fn at_least(self, minimum: ApiVersion) -> bool {
        self >= minimum
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiVersion::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_numerically_not_lexically() {
        let v37_10 = ApiVersion::parse("37.10").unwrap();
        let v37_2 = ApiVersion::parse("37.2").unwrap();
        assert!(v37_10 > v37_2);
        assert!(ApiVersion::parse("38").unwrap().at_least(ApiVersion::new(38, 0)));
        assert!(ApiVersion::parse("x.1").is_err());
    }
}
