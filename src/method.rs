//! HTTP method as a typed enum, and how each method is dispatched.
//!
//! sluice does not route per method. It routes per *kind* of request:
//!
//! | Method | Kind | Table |
//! |---|---|---|
//! | `GET`, `HEAD` | [`Kind::Query`] | query table |
//! | `POST`, `PUT`, `PATCH`, `DELETE` | [`Kind::Mutation`] | mutation table |
//! | `OPTIONS` | [`Kind::Preflight`] | none, global middleware only |
//! | `CONNECT`, `TRACE` | [`Kind::Unsupported`] | none, `405` |
//!
//! Method strings that are not RFC 9110 methods never parse and are answered
//! with `405 Method Not Allowed` before any middleware runs.

use std::fmt;
use std::str::FromStr;

/// A known HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

/// Which route table, if any, a method resolves against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// Read-style request, resolved against the query table.
    Query,
    /// Write-style request, resolved against the mutation table.
    Mutation,
    /// CORS pre-flight. Only global middleware sees it.
    Preflight,
    Unsupported,
}

/// Value of the `Allow` header sent with `405` responses.
pub(crate) const ALLOWED: &str = "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS";

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
        }
    }

    pub fn kind(self) -> Kind {
        match self {
            Self::Get | Self::Head => Kind::Query,
            Self::Post | Self::Put | Self::Patch | Self::Delete => Kind::Mutation,
            Self::Options => Kind::Preflight,
            Self::Connect | Self::Trace => Kind::Unsupported,
        }
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "DELETE"  => Ok(Self::Delete),
            "GET"     => Ok(Self::Get),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "TRACE"   => Ok(Self::Trace),
            _         => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_style_methods_use_the_query_table() {
        assert_eq!(Method::Get.kind(), Kind::Query);
        assert_eq!(Method::Head.kind(), Kind::Query);
    }

    #[test]
    fn write_style_methods_use_the_mutation_table() {
        for m in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert_eq!(m.kind(), Kind::Mutation, "{m}");
        }
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert_eq!("GET".parse::<Method>(), Ok(Method::Get));
        assert!("get".parse::<Method>().is_err());
        assert!("PROPFIND".parse::<Method>().is_err());
    }
}
