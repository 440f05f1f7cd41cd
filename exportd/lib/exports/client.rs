use std::{fmt::Debug, net::IpAddr};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a client specification was written, which fixes its priority.
///
/// A match in an earlier class always wins over any match in a later class,
/// regardless of path specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientClass {
    /// An exact host name.
    Host = 0,

    /// An address range in prefix notation.
    Subnetwork = 1,

    /// A glob pattern over host names.
    Wildcard = 2,

    /// A netgroup reference.
    Netgroup = 3,

    /// The anonymous "everyone" specification.
    Anonymous = 4,

    /// A GSS principal name.
    GssName = 5,
}

/// The requesting identity carried by an upcall.
///
/// The kernel usually sends the authenticated domain name; when it is
/// operating on raw addresses the name is `$` followed by an address
/// literal, and the resolved address rides along for address-keyed specs.
#[derive(Debug, Clone)]
pub struct Domain {
    name: String,
    addr: Option<IpAddr>,
}

/// Resolves the address literal of a `$ip` domain.
///
/// Production wires this to the host resolver; the default just parses the
/// literal, which covers every request the kernel actually produces.
pub trait AddrResolver: Send + Sync {
    /// Resolves `literal` to an address, or `None` when it does not parse.
    fn resolve(&self, literal: &str) -> Option<IpAddr>;
}

/// The default literal-parsing resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralAddrResolver;

/// An opaque predicate deciding whether an export covers a requesting
/// domain. Implementations exist per specification style; richer matchers
/// (netgroups, address ranges, GSS principals) plug in from outside.
pub trait ClientSpec: Debug + Send + Sync {
    /// The priority class this specification belongs to.
    fn class(&self) -> ClientClass;

    /// Whether this specification accepts the requesting domain.
    fn matches(&self, domain: &Domain) -> bool;

    /// The specification as written, for logging.
    fn name(&self) -> &str;
}

/// An exact host name specification.
#[derive(Debug, Clone)]
pub struct ExactHost(pub String);

/// A glob (`*`/`?`) specification over host names.
#[derive(Debug, Clone)]
pub struct Wildcard(pub String);

/// The anonymous specification: accepts every domain.
#[derive(Debug, Clone, Copy)]
pub struct Anonymous;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ClientClass {
    /// Number of priority classes.
    pub const COUNT: usize = 6;

    /// All classes in priority order.
    pub const ALL: [ClientClass; Self::COUNT] = [
        ClientClass::Host,
        ClientClass::Subnetwork,
        ClientClass::Wildcard,
        ClientClass::Netgroup,
        ClientClass::Anonymous,
        ClientClass::GssName,
    ];
}

impl Domain {
    /// Builds a domain from the raw request field. `$ip` requests resolve
    /// their address through `resolver`; an unresolvable address yields
    /// `None` and the request is dropped without a reply.
    pub fn from_request(raw: &str, resolver: &dyn AddrResolver) -> Option<Self> {
        match raw.strip_prefix('$') {
            Some(literal) => {
                let addr = resolver.resolve(literal)?;
                Some(Self {
                    name: raw.to_owned(),
                    addr: Some(addr),
                })
            }
            None => Some(Self {
                name: raw.to_owned(),
                addr: None,
            }),
        }
    }

    /// Builds a plain named domain.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: None,
        }
    }

    /// The domain name as the kernel sent it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The domain name with the `$` marker stripped, for logging.
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix('$').unwrap_or(&self.name)
    }

    /// The resolved address of a `$ip` domain.
    pub fn addr(&self) -> Option<IpAddr> {
        self.addr
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], name)
                || (!name.is_empty() && glob_match(pattern, &name[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &name[1..]),
        (Some(p), Some(n)) => p.eq_ignore_ascii_case(n) && glob_match(&pattern[1..], &name[1..]),
        _ => false,
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AddrResolver for LiteralAddrResolver {
    fn resolve(&self, literal: &str) -> Option<IpAddr> {
        literal.parse().ok()
    }
}

impl ClientSpec for ExactHost {
    fn class(&self) -> ClientClass {
        ClientClass::Host
    }

    fn matches(&self, domain: &Domain) -> bool {
        self.0.eq_ignore_ascii_case(domain.name())
    }

    fn name(&self) -> &str {
        &self.0
    }
}

impl ClientSpec for Wildcard {
    fn class(&self) -> ClientClass {
        ClientClass::Wildcard
    }

    fn matches(&self, domain: &Domain) -> bool {
        glob_match(self.0.as_bytes(), domain.name().as_bytes())
    }

    fn name(&self) -> &str {
        &self.0
    }
}

impl ClientSpec for Anonymous {
    fn class(&self) -> ClientClass {
        ClientClass::Anonymous
    }

    fn matches(&self, _domain: &Domain) -> bool {
        true
    }

    fn name(&self) -> &str {
        "*"
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_host_matches_case_insensitively() {
        let spec = ExactHost("client.example.com".into());
        assert!(spec.matches(&Domain::named("CLIENT.example.COM")));
        assert!(!spec.matches(&Domain::named("other.example.com")));
    }

    #[test]
    fn test_wildcard_matching() {
        let spec = Wildcard("*.example.com".into());
        assert!(spec.matches(&Domain::named("a.example.com")));
        assert!(spec.matches(&Domain::named("a.b.example.com")));
        assert!(!spec.matches(&Domain::named("example.com")));
        assert!(!spec.matches(&Domain::named("a.example.org")));

        let spec = Wildcard("host?".into());
        assert!(spec.matches(&Domain::named("host1")));
        assert!(!spec.matches(&Domain::named("host12")));
    }

    #[test]
    fn test_domain_from_request() {
        let resolver = LiteralAddrResolver;
        let plain = Domain::from_request("somehost", &resolver).unwrap();
        assert_eq!(plain.name(), "somehost");
        assert_eq!(plain.addr(), None);

        let addressed = Domain::from_request("$192.0.2.7", &resolver).unwrap();
        assert_eq!(addressed.display_name(), "192.0.2.7");
        assert_eq!(addressed.addr(), Some("192.0.2.7".parse().unwrap()));

        assert!(Domain::from_request("$not-an-address", &resolver).is_none());
    }
}
