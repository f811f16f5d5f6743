// src/auth/security.rs

//! Policy on where ambient (logged-in user) credentials may go.

use url::{Host, Url};

use super::Target;

/// A list of host patterns that an origin must match.
///
/// Entries are separated by `,` or `;`:
///
/// - `*.example.com` / `*example.com`: glob on the host.
/// - `.example.com`: the same as `*.example.com`.
/// - `example.com`: that host or any subdomain of it.
/// - `https://example.com:8443`: optional scheme and port restrictions.
/// - `<local>`: any host name without a dot.
///
/// Proxies always pass the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthFilterAllowlist {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Local,
    Host {
        scheme: Option<String>,
        pattern: String,
        port: Option<u16>,
    },
}

impl AuthFilterAllowlist {
    pub fn new(list: &str) -> Self {
        let rules = list
            .split(|c| c == ',' || c == ';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let rule = Rule::parse(entry);
                if rule.is_none() {
                    log::warn!("ignoring malformed allowlist entry {:?}", entry);
                }
                rule
            })
            .collect();
        AuthFilterAllowlist { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_valid(&self, origin: &Url, target: Target) -> bool {
        if target == Target::Proxy {
            return true;
        }
        self.rules.iter().any(|rule| rule.matches(origin))
    }
}

impl Rule {
    fn parse(entry: &str) -> Option<Rule> {
        let entry = entry.to_ascii_lowercase();
        if entry == "<local>" {
            return Some(Rule::Local);
        }

        let (scheme, rest) = match entry.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_owned()), rest),
            None => (None, entry.as_str()),
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = split_host_port(rest)?;
        if host.is_empty() {
            return None;
        }

        let pattern = if host.starts_with('.') {
            format!("*{}", host)
        } else {
            host.to_owned()
        };
        Some(Rule::Host {
            scheme,
            pattern,
            port,
        })
    }

    fn matches(&self, url: &Url) -> bool {
        match self {
            Rule::Local => matches!(url.host(), Some(Host::Domain(d)) if !d.contains('.')),
            Rule::Host {
                scheme,
                pattern,
                port,
            } => {
                if scheme.as_deref().map_or(false, |s| s != url.scheme()) {
                    return false;
                }
                if port.is_some() && *port != url.port_or_known_default() {
                    return false;
                }
                let Some(host) = url.host_str() else {
                    return false;
                };
                let host = host.to_ascii_lowercase();
                if pattern.contains('*') {
                    wildcard_match(pattern, &host)
                } else {
                    host == *pattern
                        || (host.len() > pattern.len()
                            && host.ends_with(pattern.as_str())
                            && host.as_bytes()[host.len() - pattern.len() - 1] == b'.')
                }
            }
        }
    }
}

fn split_host_port(s: &str) -> Option<(&str, Option<u16>)> {
    if s.starts_with('[') {
        let end = s.find(']')?;
        let (host, after) = s.split_at(end + 1);
        return match after.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if after.is_empty() => Some((host, None)),
            None => None,
        };
    }
    match s.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((s, None)),
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == b'*')
}

/// Decides, per origin, which credentials a handler may use.
#[derive(Debug, Clone)]
pub struct UrlSecurityManager {
    server_allowlist: Option<AuthFilterAllowlist>,
    delegate_allowlist: Option<AuthFilterAllowlist>,
    ntlm_explicit_allowlist: Option<AuthFilterAllowlist>,
    ntlm_ambient_credentials: bool,
}

impl Default for UrlSecurityManager {
    fn default() -> Self {
        UrlSecurityManager {
            server_allowlist: None,
            delegate_allowlist: None,
            ntlm_explicit_allowlist: None,
            ntlm_ambient_credentials: true,
        }
    }
}

impl UrlSecurityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Origins that may receive ambient credentials. Without a list only
    /// intranet hosts may.
    pub fn with_server_allowlist(mut self, allowlist: AuthFilterAllowlist) -> Self {
        self.server_allowlist = Some(allowlist);
        self
    }

    /// Origins that may receive delegated (forwardable) credentials.
    pub fn with_delegate_allowlist(mut self, allowlist: AuthFilterAllowlist) -> Self {
        self.delegate_allowlist = Some(allowlist);
        self
    }

    /// Origins that may receive explicit NTLM credentials. Without a list
    /// every origin may.
    pub fn with_ntlm_explicit_allowlist(mut self, allowlist: AuthFilterAllowlist) -> Self {
        self.ntlm_explicit_allowlist = Some(allowlist);
        self
    }

    /// The global policy switch for ambient NTLM.
    pub fn with_ntlm_ambient_credentials(mut self, enabled: bool) -> Self {
        self.ntlm_ambient_credentials = enabled;
        self
    }

    pub fn ntlm_ambient_credentials(&self) -> bool {
        self.ntlm_ambient_credentials
    }

    pub fn can_use_ambient_credentials_for_negotiate(&self, origin: &Url) -> bool {
        match self.server_allowlist {
            Some(ref allowlist) => allowlist.is_valid(origin, Target::Server),
            None => is_intranet_host(origin),
        }
    }

    pub fn can_use_ambient_credentials_for_ntlm(&self, origin: &Url) -> bool {
        self.ntlm_ambient_credentials && self.can_use_ambient_credentials_for_negotiate(origin)
    }

    pub fn can_use_explicit_credentials_for_ntlm(&self, origin: &Url) -> bool {
        match self.ntlm_explicit_allowlist {
            Some(ref allowlist) => allowlist.is_valid(origin, Target::Server),
            None => true,
        }
    }

    pub fn can_delegate(&self, origin: &Url) -> bool {
        match self.delegate_allowlist {
            Some(ref allowlist) => allowlist.is_valid(origin, Target::Server),
            None => false,
        }
    }
}

/// A single-label host name that is not `localhost`.
fn is_intranet_host(origin: &Url) -> bool {
    match origin.host() {
        Some(Host::Domain(domain)) => {
            !domain.contains('.') && !domain.eq_ignore_ascii_case("localhost")
        }
        _ => false,
    }
}
