//! Routing rule data model: matcher predicates and target selection.
//! Evaluation (first-match-wins over configured rules) lives in
//! `relay-switch`, which is where the dispatcher that consumes a
//! [`Session`](crate::session::Session) also lives.
//!
//! Rules are a structured pattern type composed of independent
//! predicates, evaluated in declaration order, rather than one big
//! string-matching function.

use std::net::IpAddr;

use crate::address::Network;

/// How a domain predicate matches a candidate domain string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainMatch {
    Full(String),
    Suffix(String),
    Keyword(String),
    Regex(String),
}

impl DomainMatch {
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            DomainMatch::Full(want) => candidate.eq_ignore_ascii_case(want),
            DomainMatch::Suffix(suffix) => {
                let candidate = candidate.to_ascii_lowercase();
                let suffix = suffix.to_ascii_lowercase();
                candidate == suffix || candidate.ends_with(&format!(".{suffix}"))
            }
            DomainMatch::Keyword(word) => candidate
                .to_ascii_lowercase()
                .contains(&word.to_ascii_lowercase()),
            DomainMatch::Regex(pattern) => regex_lite_match(pattern, candidate),
        }
    }
}

/// Minimal regex matcher covering the subset routing configs realistically
/// use (`.`, `*`, `^`, `$`, literal runs); full backtracking regex support
/// is out of scope for a routing predicate and would pull in a dependency
/// the rest of this crate has no other use for.
fn regex_lite_match(pattern: &str, candidate: &str) -> bool {
    fn matches_here(pat: &[char], text: &[char]) -> bool {
        match pat.first() {
            None => text.is_empty(),
            Some('$') if pat.len() == 1 => text.is_empty(),
            Some('*') => {
                for i in 0..=text.len() {
                    if matches_here(&pat[1..], &text[i..]) {
                        return true;
                    }
                }
                false
            }
            Some('.') => !text.is_empty() && matches_here(&pat[1..], &text[1..]),
            Some(c) => !text.is_empty() && text[0] == *c && matches_here(&pat[1..], &text[1..]),
        }
    }

    let anchored_start = pattern.starts_with('^');
    let pat: Vec<char> = pattern.trim_start_matches('^').chars().collect();
    let text: Vec<char> = candidate.chars().collect();
    if anchored_start {
        matches_here(&pat, &text)
    } else {
        (0..=text.len()).any(|i| matches_here(&pat, &text[i..]))
    }
}

/// CIDR block, stored pre-parsed so matching is pure bit arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CidrBlock {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrBlock {
    pub fn new(network: IpAddr, prefix_len: u8) -> Self {
        Self { network, prefix_len }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix_len.min(32));
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix_len.min(128));
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    }
}

fn mask_u128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - prefix_len)
    }
}

/// Inclusive TCP/UDP port range, e.g. `1000..=2000`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self { start: port, end: port }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

/// One predicate in a routing rule's conjunction. A rule matches a
/// session only when every one of its predicates matches.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    InboundTag(String),
    SourceCidr(CidrBlock),
    TargetCidr(CidrBlock),
    TargetPort(PortRange),
    Domain(DomainMatch),
    UserEmail(String),
    Network(Network),
    SniffedProtocol(String),
}

/// A matcher is the conjunction ("AND") of its predicates; an empty
/// matcher matches everything.
#[derive(Clone, Debug, Default)]
pub struct Matcher {
    predicates: Vec<Predicate>,
}

impl Matcher {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

/// One entry in a routing table: a matcher plus the outbound tag to use
/// when it fires. Rules are evaluated in the order they appear in
/// `RoutingTable::rules`; the first match wins.
#[derive(Clone, Debug)]
pub struct RoutingRule {
    pub matcher: Matcher,
    pub target_tag: String,
}

/// What to do with a domain target when evaluating CIDR-based routing
/// predicates, which can only ever match an IP address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DomainStrategy {
    #[default]
    AsIs,
    IpIfNonMatch,
    IpOnDemand,
}

#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    pub rules: Vec<RoutingRule>,
    pub domain_strategy: DomainStrategy,
}

impl RoutingTable {
    pub fn new(domain_strategy: DomainStrategy) -> Self {
        Self {
            rules: Vec::new(),
            domain_strategy,
        }
    }

    pub fn push(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
    }
}

/// The outcome of evaluating a [`RoutingTable`] against a session: either
/// a matched outbound tag or "no rule fired", which the dispatcher treats
/// as a hard failure rather than a silent drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    Tag(String),
    NoMatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_match_requires_label_boundary() {
        let m = DomainMatch::Suffix("example.com".into());
        assert!(m.matches("example.com"));
        assert!(m.matches("api.example.com"));
        assert!(!m.matches("notexample.com"));
    }

    #[test]
    fn cidr_contains_checks_prefix() {
        let block = CidrBlock::new("10.0.0.0".parse().unwrap(), 8);
        assert!(block.contains("10.1.2.3".parse().unwrap()));
        assert!(!block.contains("11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn port_range_is_inclusive() {
        let r = PortRange { start: 80, end: 90 };
        assert!(r.contains(80));
        assert!(r.contains(90));
        assert!(!r.contains(91));
    }

    #[test]
    fn regex_lite_supports_wildcard_and_anchors() {
        assert!(regex_lite_match("^api.*com$", "api.foo.com"));
        assert!(!regex_lite_match("^api.*com$", "www.foo.com"));
    }
}
