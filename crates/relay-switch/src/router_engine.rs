//! First-match-wins evaluation of a [`RoutingTable`] against a
//! [`Session`], the half of the routing responsibility the data model
//! in `relay-core::router` deliberately leaves to this crate.

use std::net::IpAddr;

use relay_core::address::{Address, Network};
use relay_core::router::{DomainStrategy, Predicate, RouteDecision, RoutingTable};
use relay_core::session::Session;

/// Evaluates `table`'s rules in order against `session`; the first rule
/// whose every predicate matches wins. No match is a distinct outcome
/// from an empty table matching — both return [`RouteDecision::NoMatch`],
/// and the dispatcher treats that as a hard failure.
///
/// A domain target never satisfies a [`Predicate::TargetCidr`] on its
/// own; `table.domain_strategy` controls whether (and when) the domain
/// gets resolved so CIDR rules get a chance to match an IP that was
/// never in the original request:
/// - [`DomainStrategy::AsIs`] never resolves; CIDR rules simply can't
///   fire against a domain target.
/// - [`DomainStrategy::IpOnDemand`] resolves up front, so IP-based rules
///   can win even ahead of a later domain-matching rule.
/// - [`DomainStrategy::IpIfNonMatch`] only resolves after a first pass
///   over the table comes back with no match, then retries once with
///   the resolved address available to `TargetCidr`.
pub async fn evaluate(table: &RoutingTable, session: &Session) -> RouteDecision {
    match table.domain_strategy {
        DomainStrategy::AsIs => evaluate_once(table, session, None),
        DomainStrategy::IpOnDemand => {
            let resolved = resolve_current_target(session).await;
            evaluate_once(table, session, resolved)
        }
        DomainStrategy::IpIfNonMatch => {
            let first_pass = evaluate_once(table, session, None);
            if first_pass != RouteDecision::NoMatch {
                return first_pass;
            }
            let resolved = resolve_current_target(session).await;
            evaluate_once(table, session, resolved)
        }
    }
}

fn evaluate_once(table: &RoutingTable, session: &Session, resolved_target: Option<IpAddr>) -> RouteDecision {
    for rule in &table.rules {
        if rule
            .matcher
            .predicates()
            .iter()
            .all(|p| predicate_matches(p, session, resolved_target))
        {
            return RouteDecision::Tag(rule.target_tag.clone());
        }
    }
    RouteDecision::NoMatch
}

fn predicate_matches(predicate: &Predicate, session: &Session, resolved_target: Option<IpAddr>) -> bool {
    match predicate {
        Predicate::InboundTag(tag) => session.inbound().tag == *tag,
        Predicate::SourceCidr(cidr) => match session.inbound().source.address() {
            Address::Ipv4(ip) => cidr.contains((*ip).into()),
            Address::Ipv6(ip) => cidr.contains((*ip).into()),
            Address::Domain(_) => false,
        },
        Predicate::TargetCidr(cidr) => match current_target_address(session) {
            Some(Address::Ipv4(ip)) => cidr.contains((*ip).into()),
            Some(Address::Ipv6(ip)) => cidr.contains((*ip).into()),
            Some(Address::Domain(_)) | None => resolved_target.map(|ip| cidr.contains(ip)).unwrap_or(false),
        },
        Predicate::TargetPort(range) => session
            .current_outbound()
            .map(|frame| range.contains(frame.target.port()))
            .unwrap_or(false),
        Predicate::Domain(domain_match) => current_target_domain(session)
            .map(|domain| domain_match.matches(domain))
            .unwrap_or(false),
        Predicate::UserEmail(email) => session
            .inbound()
            .user
            .as_ref()
            .map(|u| u.email() == email)
            .unwrap_or(false),
        Predicate::Network(network) => session_network(session) == Some(*network),
        Predicate::SniffedProtocol(proto) => session
            .content()
            .sniffed_protocol
            .as_deref()
            .map(|p| p == proto)
            .unwrap_or(false),
    }
}

/// Resolves the session's current target to an IP address via the
/// system resolver, the same `tokio::net::lookup_host` path
/// `relay_protocol_direct::freedom` uses to dial. Returns `None` on an
/// already-resolved target's own address, a missing outbound frame, or
/// a resolution failure — callers treat all three as "no override".
async fn resolve_current_target(session: &Session) -> Option<IpAddr> {
    let frame = session.current_outbound()?;
    match frame.target.address() {
        Address::Ipv4(ip) => Some((*ip).into()),
        Address::Ipv6(ip) => Some((*ip).into()),
        Address::Domain(domain) => {
            let host = format!("{domain}:{}", frame.target.port());
            tokio::net::lookup_host(host).await.ok()?.next().map(|addr| addr.ip())
        }
    }
}

fn current_target_address(session: &Session) -> Option<&Address> {
    session.current_outbound().map(|frame| frame.target.address())
}

fn current_target_domain(session: &Session) -> Option<&str> {
    if let Some(domain) = session.content().sniffed_domain.as_deref() {
        return Some(domain);
    }
    current_target_address(session).and_then(Address::as_domain)
}

fn session_network(session: &Session) -> Option<Network> {
    Some(
        session
            .current_outbound()
            .map(|frame| frame.target.network())
            .unwrap_or(session.inbound().source.network()),
    )
}
