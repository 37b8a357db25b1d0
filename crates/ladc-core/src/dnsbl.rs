//! DNS-based reputation list lookups (spec §4.2 step 4, §4.4 renewal;
//! `SPEC_FULL.md` §10.5).
//!
//! Out of scope per spec §1 as a "concrete collaborator", but still
//! needed end-to-end; grounded in the reverse-octet `A`-record lookup
//! pattern used by the DNSBL client in
//! `other_examples/.../contrib-legacy-anti_abuse-primitives.rs.rs`.

use async_trait::async_trait;

use ladc_common::{AddressFamily, HostAddress};

/// Queries whether an address appears on a reputation zone.
#[async_trait]
pub trait DnsblClient: Send + Sync {
    async fn is_listed(&self, addr: &HostAddress, zone: &str) -> bool;
}

/// Builds the reverse-octet query name, e.g. `4.3.2.1.zen.spamhaus.org`
/// for `1.2.3.4` against zone `zen.spamhaus.org`. IPv6 zones are not
/// queried (the source's DNSBL support is IPv4-only).
fn reverse_query_name(addr: &HostAddress, zone: &str) -> Option<String> {
    if addr.family() != AddressFamily::V4 {
        return None;
    }
    let text = addr.to_text();
    let octets: Vec<&str> = text.split('.').collect();
    if octets.len() != 4 {
        return None;
    }
    Some(format!("{}.{}.{}.{}.{}", octets[3], octets[2], octets[1], octets[0], zone))
}

/// Resolves the reverse-octet query name via the system resolver; any
/// `A` record at all means "listed".
pub struct ResolverDnsblClient;

#[async_trait]
impl DnsblClient for ResolverDnsblClient {
    async fn is_listed(&self, addr: &HostAddress, zone: &str) -> bool {
        let Some(query) = reverse_query_name(addr, zone) else {
            return false;
        };
        tokio::net::lookup_host((query.as_str(), 0))
            .await
            .map(|mut addrs| addrs.next().is_some())
            .unwrap_or(false)
    }
}

/// Queries every zone in MRU order (spec §4.2), returning the first hit
/// and promoting that zone to the front.
pub async fn first_listed_zone(
    client: &dyn DnsblClient,
    addr: &HostAddress,
    zones: &mut ladc_common::mru::MruList<String>,
) -> Option<String> {
    let snapshot: Vec<String> = zones.iter().cloned().collect();
    for zone in snapshot {
        if client.is_listed(addr, &zone).await {
            zones.find_and_promote(|z| z == &zone);
            return Some(zone);
        }
    }
    None
}
