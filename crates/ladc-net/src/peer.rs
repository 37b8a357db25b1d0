//! UDP peer endpoint: dual IPv4/IPv6 sockets, allow-list enforcement
//! and the encrypted send/receive path (spec §4.8).
//!
//! Binding mirrors the source's `IPV6_V6ONLY=1` plus parallel v4 socket
//! (`original_source/src/remote.c`): a literal `*` bind opens both
//! families, a concrete address opens only the matching one. We reach
//! for `socket2` to set `IPV6_V6ONLY` before `bind`, since
//! `std`/`tokio` expose no portable way to set it directly.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use rand::RngCore;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

use ladc_common::wire::{FRAME_LEN, NONCE_LEN, SALT_LEN};
use ladc_common::{HostAddress, LadcError};
use ladc_core::{CommandInstance, Engine};
use ladc_crypto::SaltCache;

use crate::message::Message;

/// Listens on (up to) two sockets and speaks the encrypted wire
/// protocol described in spec §4.7/§4.8. Holds `engine` only to read
/// configuration (secret, allow-list, peer list) — it never touches
/// the end-queue directly.
pub struct PeerEndpoint {
    engine: Arc<Engine>,
    socket_v4: Option<UdpSocket>,
    socket_v6: Option<UdpSocket>,
    send_cache: TokioMutex<SaltCache>,
    recv_cache: TokioMutex<SaltCache>,
}

impl PeerEndpoint {
    /// Binds the sockets described by `defaults.remote_bind`/
    /// `remote_port`. Bind failure is a [`LadcError::FatalIo`] (spec §7:
    /// "bind failure").
    pub async fn bind(engine: Arc<Engine>) -> Result<Self, LadcError> {
        let config = engine.config();
        let port = config.defaults.remote_port;
        let (v4_addr, v6_addr) = resolve_bind(&config.defaults.remote_bind, port)?;

        let socket_v4 = match v4_addr {
            Some(addr) => Some(bind_std(Domain::IPV4, addr, false)?),
            None => None,
        };
        let socket_v6 = match v6_addr {
            Some(addr) => Some(bind_std(Domain::IPV6, addr, true)?),
            None => None,
        };

        Ok(PeerEndpoint {
            engine,
            socket_v4,
            socket_v6,
            send_cache: TokioMutex::new(SaltCache::new()),
            recv_cache: TokioMutex::new(SaltCache::new()),
        })
    }

    /// Waits for and authenticates one frame: allow-list check, then
    /// decrypt. A non-matching sender or a MAC failure is logged and
    /// the frame dropped (spec §4.8, §7 `Auth`); this call simply loops
    /// past those rather than surfacing them to the caller.
    pub async fn recv(&self) -> (Message, SocketAddr) {
        loop {
            let (buf, sender) = self.recv_datagram().await;
            match self.authenticate(&buf, sender).await {
                Ok(msg) => return (msg, sender),
                Err(e) => {
                    debug!(error = %e, peer = %sender, "dropped inbound frame");
                    continue;
                }
            }
        }
    }

    async fn recv_datagram(&self) -> (Vec<u8>, SocketAddr) {
        let mut buf = vec![0u8; FRAME_LEN + 1];
        loop {
            let result = match (&self.socket_v4, &self.socket_v6) {
                (Some(v4), Some(v6)) => tokio::select! {
                    r = v4.recv_from(&mut buf) => r,
                    r = v6.recv_from(&mut buf) => r,
                },
                (Some(v4), None) => v4.recv_from(&mut buf).await,
                (None, Some(v6)) => v6.recv_from(&mut buf).await,
                (None, None) => std::future::pending().await,
            };
            match result {
                Ok((n, sender)) => return (buf[..n].to_vec(), sender),
                Err(e) => {
                    warn!(error = %e, "peer socket recv failed");
                }
            }
        }
    }

    async fn authenticate(&self, buf: &[u8], sender: SocketAddr) -> Result<Message, LadcError> {
        if buf.len() != FRAME_LEN {
            return Err(LadcError::wire(format!("frame length {} != {FRAME_LEN}", buf.len())));
        }
        let config = self.engine.config();
        {
            let mut allow_list = config.defaults.remote_allow_list.lock().unwrap();
            if allow_list.is_empty() {
                // An empty allow-list is permissive by construction
                // (spec is silent on the empty-list case; treating it
                // as "allow none" would make the feature unusable by
                // default, so we allow everyone until one is set).
            } else if allow_list.find_containing(&HostAddress::from_ip(sender.ip())).is_none() {
                return Err(LadcError::auth(format!("{} not on the remote allow-list", sender.ip())));
            }
        }
        let Some(secret) = &config.defaults.remote_secret else {
            return Err(LadcError::auth("no remote_secret configured, cannot authenticate inbound frames"));
        };
        let (salt, _nonce) = ladc_crypto::frame_salt_and_nonce(buf).map_err(|e| LadcError::wire(e.to_string()))?;
        let key = {
            let mut cache = self.recv_cache.lock().await;
            cache
                .key_for_received(sender.ip(), secret, &salt)
                .map_err(|e| LadcError::auth(e.to_string()))?
        };
        let plaintext = ladc_crypto::decrypt_frame(buf, &key).map_err(|e| LadcError::auth(e.to_string()))?;
        Message::decode_frame(&plaintext).map_err(|e| LadcError::wire(e.to_string()))
    }

    /// Encrypts and sends `msg` to `dest`, picking the socket whose
    /// family matches `dest` (spec §4.8: "each configured destination
    /// on its matching-family socket").
    pub async fn send_to(&self, dest: SocketAddr, msg: &Message) -> Result<(), LadcError> {
        let config = self.engine.config();
        let Some(secret) = &config.defaults.remote_secret else {
            return Err(LadcError::auth("no remote_secret configured, cannot encrypt outbound frames"));
        };
        let socket = match dest.ip() {
            IpAddr::V4(_) => self.socket_v4.as_ref(),
            IpAddr::V6(_) => self.socket_v6.as_ref(),
        }
        .ok_or_else(|| LadcError::wire(format!("no socket bound for {}'s address family", dest.ip())))?;

        let plaintext = msg.encode_frame().map_err(|e| LadcError::wire(e.to_string()))?;
        let (salt, key) = {
            let mut cache = self.send_cache.lock().await;
            cache
                .key_for_send(dest.ip(), secret, random_salt)
                .map_err(|e| LadcError::auth(e.to_string()))?
        };
        let nonce = random_nonce();
        let frame = ladc_crypto::encrypt_frame(&plaintext, &key, &salt, &nonce).map_err(|e| LadcError::auth(e.to_string()))?;
        socket
            .send_to(&frame, dest)
            .await
            .map_err(|e| LadcError::transient_io(e))?;
        Ok(())
    }

    /// Broadcasts a deadline/factor-free `add` frame to every
    /// configured peer (spec §4.8: "each live fire calls
    /// `broadcast_add`... without deadline/factor, to let the peer
    /// decide").
    pub async fn broadcast_add(&self, instance: &CommandInstance) {
        let Some(addr) = &instance.address else { return };
        let config = self.engine.config();
        let port = config.defaults.remote_port;
        let payload = ladc_common::grammar::AddPayload {
            address: addr.to_text(),
            rule: instance.rule_name.clone(),
            end_time: None,
            factor: None,
        };
        let msg = Message::new(crate::message::Verb::Add, ladc_common::grammar::format_add_payload(&payload));
        for peer_entry in &config.defaults.remote_peers {
            match parse_peer(peer_entry, port) {
                Ok(dest) => {
                    if let Err(e) = self.send_to(dest, &msg).await {
                        warn!(error = %e, peer = %peer_entry, "broadcast_add failed");
                    }
                }
                Err(e) => warn!(error = %e, peer = %peer_entry, "invalid configured peer"),
            }
        }
    }
}

/// Parses a `host` or `host:port` peer entry, defaulting to `port`.
pub fn parse_peer(entry: &str, port: u16) -> Result<SocketAddr, LadcError> {
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = entry
        .parse()
        .map_err(|_| LadcError::config(format!("invalid peer address \"{entry}\"")))?;
    Ok(SocketAddr::new(ip, port))
}

fn resolve_bind(bind: &str, port: u16) -> Result<(Option<SocketAddr>, Option<SocketAddr>), LadcError> {
    if bind == "*" {
        return Ok((
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)),
        ));
    }
    let ip: IpAddr = bind
        .parse()
        .map_err(|_| LadcError::config(format!("invalid remote_bind address \"{bind}\"")))?;
    match ip {
        IpAddr::V4(_) => Ok((Some(SocketAddr::new(ip, port)), None)),
        IpAddr::V6(_) => Ok((None, Some(SocketAddr::new(ip, port)))),
    }
}

fn bind_std(domain: Domain, addr: SocketAddr, v6_only: bool) -> Result<UdpSocket, LadcError> {
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| LadcError::fatal_io(format!("cannot create UDP socket: {e}")))?;
    if v6_only {
        socket
            .set_only_v6(true)
            .map_err(|e| LadcError::fatal_io(format!("cannot set IPV6_V6ONLY: {e}")))?;
    }
    socket
        .set_nonblocking(true)
        .map_err(|e| LadcError::fatal_io(format!("cannot set socket non-blocking: {e}")))?;
    socket
        .bind(&addr.into())
        .map_err(|e| LadcError::fatal_io(format!("cannot bind {addr}: {e}")))?;
    UdpSocket::from_std(socket.into()).map_err(|e| LadcError::fatal_io(format!("cannot hand socket to tokio: {e}")))
}

fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_bind_resolves_both_families() {
        let (v4, v6) = resolve_bind("*", 16473).unwrap();
        assert!(v4.is_some());
        assert!(v6.is_some());
    }

    #[test]
    fn concrete_v4_bind_skips_v6() {
        let (v4, v6) = resolve_bind("127.0.0.1", 16473).unwrap();
        assert!(v4.is_some());
        assert!(v6.is_none());
    }

    #[test]
    fn peer_entry_without_port_uses_default() {
        let addr = parse_peer("10.0.0.5", 16473).unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 16473));
    }

    #[test]
    fn peer_entry_with_port_overrides_default() {
        let addr = parse_peer("10.0.0.5:9999", 16473).unwrap();
        assert_eq!(addr.port(), 9999);
    }
}
