//! ARP sweep over a raw datalink channel (needs CAP_NET_RAW or root).

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use ipnet::Ipv4Net;
use pnet::datalink::{self, Channel, Config, MacAddr, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use tracing::debug;

use crate::error::DiscoveryError;
use crate::netdetect::expand_hosts;
use crate::types::DiscoveredHost;

const ETH_HDR_LEN: usize = 14;
const ARP_LEN: usize = 28;
const FRAME_LEN: usize = ETH_HDR_LEN + ARP_LEN;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Broadcast ARP request from `src_mac`/`src_ip` asking who has `target_ip`.
pub fn build_request(src_mac: MacAddr, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; FRAME_LEN];
    {
        let mut eth = MutableEthernetPacket::new(&mut buffer)?;
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(src_mac);
        eth.set_ethertype(EtherTypes::Arp);
    }
    {
        let mut arp = MutableArpPacket::new(&mut buffer[ETH_HDR_LEN..])?;
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(src_mac);
        arp.set_sender_proto_addr(src_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target_ip);
    }
    Some(buffer)
}

/// Sender address pair of an ARP reply frame; anything else yields `None`.
pub fn parse_reply(frame: &[u8]) -> Option<(Ipv4Addr, MacAddr)> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(eth.payload())?;
    if arp.get_operation() != ArpOperations::Reply {
        return None;
    }
    Some((arp.get_sender_proto_addr(), arp.get_sender_hw_addr()))
}

/// First up, non-loopback interface with a MAC whose IPv4 network overlaps `range`.
fn select_interface(
    range: Ipv4Net,
) -> Result<(NetworkInterface, MacAddr, Ipv4Addr), DiscoveryError> {
    datalink::interfaces()
        .into_iter()
        .find_map(|iface| {
            if !iface.is_up() || iface.is_loopback() {
                return None;
            }
            let mac = iface.mac.filter(|m| *m != MacAddr::zero())?;
            let src_ip = iface.ips.iter().find_map(|net| match net.ip() {
                IpAddr::V4(v4) => {
                    let own = Ipv4Net::new(v4, net.prefix()).ok()?;
                    (own.contains(&range.network()) || range.contains(&v4)).then_some(v4)
                }
                IpAddr::V6(_) => None,
            })?;
            Some((iface, mac, src_ip))
        })
        .ok_or_else(|| DiscoveryError::NoInterface(range.to_string()))
}

/// Blocking sweep: send one request per host in `range`, then collect replies for `wait`.
pub fn sweep_blocking(
    range: Ipv4Net,
    wait: Duration,
) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
    let (iface, src_mac, src_ip) = select_interface(range)?;
    debug!("ARP sweep of {range} via {} ({src_ip})", iface.name);

    let config = Config {
        read_timeout: Some(READ_TIMEOUT),
        ..Default::default()
    };
    let (mut tx, mut rx) = match datalink::channel(&iface, config) {
        Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => return Err(DiscoveryError::UnsupportedChannel),
        Err(e) => return Err(DiscoveryError::Channel(e)),
    };

    for target in expand_hosts(range) {
        if target == src_ip {
            continue;
        }
        let Some(frame) = build_request(src_mac, src_ip, target) else {
            continue;
        };
        if let Some(Err(e)) = tx.send_to(&frame, None) {
            return Err(DiscoveryError::Send(e));
        }
    }

    let deadline = Instant::now() + wait;
    let mut replies = BTreeMap::<Ipv4Addr, MacAddr>::new();
    while Instant::now() < deadline {
        match rx.next() {
            Ok(frame) => {
                if let Some((ip, mac)) = parse_reply(frame) {
                    if ip != src_ip && range.contains(&ip) {
                        replies.entry(ip).or_insert(mac);
                    }
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(e) => {
                debug!("ARP receive stopped early: {e}");
                break;
            }
        }
    }

    Ok(replies
        .into_iter()
        .map(|(ip, mac)| DiscoveredHost::new(ip, mac.to_string()))
        .collect())
}

pub async fn sweep(range: Ipv4Net, wait: Duration) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
    tokio::task::spawn_blocking(move || sweep_blocking(range, wait))
        .await
        .map_err(|e| DiscoveryError::Task(e.to_string()))?
}
