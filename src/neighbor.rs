//! Best-effort MAC lookup in the host's neighbor (ARP) cache.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::process::Command;
use tokio::time;
use tracing::debug;

const ARP_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolve the MAC of `ip` from the neighbor cache: `/proc/net/arp` where available,
/// otherwise the output of `arp -a <ip>`.
pub async fn lookup_mac(ip: Ipv4Addr) -> Option<String> {
    if let Ok(table) = tokio::fs::read_to_string("/proc/net/arp").await {
        if let Some(mac) = parse_proc_net_arp(&table, ip) {
            debug!("resolved MAC for {ip}: {mac}");
            return Some(mac);
        }
    }

    let mut cmd = Command::new("arp");
    cmd.arg("-a").arg(ip.to_string()).kill_on_drop(true);
    match time::timeout(ARP_COMMAND_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) => {
            let text = String::from_utf8_lossy(&out.stdout);
            let mac = find_mac(&text);
            if mac.is_none() {
                debug!("no MAC in arp output for {ip}: {}", text.trim());
            }
            mac
        }
        Ok(Err(e)) => {
            debug!("arp lookup failed for {ip}: {e}");
            None
        }
        Err(_) => {
            debug!("arp lookup timed out for {ip}");
            None
        }
    }
}

/// Find the entry for `ip` in the Linux `/proc/net/arp` table.
///
/// Incomplete entries (flags `0x0` or an all-zero address) are ignored.
pub fn parse_proc_net_arp(table: &str, ip: Ipv4Addr) -> Option<String> {
    let wanted = ip.to_string();
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || cols[0] != wanted || cols[2] == "0x0" {
            return None;
        }
        normalize_mac(cols[3])
    })
}

/// First MAC-looking token in free-form `arp` output (Linux, macOS or Windows style).
pub fn find_mac(text: &str) -> Option<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']'))
        .find_map(normalize_mac)
}

/// `AA-BB-CC-0-1-2` or `aa:bb:cc:00:01:02` → `aa:bb:cc:00:01:02`.
///
/// All-zero addresses are rejected.
pub fn normalize_mac(token: &str) -> Option<String> {
    let parts: Vec<&str> = token.split([':', '-']).collect();
    if parts.len() != 6 {
        return None;
    }
    let mut octets = Vec::with_capacity(6);
    for part in parts {
        if part.is_empty() || part.len() > 2 {
            return None;
        }
        octets.push(u8::from_str_radix(part, 16).ok()?);
    }
    if octets.iter().all(|o| *o == 0) {
        return None;
    }
    Some(
        octets
            .iter()
            .map(|o| format!("{o:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         AA:BB:CC:00:11:22     *        eth0
192.168.1.7      0x1         0x0         00:00:00:00:00:00     *        eth0
";

    #[test]
    fn proc_table_lookup() {
        assert_eq!(
            parse_proc_net_arp(PROC_TABLE, Ipv4Addr::new(192, 168, 1, 1)).as_deref(),
            Some("aa:bb:cc:00:11:22")
        );
        assert_eq!(parse_proc_net_arp(PROC_TABLE, Ipv4Addr::new(192, 168, 1, 7)), None);
        assert_eq!(parse_proc_net_arp(PROC_TABLE, Ipv4Addr::new(192, 168, 1, 9)), None);
    }

    #[test]
    fn arp_output_styles() {
        let linux = "? (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on eth0";
        let macos = "? (192.168.1.1) at 0:1b:2c:3:4:5 on en0 ifscope [ethernet]";
        let windows = "  192.168.1.1           aa-bb-cc-dd-ee-ff     dynamic";
        assert_eq!(find_mac(linux).as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(find_mac(macos).as_deref(), Some("00:1b:2c:03:04:05"));
        assert_eq!(find_mac(windows).as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(find_mac("192.168.1.1 (192.168.1.1) -- no entry"), None);
    }
}
