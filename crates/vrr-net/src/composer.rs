//! Flow Composer: translates router-level intent (hosts, routes, NAT
//! rules, VLAN ports) into the fixed five-table IPv4 pipeline and drives
//! it through the [`OvsDriver`].
//!
//! Grounded on the authoritative upstream composer (the NAT/CT-capable
//! `switch.go`, not the older NAT-less `composer.go`): single cookie for
//! every flow this process owns, tables `IN=0 / CT=10 / NAT=12 / RIB=19 /
//! FIB=20 / FDB=30`.

use crate::actions::{self, ETH_DST, ETH_SRC, IN_PORT, IP_DST, REG0, VLAN_TCI};
use crate::addr::{IpAddr, IpPrefix, MacAddr};
use crate::driver::{InterfaceOptions, OvsDriver, PortData};
use crate::error::{OvsError, Result};
use crate::watcher::move_link_to_netns;

pub const TABLE_IN: u8 = 0;
pub const TABLE_CT: u8 = 10;
pub const TABLE_NAT: u8 = 12;
pub const TABLE_RIB: u8 = 19;
pub const TABLE_FIB: u8 = 20;
pub const TABLE_FDB: u8 = 30;

/// Every flow this Composer installs carries this cookie, so a single
/// `del-flows cookie=.../-1` clears exactly (and only) our rules.
pub const COOKIE: u64 = 0x2021;

const DEFAULT_VLAN_MAC: &str = "00:00:00:00:20:15";

use crate::flow::{Flow, MatchFlow};

pub struct Composer {
    brname: String,
    driver: OvsDriver,
    /// Name of the network namespace vlan ports are moved into once
    /// tagged; `None` leaves them in the host namespace.
    netns: Option<String>,
}

impl Composer {
    pub fn new(brname: impl Into<String>, driver: OvsDriver, netns: Option<String>) -> Self {
        Composer {
            brname: brname.into(),
            driver,
            netns,
        }
    }

    /// Creates the bridge, wipes any pre-existing flows, and installs the
    /// static five-table pipeline.
    pub async fn init(&self) -> Result<()> {
        self.driver.add_bridge(&self.brname).await?;
        self.driver.del_flows(&self.brname, None).await?;

        // table 0 IN: classify IPv4 into CT, everything else NORMAL
        self.install(
            Flow::new(TABLE_IN, 100, COOKIE)
                .protocol("ip")
                .action(actions::resubmit(TABLE_CT)),
        )
        .await?;
        self.install(
            Flow::new(TABLE_IN, 0, COOKIE).action(actions::normal()),
        )
        .await?;

        // table 10 CT: hand every IPv4 packet to the connection tracker
        self.install(
            Flow::new(TABLE_CT, 100, COOKIE)
                .protocol("ip")
                .action(actions::ct(&format!("nat,zone=10,table={}", TABLE_NAT))),
        )
        .await?;

        // table 12 NAT: established/reply traffic skips NAT lookup, new
        // traffic falls through to RIB unless an operator rule intercepts it
        self.install(
            Flow::new(TABLE_NAT, 200, COOKIE)
                .protocol("ip")
                .matching("ct_state=+trk+rpl")
                .action(actions::resubmit(TABLE_RIB)),
        )
        .await?;
        self.install(
            Flow::new(TABLE_NAT, 200, COOKIE)
                .protocol("ip")
                .matching("ct_state=+trk+est")
                .action(actions::resubmit(TABLE_RIB)),
        )
        .await?;
        self.install(
            Flow::new(TABLE_NAT, 10, COOKIE)
                .protocol("ip")
                .action(actions::resubmit(TABLE_RIB)),
        )
        .await?;

        // table 19 RIB: no route matched, fall back to on-link delivery
        self.install(
            Flow::new(TABLE_RIB, 0, COOKIE)
                .protocol("ip")
                .action(actions::push(IP_DST))
                .action(actions::pop(REG0))
                .action(actions::resubmit(TABLE_FIB)),
        )
        .await?;

        // table 20 FIB: no host matched, clear reg0 and flood via FDB
        self.install(
            Flow::new(TABLE_FIB, 0, COOKIE)
                .action(actions::load("0x0", REG0))
                .action(actions::resubmit(TABLE_FDB)),
        )
        .await?;

        // table 30 FDB: normal L2 forwarding
        self.install(Flow::new(TABLE_FDB, 0, COOKIE).action(actions::normal()))
            .await?;

        Ok(())
    }

    /// Restores persisted SNAT/DNAT rules from the bridge's `other_config`.
    /// Logged and swallowed on a read failure: a missing options column
    /// just means a fresh bridge with nothing to restore.
    pub async fn start(&self) {
        match self.driver.get_bridge_other_config(&self.brname).await {
            Ok(entries) => {
                for (key, value) in entries {
                    if let Some(source) = key.strip_prefix("snat-") {
                        if let Err(e) = self.add_snat_flow(source, &value).await {
                            tracing::warn!("Composer.start: restoring snat {}: {}", source, e);
                        }
                    } else if let Some(dest) = key.strip_prefix("dnat-") {
                        let dest = restore_dest_colon(dest);
                        if let Err(e) = self.add_dnat_flow(&dest, &value).await {
                            tracing::warn!("Composer.start: restoring dnat {}: {}", dest, e);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Composer.start: bridge options: {}", e);
            }
        }
    }

    async fn install(&self, flow: Flow) -> Result<()> {
        self.driver.add_flow(&self.brname, &flow).await
    }

    async fn remove(&self, selector: MatchFlow) -> Result<()> {
        self.driver.del_flows(&self.brname, Some(&selector)).await
    }

    pub async fn list_ports(&self) -> Result<Vec<PortData>> {
        let names = self.driver.list_ports(&self.brname).await?;
        let mut items = Vec::with_capacity(names.len());
        for name in names {
            if let Ok(data) = self.driver.get_port(&name).await {
                items.push(data);
            }
        }
        Ok(items)
    }

    async fn has_port(&self, name: &str) -> bool {
        self.driver
            .list_ports(&self.brname)
            .await
            .map(|ports| ports.iter().any(|p| p == name))
            .unwrap_or(false)
    }

    fn find_port_id(name: &str) -> u32 {
        find_vlan_suffix(name)
            .map(|id| id + 32768)
            .unwrap_or(0)
    }

    fn find_vlan_id(name: &str) -> u16 {
        find_vlan_suffix(name).unwrap_or(0) as u16
    }

    fn find_port_addr(name: &str) -> Option<&'static str> {
        if name.starts_with("vlan") {
            Some(DEFAULT_VLAN_MAC)
        } else {
            None
        }
    }

    pub async fn add_vlan_tag(&self, port: &str, tag: u16) -> Result<()> {
        if !self.has_port(port).await {
            self.driver.add_port(&self.brname, port).await?;
        }
        self.driver.set_port_tag(port, tag).await
    }

    pub async fn del_vlan_tag(&self, port: &str) -> Result<()> {
        if !self.has_port(port).await {
            return Ok(());
        }
        self.driver.clear_port(port, "tag").await
    }

    pub async fn add_vlan_trunks(&self, port: &str, trunks: &str) -> Result<()> {
        if !self.has_port(port).await {
            self.driver.add_port(&self.brname, port).await?;
        }
        self.driver.set_port_trunks(port, trunks).await
    }

    pub async fn del_vlan_trunks(&self, port: &str) -> Result<()> {
        if !self.has_port(port).await {
            return Ok(());
        }
        self.driver.clear_port(port, "trunks").await
    }

    /// Creates an internal port for `vlan<N>`, with a stable ofport id and
    /// MAC derived from `N`, sets its access tag to `N`, and (only once
    /// tagged) moves the Linux link into the gateway's network namespace.
    pub async fn add_vlan_port(&self, vlan: &str) -> Result<()> {
        let opts = InterfaceOptions {
            ofport_request: Some(Composer::find_port_id(vlan)),
            mac: Composer::find_port_addr(vlan).map(str::to_string),
            iface_type: Some("internal"),
        };
        self.driver.add_port_with(&self.brname, vlan, &opts).await?;
        self.driver.set_interface(vlan, &opts).await?;

        let tag = Composer::find_vlan_id(vlan);
        if tag > 0 {
            self.driver.set_port_tag(vlan, tag).await?;
            if let Some(netns) = &self.netns {
                if let Err(e) = move_link_to_netns(vlan, netns).await {
                    tracing::warn!("Composer.add_vlan_port: netns move failed: {}", e);
                }
            }
        }
        Ok(())
    }

    pub async fn del_port(&self, name: &str) -> Result<()> {
        self.driver.delete_port(&self.brname, name).await
    }

    pub async fn add_host(&self, ipdst: &IpAddr, ethdst: &MacAddr, vlanif: &str) -> Result<()> {
        let ethsrc = Composer::find_port_addr(vlanif).unwrap_or("").to_string();
        let vlanid = format!("{:#x}", Composer::find_vlan_id(vlanif));
        let portid = format!("{:#x}", Composer::find_port_id(vlanif));

        self.install(
            Flow::new(TABLE_FIB, 100, COOKIE)
                .protocol("ip")
                .matching(format!("reg0={}", ipdst.hex()))
                .matching(format!("dl_dst={}", ethsrc))
                .action(actions::push(ETH_DST))
                .action(actions::pop(ETH_SRC))
                .action(actions::load(&ethdst.hex(), ETH_DST))
                .action(actions::load(&vlanid, VLAN_TCI))
                .action(actions::load(&portid, IN_PORT))
                .action(actions::dec_ttl())
                .action(actions::resubmit(TABLE_FDB)),
        )
        .await
    }

    pub async fn del_host(&self, ipdst: &IpAddr, vlanif: &str) -> Result<()> {
        let ethsrc = Composer::find_port_addr(vlanif).unwrap_or("").to_string();
        self.remove(
            MatchFlow::new()
                .cookie(COOKIE)
                .table(TABLE_FIB)
                .protocol("ip")
                .matching(format!("reg0={}", ipdst.hex()))
                .matching(format!("dl_dst={}", ethsrc)),
        )
        .await
    }

    pub async fn add_route(&self, ipdst: &IpPrefix, ipgw: &IpAddr, vlanif: &str) -> Result<()> {
        let ethsrc = Composer::find_port_addr(vlanif).unwrap_or("").to_string();
        let priority = 100 + ipdst.prefixlen() as u32;

        let mut flow = Flow::new(TABLE_RIB, priority, COOKIE)
            .protocol("ip")
            .matching(format!("nw_dst={}", ipdst.as_str()))
            .matching(format!("dl_dst={}", ethsrc));

        flow = if ipgw.is_nil_sentinel() {
            flow.action(actions::push(IP_DST))
                .action(actions::pop(REG0))
                .action(actions::resubmit(TABLE_FIB))
        } else {
            flow.action(actions::load(&ipgw.hex(), REG0))
                .action(actions::resubmit(TABLE_FIB))
        };

        self.install(flow).await
    }

    pub async fn del_route(&self, ipdst: &IpPrefix, vlanif: &str) -> Result<()> {
        let ethsrc = Composer::find_port_addr(vlanif).unwrap_or("").to_string();
        self.remove(
            MatchFlow::new()
                .cookie(COOKIE)
                .table(TABLE_RIB)
                .protocol("ip")
                .matching(format!("nw_dst={}", ipdst.as_str()))
                .matching(format!("dl_dst={}", ethsrc)),
        )
        .await
    }

    async fn add_snat_flow(&self, source: &str, source_to: &str) -> Result<()> {
        self.install(
            Flow::new(TABLE_NAT, 50, COOKIE)
                .protocol("ip")
                .matching("ct_state=+trk+new")
                .matching(format!("nw_src={}", source))
                .action(actions::ct(&format!(
                    "commit,nat(src={}),zone=10,table={}",
                    source_to, TABLE_RIB
                ))),
        )
        .await
    }

    pub async fn add_snat(&self, source: &str, source_to: &str) -> Result<()> {
        self.add_snat_flow(source, source_to).await?;
        self.driver
            .set_bridge_other_config(
                &self.brname,
                &std::iter::once((persist_key("snat", source), source_to.to_string())).collect(),
            )
            .await
    }

    pub async fn del_snat(&self, source: &str) -> Result<()> {
        self.remove(
            MatchFlow::new()
                .cookie(COOKIE)
                .table(TABLE_NAT)
                .protocol("ip")
                .matching("ct_state=+trk+new")
                .matching(format!("nw_src={}", source)),
        )
        .await?;
        self.driver
            .remove_bridge_key(&self.brname, "other_config", &persist_key("snat", source))
            .await
    }

    async fn add_dnat_flow(&self, dest: &str, dest_to: &str) -> Result<()> {
        let (daddr, dport) = parse_dest(dest)?;
        self.install(
            Flow::new(TABLE_NAT, 160, COOKIE)
                .protocol("tcp")
                .matching("ct_state=+trk+new")
                .matching(format!("nw_dst={}", daddr))
                .matching(format!("tp_dst={}", dport))
                .action(actions::ct(&format!(
                    "commit,nat(dst={}),zone=10,table={}",
                    dest_to, TABLE_RIB
                ))),
        )
        .await
    }

    pub async fn add_dnat(&self, dest: &str, dest_to: &str) -> Result<()> {
        self.add_dnat_flow(dest, dest_to).await?;
        self.driver
            .set_bridge_other_config(
                &self.brname,
                &std::iter::once((persist_key("dnat", dest), dest_to.to_string())).collect(),
            )
            .await
    }

    pub async fn del_dnat(&self, dest: &str) -> Result<()> {
        let (daddr, dport) = parse_dest(dest)?;
        self.remove(
            MatchFlow::new()
                .cookie(COOKIE)
                .table(TABLE_NAT)
                .protocol("tcp")
                .matching("ct_state=+trk+new")
                .matching(format!("nw_dst={}", daddr))
                .matching(format!("tp_dst={}", dport)),
        )
        .await?;
        self.driver
            .remove_bridge_key(&self.brname, "other_config", &persist_key("dnat", dest))
            .await
    }

    pub async fn add_local(&self, addr: &str) -> Result<()> {
        let host = addr.split('/').next().unwrap_or(addr);
        self.install(
            Flow::new(TABLE_NAT, 150, COOKIE)
                .protocol("ip")
                .matching(format!("nw_dst={}", host))
                .action(actions::resubmit(TABLE_RIB)),
        )
        .await
    }

    pub async fn del_local(&self, addr: &str) -> Result<()> {
        let host = addr.split('/').next().unwrap_or(addr);
        self.remove(
            MatchFlow::new()
                .cookie(COOKIE)
                .table(TABLE_NAT)
                .protocol("ip")
                .matching(format!("nw_dst={}", host)),
        )
        .await
    }
}

fn find_vlan_suffix(name: &str) -> Option<u32> {
    name.strip_prefix("vlan")?.parse::<u32>().ok()
}

/// `snat-<source>` / `dnat-<ip>-<port>`: colons in the value being keyed
/// are replaced with dashes (ovsdb map keys can't contain `:`), up to the
/// first two occurrences — matching the upstream `strings.Replace(key,
/// ":", "-", 2)` exactly, since `dnat-<ip>:<port>` has at most two colons
/// worth replacing (there are none in the IP once the key is built this
/// way, but we mirror the bound for fidelity).
fn persist_key(prefix: &str, value: &str) -> String {
    let key = format!("{}-{}", prefix, value);
    replace_n(&key, ':', '-', 2)
}

fn replace_n(s: &str, from: char, to: char, n: usize) -> String {
    let mut out = String::with_capacity(s.len());
    let mut remaining = n;
    for c in s.chars() {
        if c == from && remaining > 0 {
            out.push(to);
            remaining -= 1;
        } else {
            out.push(c);
        }
    }
    out
}

/// Inverse of the dash-substitution `persist_key` performs on `dnat-`
/// keys, restoring up to two dashes back to colons so the original
/// `ip:port` destination can be re-added.
fn restore_dest_colon(dest: &str) -> String {
    replace_n(dest, '-', ':', 2)
}

fn parse_dest(dest: &str) -> Result<(String, u16)> {
    let (addr, port) = dest
        .split_once(':')
        .ok_or_else(|| OvsError::Internal(format!("invalid destination: {}", dest)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| OvsError::Internal(format!("invalid destination port: {}", dest)))?;
    Ok((addr.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_key_builds_snat_key() {
        assert_eq!(persist_key("snat", "10.0.0.0/24"), "snat-10.0.0.0/24");
    }

    #[test]
    fn persist_key_replaces_up_to_two_colons() {
        assert_eq!(persist_key("dnat", "1.2.3.4:80"), "dnat-1.2.3.4-80");
    }

    #[test]
    fn restore_dest_colon_is_the_inverse() {
        assert_eq!(restore_dest_colon("1.2.3.4-80"), "1.2.3.4:80");
    }

    #[test]
    fn parse_dest_rejects_missing_port() {
        assert!(parse_dest("1.2.3.4").is_err());
    }

    #[test]
    fn parse_dest_splits_addr_and_port() {
        assert_eq!(parse_dest("1.2.3.4:8080").unwrap(), ("1.2.3.4".to_string(), 8080));
    }

    #[test]
    fn vlan_port_id_and_tag_derive_from_suffix() {
        assert_eq!(Composer::find_port_id("vlan7"), 32775);
        assert_eq!(Composer::find_vlan_id("vlan7"), 7);
        assert_eq!(Composer::find_port_id("eth0"), 0);
    }
}
