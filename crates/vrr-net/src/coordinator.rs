//! Gateway Coordinator: the process-wide state holder.
//!
//! Grounded on the upstream `gateway.go`: one `sync.RWMutex` guarding an
//! in-memory `prefix -> IPForward` map and a link-index-to-name cache,
//! with every write path (`AddVlan`, `OnNeighbor`, `AddSNAT`, ...) taking
//! the write half and every read path (`ListInterface`, `ListForward`)
//! taking the read half. The lock's duration covers the call into the
//! [`Composer`], so the Composer itself needs no internal synchronization.
//!
//! Differs from upstream in two ways called out as open questions in the
//! redesign: the forward map is keyed by `(kind, prefix, interface)`
//! rather than bare `prefix`, so a neighbor entry and a route entry for
//! the same destination cannot overwrite each other; and the link-attrs
//! cache is invalidated on `del_interface` rather than held forever.
//! Kernel events arrive over a channel rather than closures handed to the
//! watcher, which is the same reference-cycle fix the redesign calls for
//! (watcher -> sink) without needing a dedicated trait object.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::addr::{IpAddr, IpPrefix, MacAddr};
use crate::composer::Composer;
use crate::driver::OvsDriver;
use crate::error::Result;
use crate::rtnetlink_util;
use crate::watcher::{self, AddressEvent, KernelEvent, NeighborEvent, RouteEvent};

/// Wire schema shared with the HTTP admin surface for `/api/interface`
/// and `/api/vlan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkstate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ofport: Option<i64>,
}

/// Wire schema for `/api/forward`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpForward {
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nexthop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lladdr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snat {
    pub source: String,
    pub source_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dnat {
    pub dest: String,
    pub dest_to: String,
}

/// A forward record may be produced by a resolved neighbor or by a
/// routing-table entry; the same prefix can legitimately appear as both
/// (e.g. a host route whose destination is also a directly attached
/// neighbor), so the kind is part of the map key rather than overwriting
/// across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ForwardKind {
    Neighbor,
    Route,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ForwardKey {
    kind: ForwardKind,
    prefix: String,
    interface: String,
}

#[derive(Default)]
struct Inner {
    forward: HashMap<ForwardKey, IpForward>,
    link_attrs: HashMap<u32, String>,
}

/// The process-wide coordinator between the kernel watcher and the flow
/// composer, and the thing the HTTP admin surface calls into.
pub struct Gateway {
    composer: Composer,
    netns: Option<String>,
    inner: RwLock<Inner>,
    stop: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(bridge: impl Into<String>, driver: OvsDriver, netns: Option<String>) -> Self {
        Gateway {
            composer: Composer::new(bridge, driver, netns.clone()),
            netns,
            inner: RwLock::new(Inner::default()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs the static pipeline. Fatal to process start if it fails:
    /// there is no meaningful partial-operation mode without a bridge, and
    /// a named namespace that doesn't exist yet can never produce events.
    pub async fn init(&self) -> Result<()> {
        if let Some(name) = &self.netns {
            let path = format!("/var/run/netns/{}", name);
            if !std::path::Path::new(&path).exists() {
                return Err(crate::error::OvsError::NamespaceNotFound(name.clone()));
            }
        }
        self.composer.init().await
    }

    /// Starts the three kernel watchers (seed, then live dispatch), then
    /// restores persisted NAT rules through the Composer — the exact
    /// ordering §4.5 requires before the caller is allowed to start
    /// serving HTTP. Resolves only once both steps have completed; the
    /// watcher's live dispatch loop keeps running for the lifetime of the
    /// process on its own task afterward, and `stop()` unblocks it.
    ///
    /// Fatal to process start if the watcher thread fails to enter the
    /// namespace or subscribe (§4.6): there is no meaningful
    /// partial-operation mode without a live kernel event stream, so this
    /// aborts the process rather than returning a swallowable error.
    pub async fn start(self: &Arc<Self>) {
        let watcher::WatcherHandle { events, ready } =
            watcher::start(self.netns.clone(), self.stop.clone());

        match ready.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("kernel watcher failed to start: {}", e);
                std::process::exit(1);
            }
            Err(_) => {
                tracing::error!("kernel watcher thread exited before it could start");
                std::process::exit(1);
            }
        }

        self.composer.start().await;

        let gateway = self.clone();
        tokio::spawn(async move {
            gateway.dispatch_loop(events).await;
        });
    }

    /// Unblocks the kernel watcher's dispatch loop. Called once a
    /// termination signal has been received; does not attempt graceful
    /// drain of in-flight events.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    async fn dispatch_loop(&self, mut rx: tokio::sync::mpsc::UnboundedReceiver<KernelEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                KernelEvent::Neighbor(ev) => self.on_neighbor(ev).await,
                KernelEvent::Route(ev) => self.on_route(ev).await,
                KernelEvent::Address(ev) => self.on_address(ev).await,
            }
        }
    }

    /// Resolves a link index to a name, consulting (and on miss,
    /// populating) the best-effort cache. Never invalidated except by
    /// `del_interface`, so a reused index can serve a stale name until
    /// that interface is explicitly removed.
    async fn link_name(&self, inner: &mut Inner, index: u32) -> Option<String> {
        if let Some(name) = inner.link_attrs.get(&index) {
            return Some(name.clone());
        }
        let name = rtnetlink_util::resolve_link_name(self.netns.as_deref(), index).await?;
        inner.link_attrs.insert(index, name.clone());
        Some(name)
    }

    // -- operator VLAN / interface ops --------------------------------

    pub async fn add_vlan(&self, iface: &Interface) -> Result<()> {
        let _guard = self.inner.write().await;
        if let Some(tag) = iface.tag.filter(|t| *t > 0) {
            self.composer.add_vlan_tag(&iface.name, tag).await?;
        }
        if let Some(trunks) = iface.trunks.as_deref().filter(|t| !t.is_empty()) {
            self.composer.add_vlan_trunks(&iface.name, trunks).await?;
        }
        Ok(())
    }

    /// `tag == 4095` and `trunks == "all"` are the CLI's sentinels for
    /// "clear this column" (see §4.5); both may apply to one request.
    pub async fn del_vlan(&self, iface: &Interface) -> Result<()> {
        let _guard = self.inner.write().await;
        if iface.tag == Some(4095) {
            self.composer.del_vlan_tag(&iface.name).await?;
        }
        if iface.trunks.as_deref() == Some("all") {
            self.composer.del_vlan_trunks(&iface.name).await?;
        }
        Ok(())
    }

    pub async fn add_interface(&self, iface: &Interface) -> Result<()> {
        let _guard = self.inner.write().await;
        self.composer.add_vlan_port(&iface.name).await
    }

    pub async fn del_interface(&self, iface: &Interface) -> Result<()> {
        let mut inner = self.inner.write().await;
        self.composer.del_port(&iface.name).await?;
        inner.link_attrs.retain(|_, name| name != &iface.name);
        Ok(())
    }

    pub async fn list_interface(&self) -> Result<Vec<Interface>> {
        let _guard = self.inner.read().await;
        let ports = self.composer.list_ports().await?;
        Ok(ports
            .into_iter()
            .map(|p| Interface {
                name: p.name,
                linkstate: p.link_state,
                tag: p.tag,
                trunks: p.trunks,
                mac: p.mac,
                ofport: p.ofport,
            })
            .collect())
    }

    // -- kernel event handling -----------------------------------------

    pub async fn on_neighbor(&self, ev: NeighborEvent) {
        if ev.is_multicast {
            return;
        }
        let Some(ip) = ev.ip else { return };
        let Some(mac) = ev.mac.filter(|m| !m.is_empty()) else {
            return;
        };

        let mut inner = self.inner.write().await;
        let Some(link_name) = self.link_name(&mut inner, ev.link_index).await else {
            return;
        };
        if !link_name.starts_with("vlan") {
            return;
        }

        let prefix = ip.to_string();
        let key = ForwardKey {
            kind: ForwardKind::Neighbor,
            prefix: prefix.clone(),
            interface: link_name.clone(),
        };

        match ev.kind {
            watcher::NEIGH_SEED | watcher::NEIGH_ADD => {
                if let Err(e) = self
                    .composer
                    .add_host(&IpAddr::new(prefix.clone()), &MacAddr::new(mac.clone()), &link_name)
                    .await
                {
                    tracing::warn!("Gateway.on_neighbor: add_host {}: {}", prefix, e);
                }
                inner.forward.insert(
                    key,
                    IpForward {
                        prefix: prefix.clone(),
                        nexthop: Some(prefix),
                        interface: Some(link_name),
                        lladdr: Some(mac),
                    },
                );
            }
            watcher::NEIGH_DEL => {
                if let Err(e) = self
                    .composer
                    .del_host(&IpAddr::new(prefix.clone()), &link_name)
                    .await
                {
                    tracing::warn!("Gateway.on_neighbor: del_host {}: {}", prefix, e);
                }
                inner.forward.remove(&key);
            }
            _ => {}
        }
    }

    pub async fn on_route(&self, ev: RouteEvent) {
        let mut inner = self.inner.write().await;
        let Some(link_name) = self.link_name(&mut inner, ev.link_index).await else {
            return;
        };
        if !link_name.starts_with("vlan") {
            return;
        }

        let key = ForwardKey {
            kind: ForwardKind::Route,
            prefix: ev.dst.clone(),
            interface: link_name.clone(),
        };

        match ev.kind {
            watcher::ROUTE_SEED | watcher::ROUTE_ADD => {
                if let Err(e) = self
                    .composer
                    .add_route(&IpPrefix::new(ev.dst.clone()), &IpAddr::new(ev.gw.clone()), &link_name)
                    .await
                {
                    tracing::warn!("Gateway.on_route: add_route {}: {}", ev.dst, e);
                }
                inner.forward.insert(
                    key,
                    IpForward {
                        prefix: ev.dst.clone(),
                        nexthop: Some(ev.gw),
                        interface: Some(link_name),
                        lladdr: None,
                    },
                );
            }
            watcher::ROUTE_DEL => {
                if let Err(e) = self
                    .composer
                    .del_route(&IpPrefix::new(ev.dst), &link_name)
                    .await
                {
                    tracing::warn!("Gateway.on_route: del_route: {}", e);
                }
                inner.forward.remove(&key);
            }
            _ => {}
        }
    }

    pub async fn on_address(&self, ev: AddressEvent) {
        let mut inner = self.inner.write().await;
        let Some(link_name) = self.link_name(&mut inner, ev.link_index).await else {
            return;
        };
        if !link_name.starts_with("vlan") {
            return;
        }

        let result = if ev.new {
            self.composer.add_local(&ev.address).await
        } else {
            self.composer.del_local(&ev.address).await
        };
        if let Err(e) = result {
            tracing::warn!("Gateway.on_address: {}: {}", ev.address, e);
        }
    }

    pub async fn list_forward(&self) -> Result<Vec<IpForward>> {
        let inner = self.inner.read().await;
        Ok(inner.forward.values().cloned().collect())
    }

    // -- operator NAT ops ------------------------------------------------

    pub async fn add_snat(&self, rule: &Snat) -> Result<()> {
        let _guard = self.inner.write().await;
        self.composer.add_snat(&rule.source, &rule.source_to).await
    }

    pub async fn del_snat(&self, rule: &Snat) -> Result<()> {
        let _guard = self.inner.write().await;
        self.composer.del_snat(&rule.source).await
    }

    pub async fn add_dnat(&self, rule: &Dnat) -> Result<()> {
        let _guard = self.inner.write().await;
        self.composer.add_dnat(&rule.dest, &rule.dest_to).await
    }

    pub async fn del_dnat(&self, rule: &Dnat) -> Result<()> {
        let _guard = self.inner.write().await;
        self.composer.del_dnat(&rule.dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway {
        Gateway::new("vrr", OvsDriver::new(), None)
    }

    #[tokio::test]
    async fn on_neighbor_ignores_multicast_and_empty_mac() {
        let gw = gateway();
        gw.on_neighbor(NeighborEvent {
            kind: watcher::NEIGH_ADD,
            link_index: 7,
            ip: Some("224.0.0.1".parse().unwrap()),
            mac: Some("aa:bb:cc:00:00:01".to_string()),
            is_multicast: true,
        })
        .await;
        assert!(gw.list_forward().await.unwrap().is_empty());

        gw.on_neighbor(NeighborEvent {
            kind: watcher::NEIGH_ADD,
            link_index: 7,
            ip: Some("10.0.0.5".parse().unwrap()),
            mac: Some(String::new()),
            is_multicast: false,
        })
        .await;
        assert!(gw.list_forward().await.unwrap().is_empty());
    }

    #[test]
    fn forward_key_distinguishes_neighbor_and_route_for_same_prefix() {
        let a = ForwardKey {
            kind: ForwardKind::Neighbor,
            prefix: "10.0.0.5".to_string(),
            interface: "vlan10".to_string(),
        };
        let b = ForwardKey {
            kind: ForwardKind::Route,
            prefix: "10.0.0.5".to_string(),
            interface: "vlan10".to_string(),
        };
        assert_ne!(a, b);
    }
}
