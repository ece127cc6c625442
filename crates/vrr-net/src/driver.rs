//! Thin adapter over the `ovs-vsctl` / `ovs-ofctl` command surface.
//!
//! Every method shells out to one of the two OVS CLI tools and maps a
//! nonzero exit into [`OvsError::CommandFailed`]. The core above this
//! layer treats OVS as a stateless mutation target; nothing here is
//! cached, so two drivers pointed at the same bridge observe the same
//! state.

use crate::error::{OvsError, Result};
use crate::flow::{Flow, MatchFlow};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;

const VSCTL: &str = "ovs-vsctl";
const OFCTL: &str = "ovs-ofctl";

/// Port attributes read back from the database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortData {
    pub name: String,
    pub tag: Option<u16>,
    pub trunks: Option<String>,
    pub mac: Option<String>,
    pub link_state: Option<String>,
    pub ofport: Option<i64>,
}

/// Interface column values set via `SetInterface`.
#[derive(Debug, Clone, Default)]
pub struct InterfaceOptions {
    pub ofport_request: Option<u32>,
    pub mac: Option<String>,
    pub iface_type: Option<&'static str>,
}

/// Driver bound to a single OVS daemon (the local one; there is exactly
/// one per process in this design).
#[derive(Debug, Clone, Default)]
pub struct OvsDriver {
    sudo: bool,
}

impl OvsDriver {
    pub fn new() -> Self {
        OvsDriver { sudo: false }
    }

    /// Prefix every invocation with `sudo`. Used when the gateway runs
    /// unprivileged but OVS control sockets require root.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    async fn run(&self, tool: &'static str, args: &[&str]) -> Result<String> {
        let mut cmd = if self.sudo {
            let mut c = Command::new("sudo");
            c.arg(tool);
            c
        } else {
            Command::new(tool)
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| OvsError::Spawn(e, tool))?;
        if !output.status.success() {
            return Err(OvsError::CommandFailed {
                tool,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn vsctl(&self, args: &[&str]) -> Result<String> {
        self.run(VSCTL, args).await
    }

    async fn ofctl(&self, args: &[&str]) -> Result<String> {
        self.run(OFCTL, args).await
    }

    /// Create the bridge if absent; succeeds silently if it already
    /// exists (`--may-exist`).
    pub async fn add_bridge(&self, name: &str) -> Result<()> {
        self.vsctl(&["--may-exist", "add-br", name]).await?;
        Ok(())
    }

    /// Read the bridge's `other_config` map.
    pub async fn get_bridge_other_config(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let out = self
            .vsctl(&["get", "Bridge", name, "other_config"])
            .await
            .map_err(|e| match e {
                OvsError::CommandFailed { stderr, .. } if stderr.contains("no row") => {
                    OvsError::BridgeNotFound(name.to_string())
                }
                other => other,
            })?;
        Ok(parse_ovsdb_map(&out))
    }

    /// Write one or more `other_config` keys on the bridge.
    pub async fn set_bridge_other_config(
        &self,
        name: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<()> {
        for (key, value) in entries {
            let setting = format!("other_config:{}={}", key, quote_ovsdb(value));
            self.vsctl(&["set", "Bridge", name, &setting]).await?;
        }
        Ok(())
    }

    /// Remove a single key from the bridge's `other_config` map. Succeeds
    /// silently if the key is already absent.
    pub async fn remove_bridge_key(&self, name: &str, column: &str, key: &str) -> Result<()> {
        match self
            .vsctl(&["remove", "Bridge", name, column, key])
            .await
        {
            Ok(_) => Ok(()),
            Err(OvsError::CommandFailed { ref stderr, .. }) if stderr.contains("no key") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn add_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.vsctl(&["--may-exist", "add-port", bridge, port])
            .await?;
        Ok(())
    }

    pub async fn add_port_with(
        &self,
        bridge: &str,
        port: &str,
        opts: &InterfaceOptions,
    ) -> Result<()> {
        self.add_port(bridge, port).await?;
        self.set_interface(port, opts).await
    }

    pub async fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        match self.vsctl(&["--if-exists", "del-port", bridge, port]).await {
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn list_ports(&self, bridge: &str) -> Result<Vec<String>> {
        let out = self.vsctl(&["list-ports", bridge]).await?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    pub async fn get_port(&self, port: &str) -> Result<PortData> {
        let tag = self
            .vsctl(&["get", "Port", port, "tag"])
            .await
            .ok()
            .and_then(|s| parse_ovsdb_scalar(&s).parse::<u16>().ok());
        let trunks = self
            .vsctl(&["get", "Port", port, "trunks"])
            .await
            .ok()
            .map(|s| parse_ovsdb_scalar(&s))
            .filter(|s| !s.is_empty() && s != "[]");
        let mac = self
            .vsctl(&["get", "Interface", port, "mac_in_use"])
            .await
            .ok()
            .map(|s| parse_ovsdb_scalar(&s))
            .filter(|s| !s.is_empty());
        let link_state = self
            .vsctl(&["get", "Interface", port, "link_state"])
            .await
            .ok()
            .map(|s| parse_ovsdb_scalar(&s))
            .filter(|s| !s.is_empty());
        let ofport = self
            .vsctl(&["get", "Interface", port, "ofport"])
            .await
            .ok()
            .and_then(|s| parse_ovsdb_scalar(&s).parse::<i64>().ok());

        Ok(PortData {
            name: port.to_string(),
            tag,
            trunks,
            mac,
            link_state,
            ofport,
        })
    }

    pub async fn set_port_tag(&self, port: &str, tag: u16) -> Result<()> {
        let setting = format!("tag={}", tag);
        self.vsctl(&["set", "Port", port, &setting]).await?;
        Ok(())
    }

    pub async fn set_port_trunks(&self, port: &str, trunks: &str) -> Result<()> {
        let setting = format!("trunks={}", trunks);
        self.vsctl(&["set", "Port", port, &setting]).await?;
        Ok(())
    }

    pub async fn clear_port(&self, port: &str, column: &str) -> Result<()> {
        self.vsctl(&["clear", "Port", port, column]).await?;
        Ok(())
    }

    pub async fn set_interface(&self, port: &str, opts: &InterfaceOptions) -> Result<()> {
        let mut settings = Vec::new();
        if let Some(req) = opts.ofport_request {
            settings.push(format!("ofport_request={}", req));
        }
        if let Some(mac) = &opts.mac {
            settings.push(format!("mac={}", quote_ovsdb(mac)));
        }
        if let Some(ty) = opts.iface_type {
            settings.push(format!("type={}", ty));
        }
        if settings.is_empty() {
            return Ok(());
        }
        let mut args = vec!["set".to_string(), "Interface".to_string(), port.to_string()];
        args.extend(settings);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.vsctl(&arg_refs).await?;
        Ok(())
    }

    pub async fn add_flow(&self, bridge: &str, flow: &Flow) -> Result<()> {
        self.ofctl(&["add-flow", bridge, &flow.to_flow_line()])
            .await?;
        Ok(())
    }

    /// `None` removes every flow on the bridge (a bare `del-flows`).
    pub async fn del_flows(&self, bridge: &str, selector: Option<&MatchFlow>) -> Result<()> {
        match selector {
            Some(sel) => {
                let line = sel.to_selector_line();
                if line.is_empty() {
                    self.ofctl(&["del-flows", bridge]).await?;
                } else {
                    self.ofctl(&["del-flows", bridge, &line]).await?;
                }
            }
            None => {
                self.ofctl(&["del-flows", bridge]).await?;
            }
        }
        Ok(())
    }
}

/// `{key1=val1, key2=val2}` → a sorted map. Returns an empty map for `{}`
/// or any line that is not a valid ovsdb map literal.
fn parse_ovsdb_map(raw: &str) -> BTreeMap<String, String> {
    let inner = raw.trim().trim_start_matches('{').trim_end_matches('}');
    let mut map = BTreeMap::new();
    if inner.trim().is_empty() {
        return map;
    }
    for entry in inner.split(',') {
        if let Some((k, v)) = entry.split_once('=') {
            map.insert(
                k.trim().trim_matches('"').to_string(),
                v.trim().trim_matches('"').to_string(),
            );
        }
    }
    map
}

/// Strips the outer quotes ovsdb puts around scalar string columns.
fn parse_ovsdb_scalar(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn quote_ovsdb(value: &str) -> String {
    format!("\"{}\"", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_map() {
        assert!(parse_ovsdb_map("{}").is_empty());
    }

    #[test]
    fn parse_map_with_entries() {
        let map = parse_ovsdb_map(r#"{snat-10.0.0.0/24="1.2.3.4", dnat-1.2.3.4-80="10.0.0.5:8080"}"#);
        assert_eq!(map.get("snat-10.0.0.0/24").unwrap(), "1.2.3.4");
        assert_eq!(map.get("dnat-1.2.3.4-80").unwrap(), "10.0.0.5:8080");
    }

    #[test]
    fn parse_scalar_strips_quotes() {
        assert_eq!(parse_ovsdb_scalar("\"up\""), "up");
        assert_eq!(parse_ovsdb_scalar("[]"), "[]");
    }
}
