//! OpenFlow rule text, formatted exactly as `ovs-ofctl add-flow` /
//! `ovs-ofctl del-flows` expect on stdin.
//!
//! This is a thin text builder, not a protocol implementation: the driver
//! is explicitly an opaque adapter over the `ovs-ofctl` command surface
//! (§4.1), so there is no wire-level encoding here, only string assembly.

/// Single OpenFlow rule to install.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    pub table: u8,
    pub priority: u32,
    pub cookie: u64,
    /// `Some("ip")` / `Some("tcp")` restricts the rule to that protocol;
    /// `None` matches any.
    pub protocol: Option<&'static str>,
    pub matches: Vec<String>,
    pub actions: Vec<String>,
}

impl Flow {
    pub fn new(table: u8, priority: u32, cookie: u64) -> Self {
        Flow {
            table,
            priority,
            cookie,
            protocol: None,
            matches: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn protocol(mut self, proto: &'static str) -> Self {
        self.protocol = Some(proto);
        self
    }

    pub fn matching(mut self, m: impl Into<String>) -> Self {
        self.matches.push(m.into());
        self
    }

    pub fn action(mut self, a: impl Into<String>) -> Self {
        self.actions.push(a.into());
        self
    }

    /// Renders a single `ovs-ofctl add-flow`-compatible line.
    pub fn to_flow_line(&self) -> String {
        let mut fields = vec![
            format!("cookie={:#x}", self.cookie),
            format!("table={}", self.table),
            format!("priority={}", self.priority),
        ];
        if let Some(proto) = self.protocol {
            fields.push(proto.to_string());
        }
        fields.extend(self.matches.iter().cloned());
        fields.push(format!("actions={}", self.actions.join(",")));
        fields.join(",")
    }
}

/// Selector used by `ovs-ofctl del-flows` to remove a subset of rules by
/// table/cookie/match rather than an exact flow body.
#[derive(Debug, Clone, Default)]
pub struct MatchFlow {
    pub table: Option<u8>,
    pub cookie: Option<u64>,
    pub protocol: Option<&'static str>,
    pub matches: Vec<String>,
}

impl MatchFlow {
    pub fn new() -> Self {
        MatchFlow::default()
    }

    pub fn table(mut self, table: u8) -> Self {
        self.table = Some(table);
        self
    }

    pub fn cookie(mut self, cookie: u64) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn protocol(mut self, proto: &'static str) -> Self {
        self.protocol = Some(proto);
        self
    }

    pub fn matching(mut self, m: impl Into<String>) -> Self {
        self.matches.push(m.into());
        self
    }

    /// Renders a single `ovs-ofctl del-flows`-compatible selector line.
    /// An empty selector (no table/cookie/matches) deletes every flow on
    /// the bridge, matching `ovs-ofctl del-flows <bridge>` with no args.
    pub fn to_selector_line(&self) -> String {
        let mut fields = Vec::new();
        if let Some(cookie) = self.cookie {
            // exact-match cookie mask so del-flows targets only our flows
            fields.push(format!("cookie={:#x}/-1", cookie));
        }
        if let Some(table) = self.table {
            fields.push(format!("table={}", table));
        }
        if let Some(proto) = self.protocol {
            fields.push(proto.to_string());
        }
        fields.extend(self.matches.iter().cloned());
        fields.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_line_includes_protocol_and_actions() {
        let flow = Flow::new(20, 100, 0x2021)
            .protocol("ip")
            .matching("reg0=0x0a000001")
            .action("mod_dl_dst:00:00:00:00:20:15")
            .action("resubmit(,30)");
        let line = flow.to_flow_line();
        assert!(line.starts_with("cookie=0x2021,table=20,priority=100,ip,"));
        assert!(line.ends_with("actions=mod_dl_dst:00:00:00:00:20:15,resubmit(,30)"));
    }

    #[test]
    fn selector_with_no_fields_matches_everything() {
        assert_eq!(MatchFlow::new().to_selector_line(), "");
    }

    #[test]
    fn selector_cookie_is_exact_match() {
        let sel = MatchFlow::new().cookie(0x2021).table(19);
        assert_eq!(sel.to_selector_line(), "cookie=0x2021/-1,table=19");
    }
}
