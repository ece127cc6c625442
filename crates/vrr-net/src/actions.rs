//! OpenFlow action string constructors, in the vocabulary `ovs-ofctl`
//! expects on the right-hand side of `actions=`.

pub const ETH_DST: &str = "NXM_OF_ETH_DST";
pub const ETH_SRC: &str = "NXM_OF_ETH_SRC";
pub const VLAN_TCI: &str = "NXM_OF_VLAN_TCI";
pub const IN_PORT: &str = "NXM_OF_IN_PORT";
pub const IP_DST: &str = "NXM_OF_IP_DST";
pub const REG0: &str = "NXM_NX_REG0";

pub fn push(field: &str) -> String {
    format!("push:{}[]", field)
}

pub fn pop(field: &str) -> String {
    format!("pop:{}[]", field)
}

pub fn load(value: &str, field: &str) -> String {
    format!("load:{}->{}[]", value, field)
}

pub fn dec_ttl() -> String {
    "dec_ttl".to_string()
}

/// `resubmit(,table)` — keep the current in_port, jump to `table`.
pub fn resubmit(table: u8) -> String {
    format!("resubmit(,{})", table)
}

pub fn normal() -> String {
    "NORMAL".to_string()
}

pub fn ct(spec: &str) -> String {
    format!("ct({})", spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_formats_value_and_field() {
        assert_eq!(load("0x0a000001", REG0), "load:0x0a000001->NXM_NX_REG0[]");
    }

    #[test]
    fn resubmit_keeps_in_port() {
        assert_eq!(resubmit(30), "resubmit(,30)");
    }
}
