//! OVS driver, address codec, kernel watcher, and flow composer that
//! together turn observed Linux routing state into an OpenFlow pipeline.

pub mod actions;
pub mod addr;
pub mod composer;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod flow;
pub mod rtnetlink_util;
pub mod watcher;

pub use addr::{IpAddr, IpPrefix, MacAddr};
pub use composer::Composer;
pub use coordinator::{Dnat, Gateway, Interface, IpForward, Snat};
pub use driver::{InterfaceOptions, OvsDriver, PortData};
pub use error::OvsError;
pub use flow::{Flow, MatchFlow};
pub use watcher::{AddressEvent, KernelEvent, NeighborEvent, RouteEvent};
