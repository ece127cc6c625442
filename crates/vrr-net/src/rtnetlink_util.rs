//! Link-index to interface-name resolution, scoped to a network
//! namespace. The Gateway Coordinator's link-attrs cache is the only
//! caller: every kernel event carries a link index, never a name.

use crate::error::{OvsError, Result};
use futures::TryStreamExt;
use netlink_packet_route::link::LinkAttribute;
use rtnetlink::new_connection;

fn net_err(e: impl std::fmt::Display) -> OvsError {
    OvsError::Netlink(e.to_string())
}

/// Resolves a link index to its interface name, scoped to `netns` (the
/// host namespace if `None`). Used by the Gateway Coordinator's
/// link-attrs cache, which only ever sees an index on a kernel event.
///
/// A namespace lookup runs on its own ephemeral OS thread (entering a
/// namespace is a per-thread kernel operation) rather than on a tokio
/// blocking-pool thread, so it never leaves a pool worker stuck in the
/// gateway's namespace for later unrelated tasks.
pub async fn resolve_link_name(netns: Option<&str>, index: u32) -> Option<String> {
    match netns {
        None => resolve_link_name_here(index).await.ok().flatten(),
        Some(name) => {
            let name = name.to_string();
            let (tx, rx) = tokio::sync::oneshot::channel();
            std::thread::spawn(move || {
                let result = (|| -> Option<String> {
                    crate::watcher::enter_netns(&name).ok()?;
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .ok()?;
                    rt.block_on(resolve_link_name_here(index)).ok().flatten()
                })();
                let _ = tx.send(result);
            });
            rx.await.ok().flatten()
        }
    }
}

async fn resolve_link_name_here(index: u32) -> Result<Option<String>> {
    let (connection, handle, _) = new_connection().map_err(net_err)?;
    tokio::spawn(connection);

    let mut links = handle.link().get().match_index(index).execute();
    let Some(link) = links.try_next().await.map_err(net_err)? else {
        return Ok(None);
    };
    for attr in &link.attributes {
        if let LinkAttribute::IfName(name) = attr {
            return Ok(Some(name.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn resolve_link_name_finds_loopback() {
        let (connection, handle, _) = new_connection().unwrap();
        tokio::spawn(connection);
        let mut links = handle.link().get().match_name("lo".to_string()).execute();
        let Some(link) = links.try_next().await.unwrap() else {
            return;
        };
        let name = resolve_link_name(None, link.header.index).await;
        assert_eq!(name.as_deref(), Some("lo"));
    }
}
