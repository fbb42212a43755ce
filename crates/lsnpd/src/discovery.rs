//! mDNS discovery — advertise this peer, observe everyone else.
//!
//! Advertises `_lsnp._udp.local.` with TXT keys `user_id` and
//! `display_name`, and browses for the same type. Every resolved
//! advertisement becomes a registry upsert; removals and updates are
//! acknowledged but have no effect, since the registry never evicts.

use std::collections::HashMap;
use std::net::IpAddr;

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use lsnp_core::PeerId;
use lsnp_services::PeerRegistry;

pub const SERVICE_TYPE: &str = "_lsnp._udp.local.";

pub struct Discovery {
    daemon: ServiceDaemon,
}

impl Discovery {
    /// Register our advertisement and start the browse task.
    pub fn start(me: &PeerId, display_name: &str, port: u16, registry: PeerRegistry) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("mdns daemon")?;

        let instance = format!(
            "{}_at_{}",
            me.handle(),
            me.ip().to_string().replace('.', "_")
        );
        let host = format!("{instance}.local.");
        let mut properties = HashMap::new();
        properties.insert("user_id".to_string(), me.handle().to_string());
        properties.insert("display_name".to_string(), display_name.to_string());

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &instance,
            &host,
            me.ip().to_string(),
            port,
            properties,
        )
        .context("mdns service info")?;
        daemon.register(info).context("mdns register")?;
        tracing::info!(instance = %instance, port, "mDNS service registered");

        let receiver = daemon.browse(SERVICE_TYPE).context("mdns browse")?;
        let own_handle = me.handle().to_string();
        let own_ip = me.ip();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        on_resolved(&info, &own_handle, own_ip, &registry);
                    }
                    // Peers are never evicted; removal and update events
                    // are observed and dropped.
                    other => {
                        tracing::trace!(event = ?other, "mdns event ignored");
                    }
                }
            }
            tracing::debug!("mdns browse channel closed");
        });

        Ok(Self { daemon })
    }

    pub fn shutdown(&self) {
        let _ = self.daemon.shutdown();
    }
}

fn on_resolved(
    info: &ServiceInfo,
    own_handle: &str,
    own_ip: std::net::Ipv4Addr,
    registry: &PeerRegistry,
) {
    let Some(user_id) = info.get_property_val_str("user_id") else {
        tracing::debug!(fullname = info.get_fullname(), "advertisement without user_id");
        return;
    };
    let display_name = info
        .get_property_val_str("display_name")
        .unwrap_or(user_id)
        .to_string();
    let Some(ip) = info.get_addresses().iter().find_map(|addr| match addr {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(_) => None,
    }) else {
        tracing::debug!(fullname = info.get_fullname(), "advertisement without IPv4");
        return;
    };

    // Our own advertisement comes back from the browse; skip it.
    if user_id == own_handle && ip == own_ip {
        return;
    }

    let peer_id = PeerId::new(user_id, ip);
    tracing::debug!(peer = %peer_id, %display_name, port = info.get_port(), "peer discovered");
    registry.upsert(peer_id, Some(&display_name), info.get_port());
}
