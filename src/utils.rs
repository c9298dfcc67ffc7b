use crate::config::RelayServer;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Relay URLs given without a scheme are treated as TURN servers.
pub fn add_ice_url_scheme(relay: &RelayServer) -> String {
    if relay.url.starts_with("turn:")
        || relay.url.starts_with("turns:")
        || relay.url.starts_with("stun:")
    {
        relay.url.clone()
    } else {
        format!("turn:{}", relay.url)
    }
}
