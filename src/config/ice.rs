//! ICE server list construction, including TURN REST credentials

use super::{IceServerConfig, WebRTCConfig};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

/// Lifetime of generated TURN REST credentials
const TURN_CREDENTIAL_TTL_SECS: u64 = 24 * 60 * 60;

/// Build the effective ICE server list.
///
/// STUN/TURN host fields take precedence; when neither is set the explicit
/// `ice_servers` list is returned unchanged.
pub fn build_ice_servers(config: &WebRTCConfig) -> Vec<IceServerConfig> {
    let mut servers = Vec::new();

    let has_stun = !config.stun_host.is_empty() && config.stun_port != 0;
    if has_stun {
        servers.push(IceServerConfig {
            urls: vec![format!("stun:{}:{}", config.stun_host, config.stun_port)],
            username: None,
            credential: None,
        });
    }

    if !config.turn_host.is_empty() {
        let scheme = if config.turn_tls { "turns" } else { "turn" };
        let transport = if config.turn_protocol.is_empty() {
            "udp"
        } else {
            config.turn_protocol.as_str()
        };
        let url = format!(
            "{}:{}:{}?transport={}",
            scheme, config.turn_host, config.turn_port, transport
        );

        let (username, credential) = if !config.turn_shared_secret.is_empty() {
            let expiry = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() + TURN_CREDENTIAL_TTL_SECS)
                .unwrap_or(TURN_CREDENTIAL_TTL_SECS);
            turn_rest_credentials(&config.turn_shared_secret, expiry)
        } else if !config.turn_username.is_empty() && !config.turn_password.is_empty() {
            (
                Some(config.turn_username.clone()),
                Some(config.turn_password.clone()),
            )
        } else {
            (None, None)
        };

        servers.push(IceServerConfig {
            urls: vec![url],
            username,
            credential,
        });
    }

    if servers.is_empty() {
        return config.ice_servers.clone();
    }

    servers
}

/// `username = "<expiry>:roomrtc"`, `credential = base64(hmac_sha1(secret, username))`
fn turn_rest_credentials(secret: &str, expiry: u64) -> (Option<String>, Option<String>) {
    let user = format!("{}:roomrtc", expiry);
    match hmac_sha1_base64(secret, &user) {
        Some(password) => (Some(user), Some(password)),
        None => (None, None),
    }
}

fn hmac_sha1_base64(secret: &str, message: &str) -> Option<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message.as_bytes());
    let result = mac.finalize().into_bytes();
    Some(base64::engine::general_purpose::STANDARD.encode(result))
}
