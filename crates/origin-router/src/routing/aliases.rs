//! Peer address aliasing.
//!
//! Turns a `scheme://host[:port]` peer descriptor into the ordered list of
//! origin keys to try against the route table. Port-qualified keys come
//! before portless ones, and every spelling of loopback is expanded so a
//! route configured under any one of them matches the others.

use http::Uri;

/// Loopback spellings, in lookup priority order.
const LOOPBACK_ALIASES: [&str; 3] = ["[::1]", "127.0.0.1", "localhost"];

/// The peer descriptor could not be parsed as an address.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("error normalizing address {address:?}: {reason}")]
    Invalid { address: String, reason: String },

    #[error("address {address:?} has no host")]
    MissingHost { address: String },
}

fn is_loopback(hostname: &str) -> bool {
    matches!(hostname, "::1" | "127.0.0.1" | "localhost")
}

/// Ordered candidate keys for `address`, most specific first.
///
/// ```text
/// http://localhost:9999 -> [::1]:9999, 127.0.0.1:9999, localhost:9999, [::1], 127.0.0.1, localhost
/// http://10.1.2.3:9999  -> 10.1.2.3:9999, 10.1.2.3
/// http://10.1.2.3       -> 10.1.2.3
/// ```
pub fn candidate_keys(address: &str) -> Result<Vec<String>, AddressError> {
    let uri: Uri = address.parse().map_err(|e: http::uri::InvalidUri| AddressError::Invalid {
        address: address.to_string(),
        reason: e.to_string(),
    })?;

    if uri.scheme().is_none() {
        return Err(AddressError::Invalid {
            address: address.to_string(),
            reason: "missing scheme".to_string(),
        });
    }

    let authority = uri.authority().ok_or_else(|| AddressError::MissingHost {
        address: address.to_string(),
    })?;

    // `host()` keeps IPv6 brackets; the bare hostname does not.
    let host = authority.host();
    let hostname = host.trim_start_matches('[').trim_end_matches(']');
    if hostname.is_empty() {
        return Err(AddressError::MissingHost {
            address: address.to_string(),
        });
    }

    let loopback = is_loopback(hostname);
    let mut keys = Vec::with_capacity(6);

    if let Some(port) = authority.port() {
        if loopback {
            keys.extend(LOOPBACK_ALIASES.iter().map(|alias| format!("{alias}:{port}")));
        } else {
            keys.push(format!("{host}:{port}"));
        }
    }

    if loopback {
        keys.extend(LOOPBACK_ALIASES.iter().map(|alias| alias.to_string()));
    } else {
        keys.push(hostname.to_string());
    }

    Ok(keys)
}
