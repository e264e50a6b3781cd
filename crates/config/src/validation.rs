//! Field validators used by the configuration structs.

use std::net::SocketAddr;

/// Validate socket address format
pub fn validate_socket_addr(addr: &str) -> Result<(), validator::ValidationError> {
    addr.parse::<SocketAddr>().map(|_| ()).map_err(|_| {
        let mut err = validator::ValidationError::new("invalid_socket_address");
        err.message = Some(std::borrow::Cow::Owned(format!(
            "Invalid socket address '{}'. Expected format: IP:PORT (e.g., '0.0.0.0:8080')",
            addr
        )));
        err
    })
}
