//! Proxy protocol constants
//!
//! Wire values for the SOCKS4, SOCKS5 and HTTP CONNECT handshakes.

/// SOCKS4 protocol version
pub const SOCKS4_VERSION: u8 = 0x04;

/// SOCKS4 CONNECT command
pub const SOCKS4_CMD_CONNECT: u8 = 0x01;

/// Version byte of a SOCKS4 reply
pub const SOCKS4_REPLY_VERSION: u8 = 0x00;

// SOCKS4 reply codes
/// Request granted
pub const SOCKS4_REPLY_GRANTED: u8 = 0x5A;
/// Request rejected or failed
pub const SOCKS4_REPLY_REJECTED: u8 = 0x5B;
/// Rejected because the proxy cannot reach the client's identd
pub const SOCKS4_REPLY_IDENTD_UNREACHABLE: u8 = 0x5C;
/// Rejected because identd reported a different user id
pub const SOCKS4_REPLY_IDENTD_MISMATCH: u8 = 0x5D;

/// Length of a SOCKS4 reply
pub const SOCKS4_REPLY_LEN: usize = 8;

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// SOCKS5 authentication sub-negotiation version
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

/// Sub-negotiation status for accepted credentials
pub const SOCKS5_AUTH_SUCCESS: u8 = 0x00;

/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// Reply codes
/// Succeeded
pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
/// General SOCKS server failure
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
/// Connection not allowed by ruleset
pub const SOCKS5_REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
/// Network unreachable
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
/// Host unreachable
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
/// TTL expired
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
/// Command not supported
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Protocol version sent in the CONNECT request line
pub const HTTP_CONNECT_VERSION: &str = "HTTP/1.1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions() {
        assert_eq!(SOCKS4_VERSION, 4);
        assert_eq!(SOCKS5_VERSION, 5);
        assert_eq!(SOCKS5_AUTH_VERSION, 1);
    }

    #[test]
    fn test_socks4_reply_codes() {
        assert_eq!(SOCKS4_REPLY_GRANTED, 90);
        assert_eq!(SOCKS4_REPLY_REJECTED, 91);
        assert_eq!(SOCKS4_REPLY_IDENTD_UNREACHABLE, 92);
        assert_eq!(SOCKS4_REPLY_IDENTD_MISMATCH, 93);
    }

    #[test]
    fn test_socks5_reply_codes() {
        assert_eq!(SOCKS5_REPLY_SUCCEEDED, 0);
        assert_eq!(SOCKS5_REPLY_GENERAL_FAILURE, 1);
        assert_eq!(SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED, 8);
    }
}
