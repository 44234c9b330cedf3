//! TLS session layer
//!
//! Wraps an established (possibly proxied) TCP connection in a rustls client
//! session. The handshake is driven synchronously under the connect
//! deadline; afterwards the stream is an ordinary blocking `Read + Write`.

use super::{Deadline, TimedStream};
use crate::config::TlsConfig;
use crate::error::{ChainsockError, InternalError, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;
use tracing::{debug, warn};

/// TLS stream type alias
pub type TlsStream = rustls::StreamOwned<ClientConnection, TcpStream>;

/// Build the rustls client configuration
///
/// Roots come from the platform store plus the optional `trusted_root` PEM
/// file. With `skip_verify` the server certificate is not checked at all.
pub fn build_client_config(config: &TlsConfig) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(ChainsockError::tls)?;

    let tls_config = if config.skip_verify {
        warn!("TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(load_roots(config)?)
            .with_no_client_auth()
    };

    Ok(Arc::new(tls_config))
}

fn load_roots(config: &TlsConfig) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    for err in &native_certs.errors {
        debug!("Skipping platform certificate source: {}", err);
    }
    for cert in native_certs.certs {
        root_store.add(cert).ok();
    }

    if let Some(ref root_path) = config.trusted_root {
        let file = File::open(root_path).map_err(|e| ChainsockError::system(&e))?;
        let mut reader = BufReader::new(file);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ChainsockError::system(&e))?;
        if certs.is_empty() {
            return Err(ChainsockError::tls(format!(
                "no certificates found in {}",
                root_path
            )));
        }
        for cert in certs {
            root_store.add(cert).map_err(ChainsockError::tls)?;
        }
    }

    Ok(root_store)
}

/// Run the client handshake over `tcp` before the deadline
///
/// `hostname` is used for SNI and certificate verification. A hostname
/// rustls cannot accept is reported as [`InternalError::TlsGeneric`];
/// failures raised by rustls land in the TLS domain.
pub fn handshake(
    config: Arc<ClientConfig>,
    hostname: &str,
    mut tcp: TcpStream,
    deadline: Deadline,
) -> Result<TlsStream> {
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| ChainsockError::internal(InternalError::TlsGeneric))?;
    let mut conn = ClientConnection::new(config, server_name).map_err(ChainsockError::tls)?;

    while conn.is_handshaking() {
        if deadline.is_expired() {
            return Err(ChainsockError::internal(InternalError::HitConnectTimeout));
        }
        tcp.set_io_timeout(deadline.socket_timeout())
            .map_err(|e| ChainsockError::system(&e))?;
        conn.complete_io(&mut tcp)
            .map_err(|e| ChainsockError::from_io(&e, InternalError::HitConnectTimeout))?;
    }

    debug!(
        "TLS session established with {} ({:?})",
        hostname,
        conn.protocol_version()
    );

    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Whether decrypted bytes are waiting in the session
///
/// Only records already pulled off the socket are considered; this never
/// blocks.
pub fn has_plaintext(tls: &mut TlsStream) -> Result<bool> {
    let state = tls
        .conn
        .process_new_packets()
        .map_err(ChainsockError::tls)?;
    Ok(state.plaintext_bytes_to_read() > 0)
}

/// Queue and flush a close_notify alert, ignoring write failures
pub fn close_notify(tls: &mut TlsStream) {
    tls.conn.send_close_notify();
    while tls.conn.wants_write() {
        match tls.conn.write_tls(&mut tls.sock) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Certificate verifier that accepts all certificates (dangerous!)
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDomain;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    fn skip_verify_config() -> TlsConfig {
        TlsConfig {
            hostname: None,
            trusted_root: None,
            skip_verify: true,
        }
    }

    #[test]
    fn test_build_client_config() {
        assert!(build_client_config(&TlsConfig::default()).is_ok());
        assert!(build_client_config(&skip_verify_config()).is_ok());
    }

    #[test]
    fn test_missing_trusted_root() {
        let config = TlsConfig {
            hostname: None,
            trusted_root: Some("/nonexistent/ca.pem".to_string()),
            skip_verify: false,
        };
        let err = build_client_config(&config).unwrap_err();
        assert_eq!(err.domain(), ErrorDomain::System);
    }

    #[test]
    fn test_trusted_root_without_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let config = TlsConfig {
            hostname: None,
            trusted_root: Some(file.path().to_string_lossy().into_owned()),
            skip_verify: false,
        };
        let err = build_client_config(&config).unwrap_err();
        assert_eq!(err.domain(), ErrorDomain::Tls);
    }

    #[test]
    fn test_invalid_server_name() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let config = build_client_config(&skip_verify_config()).unwrap();

        let err = handshake(config, "bad name!", tcp, Deadline::never()).unwrap_err();
        assert_eq!(err.internal_kind(), Some(InternalError::TlsGeneric));
    }

    #[test]
    fn test_handshake_with_plaintext_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut hello = [0u8; 512];
            let _ = conn.read(&mut hello);
            let _ = conn.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            std::thread::sleep(Duration::from_millis(200));
        });

        let tcp = TcpStream::connect(addr).unwrap();
        let config = build_client_config(&skip_verify_config()).unwrap();
        let err = handshake(
            config,
            "localhost",
            tcp,
            Deadline::after(Duration::from_secs(5)),
        )
        .unwrap_err();
        assert_eq!(err.domain(), ErrorDomain::Tls);
        server.join().unwrap();
    }

    #[test]
    fn test_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let _held = listener.accept().unwrap();
        let config = build_client_config(&skip_verify_config()).unwrap();

        let err = handshake(
            config,
            "localhost",
            tcp,
            Deadline::after(Duration::from_millis(100)),
        )
        .unwrap_err();
        assert_eq!(err.internal_kind(), Some(InternalError::HitConnectTimeout));
    }
}
