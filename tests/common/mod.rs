//! Test utilities and fake servers for Chainsock
//!
//! Every server binds an ephemeral loopback port and handles each
//! connection on its own thread. Proxies relay the tunnel with blocking
//! copies in both directions.

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Username and password expected by an authenticating fake proxy
pub type Auth = (&'static str, &'static str);

/// A running fake server
#[derive(Debug, Clone)]
pub struct FakeServer {
    /// Address the server listens on
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    /// Listening port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Proxy URL for this server
    pub fn url(&self, scheme: &str) -> String {
        format!("{}://{}", scheme, self.addr)
    }

    /// Proxy URL with credentials
    pub fn url_with_auth(&self, scheme: &str, user: &str, pass: &str) -> String {
        format!("{}://{}:{}@{}", scheme, user, pass, self.addr)
    }

    /// Number of connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Accept connections forever, running `handler` on a thread per connection
fn spawn_server<F>(handler: F) -> FakeServer
where
    F: Fn(TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let counter = accepted.clone();
    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { continue };
            counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            thread::spawn(move || handler(conn));
        }
    });

    FakeServer { addr, accepted }
}

/// Copy bytes both ways until either side closes
fn relay(client: TcpStream, upstream: TcpStream) {
    let (Ok(mut client_read), Ok(mut upstream_write)) = (client.try_clone(), upstream.try_clone())
    else {
        return;
    };
    let forward = thread::spawn(move || {
        let _ = io::copy(&mut client_read, &mut upstream_write);
        let _ = upstream_write.shutdown(Shutdown::Write);
    });

    let (mut upstream_read, mut client_write) = (upstream, client);
    let _ = io::copy(&mut upstream_read, &mut client_write);
    let _ = client_write.shutdown(Shutdown::Write);
    let _ = forward.join();
}

/// Echo server that first writes `banner`
pub fn spawn_echo(banner: &'static [u8]) -> FakeServer {
    spawn_server(move |mut conn| {
        if conn.write_all(banner).is_err() {
            return;
        }
        let Ok(mut reader) = conn.try_clone() else { return };
        let _ = io::copy(&mut reader, &mut conn);
    })
}

/// Server that accepts and then never says anything
pub fn spawn_silent() -> FakeServer {
    spawn_server(|mut conn| {
        let mut sink = [0u8; 1024];
        while matches!(conn.read(&mut sink), Ok(n) if n > 0) {}
    })
}

/// Server answering a TLS ClientHello with plaintext
pub fn spawn_plaintext_for_tls() -> FakeServer {
    spawn_server(|mut conn| {
        let mut hello = [0u8; 1024];
        let _ = conn.read(&mut hello);
        let _ = conn.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        thread::sleep(Duration::from_millis(500));
    })
}

/// A port nothing listens on
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// SOCKS4 proxy; `reply` overrides the status byte when set
pub fn spawn_socks4(reply: Option<u8>) -> FakeServer {
    spawn_server(move |mut conn| {
        let mut request = [0u8; 8];
        if conn.read_exact(&mut request).is_err() || request[0] != 4 || request[1] != 1 {
            return;
        }
        // user id up to the NUL
        let mut byte = [0u8; 1];
        loop {
            if conn.read_exact(&mut byte).is_err() {
                return;
            }
            if byte[0] == 0 {
                break;
            }
        }

        let port = u16::from_be_bytes([request[2], request[3]]);
        let ip = Ipv4Addr::new(request[4], request[5], request[6], request[7]);

        if let Some(status) = reply {
            let _ = conn.write_all(&[0x00, status, 0, 0, 0, 0, 0, 0]);
            return;
        }
        match TcpStream::connect((ip, port)) {
            Ok(upstream) => {
                if conn.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).is_ok() {
                    relay(conn, upstream);
                }
            }
            Err(_) => {
                let _ = conn.write_all(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0]);
            }
        }
    })
}

fn read_socks5_target(conn: &mut TcpStream) -> io::Result<(String, u16)> {
    let mut header = [0u8; 4];
    conn.read_exact(&mut header)?;
    let host = match header[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            conn.read_exact(&mut ip)?;
            IpAddr::from(ip).to_string()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            conn.read_exact(&mut ip)?;
            Ipv6Addr::from(ip).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            conn.read_exact(&mut len)?;
            let mut name = vec![0u8; len[0] as usize];
            conn.read_exact(&mut name)?;
            String::from_utf8_lossy(&name).into_owned()
        }
        _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "bad atyp")),
    };
    let mut port = [0u8; 2];
    conn.read_exact(&mut port)?;
    Ok((host, u16::from_be_bytes(port)))
}

fn socks5_handshake(conn: &mut TcpStream, auth: Option<Auth>) -> io::Result<bool> {
    let mut greeting = [0u8; 2];
    conn.read_exact(&mut greeting)?;
    let mut methods = vec![0u8; greeting[1] as usize];
    conn.read_exact(&mut methods)?;

    let Some((user, pass)) = auth else {
        conn.write_all(&[0x05, 0x00])?;
        return Ok(true);
    };
    if !methods.contains(&0x02) {
        conn.write_all(&[0x05, 0xFF])?;
        return Ok(false);
    }
    conn.write_all(&[0x05, 0x02])?;

    let mut ver_len = [0u8; 2];
    conn.read_exact(&mut ver_len)?;
    let mut got_user = vec![0u8; ver_len[1] as usize];
    conn.read_exact(&mut got_user)?;
    let mut plen = [0u8; 1];
    conn.read_exact(&mut plen)?;
    let mut got_pass = vec![0u8; plen[0] as usize];
    conn.read_exact(&mut got_pass)?;

    let ok = got_user == user.as_bytes() && got_pass == pass.as_bytes();
    conn.write_all(&[0x01, if ok { 0x00 } else { 0x01 }])?;
    Ok(ok)
}

/// SOCKS5 proxy; `reply` overrides the CONNECT status when set
pub fn spawn_socks5(auth: Option<Auth>, reply: Option<u8>) -> FakeServer {
    spawn_server(move |mut conn| {
        if !matches!(socks5_handshake(&mut conn, auth), Ok(true)) {
            return;
        }
        let Ok((host, port)) = read_socks5_target(&mut conn) else {
            return;
        };

        if let Some(status) = reply {
            let _ = conn.write_all(&[0x05, status, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
            return;
        }
        match TcpStream::connect((host.as_str(), port)) {
            Ok(upstream) => {
                // bound address as a domain name to exercise variable length parsing
                let mut reply = vec![0x05, 0x00, 0x00, 0x03, 4];
                reply.extend_from_slice(b"fake");
                reply.extend_from_slice(&port.to_be_bytes());
                if conn.write_all(&reply).is_ok() {
                    relay(conn, upstream);
                }
            }
            Err(_) => {
                let _ = conn.write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
            }
        }
    })
}

fn read_http_head(conn: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        conn.read_exact(&mut byte)?;
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// HTTP CONNECT proxy; with `auth` the Proxy-Authorization header is checked
pub fn spawn_http(auth: Option<Auth>) -> FakeServer {
    spawn_server(move |mut conn| {
        let Ok(head) = read_http_head(&mut conn) else {
            return;
        };
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        if parts.next() != Some("CONNECT") {
            let _ = conn.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
            return;
        }
        let authority = parts.next().unwrap_or_default().to_string();

        if let Some((user, pass)) = auth {
            let expected = format!(
                "Proxy-Authorization: Basic {}",
                STANDARD.encode(format!("{}:{}", user, pass))
            );
            if !lines.any(|line| line == expected) {
                let _ = conn.write_all(
                    b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic\r\n\r\n",
                );
                return;
            }
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host.trim_start_matches('[').trim_end_matches(']').to_string(),
                port.parse::<u16>().unwrap_or(0),
            ),
            None => return,
        };
        match TcpStream::connect((host.as_str(), port)) {
            Ok(upstream) => {
                let ok = conn.write_all(
                    b"HTTP/1.1 200 Connection established\r\nProxy-Agent: fake\r\n\r\n",
                );
                if ok.is_ok() {
                    relay(conn, upstream);
                }
            }
            Err(_) => {
                let _ = conn.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
            }
        }
    })
}

/// TLS echo server with a self-signed certificate for `localhost`
#[cfg(feature = "rustls-tls")]
pub struct TlsEchoServer {
    /// The listening server
    pub server: FakeServer,
    /// PEM file holding the server certificate
    pub root: tempfile::NamedTempFile,
    clean_closes: Arc<AtomicUsize>,
}

#[cfg(feature = "rustls-tls")]
impl TlsEchoServer {
    /// Path of the certificate to trust
    pub fn root_path(&self) -> String {
        self.root.path().to_string_lossy().into_owned()
    }

    /// Sessions the client ended with a close_notify
    pub fn clean_closes(&self) -> usize {
        self.clean_closes.load(Ordering::SeqCst)
    }
}

/// TLS server that writes `banner` after the handshake, then echoes
#[cfg(feature = "rustls-tls")]
pub fn spawn_tls_echo(banner: &'static [u8]) -> TlsEchoServer {
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::{ServerConfig, ServerConnection, StreamOwned};

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let mut root = tempfile::NamedTempFile::new().unwrap();
    root.write_all(certified.cert.pem().as_bytes()).unwrap();

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.key_pair.serialize_der(),
    ));
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], key)
        .unwrap();
    let config = Arc::new(config);

    let clean_closes = Arc::new(AtomicUsize::new(0));
    let counter = clean_closes.clone();
    let server = spawn_server(move |conn| {
        let Ok(session) = ServerConnection::new(config.clone()) else {
            return;
        };
        let mut tls = StreamOwned::new(session, conn);
        if tls.write_all(banner).and_then(|_| tls.flush()).is_err() {
            return;
        }

        let mut buf = [0u8; 1024];
        loop {
            match tls.read(&mut buf) {
                // a clean EOF means the peer sent close_notify
                Ok(0) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Ok(n) => {
                    if tls.write_all(&buf[..n]).and_then(|_| tls.flush()).is_err() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    });

    TlsEchoServer {
        server,
        root,
        clean_closes,
    }
}
