//! Connection handler and server loop: binds a listening socket, accepts connections,
//! and runs one worker thread per connection against a shared [`DataBank`].

use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::databank::DataBank;
use crate::error::ServerError;
use crate::frame::{self, MbapHeader, MBAP_HEADER_LEN};

/// How long an idle accept loop sleeps between polls of the `running` flag after a
/// non-blocking `accept()` comes back empty.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A running (or stopped) Modbus/TCP server.
///
/// `start()` consumes the calling thread in blocking mode, or spawns a background
/// accept-loop thread in non-blocking mode; either way the listening socket and the
/// shared [`DataBank`] live for as long as this value does.
pub struct ModbusTcpServer {
    config: ServerConfig,
    bank: Arc<DataBank>,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ModbusTcpServer {
    /// Builds a server around a fresh [`DataBank`]. Nothing is bound until
    /// [`start`](Self::start) is called.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self::with_bank(config, Arc::new(DataBank::new()))
    }

    /// Builds a server sharing an existing [`DataBank`] - useful for an embedder that
    /// wants to seed values before any client connects, or inspect them afterwards.
    #[must_use]
    pub fn with_bank(config: ServerConfig, bank: Arc<DataBank>) -> Self {
        Self {
            config,
            bank,
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
        }
    }

    /// The shared data bank, for seeding or inspecting state from the embedding
    /// process.
    #[must_use]
    pub fn bank(&self) -> Arc<DataBank> {
        Arc::clone(&self.bank)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds the listening socket and serves. In blocking mode (`config.blocking`)
    /// this consumes the calling thread until [`stop`](Self::stop) closes the
    /// listener; in non-blocking mode the accept loop runs on a background thread and
    /// this returns immediately.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let addr = self.config.socket_addr();
        let listener = bind_listener(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        info!(%addr, "modbus/tcp server listening");

        self.running.store(true, Ordering::SeqCst);
        let bank = Arc::clone(&self.bank);
        let unit_id = self.config.unit_id;
        let running = Arc::clone(&self.running);

        if self.config.blocking {
            accept_loop(listener, bank, unit_id, &running);
            running.store(false, Ordering::SeqCst);
            Ok(())
        } else {
            self.accept_thread = Some(thread::spawn(move || {
                accept_loop(listener, bank, unit_id, &running);
                running.store(false, Ordering::SeqCst);
            }));
            Ok(())
        }
    }

    /// Shuts the listener down. Connections already accepted finish their current
    /// exchange and exit the next time their peer disconnects or a read fails; they
    /// are not forcibly killed.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // The accept loop polls `running` between non-blocking `accept()` attempts
        // (see `ACCEPT_POLL_INTERVAL`), so it notices this within one poll interval
        // and `join` below is bounded rather than blocked on a socket that will never
        // otherwise wake up.
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Builds and binds the listening socket through `socket2` so `SO_REUSEADDR`,
/// `SO_KEEPALIVE` and `TCP_NODELAY` are set *before* `bind`, which is the only point
/// at which `SO_REUSEADDR` has any effect. `TCP_NODELAY` on the listening socket is
/// inherited by every accepted connection, matching §4.4/§6's "set on the listening
/// socket" wording and `original_source/pyModbusTCP/server.py`'s `self._service.socket`
/// setup, which sets all three there rather than per-accepted client. The socket is
/// left non-blocking so the accept loop can poll `running` and shut down promptly
/// instead of sleeping forever inside `accept()` with no peer ever connecting.
///
/// `addr` may resolve to more than one socket address (a DNS name with both an AAAA
/// and an A record, say); each candidate is tried in turn, same as
/// `TcpListener::bind`, so a host being unreachable on one family doesn't fail the
/// whole bind if another resolved address succeeds.
fn bind_listener(addr: &str) -> std::io::Result<TcpListener> {
    let mut last_err = None;
    for resolved in addr.to_socket_addrs()? {
        let domain = if resolved.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let attempt = (|| {
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(true)?;
            socket.set_keepalive(true)?;
            socket.set_nodelay(true)?;
            socket.bind(&resolved.into())?;
            socket.listen(128)?;
            socket.set_nonblocking(true)?;
            std::io::Result::Ok(socket)
        })();
        match attempt {
            Ok(socket) => return Ok(socket.into()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(IoErrorKind::InvalidInput, "no address resolved")
    }))
}

fn accept_loop(listener: TcpListener, bank: Arc<DataBank>, unit_id: u8, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        // A connection accepted from a non-blocking listener does not inherit that
        // listener's non-blocking mode; the worker's reads/writes below block as
        // intended.
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if e.kind() == IoErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
        };
        let bank = Arc::clone(&bank);
        thread::spawn(move || serve_connection(stream, &bank, unit_id));
    }
}

fn serve_connection(mut stream: TcpStream, bank: &DataBank, unit_id: u8) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
    debug!(%peer, "client connected");

    loop {
        let mut header_buf = [0u8; MBAP_HEADER_LEN];
        if !read_exact_or_eof(&mut stream, &mut header_buf, &peer) {
            break;
        }

        let header = match MbapHeader::parse(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                warn!(%peer, error = %e, "framing violation, closing connection");
                break;
            }
        };

        let mut body = vec![0u8; header.body_len()];
        if stream.read_exact(&mut body).is_err() {
            warn!(%peer, "connection closed mid-frame");
            break;
        }

        if frame::check_function_code(body[0]).is_err() {
            warn!(%peer, "function code with high bit set, closing connection");
            break;
        }

        let _ = unit_id; // access control by unit-id is explicitly out of scope
        let response = frame::process_request(&header, &body, bank);
        if let Err(e) = stream.write_all(&response) {
            warn!(%peer, error = %e, "write failed, closing connection");
            break;
        }
    }
    drain_before_close(&mut stream);
    debug!(%peer, "client disconnected");
}

/// Discards any bytes the peer already sent that this worker never read (e.g. the
/// trailing bytes of a frame abandoned mid-validation). Closing a socket with unread
/// data still in its receive buffer makes the OS send a TCP RST instead of a normal
/// FIN, which would turn an intentionally clean disconnect into a connection-reset
/// error on the peer's side.
fn drain_before_close(stream: &mut TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let mut junk = [0u8; 256];
    loop {
        match stream.read(&mut junk) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Loops a `read` until `buf` is full or the peer closes before any bytes of this
/// frame arrive. Returns `false` on clean EOF (terminate) or on error.
fn read_exact_or_eof(stream: &mut TcpStream, buf: &mut [u8], peer: &str) -> bool {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return false,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                return false;
            }
        }
    }
    true
}
