//! Transport abstraction for the payment service endpoint
//!
//! A [`ServiceListener`] is the long-lived listening resource; every
//! accepted [`Connection`] owns a socket plus the input and output streams
//! opened over it. All three are released explicitly through [`Release`] so
//! the caller controls the order and can observe failures.
//!
//! The TCP binding stands in for a short-range radio link: it binds a
//! local endpoint and reports the advertised [`ServiceRecord`].

use nearpay_core::{ListenerConfig, PaymentError, PaymentResult, SERVICE_NAME, SERVICE_UUID};
use socket2::SockRef;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// How long the fallback wake-up connection may take
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity a service endpoint is advertised under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub uuid: Uuid,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self::new(SERVICE_NAME, SERVICE_UUID)
    }
}

impl From<&ListenerConfig> for ServiceRecord {
    fn from(config: &ListenerConfig) -> Self {
        Self::new(config.service_name.clone(), config.service_uuid)
    }
}

/// A resource that must be released explicitly
pub trait Release {
    fn release(&mut self) -> io::Result<()>;
}

/// One accepted peer connection
pub trait Connection: Release + Send {
    type Input: Read + Release;
    type Output: Write + Release;

    /// Printable peer identity for logs
    fn peer(&self) -> String;

    fn open_input(&mut self) -> io::Result<Self::Input>;

    fn open_output(&mut self) -> io::Result<Self::Output>;
}

/// Long-lived listening resource.
///
/// `accept` blocks the calling thread. `close` may be called from any other
/// thread and must make a parked or future `accept` fail.
pub trait ServiceListener: Send + Sync {
    type Conn: Connection;

    fn accept(&self) -> io::Result<Self::Conn>;

    fn close(&self) -> io::Result<()>;

    fn record(&self) -> &ServiceRecord;
}

// =============================================================================
// TCP binding
// =============================================================================

/// Service endpoint bound to a local TCP address
#[derive(Debug)]
pub struct TcpServiceListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    record: ServiceRecord,
    closed: AtomicBool,
}

impl TcpServiceListener {
    /// Bind and advertise the service endpoint
    pub fn bind(addr: SocketAddr, record: ServiceRecord) -> PaymentResult<Self> {
        let listener = TcpListener::bind(addr).map_err(PaymentError::ResourceAcquisition)?;
        let local_addr = listener
            .local_addr()
            .map_err(PaymentError::ResourceAcquisition)?;

        info!(
            "Service '{}' ({}) listening on {}",
            record.name, record.uuid, local_addr
        );

        Ok(Self {
            listener,
            local_addr,
            record,
            closed: AtomicBool::new(false),
        })
    }

    /// Bind using listener configuration
    pub fn from_config(config: &ListenerConfig) -> PaymentResult<Self> {
        Self::bind(config.socket_addr()?, ServiceRecord::from(config))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "listening socket closed")
    }

    /// Address a wake-up connection can reach
    fn wake_addr(&self) -> SocketAddr {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.local_addr.port())
    }
}

impl ServiceListener for TcpServiceListener {
    type Conn = TcpConnection;

    fn accept(&self) -> io::Result<TcpConnection> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }

        let accepted = self.listener.accept();

        // Once closed, a failed accept is the shutdown itself and a
        // successful one is the fallback wake-up connection
        if self.is_closed() {
            if let Ok((stream, _)) = accepted {
                let _ = stream.shutdown(Shutdown::Both);
            }
            return Err(Self::closed_error());
        }

        let (stream, peer) = accepted?;
        Ok(TcpConnection { stream, peer })
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Closing service endpoint {}", self.local_addr);

        // Shutting down a listening socket fails a parked accept and refuses
        // new connects, while the descriptor stays owned by the shared Arc
        match SockRef::from(&self.listener).shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Platforms that reject shutdown on a listening socket get a
                // wake-up connection instead; it waits in the backlog if
                // accept has not parked yet
                debug!("Listening socket shutdown failed ({}), waking accept", e);
                TcpStream::connect_timeout(&self.wake_addr(), WAKE_TIMEOUT).map(drop)
            }
        }
    }

    fn record(&self) -> &ServiceRecord {
        &self.record
    }
}

/// Accepted TCP connection
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for TcpConnection {
    type Input = TcpInput;
    type Output = TcpOutput;

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn open_input(&mut self) -> io::Result<TcpInput> {
        Ok(TcpInput(BufReader::new(self.stream.try_clone()?)))
    }

    fn open_output(&mut self) -> io::Result<TcpOutput> {
        Ok(TcpOutput(BufWriter::new(self.stream.try_clone()?)))
    }
}

impl Release for TcpConnection {
    fn release(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// Buffered read half of a TCP connection
#[derive(Debug)]
pub struct TcpInput(BufReader<TcpStream>);

impl Read for TcpInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Release for TcpInput {
    fn release(&mut self) -> io::Result<()> {
        self.0.get_ref().shutdown(Shutdown::Read)
    }
}

/// Buffered write half of a TCP connection
#[derive(Debug)]
pub struct TcpOutput(BufWriter<TcpStream>);

impl Write for TcpOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Release for TcpOutput {
    fn release(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.get_ref().shutdown(Shutdown::Write)
    }
}
