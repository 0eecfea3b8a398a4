//! Validation transport. One endpoint abstraction covering both address
//! families the deployment scripts use: TCP for cross-host runs, Unix-domain
//! sockets when all instances share a machine.
//!
//! The coordinator binds first; clients dial with bounded retry so startup
//! order between instances does not matter.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::error::Error;

/// Connect retry cap: 50 attempts at 100 ms covers a coordinator that is
/// still binding several seconds after its peers launched.
pub const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_RETRY: Duration = Duration::from_millis(100);

/// Combined async read+write trait for type-erased validation streams.
pub trait ValidationTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ValidationTransport for T {}

/// A connected stream suitable for framing with
/// [`FrameCodec`](crate::wire::FrameCodec). Type-erased so the client and
/// coordinator do not depend on a concrete address family.
pub type ValidationStream = Box<dyn ValidationTransport>;

/// Coordinator endpoint: a TCP host/port or a Unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Endpoint {
    /// Parse an address string. `unix:/path` and bare absolute paths select
    /// the Unix family; anything else is a TCP host using `port`.
    pub fn parse(addr: &str, port: u16) -> Result<Self, Error> {
        let addr = addr.trim();
        if let Some(path) = addr.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(Error::InvalidAddress(addr.to_owned()));
            }
            return Ok(Self::Unix {
                path: PathBuf::from(path),
            });
        }
        if addr.starts_with('/') {
            return Ok(Self::Unix {
                path: PathBuf::from(addr),
            });
        }
        if addr.is_empty() {
            return Err(Error::InvalidAddress(addr.to_owned()));
        }
        Ok(Self::Tcp {
            host: addr.to_owned(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Listening endpoint owned by the coordinator.
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind the coordinator endpoint. A stale Unix socket file from an
    /// unclean shutdown is removed before binding.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, Error> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                Ok(Self::Tcp(listener))
            }
            Endpoint::Unix { path } => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    pub async fn accept(&self) -> io::Result<ValidationStream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                debug!(%addr, "accepted participant connection");
                Ok(Box::new(stream))
            }
            Self::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                debug!("accepted participant connection (unix)");
                Ok(Box::new(stream))
            }
        }
    }

    /// Remove the filesystem endpoint, if any. Idempotent.
    pub fn unbind(&self) {
        if let Self::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unbind();
    }
}

/// Dial the coordinator, retrying while it is still coming up.
pub async fn connect(endpoint: &Endpoint) -> Result<ValidationStream, Error> {
    let mut attempts = 0u32;
    loop {
        let result: io::Result<ValidationStream> = match endpoint {
            Endpoint::Tcp { host, port } => {
                match TcpStream::connect((host.as_str(), *port)).await {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        Ok(Box::new(stream))
                    }
                    Err(e) => Err(e),
                }
            }
            Endpoint::Unix { path } => UnixStream::connect(path)
                .await
                .map(|s| Box::new(s) as ValidationStream),
        };
        match result {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                attempts += 1;
                if attempts >= CONNECT_ATTEMPTS {
                    warn!(%endpoint, error = %e, "giving up on coordinator connection");
                    return Err(Error::ConnectTimedOut { attempts });
                }
                debug!(%endpoint, attempt = attempts, "coordinator not ready, retrying");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    }
}
