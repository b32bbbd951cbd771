//! # Transport Layer
//!
//! Stream transports a host can listen on and a channel can dial.
//!
//! ## Available Transports
//! - **TCP** ([`tcp`]): network connections
//! - **Local** ([`local`]): Unix domain sockets for same-machine IPC
//!
//! Hosts also accept any externally created `AsyncRead + AsyncWrite` stream through
//! `RunningHost::serve`, which is how in-memory pipes and custom transports plug in.

pub mod local;
pub mod tcp;

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::net::{TcpListener, TcpStream};

/// A bound listener of any supported transport.
#[derive(Debug)]
pub enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A freshly accepted connection and a printable peer name.
#[derive(Debug)]
pub enum Accepted {
    Tcp(TcpStream, String),
    #[cfg(unix)]
    Unix(UnixStream, String),
}

impl Acceptor {
    pub async fn accept(&self) -> std::io::Result<Accepted> {
        match self {
            Acceptor::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Accepted::Tcp(stream, addr.to_string()))
            }
            #[cfg(unix)]
            Acceptor::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Accepted::Unix(stream, "unix".to_string()))
            }
        }
    }
}
