use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

/// Either a `TcpStream` or a `UnixStream`, implementing
/// `AsyncRead` and `AsyncWrite` transparently.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(test)]
    Duplex(tokio::io::DuplexStream),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = tokio::net::TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    #[cfg(unix)]
    pub async fn connect_unix(path: &str) -> io::Result<Socket> {
        let socket = tokio::net::UnixStream::connect(path).await?;
        Ok(Socket { kind: Kind::Unix(socket) })
    }

    #[cfg(not(unix))]
    pub async fn connect_unix(path: &str) -> io::Result<Socket> {
        let _ = path;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix domain sockets are not available on this platform",
        ))
    }

    /// In-memory byte duplex, used by the wire-level tests to script a peer.
    #[cfg(test)]
    pub(crate) fn from_duplex(duplex: tokio::io::DuplexStream) -> Socket {
        Socket { kind: Kind::Duplex(duplex) }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        AsyncWriteExt::shutdown(self).await
    }
}

macro_rules! with_socket {
    ($me:expr, $pat:pat => $expr:expr) => {
        match &mut $me.kind {
            Kind::Tcp($pat) => $expr,
            #[cfg(unix)]
            Kind::Unix($pat) => $expr,
            #[cfg(test)]
            Kind::Duplex($pat) => $expr,
        }
    };
}

impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        with_socket!(self, s => Pin::new(s).poll_read(cx, buf))
    }
}

impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        with_socket!(self, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_socket!(self, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_socket!(self, s => Pin::new(s).poll_shutdown(cx))
    }

    fn is_write_vectored(&self) -> bool {
        match &self.kind {
            Kind::Tcp(s) => s.is_write_vectored(),
            #[cfg(unix)]
            Kind::Unix(s) => s.is_write_vectored(),
            #[cfg(test)]
            Kind::Duplex(_) => false,
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Tcp(tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(unix) => std::fmt::Debug::fmt(unix, f),
            #[cfg(test)]
            Kind::Duplex(_) => f.write_str("DuplexStream"),
        }
    }
}
