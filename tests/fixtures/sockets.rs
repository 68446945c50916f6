use std::collections::VecDeque;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tlsbridge_transport::{BlockingMode, SocketIo};

/// Connected loopback TCP pair `(client, server)`
pub fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    (client, server)
}

#[derive(Debug, Default)]
struct Pipe {
    data: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Channel {
    pipe: Mutex<Pipe>,
    ready: Condvar,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, Pipe> {
        self.pipe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory duplex byte stream honoring all three blocking modes.
///
/// Dropping one end reports end-of-stream to the other.
#[derive(Debug)]
pub struct MemorySocket {
    inbound: Arc<Channel>,
    outbound: Arc<Channel>,
    mode: BlockingMode,
    /// Cap on bytes accepted per send (`None` = unlimited)
    pub send_limit: Option<usize>,
}

impl MemorySocket {
    /// Connected pair, both ends in `mode`
    pub fn pair(mode: BlockingMode) -> (Self, Self) {
        let a = Arc::new(Channel::default());
        let b = Arc::new(Channel::default());
        (
            Self {
                inbound: Arc::clone(&a),
                outbound: Arc::clone(&b),
                mode,
                send_limit: None,
            },
            Self {
                inbound: b,
                outbound: a,
                mode,
                send_limit: None,
            },
        )
    }

    /// Bytes sent by the peer and not yet received
    pub fn pending(&self) -> usize {
        self.inbound.lock().data.len()
    }
}

impl SocketIo for MemorySocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.inbound.lock();
        loop {
            if !pipe.data.is_empty() {
                let n = pipe.data.len().min(buf.len());
                for (slot, byte) in buf.iter_mut().zip(pipe.data.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if pipe.closed {
                return Ok(0);
            }
            match self.mode {
                BlockingMode::NonBlocking => return Err(io::ErrorKind::WouldBlock.into()),
                BlockingMode::Blocking => {
                    pipe = self
                        .inbound
                        .ready
                        .wait(pipe)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                BlockingMode::Timeout(timeout) => {
                    let (guard, result) = self
                        .inbound
                        .ready
                        .wait_timeout(pipe, timeout)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    pipe = guard;
                    if result.timed_out() && pipe.data.is_empty() && !pipe.closed {
                        return Err(io::ErrorKind::WouldBlock.into());
                    }
                }
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.outbound.lock();
        if pipe.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = self.send_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        pipe.data.extend(&buf[..n]);
        self.outbound.ready.notify_all();
        Ok(n)
    }

    fn blocking_mode(&self) -> io::Result<BlockingMode> {
        Ok(self.mode)
    }

    fn set_blocking_mode(&mut self, mode: BlockingMode) -> io::Result<()> {
        self.mode = mode;
        Ok(())
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.outbound.lock().closed = true;
        self.outbound.ready.notify_all();
    }
}

/// Wrapper counting socket calls
#[derive(Debug)]
pub struct CountingSocket<S> {
    /// Wrapped socket
    pub inner: S,
    /// Number of receive calls
    pub recv_calls: usize,
    /// Number of send calls
    pub send_calls: usize,
}

impl<S> CountingSocket<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            recv_calls: 0,
            send_calls: 0,
        }
    }
}

impl<S: SocketIo> SocketIo for CountingSocket<S> {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv_calls += 1;
        self.inner.recv(buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send_calls += 1;
        self.inner.send(buf)
    }

    fn blocking_mode(&self) -> io::Result<BlockingMode> {
        self.inner.blocking_mode()
    }

    fn set_blocking_mode(&mut self, mode: BlockingMode) -> io::Result<()> {
        self.inner.set_blocking_mode(mode)
    }
}
