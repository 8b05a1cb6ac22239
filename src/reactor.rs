// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The single reactor thread: one `mio::Poll`, the listening socket, the
//! signal self-pipe, and a `Slab`-indexed connection table. Readable/writable
//! connections are handed off to the worker pool by value; nothing here ever
//! touches a connection's buffers directly.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::os::unix::io::FromRawFd;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::TryRecvError;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, info, warn};

use crate::config::{
    ServerConfig, EVENT_BATCH_SIZE, IDLE_TIMEOUT_SECS, LISTEN_BACKLOG, MAX_CONNECTIONS, TICK_INTERVAL_SECS,
};
use crate::connection::{Connection, Directive};
use crate::signal::{self, SignalEvent, Signals};
use crate::timer::TimerHeap;
use crate::worker::{Handback, Job, WorkerPool};

const LISTEN_TOKEN: Token = Token(usize::MAX);
const SIGNAL_TOKEN: Token = Token(usize::MAX - 1);
const WAKE_TOKEN: Token = Token(usize::MAX - 2);

/// Seconds elapsed since the reactor started; the timer heap's clock. Using
/// an `Instant` anchor rather than wall-clock time keeps the heap immune to
/// clock adjustments.
fn now(start: Instant) -> u64 {
    start.elapsed().as_secs()
}

/// `socket(2)`/`bind(2)`/`listen(2)` by hand, the way the original server's
/// `initListen` does it, so the backlog argument is actually the one this
/// crate configures rather than whatever `std::net::TcpListener::bind`'s
/// platform default happens to be.
fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let fd = match addr {
        SocketAddr::V4(v4) => unsafe {
            let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            if let Err(e) = set_reuseaddr(fd) {
                libc::close(fd);
                return Err(e);
            }
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            if libc::bind(
                fd,
                &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            ) != 0
            {
                let e = io::Error::last_os_error();
                libc::close(fd);
                return Err(e);
            }
            fd
        },
        SocketAddr::V6(v6) => unsafe {
            let fd = libc::socket(libc::AF_INET6, libc::SOCK_STREAM, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            if let Err(e) = set_reuseaddr(fd) {
                libc::close(fd);
                return Err(e);
            }
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            if libc::bind(
                fd,
                &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            ) != 0
            {
                let e = io::Error::last_os_error();
                libc::close(fd);
                return Err(e);
            }
            fd
        },
    };

    unsafe {
        if libc::listen(fd, backlog as libc::c_int) != 0 {
            let e = io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }
        Ok(std::net::TcpListener::from_raw_fd(fd))
    }
}

fn set_reuseaddr(fd: libc::c_int) -> io::Result<()> {
    unsafe {
        let optval: libc::c_int = 1;
        let ret = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Drives the server to completion (until `SIGTERM`, or a fatal poll error).
pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    connections: Slab<Option<Connection>>,
    timers: TimerHeap<Token>,
    signals: Signals,
    worker_pool: WorkerPool,
    handback_rx: crossbeam_channel::Receiver<Handback>,
    start: Instant,
    shutting_down: bool,
}

impl Reactor {
    /// Binds the listening socket and wires up the worker pool, the signal
    /// self-pipe, and the timer heap. Does not start serving until
    /// [`Reactor::run`] is called.
    pub fn new(config: &ServerConfig) -> io::Result<Self> {
        let std_listener = bind_listener(config.bind_addr, LISTEN_BACKLOG)?;
        std_listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(std_listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let signals = Signals::install(poll.registry(), SIGNAL_TOKEN)?;

        let root: Arc<str> = Arc::from(config.root.as_str());
        let (worker_pool, handback_rx) = WorkerPool::new(config.workers, root, waker);

        signal::arm_alarm(TICK_INTERVAL_SECS);

        Ok(Self {
            poll,
            listener,
            connections: Slab::with_capacity(1024),
            timers: TimerHeap::new(),
            signals,
            worker_pool,
            handback_rx,
            start: Instant::now(),
            shutting_down: false,
        })
    }

    /// Runs the event loop until `SIGTERM` is received and every outstanding
    /// connection has drained.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_BATCH_SIZE);

        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept(),
                    SIGNAL_TOKEN => self.handle_signals()?,
                    WAKE_TOKEN => self.drain_handbacks(),
                    token => self.dispatch(token, event),
                }
            }

            if self.shutting_down && self.connections.is_empty() {
                break;
            }
        }

        info!("shutting down worker pool");
        self.worker_pool.shutdown();
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            let (mut stream, _addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            };

            if self.connections.len() >= MAX_CONNECTIONS {
                warn!("connection table full, dropping new connection");
                drop(stream);
                continue;
            }

            let entry = self.connections.vacant_entry();
            let token = Token(entry.key());

            if let Err(e) =
                self.poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE)
            {
                warn!(error = %e, "failed to register accepted connection");
                continue;
            }

            let mut connection = Connection::new(stream, token);
            let handle = self
                .timers
                .add(now(self.start), IDLE_TIMEOUT_SECS, token);
            connection.timer_handle = Some(handle);

            entry.insert(Some(connection));
            debug!(token = token.0, "accepted connection");
        }
    }

    fn handle_signals(&mut self) -> io::Result<()> {
        for event in self.signals.drain()? {
            match event {
                SignalEvent::Tick => {
                    self.tick_timers();
                    signal::arm_alarm(TICK_INTERVAL_SECS);
                }
                SignalEvent::Shutdown => {
                    info!("SIGTERM received, draining connections");
                    self.shutting_down = true;
                }
            }
        }
        Ok(())
    }

    fn tick_timers(&mut self) {
        for token in self.timers.tick(now(self.start)) {
            self.close_connection(token);
        }
    }

    /// Routes a readiness event for an established connection either to the
    /// worker pool (normal case) or straight to a close (hangup/error, or a
    /// stale event for a slot already removed).
    fn dispatch(&mut self, token: Token, event: &mio::event::Event) {
        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            self.close_connection(token);
            return;
        }

        let Some(slot) = self.connections.get_mut(token.0) else {
            return;
        };

        // `None` means this connection is currently owned by a worker; a
        // stray event for it before rearm is simply dropped, since the
        // worker will observe the same condition on its next read/write.
        let Some(mut connection) = slot.take() else {
            return;
        };

        if let Some(handle) = connection.timer_handle.take() {
            let refreshed = self
                .timers
                .refresh(&handle, now(self.start), IDLE_TIMEOUT_SECS, token);
            connection.timer_handle = Some(refreshed);
        }

        self.worker_pool.dispatch(Job {
            connection,
            readable: event.is_readable(),
            writable: event.is_writable(),
        });
    }

    fn drain_handbacks(&mut self) {
        loop {
            let handback = match self.handback_rx.try_recv() {
                Ok(handback) => handback,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => return,
            };

            let Handback {
                token,
                mut connection,
                directive,
            } = handback;

            match directive {
                Directive::RearmRead => self.rearm(token, connection, Interest::READABLE),
                Directive::RearmWrite => self.rearm(token, connection, Interest::WRITABLE),
                Directive::Close => {
                    if let Some(handle) = connection.timer_handle.take() {
                        self.timers.cancel(&handle);
                    }
                    let _ = self.poll.registry().deregister(connection.stream_mut());
                    self.connections.try_remove(token.0);
                }
            }
        }
    }

    fn rearm(&mut self, token: Token, mut connection: Connection, interest: Interest) {
        if let Err(e) =
            self.poll
                .registry()
                .reregister(connection.stream_mut(), token, interest)
        {
            warn!(error = %e, token = token.0, "failed to rearm connection, closing");
            if let Some(handle) = connection.timer_handle.take() {
                self.timers.cancel(&handle);
            }
            self.connections.try_remove(token.0);
            return;
        }

        if let Some(slot) = self.connections.get_mut(token.0) {
            *slot = Some(connection);
        }
    }

    fn close_connection(&mut self, token: Token) {
        let Some(slot) = self.connections.get_mut(token.0) else {
            return;
        };
        let Some(mut connection) = slot.take() else {
            // In flight at a worker; nothing to close yet here. Its timer
            // handle was already consumed by `dispatch`'s refresh, so this
            // tick firing again for the same token can't happen until the
            // worker hands it back and it's re-armed with a fresh deadline.
            return;
        };

        if let Some(handle) = connection.timer_handle.take() {
            self.timers.cancel(&handle);
        }
        let _ = self.poll.registry().deregister(connection.stream_mut());
        self.connections.try_remove(token.0);
    }
}
