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

//! The per-connection state machine workers drive: read into a fixed buffer,
//! parse, resolve, build a response plan, write with partial-write
//! resumption, then either recycle the connection for keep-alive or ask the
//! reactor to close it.

use std::io::{ErrorKind, Read};

use memmap2::Mmap;
use mio::net::TcpStream;
use mio::Token;

use crate::request;
use crate::resolve::{self, Resolved};
use crate::response::{self, IoPlan, WRITE_BUF_CAPACITY};
use crate::status::Status;
use crate::timer::TimerHandle;

/// Fixed capacity of the read buffer; also the effective request-size
/// budget, since there is no partial-request continuation.
pub const READ_BUF_CAPACITY: usize = 2048;

/// What a worker should tell the reactor to do with a connection once
/// [`Connection::process`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Rearm for readable readiness; ready to accept another request.
    RearmRead,
    /// Resume wasn't possible without blocking; rearm for writable readiness.
    RearmWrite,
    /// No more work is possible on this connection; the reactor should drop it.
    Close,
}

/// A pending response: the header/body bytes already rendered into
/// `write_buf`, the mapped file (if any), and how much of the combined plan
/// has been written so far.
struct PendingResponse {
    plan: IoPlan,
    mapping: Option<Mmap>,
    sent: usize,
    keep_alive: bool,
}

/// Per-socket state. Owned exclusively by the reactor's connection table
/// except for the window during which it has been handed to a worker (see
/// `worker.rs`) — ownership, not a mutex, is what keeps that access
/// exclusive.
pub struct Connection {
    stream: TcpStream,
    token: Token,
    /// Set by the reactor on dispatch, cleared once acted on; not persisted
    /// across the whole connection lifetime like the other fields.
    pub timer_handle: Option<TimerHandle>,

    read_buf: Box<[u8; READ_BUF_CAPACITY]>,
    read_len: usize,
    write_buf: Box<[u8; WRITE_BUF_CAPACITY]>,

    /// Set once the peer's half of the connection has sent EOF; the current
    /// (and final) response is forced to close rather than stay keep-alive.
    peer_closed: bool,
    response: Option<PendingResponse>,
}

impl Connection {
    /// Wraps a freshly accepted stream. `token` is this connection's stable
    /// identity in the reactor's table and in the timer heap's payload.
    pub fn new(stream: TcpStream, token: Token) -> Self {
        Self {
            stream,
            token,
            timer_handle: None,
            read_buf: Box::new([0u8; READ_BUF_CAPACITY]),
            read_len: 0,
            write_buf: Box::new([0u8; WRITE_BUF_CAPACITY]),
            peer_closed: false,
            response: None,
        }
    }

    /// This connection's token, stable for its whole lifetime (unlike the
    /// underlying fd, which the OS may reuse after close).
    pub fn token(&self) -> Token {
        self.token
    }

    /// Borrow for (re)registering with the reactor's readiness multiplexor.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Whether a response is still being written.
    fn has_pending_write(&self) -> bool {
        self.response.is_some()
    }

    /// Clears per-request state for the next request on a kept-alive
    /// connection. The socket, token, and timer handle are untouched:
    /// those identify this connection, not this request.
    fn reset_for_next_request(&mut self) {
        self.read_len = 0;
        self.response = None;
        // write_buf's live range is tracked by `response`'s plan, not by
        // zeroing — the next response overwrites it from the front.
    }

    /// Drains the socket into `read_buf` until `EAGAIN`, EOF, or a fatal
    /// error. Returns `Ok(true)` if the peer closed (EOF) this half.
    fn fill(&mut self) -> std::io::Result<bool> {
        loop {
            if self.read_len >= self.read_buf.len() {
                // Read budget exhausted without a full request: treated
                // identically to a malformed request, not stalled.
                return Ok(false);
            }

            match self.stream.read(&mut self.read_buf[self.read_len..]) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(true);
                }
                Ok(n) => self.read_len += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Parses the buffered bytes and prepares a response plan, collapsing
    /// any parse failure or resolution failure into the matching status.
    fn build_response(&mut self, root: &str) {
        let (status, keep_alive_from_request, file_len, mapping) =
            match request::parse(&self.read_buf[..self.read_len]) {
                Ok(parsed) => match resolve::resolve(root, &parsed.target) {
                    Resolved::File { mapping, len } => {
                        (Status::Ok, parsed.keep_alive, len, mapping)
                    }
                    Resolved::Failed(status) => (status, parsed.keep_alive, 0, None),
                },
                Err(_) => (Status::BadRequest, true, 0, None),
            };

        let keep_alive = keep_alive_from_request && !status.forces_close() && !self.peer_closed;

        let (plan, keep_alive) = response::build(&mut self.write_buf, status, keep_alive, file_len);

        self.response = Some(PendingResponse {
            plan,
            mapping,
            sent: 0,
            keep_alive,
        });
    }

    /// Attempts to flush as much of the pending response as the socket will
    /// currently take. Returns the directive the caller should act on.
    fn flush(&mut self) -> std::io::Result<Directive> {
        let Some(pending) = self.response.as_mut() else {
            return Ok(Directive::RearmRead);
        };

        loop {
            let header_len = pending.plan.total() - file_len_of(pending);
            let header_bytes = &self.write_buf[..header_len];
            let file_bytes: &[u8] = match &pending.mapping {
                Some(m) => &m[..],
                None => &[],
            };

            match response::write_remaining(
                &mut self.stream,
                &pending.plan,
                header_bytes,
                file_bytes,
                pending.sent,
            ) {
                Ok(0) => return Ok(Directive::RearmWrite),
                Ok(n) => {
                    pending.sent += n;
                    if pending.sent >= pending.plan.total() {
                        let keep_alive = pending.keep_alive;
                        self.response = None;
                        return Ok(if keep_alive {
                            self.reset_for_next_request();
                            Directive::RearmRead
                        } else {
                            Directive::Close
                        });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Directive::RearmWrite),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs one read-parse-respond-write cycle (readable path) or resumes an
    /// in-flight write (writable-only path), per the event mask the reactor
    /// observed.
    pub fn process(&mut self, readable: bool, writable: bool, root: &str) -> Directive {
        if readable && !self.has_pending_write() {
            match self.fill() {
                Ok(_eof_or_drained) => {}
                Err(_) => return Directive::Close,
            }

            if self.peer_closed && self.read_len == 0 {
                return Directive::Close;
            }

            self.build_response(root);
        }

        if writable || self.has_pending_write() {
            return match self.flush() {
                Ok(directive) => directive,
                Err(_) => Directive::Close,
            };
        }

        Directive::RearmRead
    }
}

fn file_len_of(pending: &PendingResponse) -> usize {
    match &pending.mapping {
        Some(m) => m.len(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn directive_equality_is_by_variant() {
        assert_eq!(Directive::RearmRead, Directive::RearmRead);
        assert_ne!(Directive::RearmRead, Directive::Close);
    }

    /// Accepts a real loopback connection and wraps the server side the way
    /// the reactor does on `accept()`; the client side stays a plain
    /// blocking `std::net::TcpStream` so test bodies can read/write it
    /// without juggling readiness themselves.
    fn loopback_pair() -> (TcpStream, StdTcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn serves_a_file_then_stays_alive_for_a_second_request_over_a_real_socket() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello world").unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        let (server, mut client) = loopback_pair();
        let mut connection = Connection::new(server, Token(0));

        client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();

        assert_eq!(connection.process(true, false, &root), Directive::RearmRead);

        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).unwrap();
        let response = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: keep-alive"));
        assert!(response.ends_with("hello world"));

        // Same `Connection` instance, as the reactor would reuse on rearm.
        client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        assert_eq!(connection.process(true, false, &root), Directive::Close);

        let n = client.read(&mut buf).unwrap();
        let response = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close"));
    }

    #[test]
    fn missing_file_gets_not_found_and_forces_close_over_a_real_socket() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        let (server, mut client) = loopback_pair();
        let mut connection = Connection::new(server, Token(0));

        client
            .write_all(b"GET /nope.txt HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();

        assert_eq!(connection.process(true, false, &root), Directive::Close);

        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).unwrap();
        let response = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.contains("Connection: close"));
    }

    #[test]
    fn write_resumes_across_multiple_process_calls_when_the_socket_blocks() {
        // An 8 MiB body cannot fit in one nonblocking write to a fresh
        // socket the peer isn't draining, so the first `process` call is
        // guaranteed to exhaust the kernel send buffer and come back with
        // `RearmWrite`; this exercises `flush`'s `sent` accounting across
        // multiple calls instead of within a single one.
        let dir = tempfile::tempdir().unwrap();
        let body = vec![b'x'; 8 * 1024 * 1024];
        std::fs::write(dir.path().join("big.bin"), &body).unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        let (server, mut client) = loopback_pair();
        let mut connection = Connection::new(server, Token(0));

        client
            .write_all(b"GET /big.bin HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();

        let mut directive = connection.process(true, false, &root);
        assert_eq!(directive, Directive::RearmWrite);

        let mut received = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = client.read(&mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
            if directive == Directive::Close {
                break;
            }
            directive = connection.process(false, true, &root);
        }

        assert!(received.ends_with(&body));
    }
}
