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

//! Response assembly: fixed-size header buffer, canned bodies, and the
//! scatter/gather write plan over header bytes plus an optional mapped file.

use std::io::{IoSlice, Write};

use crate::status::Status;

/// Fixed capacity of the header/body scratch buffer.
pub const WRITE_BUF_CAPACITY: usize = 2048;

/// Placeholder body served in place of an empty file's (nonexistent) contents.
const EMPTY_FILE_BODY: &str = "<html><body></body></html>";

/// Builds the status line + headers (+ canned body, for non-`Ok` outcomes)
/// into `buf`, returning the number of bytes written.
///
/// Returns `None` if the assembled response would not fit in `buf`; callers
/// fall back to a `500 Internal Error`, whose short canned body is
/// guaranteed to fit, rather than silently truncating.
fn write_headers(
    buf: &mut [u8; WRITE_BUF_CAPACITY],
    status: Status,
    content_length: usize,
    keep_alive: bool,
    inline_body: &str,
) -> Option<usize> {
    let mut cursor = &mut buf[..];
    let result = (|| -> std::io::Result<()> {
        write!(cursor, "HTTP/1.1 {} {}\r\n", status as u16, status.reason())?;
        write!(cursor, "Content-Length: {content_length}\r\n")?;
        write!(
            cursor,
            "Connection: {}\r\n",
            if keep_alive { "keep-alive" } else { "close" }
        )?;
        write!(cursor, "\r\n")?;
        write!(cursor, "{inline_body}")?;
        Ok(())
    })();

    match result {
        Ok(()) => Some(WRITE_BUF_CAPACITY - cursor.len()),
        Err(_) => None,
    }
}

/// Up to two byte ranges to write, in order: header bytes (and any inline
/// canned/placeholder body) followed by an optional mapped-file range.
/// Mirrors the original's `iovec[2]`/`writeIvCount`, expressed with
/// `IoSlice` + `write_vectored` instead of raw `iovec`.
#[derive(Debug, Default)]
pub struct IoPlan {
    header_len: usize,
    file_len: usize,
}

impl IoPlan {
    /// Total bytes across both ranges.
    pub fn total(&self) -> usize {
        self.header_len + self.file_len
    }
}

/// Builds the header buffer and io plan for a given outcome.
///
/// `file` is `Some((mapping_or_none, len))` only for `Status::Ok`; for a
/// zero-length file `mapping` is `None` and the placeholder body is inlined
/// into the header buffer instead of a second io range.
pub fn build(
    buf: &mut [u8; WRITE_BUF_CAPACITY],
    status: Status,
    keep_alive: bool,
    file_len: u64,
) -> (IoPlan, bool) {
    if status == Status::Ok && file_len == 0 {
        let written = write_headers(buf, status, EMPTY_FILE_BODY.len(), keep_alive, EMPTY_FILE_BODY);
        return finish(buf, written, keep_alive, 0);
    }

    if status == Status::Ok {
        let written = write_headers(buf, status, file_len as usize, keep_alive, "");
        return finish(buf, written, keep_alive, file_len as usize);
    }

    let body = status.canned_body();
    let written = write_headers(buf, status, body.len(), keep_alive, body);
    finish(buf, written, keep_alive, 0)
}

/// Falls back to an internal-error response (guaranteed to fit) if the
/// requested one didn't, and returns the keep-alive decision actually in
/// effect (forced to `false` on fallback).
fn finish(
    buf: &mut [u8; WRITE_BUF_CAPACITY],
    written: Option<usize>,
    keep_alive: bool,
    file_len: usize,
) -> (IoPlan, bool) {
    match written {
        Some(header_len) => (
            IoPlan {
                header_len,
                file_len,
            },
            keep_alive,
        ),
        None => {
            let body = Status::InternalError.canned_body();
            let header_len = write_headers(buf, Status::InternalError, body.len(), false, body)
                .expect("500 response must always fit in the write buffer");
            (
                IoPlan {
                    header_len,
                    file_len: 0,
                },
                false,
            )
        }
    }
}

/// Attempts a single `writev`-style write of the plan's remaining bytes
/// (those past `sent`), returning the number of bytes actually written.
///
/// `header_bytes` and `file_bytes` are the full ranges named by the plan;
/// `sent` is the running total across however many prior calls this made for
/// the same response.
pub fn write_remaining<W: Write>(
    writer: &mut W,
    plan: &IoPlan,
    header_bytes: &[u8],
    file_bytes: &[u8],
    sent: usize,
) -> std::io::Result<usize> {
    debug_assert_eq!(header_bytes.len(), plan.header_len);
    debug_assert_eq!(file_bytes.len(), plan.file_len);

    let mut remaining = sent;
    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(2);

    if remaining < header_bytes.len() {
        slices.push(IoSlice::new(&header_bytes[remaining..]));
        remaining = 0;
    } else {
        remaining -= header_bytes.len();
    }

    if plan.file_len > 0 {
        if remaining < file_bytes.len() {
            slices.push(IoSlice::new(&file_bytes[remaining..]));
        }
    }

    if slices.is_empty() {
        return Ok(0);
    }

    writer.write_vectored(&slices)
}
