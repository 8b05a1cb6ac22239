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

//! The fixed set of status codes this server ever emits.

use std::fmt::Display;

/// Status codes produced by the core. There is no general-purpose status
/// registry here — only the five outcomes the request/response cycle (C3)
/// can reach.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Request resolved to a readable, non-directory file.
    Ok = 200,
    /// Malformed request line/headers, oversized request, or a directory target.
    BadRequest = 400,
    /// Target exists but lacks the world-read bit.
    Forbidden = 403,
    /// `stat` on the resolved path failed.
    NotFound = 404,
    /// Reserved for unexpected internal state (e.g. a response that would
    /// overflow the fixed header buffer).
    InternalError = 500,
}

impl Status {
    /// The reason phrase used on the status line.
    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalError => "Internal Error",
        }
    }

    /// The canned body used for every outcome except `Ok`, whose body is the
    /// requested file's contents (see `response.rs`).
    pub fn canned_body(self) -> &'static str {
        match self {
            Status::Ok => "",
            Status::BadRequest => {
                "Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            Status::Forbidden => "You do not have permission to get file from this server.\n",
            Status::NotFound => "The requested file was not found on this server.\n",
            Status::InternalError => "There was an unusual problem serving the requested file.\n",
        }
    }

    /// Whether this outcome forces the connection closed regardless of the
    /// request's own `Connection` header.
    pub fn forces_close(self) -> bool {
        !matches!(self, Status::Ok)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_and_body_match_the_wire_contract() {
        assert_eq!(Status::NotFound.reason(), "Not Found");
        assert_eq!(
            Status::NotFound.canned_body(),
            "The requested file was not found on this server.\n"
        );
    }

    #[test]
    fn only_ok_avoids_forced_close() {
        assert!(!Status::Ok.forces_close());
        for s in [
            Status::BadRequest,
            Status::Forbidden,
            Status::NotFound,
            Status::InternalError,
        ] {
            assert!(s.forces_close());
        }
    }
}
