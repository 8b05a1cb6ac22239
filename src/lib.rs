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

//! `kestrel` is a small HTTP/1.1 GET server for static files, built around a
//! single reactor thread that multiplexes connections on one readiness queue
//! and dispatches ready connections to a bounded worker pool.
//!
//! The interesting engineering lives below the HTTP surface: [`reactor`] owns
//! the readiness multiplexor, the listening socket, and a signal self-pipe;
//! [`timer`] ages idle connections out through a lazily-invalidated min-heap;
//! [`worker`] runs the per-connection state machine off the reactor thread;
//! and [`connection`] is that state machine — read, parse, resolve, respond,
//! write, recycle or close.

pub mod config;
pub mod connection;
pub mod reactor;
pub mod request;
pub mod resolve;
pub mod response;
pub mod signal;
pub mod status;
pub mod timer;
pub mod worker;
