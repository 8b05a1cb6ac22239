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

use std::process::ExitCode;

use kestrel::config::ServerConfig;
use kestrel::reactor::Reactor;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ServerConfig::from_args(std::env::args()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut reactor = match Reactor::new(&config) {
        Ok(reactor) => reactor,
        Err(e) => {
            eprintln!("kestrel: failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = reactor.run() {
        eprintln!("kestrel: fatal error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
