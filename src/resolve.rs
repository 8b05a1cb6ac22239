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

//! Resolves a request target under the document root and, for a servable
//! file, maps it into memory.

use std::fs::File;
use std::os::unix::fs::MetadataExt;

use memmap2::Mmap;

use crate::status::Status;

/// Bit in `st_mode` marking a file world-readable (`S_IROTH`).
const S_IROTH: u32 = 0o004;

/// Result of resolving a target, short of building the response.
pub enum Resolved {
    /// A regular file open for reading. `mapping` is `None` for a
    /// zero-length file (mapping a zero-length file is not meaningful);
    /// callers substitute the placeholder body in that case.
    File { mapping: Option<Mmap>, len: u64 },
    /// Resolution failed; carries the status code the caller should send.
    Failed(Status),
}

/// Concatenates `root` and `target` *literally* (no `Path::join`, which would
/// discard `root` outright since `target` always starts with `/`) and
/// resolves the result. Traversal via `..` in `target` is not sanitized here;
/// that's a deliberate omission, not an oversight — this core trusts its
/// document root to be used behind a front end that already constrains paths.
pub fn resolve(root: &str, target: &str) -> Resolved {
    let path = format!("{root}{target}");

    let metadata = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(_) => return Resolved::Failed(Status::NotFound),
    };

    if metadata.mode() & S_IROTH == 0 {
        return Resolved::Failed(Status::Forbidden);
    }

    if metadata.is_dir() {
        // A directory target is reported as malformed rather than forbidden;
        // this core has no directory listing or index-file fallback.
        return Resolved::Failed(Status::BadRequest);
    }

    let len = metadata.len();
    if len == 0 {
        return Resolved::File {
            mapping: None,
            len: 0,
        };
    }

    let file = match File::open(&path) {
        Ok(f) => f,
        Err(_) => return Resolved::Failed(Status::NotFound),
    };

    // SAFETY: the mapped file is opened read-only immediately above and not
    // subsequently written to by this process; the usual mmap caveat is
    // concurrent truncation by another process, which this server does not
    // guard against.
    let mapping = match unsafe { Mmap::map(&file) } {
        Ok(m) => m,
        Err(_) => return Resolved::Failed(Status::InternalError),
    };

    Resolved::File {
        mapping: Some(mapping),
        len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        match resolve(root, "/nope") {
            Resolved::Failed(Status::NotFound) => {}
            _ => panic!("expected NotFound"),
        }
    }

    #[test]
    fn unreadable_file_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("secret");
        std::fs::write(&file_path, b"shh").unwrap();
        std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let root = dir.path().to_str().unwrap();
        match resolve(root, "/secret") {
            Resolved::Failed(Status::Forbidden) => {}
            _ => panic!("expected Forbidden"),
        }
    }

    #[test]
    fn directory_target_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let root = dir.path().to_str().unwrap();
        match resolve(root, "/sub") {
            Resolved::Failed(Status::BadRequest) => {}
            _ => panic!("expected BadRequest"),
        }
    }

    #[test]
    fn readable_file_maps_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("index.html");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all(b"hello world").unwrap();
        std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let root = dir.path().to_str().unwrap();
        match resolve(root, "/index.html") {
            Resolved::File {
                mapping: Some(m),
                len,
            } => {
                assert_eq!(len, 11);
                assert_eq!(&m[..], b"hello world");
            }
            _ => panic!("expected mapped file"),
        }
    }

    #[test]
    fn zero_length_file_has_no_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("empty");
        std::fs::File::create(&file_path).unwrap();

        let root = dir.path().to_str().unwrap();
        match resolve(root, "/empty") {
            Resolved::File { mapping: None, len } => assert_eq!(len, 0),
            _ => panic!("expected zero-length file result"),
        }
    }
}
