//! Path sandboxing
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-10 (Input Validation)
//! STIG: V-222396, V-222596
//! Implementation: Every client-supplied path is joined lexically onto the
//! configured root. `..` segments are collapsed against the root and can
//! never walk above it. Nothing here touches the filesystem; existence and
//! type checks belong to the caller.

use std::path::{Path, PathBuf};

/// A client path confined to the sandbox root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxedPath {
    real: PathBuf,
    virtual_path: String,
}

impl SandboxedPath {
    /// Path on the real filesystem, always inside the root
    pub fn real(&self) -> &Path {
        &self.real
    }

    /// Normalized path as the client sees it, always starting with `/`
    ///
    /// This is the only form of the path that may appear in messages sent
    /// back to the client.
    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    /// `true` when the path is the sandbox root itself
    pub fn is_root(&self) -> bool {
        self.virtual_path == "/"
    }
}

/// Resolves client paths against a fixed root directory
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox rooted at `root`
    ///
    /// The root is taken as already validated (it exists and is a directory).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a client path into a root-confined path
    ///
    /// Empty, `.` and `/` all resolve to the root.
    pub fn resolve(&self, client_path: &str) -> SandboxedPath {
        let mut segments: Vec<&str> = Vec::new();

        for segment in client_path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }

        let mut real = self.root.clone();
        real.extend(&segments);

        SandboxedPath {
            real,
            virtual_path: format!("/{}", segments.join("/")),
        }
    }
}
