//! Directory enumeration
//!
//! READDIR is called repeatedly on the same handle until it answers EOF.
//! Each call lists the directory fresh, skips names already returned on
//! this handle and hands back the rest. Once nothing new remains every
//! further call yields an empty batch, which the handler turns into EOF.

use crate::protocol::{FileAttrs, NameEntry};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Upper bound on names returned by a single READDIR
///
/// Keeps NAME packets well below the 32 KiB most clients accept.
pub const MAX_BATCH: usize = 100;

const DIR_PERMISSIONS: &str = "drwxrwxrwx";
const FILE_PERMISSIONS: &str = "-rwxrwxrwx";
/// Link count, owner, group, size and date are fixed placeholders
const LONGNAME_FIELDS: &str = "  1 user group    11 Sep 27 12:00 ";

/// Names already emitted on one directory handle
#[derive(Debug, Default)]
pub struct DirCursor {
    emitted: HashSet<String>,
}

impl DirCursor {
    /// List the next batch of `dir`, marking every returned name
    ///
    /// Entries that cannot be stat'ed (removed mid-listing, dangling links)
    /// are skipped and not marked, so a later call may still return them.
    pub async fn next_batch(&mut self, dir: &Path) -> std::io::Result<Vec<NameEntry>> {
        let mut read_dir = fs::read_dir(dir).await?;
        let mut batch = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            if batch.len() >= MAX_BATCH {
                break;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if self.emitted.contains(&name) {
                continue;
            }

            let metadata = match fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping unreadable entry {:?}: {}", name, e);
                    continue;
                }
            };

            batch.push(NameEntry {
                longname: longname(&name, metadata.is_dir()),
                filename: name.clone(),
                attrs: FileAttrs::from_metadata(&metadata),
            });
            self.emitted.insert(name);
        }

        debug!(
            "Directory batch of {} entries ({} emitted in total)",
            batch.len(),
            self.emitted.len()
        );

        Ok(batch)
    }
}

/// Legacy `ls -l` style line for a directory entry
///
/// Permission bits are not derived from the file: directories always show
/// `drwxrwxrwx`, everything else `-rwxrwxrwx`.
pub fn longname(name: &str, is_dir: bool) -> String {
    let permissions = if is_dir { DIR_PERMISSIONS } else { FILE_PERMISSIONS };
    format!("{}{}{}", permissions, LONGNAME_FIELDS, name)
}
