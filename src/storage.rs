//! Block persistence
//!
//! Every applied block's raw bytes land in one file per block id under the
//! data directory. Load order is not meaningful; replay relies on the
//! executor's orphan buffering to resolve parent-before-child.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const BLOCKS_DIR: &str = "blocks";

/// File-backed block store
pub struct Storage {
    blocks_dir: PathBuf,
}

impl Storage {
    /// Open (creating if needed) the store under `data_dir`
    pub fn open(data_dir: &Path) -> io::Result<Self> {
        let blocks_dir = data_dir.join(BLOCKS_DIR);
        fs::create_dir_all(&blocks_dir)?;
        Ok(Self { blocks_dir })
    }

    /// Persist one block's raw bytes. Writes go through a temp file and a
    /// rename so a crash never leaves a half-written block behind.
    pub fn save_block(&self, id: &str, bytes: &[u8]) -> io::Result<()> {
        if !is_hex_id(id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing non-hex block id {:?}", id),
            ));
        }
        let path = self.blocks_dir.join(id);
        if path.exists() {
            return Ok(());
        }
        let tmp = self.blocks_dir.join(format!("{}.tmp", id));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)
    }

    pub fn has_block(&self, id: &str) -> bool {
        is_hex_id(id) && self.blocks_dir.join(id).exists()
    }

    /// Read back every stored block as `(id, bytes)`, unordered
    pub fn load_all(&self) -> io::Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.blocks_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str() else { continue };
            // Skip temp files from interrupted writes
            if !is_hex_id(id) {
                continue;
            }
            entries.push((id.to_string(), fs::read(entry.path())?));
        }
        Ok(entries)
    }

    pub fn block_count(&self) -> io::Result<usize> {
        Ok(self.load_all()?.len())
    }
}

fn is_hex_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit())
}
