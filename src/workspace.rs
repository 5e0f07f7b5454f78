use crate::config::Config;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub const JOB_NAME: &str = "document";
pub const BIB_NAME: &str = "references";

/// Per-request scratch directory. Removed when dropped or closed.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(cfg: &Config) -> std::io::Result<Self> {
        let root = cfg.workspace_root();
        std::fs::create_dir_all(&root)?;
        let dir = tempfile::Builder::new()
            .prefix(&cfg.paths.workspace_prefix)
            .tempdir_in(&root)?;
        debug!("workspace created {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn source_path(&self) -> PathBuf {
        self.file(&format!("{JOB_NAME}.tex"))
    }

    pub fn pdf_path(&self) -> PathBuf {
        self.file(&format!("{JOB_NAME}.pdf"))
    }

    pub fn cropped_pdf_path(&self) -> PathBuf {
        self.file(&format!("{JOB_NAME}-cropped.pdf"))
    }

    pub fn png_path(&self) -> PathBuf {
        self.file(&format!("{JOB_NAME}.png"))
    }

    pub fn bib_path(&self) -> PathBuf {
        self.file(&format!("{BIB_NAME}.bib"))
    }

    pub fn bbl_path(&self) -> PathBuf {
        self.file(&format!("{JOB_NAME}.bbl"))
    }

    pub fn write_source(&self, source: &str) -> std::io::Result<()> {
        std::fs::write(self.source_path(), source)
    }

    pub fn write_bibliography(&self, entries: &str) -> std::io::Result<()> {
        std::fs::write(self.bib_path(), entries)
    }

    /// Removes the directory now, logging instead of failing if removal does.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("workspace removed {}", path.display()),
            Err(err) => warn!("failed to remove workspace {}: {err}", path.display()),
        }
    }
}
