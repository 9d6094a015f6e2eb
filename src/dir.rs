//! Directories: ordinary files whose payload maps names to static URIs.
//!
//! The payload is a sequence of `name:static-uri` records separated by
//! 0x0A. Two names are reserved: `./` holds the directory's display
//! name and `../` the parent's static URI. Whether a name designates a
//! subdirectory is a naming convention (trailing `/`), not an encoding.

use std::collections::BTreeMap;

use tracing::debug;

use crate::context::FsContext;
use crate::error::{DfsError, DfsResult};
use crate::file::{File, OpenMode};
use crate::uri::Uri;

pub const EOL: u8 = 0x0a;
pub const DIR_SEP: char = '/';
pub const THIS_DIR: &str = "./";
pub const PARENT_DIR: &str = "../";

/// An open directory. With `atomic` every mutation is written through;
/// otherwise mutations mark the directory dirty and `close()` saves.
pub struct Dir {
    ctx: FsContext,
    uri: Uri,
    dirname: Option<String>,
    files: BTreeMap<String, String>,
    atomic: bool,
    modified: bool,
    closed: bool,
}

impl Dir {
    /// Open an existing directory.
    pub async fn open(ctx: &FsContext, uri: Uri, atomic: bool) -> DfsResult<Self> {
        debug!(target: "ringfs::dir", "opening dir {}", uri.readable());
        let mut file = File::open(ctx, uri.clone(), OpenMode::Read).await?;
        let payload = file.read().await?;
        file.close().await?;

        let mut files = BTreeMap::new();
        for line in payload.split(|b| *b == EOL) {
            if line.is_empty() {
                continue;
            }
            let text = std::str::from_utf8(line).map_err(|_| {
                DfsError::MalformedDescriptor(format!(
                    "directory {} has a non-text entry",
                    uri.readable()
                ))
            })?;
            let (name, target) = text.split_once(':').ok_or_else(|| {
                DfsError::MalformedDescriptor(format!("bad directory entry: {}", text))
            })?;
            files.insert(name.to_string(), target.to_string());
        }
        // The display name is folded out of the listing map; `../`
        // stays an ordinary entry.
        let dirname = files.remove(THIS_DIR);
        Ok(Self { ctx: ctx.clone(), uri, dirname, files, atomic, modified: false, closed: false })
    }

    /// Create a new directory, optionally registering it with a parent.
    /// A non-empty name gets the conventional trailing separator.
    pub async fn create(
        ctx: &FsContext,
        name: &str,
        uri: Option<Uri>,
        parent: Option<&mut Dir>,
        atomic: bool,
    ) -> DfsResult<Self> {
        let uri = uri.unwrap_or_else(Uri::random);
        let mut name = name.to_string();
        if !name.is_empty() && !name.ends_with(DIR_SEP) {
            name.push(DIR_SEP);
        }
        let mut file = File::open(ctx, uri.clone(), OpenMode::Write).await?;
        if let Some(parent) = parent {
            parent.add(&uri, Some(&name)).await?;
            file.write(format!("{}:{}\n", PARENT_DIR, parent.uri().to_static()).as_bytes())
                .await?;
        }
        if !name.is_empty() {
            file.write(format!("{}:{}\n", THIS_DIR, name).as_bytes()).await?;
        }
        file.close().await?;
        Dir::open(ctx, uri, atomic).await
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The display name stored under `./`, if any.
    pub fn name(&self) -> Option<&str> {
        self.dirname.as_deref()
    }

    /// The static URI bound to `name`.
    pub fn entry(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Names in the directory, sorted, with `./` first whenever a
    /// display name is present.
    pub fn list(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.files.len() + 1);
        if self.dirname.is_some() {
            names.push(THIS_DIR.to_string());
        }
        names.extend(self.files.keys().cloned());
        names.sort();
        names
    }

    fn check_open(&self) -> DfsResult<()> {
        if self.closed {
            Err(DfsError::Closed)
        } else {
            Ok(())
        }
    }

    /// Bind `name` to an entry's static URI. Without a name, the URI's
    /// path is used.
    pub async fn add(&mut self, entry: &Uri, name: Option<&str>) -> DfsResult<()> {
        self.check_open()?;
        let name = match name {
            Some(name) => name.to_string(),
            None => entry.path.clone(),
        };
        self.files.insert(name, entry.to_static());
        self.modified = true;
        if self.atomic {
            self.save().await?;
        }
        Ok(())
    }

    /// Drop `name` from the directory.
    pub async fn remove(&mut self, name: &str) -> DfsResult<()> {
        self.check_open()?;
        if self.files.remove(name).is_none() {
            return Err(DfsError::NotFound(name.to_string()));
        }
        self.modified = true;
        if self.atomic {
            self.save().await?;
        }
        Ok(())
    }

    /// Rebind an entry under a new name.
    pub async fn rename(&mut self, from: &str, to: &str) -> DfsResult<()> {
        self.check_open()?;
        let target = self
            .files
            .remove(from)
            .ok_or_else(|| DfsError::NotFound(from.to_string()))?;
        self.files.insert(to.to_string(), target);
        self.modified = true;
        if self.atomic {
            self.save().await?;
        }
        Ok(())
    }

    /// Rewrite the directory through the file write path. A no-op when
    /// nothing changed.
    pub async fn save(&mut self) -> DfsResult<()> {
        self.check_open()?;
        if !self.modified {
            return Ok(());
        }
        debug!(target: "ringfs::dir", "{}: saving directory", self.uri.readable());
        let mut file = File::open(&self.ctx, self.uri.clone(), OpenMode::Write).await?;
        if let Some(dirname) = &self.dirname {
            file.write(format!("{}:{}\n", THIS_DIR, dirname).as_bytes()).await?;
        }
        for (name, target) in &self.files {
            file.write(format!("{}:{}\n", name, target).as_bytes()).await?;
        }
        file.close().await?;
        self.modified = false;
        Ok(())
    }

    /// Close the directory, saving deferred mutations in non-atomic
    /// mode.
    pub async fn close(&mut self) -> DfsResult<()> {
        if self.closed {
            return Ok(());
        }
        if !self.atomic {
            self.save().await?;
        }
        self.closed = true;
        Ok(())
    }
}
