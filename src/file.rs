//! Files over the DHT: chunking, encryption, and descriptor chaining.
//!
//! A file in write mode buffers bytes and lazily flushes BLOCK_SIZE
//! ciphertexts to random DHT keys; `close()` then writes the descriptor
//! chain, with the first block stored at the file's own locator. A file
//! in read mode walks the chain at open and fetches every part on the
//! first `read()` — there is no seek, and reads are whole-file only.
//!
//! Part encryption is one AES-CBC stream under Kf with IV = the file's
//! Hd, chaining across parts. Descriptor blocks are encrypted under Kff
//! (or the file's Hd when no Kff is configured) with each block's own
//! Hd as IV, so a chained block can be decrypted from its static URI
//! alone.

use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::context::FsContext;
use crate::crypto::{self, CbcDecryptor, CbcEncryptor, AES_BLOCK};
use crate::descriptor::{Descriptor, MAIN, PART};
use crate::error::{DfsError, DfsResult};
use crate::uri::Uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

pub struct File {
    ctx: FsContext,
    uri: Uri,
    mode: OpenMode,
    closed: bool,
    eof: bool,
    buffer: Vec<u8>,
    parts: Vec<String>,
    filelength: u64,
    hasher: Sha1,
    stored_hash: Option<String>,
    part_encryptor: Option<CbcEncryptor>,
    part_decryptor: Option<CbcDecryptor>,
}

impl File {
    /// Open `uri` for reading or writing. Reading resolves the full
    /// descriptor chain immediately; a missing top descriptor is
    /// [`DfsError::NoReference`].
    pub async fn open(ctx: &FsContext, uri: Uri, mode: OpenMode) -> DfsResult<Self> {
        if ctx.params.block == 0 || ctx.params.block % AES_BLOCK != 0 {
            return Err(DfsError::Config(format!(
                "block size {} is not a positive multiple of {}",
                ctx.params.block, AES_BLOCK
            )));
        }
        if ctx.params.desc_per_metapart == 0 {
            return Err(DfsError::Config("desc_per_metapart must be positive".to_string()));
        }
        debug!(target: "ringfs::file", "accessing {} ({:?})", uri.readable(), mode);

        let mut file = Self {
            ctx: ctx.clone(),
            uri,
            mode,
            closed: false,
            eof: false,
            buffer: Vec::new(),
            parts: Vec::new(),
            filelength: 0,
            hasher: Sha1::new(),
            stored_hash: None,
            part_encryptor: None,
            part_decryptor: None,
        };

        match mode {
            OpenMode::Read => file.load_descriptor_chain().await?,
            OpenMode::Write => {
                if file.uri.uid.is_empty() {
                    file.uri.uid = ctx.defaults.uid.clone();
                }
                if file.uri.nick.is_empty() {
                    file.uri.nick = ctx.defaults.nick.clone();
                }
            }
        }

        // One CBC stream per open file; the chaining state carries
        // across parts.
        if let Some(kf) = ctx.keys.kf {
            let hd = file.uri.hd();
            match mode {
                OpenMode::Write => file.part_encryptor = Some(CbcEncryptor::new(&kf, &hd)),
                OpenMode::Read => file.part_decryptor = Some(CbcDecryptor::new(&kf, &hd)),
            }
        }

        info!(target: "ringfs::file", "opened {} in mode {:?}", file.uri.readable(), mode);
        Ok(file)
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Total file length in bytes as declared by the descriptor (read
    /// mode) or accumulated so far (write mode).
    pub fn len(&self) -> u64 {
        self.filelength
    }

    pub fn is_empty(&self) -> bool {
        self.filelength == 0
    }

    /// Static URIs of the parts, in byte order.
    pub fn part_uris(&self) -> &[String] {
        &self.parts
    }

    // The descriptor cipher key: Kff, or the file's locator itself so
    // casual attackers still see only ciphertext.
    fn metadata_key(&self) -> [u8; 16] {
        self.ctx.keys.kff.unwrap_or_else(|| self.uri.hd())
    }

    async fn fetch_descriptor(&self, uri: &Uri, md_key: &[u8; 16]) -> DfsResult<Descriptor> {
        let raw = self
            .ctx
            .dht
            .get(&uri.hd(), &uri.nick)
            .await?
            .ok_or_else(|| DfsError::NoReference(uri.to_static()))?;
        if raw.len() != self.ctx.params.block {
            return Err(DfsError::MalformedDescriptor(format!(
                "descriptor block for {} has {} bytes",
                uri.to_static(),
                raw.len()
            )));
        }
        let mut buf = raw;
        CbcDecryptor::new(md_key, &uri.hd()).apply(&mut buf);
        Descriptor::parse(&buf)
    }

    async fn load_descriptor_chain(&mut self) -> DfsResult<()> {
        let md_key = self.metadata_key();
        let top_uri = self.uri.clone();
        let top = self.fetch_descriptor(&top_uri, &md_key).await?;

        if let Some(uid) = top.get(MAIN, "UID") {
            self.uri.uid = uid.to_string();
        }
        if let Some(nick) = top.get(MAIN, "nick") {
            self.uri.nick = nick.to_string();
        }
        let nparts = top.get_int(MAIN, "parts").unwrap_or(0) as usize;
        self.filelength = top.get_int(MAIN, "length").unwrap_or(0);
        self.stored_hash = top.get(MAIN, "hash").map(str::to_string);

        let dpm = self.ctx.params.desc_per_metapart;
        let mut current = top;
        for i in 0..nparts {
            let part = current
                .get(PART, &i.to_string())
                .ok_or_else(|| DfsError::MalformedDescriptor(format!("missing part {}", i)))?
                .to_string();
            self.parts.push(part);
            if i + 1 < nparts && i % dpm == dpm - 1 {
                let link = current.get(MAIN, "n").ok_or_else(|| {
                    DfsError::MalformedDescriptor(format!("missing chain link after part {}", i))
                })?;
                let next_uri = self.ctx.parse_uri(link).ok_or_else(|| {
                    DfsError::MalformedDescriptor(format!("bad chain link: {}", link))
                })?;
                current = self.fetch_descriptor(&next_uri, &md_key).await?;
            }
        }
        self.eof = self.parts.is_empty();
        Ok(())
    }

    /// Append bytes to the file. Flushes automatically once the buffer
    /// exceeds MAX_BUFFER.
    pub async fn write(&mut self, data: &[u8]) -> DfsResult<()> {
        if self.closed {
            return Err(DfsError::Closed);
        }
        if self.mode != OpenMode::Write {
            return Err(DfsError::BadMode("write on a file opened for reading".to_string()));
        }
        self.filelength += data.len() as u64;
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.ctx.params.max_buffer {
            self.flush(false).await?;
        }
        Ok(())
    }

    /// Flush whole blocks from the buffer into the DHT. With `all` the
    /// final partial block is padded with random bytes and flushed too;
    /// only `close()` should do that.
    pub async fn flush(&mut self, all: bool) -> DfsResult<()> {
        if self.closed {
            return Err(DfsError::Closed);
        }
        if self.mode != OpenMode::Write {
            return Err(DfsError::BadMode("flush on a file opened for reading".to_string()));
        }
        debug!(target: "ringfs::file", "flushing {}", self.uri.readable());

        let block = self.ctx.params.block;
        let buffered = self.buffer.len();
        let mut blocks = buffered / block;
        if all && blocks * block != buffered {
            blocks += 1;
        }

        for i in 0..blocks {
            let start = i * block;
            let end = usize::min(start + block, buffered);
            let mut part = self.buffer[start..end].to_vec();
            if part.len() < block {
                part.extend(crypto::random_bytes(block - part.len()));
            }
            if let Some(cipher) = &mut self.part_encryptor {
                cipher.apply(&mut part);
            }
            let part_uri = Uri::random();
            self.hasher.update(&part);
            debug!(target: "ringfs::file", "saving part {}", part_uri.to_static());
            self.ctx.dht.put(&part_uri.hd(), &part, &part_uri.nick).await?;
            self.parts.push(part_uri.to_static());
        }

        if blocks * block >= buffered {
            self.buffer.clear();
        } else {
            self.buffer.drain(..blocks * block);
        }
        Ok(())
    }

    async fn store_descriptor(&self, meta: &mut Descriptor, uri: &Uri, md_key: &[u8; 16]) -> DfsResult<()> {
        let mut body = meta.pad_to_block(self.ctx.params.block)?;
        CbcEncryptor::new(md_key, &uri.hd()).apply(&mut body);
        self.ctx.dht.put(&uri.hd(), &body, &uri.nick).await
    }

    async fn write_descriptor_chain(&mut self) -> DfsResult<()> {
        let md_key = self.metadata_key();
        let dpm = self.ctx.params.desc_per_metapart;
        let digest = self.hasher.clone().finalize();

        let mut meta = Descriptor::new();
        meta.set(MAIN, "UID", self.uri.uid.as_str());
        if !self.uri.nick.is_empty() {
            meta.set(MAIN, "nick", self.uri.nick.as_str());
        }
        meta.set(MAIN, "parts", self.parts.len().to_string());
        meta.set(MAIN, "length", self.filelength.to_string());
        meta.set(MAIN, "hash", hex::encode(digest));

        // Chain descriptor blocks, each holding at most DESC_PER_METAPART
        // part references. Part indices stay absolute across the chain.
        let mut block_uri = self.uri.clone();
        let mut pending = true;
        for i in 0..self.parts.len() {
            meta.set(PART, &i.to_string(), self.parts[i].as_str());
            if i + 1 < self.parts.len() && i % dpm == dpm - 1 {
                let next_uri = Uri::random();
                meta.set(MAIN, "n", next_uri.to_static());
                self.store_descriptor(&mut meta, &block_uri, &md_key).await?;
                meta = Descriptor::new();
                block_uri = next_uri;
                pending = false;
            } else {
                pending = true;
            }
        }
        if pending {
            self.store_descriptor(&mut meta, &block_uri, &md_key).await?;
        }
        Ok(())
    }

    /// Close the file. In write mode this flushes the tail and writes
    /// the descriptor chain; the returned URI is the file's final
    /// address.
    pub async fn close(&mut self) -> DfsResult<Uri> {
        if self.closed {
            return Ok(self.uri.clone());
        }
        info!(target: "ringfs::file", "closing {}", self.uri.readable());
        if self.mode == OpenMode::Write {
            self.flush(true).await?;
            self.write_descriptor_chain().await?;
        } else {
            self.buffer.clear();
        }
        self.closed = true;
        Ok(self.uri.clone())
    }

    /// Read the whole file. The first call fetches and decrypts every
    /// part; later calls return nothing more.
    pub async fn read(&mut self) -> DfsResult<Vec<u8>> {
        if self.closed {
            return Err(DfsError::Closed);
        }
        if self.mode != OpenMode::Read {
            return Err(DfsError::BadMode("read on a file opened for writing".to_string()));
        }
        if self.eof {
            return Ok(Vec::new());
        }

        let block = self.ctx.params.block;
        let mut content = Vec::with_capacity(self.parts.len() * block);
        let mut verify_hasher = self.ctx.params.verify.then(|| Sha1::new());
        for part_ref in &self.parts {
            debug!(target: "ringfs::file", "reading part {}", part_ref);
            let part_uri = self.ctx.parse_uri(part_ref).ok_or_else(|| {
                DfsError::MalformedDescriptor(format!("bad part reference: {}", part_ref))
            })?;
            let mut data = self
                .ctx
                .dht
                .get(&part_uri.hd(), &part_uri.nick)
                .await?
                .ok_or_else(|| DfsError::IncompleteRead(part_uri.to_static()))?;
            if data.len() != block {
                return Err(DfsError::MalformedDescriptor(format!(
                    "part {} has {} bytes, expected {}",
                    part_ref,
                    data.len(),
                    block
                )));
            }
            if let Some(hasher) = &mut verify_hasher {
                hasher.update(&data);
            }
            if let Some(cipher) = &mut self.part_decryptor {
                cipher.apply(&mut data);
            }
            content.extend_from_slice(&data);
        }

        if let Some(hasher) = verify_hasher {
            let actual = hex::encode(hasher.finalize());
            match &self.stored_hash {
                Some(expected) if *expected == actual => {}
                Some(expected) => {
                    return Err(DfsError::Integrity(format!(
                        "{}: content hash {} does not match descriptor hash {}",
                        self.uri.readable(),
                        actual,
                        expected
                    )))
                }
                None => {
                    return Err(DfsError::Integrity(format!(
                        "{}: descriptor carries no content hash",
                        self.uri.readable()
                    )))
                }
            }
        }

        content.truncate(self.filelength as usize);
        self.eof = true;
        Ok(content)
    }

    /// Not supported: files are sequential, whole-file streams.
    pub fn seek(&self, _offset: u64) -> DfsResult<()> {
        Err(DfsError::BadMode("seek() not supported".to_string()))
    }

    /// Not supported.
    pub fn tell(&self) -> DfsResult<u64> {
        Err(DfsError::BadMode("tell() not supported".to_string()))
    }

    /// Not supported.
    pub fn truncate(&self, _size: u64) -> DfsResult<()> {
        Err(DfsError::BadMode("truncate() not supported".to_string()))
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.closed && self.mode == OpenMode::Write {
            // Parts already flushed stay orphaned under random keys;
            // nothing references them without the descriptor.
            warn!(
                target: "ringfs::file",
                "{} dropped without close; descriptor not written",
                self.uri.readable()
            );
        }
    }
}
