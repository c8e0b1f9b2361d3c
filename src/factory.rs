use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use fnv::FnvHashMap;
use serde::Deserialize;

use crate::fasta::{Header, Protein};
use crate::index::{self, FastaIndex, DEFAULT_DECOY_SUFFIX};
use crate::progress::{NoProgress, Progress};
use crate::Error;

pub const DEFAULT_CACHE_SIZE: usize = 100_000;

/// Backoff applied to transient I/O failures on the shared file handle:
/// sleep `base`, double on each failure, escalate once the delay passes
/// `ceiling`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base: Duration::from_millis(1),
            ceiling: Duration::from_secs(10),
        }
    }
}

/// Configuration for a [`SequenceFactory`], deserializable from JSON.
/// Unset fields fall back to defaults in [`Builder::make_factory`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Builder {
    pub cache_size: Option<usize>,
    pub decoys_in_memory: Option<bool>,
    pub retry_base_ms: Option<u64>,
    pub retry_ceiling_ms: Option<u64>,
}

impl Builder {
    pub fn from_json(json: &str) -> Result<Builder, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn cache_size(mut self, n: usize) -> Builder {
        self.cache_size = Some(n);
        self
    }

    pub fn decoys_in_memory(mut self, yes: bool) -> Builder {
        self.decoys_in_memory = Some(yes);
        self
    }

    pub fn make_factory(self) -> SequenceFactory {
        let retry = RetryPolicy {
            base: self
                .retry_base_ms
                .map(Duration::from_millis)
                .unwrap_or(RetryPolicy::default().base),
            ceiling: self
                .retry_ceiling_ms
                .map(Duration::from_millis)
                .unwrap_or(RetryPolicy::default().ceiling),
        };
        SequenceFactory {
            inner: Mutex::new(Inner {
                fasta_path: None,
                file: None,
                index: None,
                cache: ProteinCache::new(self.cache_size.unwrap_or(DEFAULT_CACHE_SIZE)),
            }),
            decoys_in_memory: self.decoys_in_memory.unwrap_or(true),
            retry,
        }
    }
}

/// Bounded protein cache with strict FIFO eviction: insertion order is
/// eviction order and a cache hit does not refresh an entry's position.
/// Evicting an accession drops both its protein and its header. Headers
/// fetched without their protein occupy no eviction slot.
struct ProteinCache {
    capacity: usize,
    order: VecDeque<String>,
    proteins: FnvHashMap<String, Protein>,
    headers: FnvHashMap<String, Header>,
}

impl ProteinCache {
    fn new(capacity: usize) -> Self {
        ProteinCache {
            capacity,
            order: VecDeque::new(),
            proteins: FnvHashMap::default(),
            headers: FnvHashMap::default(),
        }
    }

    fn insert(&mut self, protein: Protein, header: Header) {
        if self.capacity == 0 {
            return;
        }
        let accession = protein.accession.clone();
        if !self.proteins.contains_key(&accession) {
            while self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.proteins.remove(&oldest);
                    self.headers.remove(&oldest);
                }
            }
            self.order.push_back(accession.clone());
        }
        self.proteins.insert(accession.clone(), protein);
        self.headers.insert(accession, header);
    }

    fn insert_header(&mut self, header: Header) {
        self.headers.insert(header.accession.clone(), header);
    }

    fn clear(&mut self) {
        self.order.clear();
        self.proteins.clear();
        self.headers.clear();
    }
}

struct Inner {
    fasta_path: Option<PathBuf>,
    file: Option<File>,
    index: Option<FastaIndex>,
    cache: ProteinCache,
}

/// Random access to an indexed FASTA file with a bounded in-memory cache
/// and on-demand decoy synthesis.
///
/// One factory owns one open file at a time; loading a new file tears the
/// previous state down. All operations serialize on an internal lock, so
/// concurrent lookups of different accessions contend on the single file
/// handle. Default-reversed decoys are derived by reversing the target
/// sequence rather than read from disk.
pub struct SequenceFactory {
    inner: Mutex<Inner>,
    decoys_in_memory: bool,
    retry: RetryPolicy,
}

impl Default for SequenceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceFactory {
    pub fn new() -> SequenceFactory {
        Builder::default().make_factory()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Open a FASTA file, loading or building its index. Returns `false`
    /// if an index scan was cancelled, in which case no file is loaded.
    pub fn load_fasta_file(&self, path: &Path, progress: &dyn Progress) -> Result<bool, Error> {
        let mut inner = self.lock();
        self.load_into(&mut inner, path, progress)
    }

    fn load_into(
        &self,
        inner: &mut Inner,
        path: &Path,
        progress: &dyn Progress,
    ) -> Result<bool, Error> {
        inner.fasta_path = None;
        inner.file = None;
        inner.index = None;
        inner.cache.clear();
        let index = match FastaIndex::load(path, progress)? {
            Some(index) => index,
            None => return Ok(false),
        };
        inner.file = Some(File::open(path)?);
        inner.index = Some(index);
        inner.fasta_path = Some(path.to_path_buf());
        Ok(true)
    }

    /// Retrieve a protein by accession: cache first, then decoy synthesis
    /// for default-reversed decoys, then a seek into the file. An unknown
    /// accession triggers one reindex before failing with `NotFound`.
    pub fn get_protein(&self, accession: &str) -> Result<Protein, Error> {
        let mut inner = self.lock();
        if let Some(p) = inner.cache.proteins.get(accession) {
            return Ok(p.clone());
        }
        let index = inner.index.as_ref().ok_or(Error::NoFileLoaded)?;
        let synthesize = index.default_reversed
            && index.is_decoy_accession(accession)
            && accession.ends_with(DEFAULT_DECOY_SUFFIX);

        if synthesize {
            let target = index::default_target_accession(accession)?.to_string();
            let cached = match (
                inner.cache.proteins.get(&target),
                inner.cache.headers.get(&target),
            ) {
                (Some(p), Some(h)) => Some((p.clone(), h.clone())),
                _ => None,
            };
            let (target_protein, target_header) = match cached {
                Some(record) => record,
                None => {
                    let record = self.locate_record(&mut inner, &target)?;
                    inner.cache.insert(record.0.clone(), record.1.clone());
                    record
                }
            };
            let decoy = Protein {
                accession: accession.to_string(),
                sequence: target_protein.sequence.chars().rev().collect(),
                database_type: target_protein.database_type,
                decoy: true,
            };
            if self.decoys_in_memory {
                let decoy_header = Header::parse(&target_header.decoy_line(accession))?;
                inner.cache.insert(decoy.clone(), decoy_header);
            }
            return Ok(decoy);
        }

        let (protein, header) = self.locate_record(&mut inner, accession)?;
        inner.cache.insert(protein.clone(), header);
        Ok(protein)
    }

    /// Retrieve a record's parsed header. Cached separately from proteins
    /// so header-heavy workloads do not fault in sequences.
    pub fn get_header(&self, accession: &str) -> Result<Header, Error> {
        let mut inner = self.lock();
        if let Some(h) = inner.cache.headers.get(accession) {
            return Ok(h.clone());
        }
        let (_, header) = self.locate_record(&mut inner, accession)?;
        inner.cache.insert_header(header.clone());
        Ok(header)
    }

    /// Resolve an accession to its record, self-healing a stale index:
    /// a missing accession or an offset that no longer points at the
    /// expected header causes one rescan before giving up.
    fn locate_record(&self, inner: &mut Inner, accession: &str) -> Result<(Protein, Header), Error> {
        let mut reindexed = false;
        loop {
            let offset = match inner.index.as_ref().and_then(|i| i.offset(accession)) {
                Some(offset) => offset,
                None if !reindexed => {
                    self.reindex(inner)?;
                    reindexed = true;
                    continue;
                }
                None => {
                    return Err(Error::NotFound {
                        accession: accession.to_string(),
                    })
                }
            };
            let (header, sequence) = self.read_at(inner, offset)?;
            if header.accession != accession {
                if !reindexed {
                    self.reindex(inner)?;
                    reindexed = true;
                    continue;
                }
                return Err(Error::NotFound {
                    accession: accession.to_string(),
                });
            }
            let decoy = inner
                .index
                .as_ref()
                .map(|i| i.is_decoy_accession(accession))
                .unwrap_or(false);
            let protein = Protein {
                accession: header.accession.clone(),
                sequence,
                database_type: header.database_type,
                decoy,
            };
            return Ok((protein, header));
        }
    }

    fn reindex(&self, inner: &mut Inner) -> Result<(), Error> {
        let path = inner.fasta_path.clone().ok_or(Error::NoFileLoaded)?;
        log::warn!("index for {} looks stale, rescanning", path.display());
        if let Some(index) = FastaIndex::create(&path, &NoProgress)? {
            index.write(&FastaIndex::sidecar_path(&path))?;
            inner.file = Some(File::open(&path)?);
            inner.index = Some(index);
        }
        Ok(())
    }

    // serialized reads on the shared handle; callers hold the inner lock
    fn read_at(&self, inner: &mut Inner, offset: u64) -> Result<(Header, String), Error> {
        let mut wait = self.retry.base;
        loop {
            let file = inner.file.as_mut().ok_or(Error::NoFileLoaded)?;
            match read_record(file, offset) {
                Ok(record) => return Ok(record),
                Err(Error::Io(e)) => {
                    if wait > self.retry.ceiling {
                        return Err(Error::Io(e));
                    }
                    log::warn!(
                        "i/o failure at offset {}, retrying in {:?}: {}",
                        offset,
                        wait,
                        e
                    );
                    std::thread::sleep(wait);
                    wait *= 2;
                    if let Some(path) = &inner.fasta_path {
                        if let Ok(reopened) = File::open(path) {
                            inner.file = Some(reopened);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn is_decoy_accession(&self, accession: &str) -> Result<bool, Error> {
        let inner = self.lock();
        let index = inner.index.as_ref().ok_or(Error::NoFileLoaded)?;
        Ok(index.is_decoy_accession(accession))
    }

    pub fn get_accessions(&self) -> Result<Vec<String>, Error> {
        let inner = self.lock();
        let index = inner.index.as_ref().ok_or(Error::NoFileLoaded)?;
        Ok(index.accessions().map(String::from).collect())
    }

    pub fn n_targets(&self) -> Result<usize, Error> {
        let inner = self.lock();
        let index = inner.index.as_ref().ok_or(Error::NoFileLoaded)?;
        Ok(index.n_target)
    }

    pub fn n_sequences(&self) -> Result<usize, Error> {
        let inner = self.lock();
        let index = inner.index.as_ref().ok_or(Error::NoFileLoaded)?;
        Ok(index.n_sequences())
    }

    pub fn concatenated_target_decoy(&self) -> Result<bool, Error> {
        let inner = self.lock();
        let index = inner.index.as_ref().ok_or(Error::NoFileLoaded)?;
        Ok(index.concatenated_target_decoy)
    }

    /// Write a concatenated target-decoy database to `dest`: each target
    /// record followed by its derived decoy (replaced accession, suffixed
    /// description, reversed sequence), then load `dest` into this
    /// factory. Cancellation removes the partial output and returns
    /// `false`.
    pub fn append_decoy_sequences(
        &self,
        dest: &Path,
        progress: &dyn Progress,
    ) -> Result<bool, Error> {
        let mut inner = self.lock();
        let src = inner.fasta_path.clone().ok_or(Error::NoFileLoaded)?;
        {
            let index = inner.index.as_ref().ok_or(Error::NoFileLoaded)?;
            progress.begin(Some(index.n_target as u64));
            let mut writer = BufWriter::new(File::create(dest)?);
            for record in RecordIterator::open(&src)? {
                if progress.cancelled() {
                    drop(writer);
                    std::fs::remove_file(dest).ok();
                    log::debug!("decoy generation cancelled, removed {}", dest.display());
                    return Ok(false);
                }
                let (header, sequence) = record?;
                if index.is_decoy_accession(&header.accession) {
                    continue;
                }
                let decoy_accession = index::default_decoy_accession(&header.accession);
                let reversed: String = sequence.chars().rev().collect();
                writeln!(writer, "{}", header.raw)?;
                writeln!(writer, "{}", sequence)?;
                writeln!(writer, "{}", header.decoy_line(&decoy_accession))?;
                writeln!(writer, "{}", reversed)?;
                progress.advance(1);
            }
            writer.flush()?;
        }
        if !self.load_into(&mut inner, dest, progress)? {
            std::fs::remove_file(dest).ok();
            std::fs::remove_file(FastaIndex::sidecar_path(dest)).ok();
            return Ok(false);
        }
        Ok(true)
    }

    /// Stream all proteins of the open file in file order, on a private
    /// file handle independent of the cache.
    pub fn proteins(&self) -> Result<ProteinIterator, Error> {
        let inner = self.lock();
        let path = inner.fasta_path.clone().ok_or(Error::NoFileLoaded)?;
        let decoy_tag = inner.index.as_ref().and_then(|i| i.decoy_tag.clone());
        Ok(ProteinIterator {
            records: RecordIterator::open(&path)?,
            decoy_tag,
        })
    }

    /// Stream all headers of the open file in file order.
    pub fn headers(&self) -> Result<HeaderIterator, Error> {
        let inner = self.lock();
        let path = inner.fasta_path.clone().ok_or(Error::NoFileLoaded)?;
        Ok(HeaderIterator {
            reader: BufReader::new(File::open(path)?),
            line: String::new(),
        })
    }

    /// Close the underlying file handle, keeping index and cache.
    pub fn close_file(&self) {
        self.lock().file = None;
    }

    /// Tear everything down: file handle, index, and cache.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.fasta_path = None;
        inner.file = None;
        inner.index = None;
        inner.cache.clear();
    }

    #[cfg(test)]
    fn cached_accessions(&self) -> Vec<String> {
        self.lock().cache.order.iter().cloned().collect()
    }
}

/// Read one record starting at the byte offset of its header line.
fn read_record(file: &mut File, offset: u64) -> Result<(Header, String), Error> {
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(&mut *file);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let header = Header::parse(&line)?;
    let mut sequence = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 || line.starts_with('>') {
            break;
        }
        push_sequence_line(&mut sequence, &line);
    }
    Ok((header, sequence))
}

// sequence bodies may be wrapped and may carry trailing stop characters
fn push_sequence_line(sequence: &mut String, line: &str) {
    for c in line.trim().chars() {
        if c != '*' {
            sequence.push(c);
        }
    }
}

struct RecordIterator {
    reader: BufReader<File>,
    line: String,
    pending: Option<Header>,
    sequence: String,
    done: bool,
}

impl RecordIterator {
    fn open(path: &Path) -> Result<RecordIterator, Error> {
        Ok(RecordIterator {
            reader: BufReader::new(File::open(path)?),
            line: String::new(),
            pending: None,
            sequence: String::new(),
            done: false,
        })
    }
}

impl Iterator for RecordIterator {
    type Item = Result<(Header, String), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.line.clear();
            let n = match self.reader.read_line(&mut self.line) {
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            if n == 0 {
                self.done = true;
                return self
                    .pending
                    .take()
                    .map(|h| Ok((h, std::mem::take(&mut self.sequence))));
            }
            if self.line.starts_with('>') {
                let header = match Header::parse(&self.line) {
                    Ok(h) => h,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e.into()));
                    }
                };
                if let Some(prev) = self.pending.replace(header) {
                    return Some(Ok((prev, std::mem::take(&mut self.sequence))));
                }
            } else if self.pending.is_some() {
                push_sequence_line(&mut self.sequence, &self.line);
            }
        }
    }
}

/// Streaming iterator over all proteins of a FASTA file in file order.
pub struct ProteinIterator {
    records: RecordIterator,
    decoy_tag: Option<String>,
}

impl Iterator for ProteinIterator {
    type Item = Result<Protein, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let (header, sequence) = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        let decoy = self
            .decoy_tag
            .as_deref()
            .map(|tag| header.accession.starts_with(tag) || header.accession.ends_with(tag))
            .unwrap_or(false);
        Some(Ok(Protein {
            accession: header.accession,
            sequence,
            database_type: header.database_type,
            decoy,
        }))
    }
}

/// Streaming iterator over all headers of a FASTA file in file order.
pub struct HeaderIterator {
    reader: BufReader<File>,
    line: String,
}

impl Iterator for HeaderIterator {
    type Item = Result<Header, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    if self.line.starts_with('>') {
                        return Some(Header::parse(&self.line).map_err(Error::from));
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
