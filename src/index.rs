use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};

use crate::fasta::{DatabaseType, Header, HeaderError};
use crate::progress::Progress;
use crate::Error;

/// Accession decorations recognized as marking a decoy entry, in priority
/// order. The first flag seen in a file fixes that file's decoy tag.
pub const DECOY_FLAGS: [&str; 4] = ["REVERSED", "RND", "SHUFFLED", "DECOY"];

/// Suffix used when decoy accessions are derived from targets.
pub const DEFAULT_DECOY_SUFFIX: &str = "_REVERSED";

/// Serializable index of a FASTA file: byte offset of every record's
/// header line keyed by accession, plus decoy metadata and per-type and
/// per-species statistics. Written next to the source file as
/// `<fasta>.cui` and accepted back only while the file's modification
/// time is unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FastaIndex {
    pub indexes: FnvHashMap<String, u64>,
    pub decoy_accessions: FnvHashSet<String>,
    pub file_name: String,
    pub last_modified: u64,
    pub n_target: usize,
    pub main_database_type: DatabaseType,
    pub database_types: FnvHashMap<DatabaseType, usize>,
    pub decoy_tag: Option<String>,
    pub default_reversed: bool,
    pub concatenated_target_decoy: bool,
    pub species_occurrence: FnvHashMap<String, usize>,
    pub name: String,
    pub version: String,
    pub description: String,
    pub accession_parsing_rule: Option<String>,
}

impl FastaIndex {
    /// Path of the sidecar index for a FASTA file.
    pub fn sidecar_path(fasta: &Path) -> PathBuf {
        let mut os = fasta.as_os_str().to_os_string();
        os.push(".cui");
        PathBuf::from(os)
    }

    /// Build an index in a single forward scan of the file. Returns `None`
    /// if the scan was cancelled.
    pub fn create(fasta: &Path, progress: &dyn Progress) -> Result<Option<FastaIndex>, Error> {
        let file = File::open(fasta)?;
        let total = file.metadata()?.len();
        progress.begin(Some(total));

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut offset = 0u64;

        let mut indexes = FnvHashMap::default();
        let mut decoy_accessions = FnvHashSet::default();
        let mut database_types: FnvHashMap<DatabaseType, usize> = FnvHashMap::default();
        let mut species_occurrence: FnvHashMap<String, usize> = FnvHashMap::default();
        let mut decoy_tag: Option<String> = None;
        let mut default_reversed = false;
        let mut n_target = 0usize;

        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            if progress.cancelled() {
                log::debug!("indexing of {} cancelled", fasta.display());
                return Ok(None);
            }
            if line.starts_with('>') {
                let header = Header::parse(&line)?;
                if header.accession.contains('"') {
                    return Err(HeaderError::QuotationMark(line.trim_end().to_string()).into());
                }
                if indexes.contains_key(&header.accession) {
                    return Err(Error::DuplicateAccession {
                        accession: header.accession,
                        file: fasta.display().to_string(),
                    });
                }

                let mut decoy = match &decoy_tag {
                    Some(tag) => {
                        header.accession.starts_with(tag.as_str())
                            || header.accession.ends_with(tag.as_str())
                    }
                    None => false,
                };
                if !decoy && decoy_tag.is_none() {
                    for flag in DECOY_FLAGS {
                        if header.accession.starts_with(flag) || header.accession.ends_with(flag)
                        {
                            decoy_tag = Some(flag.to_string());
                            decoy = true;
                            break;
                        }
                    }
                }

                if decoy {
                    if header.accession.ends_with(DEFAULT_DECOY_SUFFIX) {
                        default_reversed = true;
                    }
                    decoy_accessions.insert(header.accession.clone());
                } else {
                    n_target += 1;
                    *database_types.entry(header.database_type).or_insert(0) += 1;
                    if let Some(species) = &header.taxonomy {
                        *species_occurrence.entry(species.clone()).or_insert(0) += 1;
                    }
                }
                indexes.insert(header.accession, offset);
            }
            offset += n as u64;
            progress.advance(n as u64);
        }

        let main_database_type = database_types
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(ty, _)| *ty)
            .unwrap_or(DatabaseType::Unknown);
        let last_modified = file_last_modified(fasta)?;
        let file_name = fasta
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = fasta
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let concatenated_target_decoy = !decoy_accessions.is_empty();

        log::trace!(
            "indexed {}: {} targets, {} decoys",
            file_name,
            n_target,
            decoy_accessions.len()
        );

        Ok(Some(FastaIndex {
            indexes,
            decoy_accessions,
            file_name,
            version: default_version(last_modified),
            last_modified,
            n_target,
            main_database_type,
            database_types,
            decoy_tag,
            default_reversed,
            concatenated_target_decoy,
            species_occurrence,
            name,
            description: String::new(),
            accession_parsing_rule: None,
        }))
    }

    /// Load the index for a FASTA file, reusing the sidecar when it is
    /// fresh and rescanning otherwise. A stale or corrupt sidecar is never
    /// fatal; user-set fields are carried over from a stale one before it
    /// is overwritten. Returns `None` if a required rescan was cancelled.
    pub fn load(fasta: &Path, progress: &dyn Progress) -> Result<Option<FastaIndex>, Error> {
        let sidecar = Self::sidecar_path(fasta);
        let last_modified = file_last_modified(fasta)?;

        let mut stale: Option<FastaIndex> = None;
        if sidecar.exists() {
            match Self::read_sidecar(&sidecar) {
                Ok(index) if index.last_modified == last_modified => {
                    log::debug!("reusing index {}", sidecar.display());
                    return Ok(Some(index));
                }
                Ok(index) => {
                    log::warn!(
                        "index {} is out of date, rescanning",
                        sidecar.display()
                    );
                    stale = Some(index);
                }
                Err(e) => {
                    log::warn!(
                        "failed to read index {}, rescanning: {}",
                        sidecar.display(),
                        e
                    );
                }
            }
        }

        let mut index = match Self::create(fasta, progress)? {
            Some(index) => index,
            None => return Ok(None),
        };
        if let Some(stale) = stale {
            index.rescue_user_fields(stale);
        }
        index.write(&sidecar)?;
        Ok(Some(index))
    }

    fn rescue_user_fields(&mut self, stale: FastaIndex) {
        self.name = stale.name;
        self.description = stale.description;
        self.accession_parsing_rule = stale.accession_parsing_rule;
        if stale.decoy_tag.is_some() {
            self.decoy_tag = stale.decoy_tag;
        }
        // a user-set version survives; the default is derived from the
        // old timestamp and must not
        if stale.version != default_version(stale.last_modified) {
            self.version = stale.version;
        }
    }

    fn read_sidecar(sidecar: &Path) -> Result<FastaIndex, Error> {
        let mut reader = BufReader::new(File::open(sidecar)?);
        let index = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(index)
    }

    /// Serialize the index to the given sidecar path.
    pub fn write(&self, sidecar: &Path) -> Result<(), Error> {
        let mut writer = BufWriter::new(File::create(sidecar)?);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        Ok(())
    }

    pub fn offset(&self, accession: &str) -> Option<u64> {
        self.indexes.get(accession).copied()
    }

    pub fn contains(&self, accession: &str) -> bool {
        self.indexes.contains_key(accession)
    }

    pub fn is_decoy_accession(&self, accession: &str) -> bool {
        self.decoy_accessions.contains(accession)
    }

    pub fn n_sequences(&self) -> usize {
        self.indexes.len()
    }

    pub fn accessions(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(|s| s.as_str())
    }
}

/// Derive the default decoy accession for a target.
pub fn default_decoy_accession(target: &str) -> String {
    format!("{}{}", target, DEFAULT_DECOY_SUFFIX)
}

/// Textual inverse of [`default_decoy_accession`]. Only valid for
/// accessions actually carrying the default suffix.
pub fn default_target_accession(decoy: &str) -> Result<&str, Error> {
    decoy
        .strip_suffix(DEFAULT_DECOY_SUFFIX)
        .ok_or_else(|| Error::NotADefaultDecoy {
            accession: decoy.to_string(),
        })
}

pub(crate) fn file_last_modified(path: &Path) -> Result<u64, Error> {
    let modified = std::fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "mtime before epoch"))?;
    Ok(since_epoch.as_millis() as u64)
}

/// Render an epoch-millisecond timestamp as `dd.M.yyyy`, the default
/// database version string.
fn default_version(last_modified: u64) -> String {
    // civil-from-days, proleptic Gregorian
    let z = (last_modified / 86_400_000) as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    format!("{:02}.{}.{}", day, month, year)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::progress::NoProgress;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts full scans, so tests can tell a sidecar hit from a rescan.
    #[derive(Default)]
    struct ScanCounter(AtomicU64);

    impl Progress for ScanCounter {
        fn begin(&self, _total: Option<u64>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("seqdb_index_{}_{}", std::process::id(), name));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    const TARGET_DECOY: &str = ">P1 test protein\nMKT\n>P1_REVERSED test protein-REVERSED\nTKM\n";

    #[test]
    fn target_decoy_scan() {
        let path = write_temp("td.fasta", TARGET_DECOY);
        let index = FastaIndex::create(&path, &NoProgress).unwrap().unwrap();

        assert_eq!(index.n_target, 1);
        assert_eq!(index.n_sequences(), 2);
        assert!(index.is_decoy_accession("P1_REVERSED"));
        assert!(!index.is_decoy_accession("P1"));
        assert_eq!(index.decoy_tag.as_deref(), Some("REVERSED"));
        assert!(index.default_reversed);
        assert!(index.concatenated_target_decoy);
        assert_eq!(index.offset("P1"), Some(0));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn offsets_point_at_header_lines() {
        let path = write_temp("offsets.fasta", ">A first\nMK\nTA\n>B second\nGG\n");
        let index = FastaIndex::create(&path, &NoProgress).unwrap().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        for acc in ["A", "B"] {
            let offset = index.offset(acc).unwrap() as usize;
            let line = contents[offset..].lines().next().unwrap();
            assert!(line.starts_with('>'));
            assert_eq!(Header::parse(line).unwrap().accession, acc);
        }
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn duplicate_accessions_rejected() {
        let path = write_temp("dup.fasta", ">A one\nMK\n>A two\nGG\n");
        let err = FastaIndex::create(&path, &NoProgress).unwrap_err();
        assert!(matches!(err, Error::DuplicateAccession { accession, .. } if accession == "A"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn quotes_rejected_in_accessions_only() {
        let path = write_temp("quoted_desc.fasta", ">A the \"best\" protein\nMK\n");
        let index = FastaIndex::create(&path, &NoProgress).unwrap().unwrap();
        assert!(index.contains("A"));
        std::fs::remove_file(path).ok();

        let path = write_temp("quoted_acc.fasta", ">\"A\" quoted accession\nMK\n");
        let err = FastaIndex::create(&path, &NoProgress).unwrap_err();
        assert!(matches!(
            err,
            Error::Header(HeaderError::QuotationMark(_))
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn sidecar_reuse_and_staleness() {
        let path = write_temp("stale.fasta", TARGET_DECOY);
        let sidecar = FastaIndex::sidecar_path(&path);
        std::fs::remove_file(&sidecar).ok();

        let scans = ScanCounter::default();
        let first = FastaIndex::load(&path, &scans).unwrap().unwrap();
        assert_eq!(scans.0.load(Ordering::Relaxed), 1);
        assert!(sidecar.exists());

        // fresh sidecar: no rescan
        let second = FastaIndex::load(&path, &scans).unwrap().unwrap();
        assert_eq!(scans.0.load(Ordering::Relaxed), 1);
        assert_eq!(second.n_sequences(), first.n_sequences());

        // touch the file: rescan, but user-set fields survive
        let mut edited = first.clone();
        edited.description = "my database".to_string();
        edited.write(&sidecar).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, format!("{}>P2 another\nAAA\n", TARGET_DECOY)).unwrap();

        let third = FastaIndex::load(&path, &scans).unwrap().unwrap();
        assert_eq!(scans.0.load(Ordering::Relaxed), 2);
        assert_eq!(third.n_sequences(), 3);
        assert_eq!(third.description, "my database");

        // corrupt sidecar: logged and rebuilt
        std::fs::write(&sidecar, b"not an index").unwrap();
        let fourth = FastaIndex::load(&path, &scans).unwrap().unwrap();
        assert_eq!(scans.0.load(Ordering::Relaxed), 3);
        assert_eq!(fourth.n_sequences(), 3);

        std::fs::remove_file(&sidecar).ok();
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn cancellation_yields_no_index() {
        let path = write_temp("cancel.fasta", TARGET_DECOY);
        let flag = crate::progress::CancelFlag::new();
        flag.cancel();
        assert!(FastaIndex::create(&path, &flag).unwrap().is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn decoy_accession_round_trip() {
        for target in ["P1", "sp_Q123", "gi_42"] {
            let decoy = default_decoy_accession(target);
            assert_eq!(default_target_accession(&decoy).unwrap(), target);
        }
        assert!(default_target_accession("P1").is_err());
    }

    #[test]
    fn version_from_timestamp() {
        // 2026-08-24 00:00:00 UTC
        assert_eq!(default_version(1_787_529_600_000), "24.8.2026");
        assert_eq!(default_version(0), "01.1.1970");
    }
}
