use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::OnceLock;

use fnv::FnvHashMap;
use regex::Regex;

use crate::progress::Progress;

#[derive(thiserror::Error, Debug)]
pub enum MgfError {
    #[error("malformed MGF line: {0}")]
    Malformed(String),
    #[error("spectrum block is missing {0}")]
    MissingField(&'static str),
    #[error("no spectrum titled {0}")]
    TitleNotFound(String),
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
}

/// One MS/MS spectrum from an MGF block: precursor information plus the
/// peak list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectrum {
    pub title: String,
    pub precursor_mz: f32,
    pub precursor_intensity: Option<f32>,
    pub charges: Vec<u8>,
    pub rt_seconds: Option<f32>,
    pub mz: Vec<f32>,
    pub intensity: Vec<f32>,
}

fn charge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\+?").unwrap())
}

#[derive(Default)]
struct SpectrumData {
    in_block: bool,
    title: Option<String>,
    precursor_mz: Option<f32>,
    precursor_intensity: Option<f32>,
    charges: Vec<u8>,
    rt_seconds: Option<f32>,
    mz: Vec<f32>,
    intensity: Vec<f32>,
    spectra: Vec<Spectrum>,
}

impl SpectrumData {
    fn finish(&mut self) -> Result<(), MgfError> {
        let title = self.title.take().ok_or(MgfError::MissingField("TITLE"))?;
        let precursor_mz = self
            .precursor_mz
            .take()
            .ok_or(MgfError::MissingField("PEPMASS"))?;
        self.spectra.push(Spectrum {
            title,
            precursor_mz,
            precursor_intensity: self.precursor_intensity.take(),
            charges: std::mem::take(&mut self.charges),
            rt_seconds: self.rt_seconds.take(),
            mz: std::mem::take(&mut self.mz),
            intensity: std::mem::take(&mut self.intensity),
        });
        self.in_block = false;
        Ok(())
    }
}

type LineParser = fn(&str, &mut SpectrumData) -> Result<bool, MgfError>;

fn parsers() -> Vec<LineParser> {
    vec![
        parse_begin,
        parse_end,
        parse_title,
        parse_pepmass,
        parse_charge,
        parse_rt,
        parse_peak,
    ]
}

fn parse_begin(line: &str, data: &mut SpectrumData) -> Result<bool, MgfError> {
    if line.starts_with("BEGIN IONS") {
        data.in_block = true;
        return Ok(true);
    }
    Ok(false)
}

fn parse_end(line: &str, data: &mut SpectrumData) -> Result<bool, MgfError> {
    if line.starts_with("END IONS") {
        data.finish()?;
        return Ok(true);
    }
    Ok(false)
}

fn parse_title(line: &str, data: &mut SpectrumData) -> Result<bool, MgfError> {
    if let Some(title) = line.strip_prefix("TITLE=") {
        data.title = Some(title.to_string());
        return Ok(true);
    }
    Ok(false)
}

fn parse_pepmass(line: &str, data: &mut SpectrumData) -> Result<bool, MgfError> {
    if let Some(pepmass) = line.strip_prefix("PEPMASS=") {
        let mut fields = pepmass.split_ascii_whitespace();
        match fields.next().map(|s| s.parse::<f32>()) {
            Some(Ok(mz)) => data.precursor_mz = Some(mz),
            _ => return Err(MgfError::Malformed(line.to_string())),
        }
        if let Some(Ok(intensity)) = fields.next().map(|s| s.parse::<f32>()) {
            data.precursor_intensity = Some(intensity);
        }
        return Ok(true);
    }
    Ok(false)
}

fn parse_charge(line: &str, data: &mut SpectrumData) -> Result<bool, MgfError> {
    if let Some(charges) = line.strip_prefix("CHARGE=") {
        if data.in_block {
            for cap in charge_re().captures_iter(charges) {
                if let Ok(z) = cap[1].parse::<u8>() {
                    data.charges.push(z);
                }
            }
        }
        return Ok(true);
    }
    Ok(false)
}

// an unparsable retention time is a hard error, not a silently absent value
fn parse_rt(line: &str, data: &mut SpectrumData) -> Result<bool, MgfError> {
    if let Some(rt) = line.strip_prefix("RTINSECONDS=") {
        match rt.trim().parse::<f32>() {
            Ok(seconds) => data.rt_seconds = Some(seconds),
            Err(_) => return Err(MgfError::Malformed(line.to_string())),
        }
        return Ok(true);
    }
    Ok(false)
}

fn parse_peak(line: &str, data: &mut SpectrumData) -> Result<bool, MgfError> {
    if !data.in_block || !line.chars().next().unwrap_or_default().is_numeric() {
        return Ok(false);
    }
    let mut fields = line.split_ascii_whitespace();
    match fields.next().map(|s| s.parse::<f32>()) {
        Some(Ok(mz)) => data.mz.push(mz),
        _ => return Err(MgfError::Malformed(line.to_string())),
    }
    match fields.next() {
        Some(s) => match s.parse::<f32>() {
            Ok(intensity) => data.intensity.push(intensity),
            Err(_) => return Err(MgfError::Malformed(line.to_string())),
        },
        None => data.intensity.push(1.0),
    }
    Ok(true)
}

/// Parser for Mascot Generic Format spectra.
pub struct MgfReader;

impl MgfReader {
    /// Parse every `BEGIN IONS`/`END IONS` block in `contents`. Lines
    /// outside blocks (global parameters, comments, sequence queries) are
    /// ignored.
    pub fn parse(contents: &str) -> Result<Vec<Spectrum>, MgfError> {
        let parsers = parsers();
        let mut data = SpectrumData::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            for parser in &parsers {
                if parser(line, &mut data)? {
                    break;
                }
            }
        }
        Ok(data.spectra)
    }

    fn parse_block_at(file: &mut File, offset: u64) -> Result<Spectrum, MgfError> {
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);
        let parsers = parsers();
        let mut data = SpectrumData::default();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(MgfError::MissingField("END IONS"));
            }
            let trimmed = line.trim();
            for parser in &parsers {
                if parser(trimmed, &mut data)? {
                    break;
                }
            }
            if !data.spectra.is_empty() {
                return Ok(data.spectra.remove(0));
            }
        }
    }
}

/// Byte-offset index over an MGF file: spectrum title to the offset of its
/// `BEGIN IONS` line, for random access without re-parsing the whole file.
#[derive(Clone, Debug, Default)]
pub struct MgfIndex {
    titles: FnvHashMap<String, u64>,
}

impl MgfIndex {
    /// One forward scan recording the offset of each block and its title.
    /// Returns `None` if the scan was cancelled.
    pub fn build(path: &Path, progress: &dyn Progress) -> Result<Option<MgfIndex>, MgfError> {
        let file = File::open(path)?;
        progress.begin(Some(file.metadata()?.len()));
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut offset = 0u64;
        let mut block_offset = None;
        let mut titles = FnvHashMap::default();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            if progress.cancelled() {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.starts_with("BEGIN IONS") {
                block_offset = Some(offset);
            } else if let Some(title) = trimmed.strip_prefix("TITLE=") {
                if let Some(begin) = block_offset.take() {
                    titles.insert(title.to_string(), begin);
                }
            }
            offset += n as u64;
            progress.advance(n as u64);
        }
        Ok(Some(MgfIndex { titles }))
    }

    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains_key(title)
    }

    pub fn n_spectra(&self) -> usize {
        self.titles.len()
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.titles.keys().map(|s| s.as_str())
    }

    /// Seek to a titled spectrum and parse just its block.
    pub fn get_spectrum(&self, path: &Path, title: &str) -> Result<Spectrum, MgfError> {
        let offset = self
            .titles
            .get(title)
            .copied()
            .ok_or_else(|| MgfError::TitleNotFound(title.to_string()))?;
        let mut file = File::open(path)?;
        MgfReader::parse_block_at(&mut file, offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::progress::NoProgress;
    use std::io::Write;
    use std::path::PathBuf;

    fn two_spectra() -> String {
        let s = r#"COM=10 pmol digest of Sample X15
CHARGE=2+ and 3+
BEGIN IONS
TITLE=Spectrum 1
PEPMASS=983.6 1200.5
CHARGE=2+
RTINSECONDS=25
846.60 73
846.80 44
847.60
END IONS

BEGIN IONS
TITLE=Spectrum 2
PEPMASS=1084.9
345.10 237
370.20 128
END IONS
"#;
        s.to_string()
    }

    #[test]
    fn parse_two_spectra() {
        let spectra = MgfReader::parse(&two_spectra()).unwrap();
        assert_eq!(spectra.len(), 2);

        let first = &spectra[0];
        assert_eq!(first.title, "Spectrum 1");
        assert!((first.precursor_mz - 983.6).abs() < 1e-4);
        assert_eq!(first.precursor_intensity, Some(1200.5));
        assert_eq!(first.charges, vec![2]);
        assert_eq!(first.rt_seconds, Some(25.0));
        assert_eq!(first.mz.len(), 3);
        assert_eq!(first.intensity.len(), 3);
        // a peak without an intensity defaults to 1.0
        assert!((first.intensity[2] - 1.0).abs() < 1e-6);

        let second = &spectra[1];
        assert_eq!(second.title, "Spectrum 2");
        assert!(second.charges.is_empty());
        assert_eq!(second.rt_seconds, None);
    }

    #[test]
    fn unparsable_rt_fails_fast() {
        let block = "BEGIN IONS\nTITLE=t\nPEPMASS=100.0\nRTINSECONDS=soon\n1.0 1\nEND IONS\n";
        assert!(matches!(
            MgfReader::parse(block),
            Err(MgfError::Malformed(_))
        ));
    }

    #[test]
    fn missing_title_fails() {
        let block = "BEGIN IONS\nPEPMASS=100.0\n1.0 1\nEND IONS\n";
        assert!(matches!(
            MgfReader::parse(block),
            Err(MgfError::MissingField("TITLE"))
        ));
    }

    #[test]
    fn unparsable_peak_fails() {
        let block = "BEGIN IONS\nTITLE=t\nPEPMASS=100.0\n1.0 high\nEND IONS\n";
        assert!(matches!(
            MgfReader::parse(block),
            Err(MgfError::Malformed(_))
        ));
    }

    fn write_temp(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("seqdb_mgf_{}_{}", std::process::id(), name));
        let mut f = File::create(&path).unwrap();
        f.write_all(two_spectra().as_bytes()).unwrap();
        path
    }

    #[test]
    fn index_and_random_access() {
        let path = write_temp("index.mgf");
        let index = MgfIndex::build(&path, &NoProgress).unwrap().unwrap();
        assert_eq!(index.n_spectra(), 2);
        assert!(index.contains("Spectrum 2"));

        let s = index.get_spectrum(&path, "Spectrum 2").unwrap();
        assert_eq!(s.title, "Spectrum 2");
        assert!((s.precursor_mz - 1084.9).abs() < 1e-4);
        assert_eq!(s.mz.len(), 2);

        assert!(matches!(
            index.get_spectrum(&path, "Spectrum 3"),
            Err(MgfError::TitleNotFound(_))
        ));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn cancelled_index_build() {
        let path = write_temp("cancel.mgf");
        let flag = crate::progress::CancelFlag::new();
        flag.cancel();
        assert!(MgfIndex::build(&path, &flag).unwrap().is_none());
        std::fs::remove_file(path).ok();
    }
}
