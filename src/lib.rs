//! Indexed random access to FASTA protein databases, target-decoy
//! handling, and in-silico peptide enumeration under fixed modifications,
//! with an adjacent reader for MGF spectra.

pub mod ambiguous;
pub mod enumerator;
pub mod factory;
pub mod fasta;
pub mod index;
pub mod mass;
pub mod mgf;
pub mod modification;
pub mod progress;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Header(#[from] fasta::HeaderError),
    #[error("duplicate accession {accession} in {file}")]
    DuplicateAccession { accession: String, file: String },
    #[error("accession {accession} not found")]
    NotFound { accession: String },
    #[error("{accession} does not carry the default decoy suffix")]
    NotADefaultDecoy { accession: String },
    #[error("no FASTA file loaded")]
    NoFileLoaded,
    #[error("failed to decode sequence index: {0}")]
    IndexDecode(#[from] bincode::error::DecodeError),
    #[error("failed to encode sequence index: {0}")]
    IndexEncode(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Modification(#[from] modification::ModificationError),
    #[error(transparent)]
    Enumerator(#[from] enumerator::EnumeratorError),
    #[error(transparent)]
    Mgf(#[from] mgf::MgfError),
}
