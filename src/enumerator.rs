use crate::mass::{mass_bounds, H2O};
use crate::modification::FixedModificationIndex;

/// Most X residues tolerated in a single peptide before the window is
/// abandoned.
pub const DEFAULT_MAX_X: usize = 2;

/// A contiguous protein substring whose theoretical mass range intersects
/// the requested window, annotated with the fixed modifications that apply.
///
/// `mass_min`/`mass_max` differ only when the sequence contains ambiguity
/// codes, which carry a mass range rather than a point mass. Site positions
/// are 0-based within the peptide.
#[derive(Clone, Debug, PartialEq)]
pub struct PeptideCandidate {
    pub sequence: String,
    pub protein_start: usize,
    pub mass_min: f32,
    pub mass_max: f32,
    pub nterm: Option<String>,
    pub cterm: Option<String>,
    pub sites: Vec<(usize, String)>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EnumeratorError {
    #[error("invalid residue '{residue}' at position {position}")]
    InvalidResidue { residue: char, position: usize },
}

/// Slides a window over a protein sequence and emits every peptide whose
/// theoretical mass range intersects a caller-supplied window, under a set
/// of fixed modifications.
pub struct ProteinSequenceEnumerator {
    mods: FixedModificationIndex,
    max_x: usize,
}

impl ProteinSequenceEnumerator {
    pub fn new(mods: FixedModificationIndex) -> Self {
        ProteinSequenceEnumerator {
            mods,
            max_x: DEFAULT_MAX_X,
        }
    }

    pub fn with_max_x(mods: FixedModificationIndex, max_x: usize) -> Self {
        ProteinSequenceEnumerator { mods, max_x }
    }

    /// Enumerate all peptides of `sequence` with a mass range intersecting
    /// `[mass_min, mass_max]`.
    ///
    /// For each start index the end grows outward while the running
    /// minimal mass can still fit under `mass_max`; since residue masses
    /// only accumulate, the inner loop stops at the first overshoot.
    pub fn enumerate_peptides(
        &self,
        sequence: &str,
        mass_min: f32,
        mass_max: f32,
    ) -> Result<Vec<PeptideCandidate>, EnumeratorError> {
        let seq = sequence.as_bytes();
        let min_cterm = self.mods.min_cterm_mass();
        let mut peptides = Vec::new();

        for i in 0..seq.len() {
            let nterm = self.mods.nterm(i == 0, seq[i]);
            let mut sequence_mass_min = nterm.map(|m| m.mass).unwrap_or(0.0);
            let mut sequence_mass_max = sequence_mass_min;
            let mut sites: Vec<(usize, String)> = Vec::new();
            let mut n_x = 0;

            for j in i..seq.len() {
                let aa = seq[j];
                if aa == b'X' {
                    n_x += 1;
                    if n_x > self.max_x {
                        break;
                    }
                }
                let (lo, hi) = mass_bounds(aa).ok_or(EnumeratorError::InvalidResidue {
                    residue: aa as char,
                    position: j,
                })?;
                sequence_mass_min += lo;
                sequence_mass_max += hi;
                if let Some(m) = self.mods.at_residue(aa) {
                    sequence_mass_min += m.mass;
                    sequence_mass_max += m.mass;
                    sites.push((j - i, m.name.clone()));
                }

                if sequence_mass_min + min_cterm + H2O > mass_max {
                    break;
                }

                let cterm = self.mods.cterm(j == seq.len() - 1, aa);
                let cterm_mass = cterm.map(|m| m.mass).unwrap_or(0.0);
                let peptide_mass_min = sequence_mass_min + cterm_mass + H2O;
                let peptide_mass_max = sequence_mass_max + cterm_mass + H2O;

                if peptide_mass_max >= mass_min && peptide_mass_min <= mass_max {
                    peptides.push(PeptideCandidate {
                        sequence: sequence[i..=j].to_string(),
                        protein_start: i,
                        mass_min: peptide_mass_min,
                        mass_max: peptide_mass_max,
                        nterm: nterm.map(|m| m.name.clone()),
                        cterm: cterm.map(|m| m.name.clone()),
                        sites: sites.clone(),
                    });
                }
            }
        }
        Ok(peptides)
    }
}
