use std::fmt::{self, Display, Write};
use std::str::FromStr;

use fnv::FnvHashMap;
use serde::{de::Visitor, Deserialize, Serialize};

use crate::mass::VALID_AA;

/// Position class a fixed modification is anchored to. `^`/`$` prefix a
/// peptide N/C-terminus, `[`/`]` a protein N/C-terminus, optionally
/// followed by a residue; a bare residue is a plain per-residue
/// modification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModificationSpecificity {
    PeptideN(Option<u8>),
    PeptideC(Option<u8>),
    ProteinN(Option<u8>),
    ProteinC(Option<u8>),
    Residue(u8),
}

impl Display for ModificationSpecificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = match self {
            ModificationSpecificity::PeptideN(r) => {
                f.write_char('^')?;
                *r
            }
            ModificationSpecificity::PeptideC(r) => {
                f.write_char('$')?;
                *r
            }
            ModificationSpecificity::ProteinN(r) => {
                f.write_char('[')?;
                *r
            }
            ModificationSpecificity::ProteinC(r) => {
                f.write_char(']')?;
                *r
            }
            ModificationSpecificity::Residue(r) => Some(*r),
        };

        if let Some(r) = r {
            f.write_char(r as char)?;
        }

        Ok(())
    }
}

impl Serialize for ModificationSpecificity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModificationSpecificity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;
        impl Visitor<'_> for V {
            type Value = ModificationSpecificity;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a modification specificity string, e.g. \"C\", \"^\", \"[M\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(serde::de::Error::custom)
            }
        }
        deserializer.deserialize_str(V)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum InvalidModification {
    #[error("invalid modification string: empty")]
    Empty,
    #[error("invalid modification string: unrecognized residue ({0})")]
    InvalidResidue(char),
    #[error("invalid modification string: {0} is too long")]
    TooLong(String),
}

impl FromStr for ModificationSpecificity {
    type Err = InvalidModification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 2 {
            return Err(InvalidModification::TooLong(s.into()));
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Ok(ModificationSpecificity::PeptideN(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        if let Some(rest) = s.strip_prefix('$') {
            return Ok(ModificationSpecificity::PeptideC(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        if let Some(rest) = s.strip_prefix('[') {
            return Ok(ModificationSpecificity::ProteinN(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        if let Some(rest) = s.strip_prefix(']') {
            return Ok(ModificationSpecificity::ProteinC(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        match s.chars().next() {
            Some(c) => {
                if VALID_AA.contains(&(c as u8)) {
                    Ok(ModificationSpecificity::Residue(c as u8))
                } else {
                    Err(InvalidModification::InvalidResidue(c))
                }
            }
            None => Err(InvalidModification::Empty),
        }
    }
}

/// A named fixed modification: assumed present at every position matching
/// its specificity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub name: String,
    pub mass: f32,
    pub specificity: ModificationSpecificity,
}

impl Modification {
    pub fn new(name: &str, mass: f32, specificity: &str) -> Result<Self, InvalidModification> {
        Ok(Modification {
            name: name.to_string(),
            mass,
            specificity: specificity.parse()?,
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModificationError {
    #[error("two fixed modifications registered for position class {class}: {existing} and {duplicate}")]
    Conflict {
        class: String,
        existing: String,
        duplicate: String,
    },
    #[error(transparent)]
    Invalid(#[from] InvalidModification),
}

/// Fixed modifications keyed by position class, at most one per class.
/// Registering a second modification for an already-occupied class is a
/// configuration error, raised at construction rather than at first use.
#[derive(Clone, Debug, Default)]
pub struct FixedModificationIndex {
    mods: FnvHashMap<ModificationSpecificity, Modification>,
}

impl FixedModificationIndex {
    pub fn new(
        mods: impl IntoIterator<Item = Modification>,
    ) -> Result<FixedModificationIndex, ModificationError> {
        let mut index = FixedModificationIndex::default();
        for m in mods {
            if let Some(existing) = index.mods.get(&m.specificity) {
                return Err(ModificationError::Conflict {
                    class: m.specificity.to_string(),
                    existing: existing.name.clone(),
                    duplicate: m.name,
                });
            }
            index.mods.insert(m.specificity, m);
        }
        Ok(index)
    }

    /// N-terminal modification for a peptide starting with `aa`, with the
    /// protein-scoped classes consulted only when the peptide sits at the
    /// protein N-terminus. First match wins: protein-global,
    /// protein-residue, peptide-global, peptide-residue.
    pub fn nterm(&self, protein_nterm: bool, aa: u8) -> Option<&Modification> {
        use ModificationSpecificity::*;
        if protein_nterm {
            if let Some(m) = self.mods.get(&ProteinN(None)) {
                return Some(m);
            }
            if let Some(m) = self.mods.get(&ProteinN(Some(aa))) {
                return Some(m);
            }
        }
        if let Some(m) = self.mods.get(&PeptideN(None)) {
            return Some(m);
        }
        self.mods.get(&PeptideN(Some(aa)))
    }

    /// C-terminal counterpart of [`FixedModificationIndex::nterm`].
    pub fn cterm(&self, protein_cterm: bool, aa: u8) -> Option<&Modification> {
        use ModificationSpecificity::*;
        if protein_cterm {
            if let Some(m) = self.mods.get(&ProteinC(None)) {
                return Some(m);
            }
            if let Some(m) = self.mods.get(&ProteinC(Some(aa))) {
                return Some(m);
            }
        }
        if let Some(m) = self.mods.get(&PeptideC(None)) {
            return Some(m);
        }
        self.mods.get(&PeptideC(Some(aa)))
    }

    pub fn at_residue(&self, aa: u8) -> Option<&Modification> {
        self.mods.get(&ModificationSpecificity::Residue(aa))
    }

    /// Smallest mass any C-terminal modification can contribute, floored
    /// at zero. Used to prune peptide extension: a growing peptide whose
    /// minimal mass plus this bound already exceeds the window cannot
    /// recover.
    pub fn min_cterm_mass(&self) -> f32 {
        use ModificationSpecificity::*;
        self.mods
            .iter()
            .filter(|(spec, _)| matches!(spec, PeptideC(_) | ProteinC(_)))
            .map(|(_, m)| m.mass)
            .fold(0.0f32, f32::min)
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}
