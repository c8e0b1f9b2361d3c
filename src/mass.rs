pub const H2O: f32 = 18.010565;
pub const PROTON: f32 = 1.0072764;

pub trait Mass {
    fn monoisotopic(&self) -> f32;
}

pub const VALID_AA: [u8; 22] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y', b'U', b'O',
];

impl Mass for u8 {
    fn monoisotopic(&self) -> f32 {
        match self {
            b'A' => 71.03711,
            b'R' => 156.1011,
            b'N' => 114.04293,
            b'D' => 115.02694,
            b'C' => 103.00919,
            b'E' => 129.04259,
            b'Q' => 128.05858,
            b'G' => 57.02146,
            b'H' => 137.05891,
            b'I' => 113.08406,
            b'L' => 113.08406,
            b'K' => 128.09496,
            b'M' => 131.0405,
            b'F' => 147.0684,
            b'P' => 97.05276,
            b'S' => 87.03203,
            b'T' => 101.04768,
            b'W' => 186.07931,
            b'Y' => 163.06333,
            b'V' => 99.06841,
            b'U' => 150.95363,
            b'O' => 237.14773,
            _ => unreachable!("BUG: invalid amino acid {}", *self as char),
        }
    }
}

/// Ambiguity codes that stand for a set of concrete residues.
///
/// `X` can be any standard residue, `B` is Asn or Asp, `J` is Ile or Leu,
/// and `Z` is Gln or Glu.
pub const AMBIGUOUS_AA: [u8; 4] = [b'X', b'B', b'J', b'Z'];

const ANY_AA: [u8; 20] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y',
];

/// Concrete residues an ambiguity code can resolve to, in a fixed order.
/// Returns `None` for anything that is not an ambiguity code.
pub fn alternatives(aa: u8) -> Option<&'static [u8]> {
    match aa {
        b'X' => Some(&ANY_AA),
        b'B' => Some(&[b'N', b'D']),
        b'J' => Some(&[b'I', b'L']),
        b'Z' => Some(&[b'Q', b'E']),
        _ => None,
    }
}

pub fn is_ambiguous(aa: u8) -> bool {
    alternatives(aa).is_some()
}

/// Monoisotopic mass bounds for a residue: a point mass for concrete
/// residues, the min/max over the possible residues for ambiguity codes.
/// `None` if the byte is not a residue at all.
pub fn mass_bounds(aa: u8) -> Option<(f32, f32)> {
    if let Some(alts) = alternatives(aa) {
        let mut lo = f32::MAX;
        let mut hi = f32::MIN;
        for &sub in alts {
            let m = sub.monoisotopic();
            lo = lo.min(m);
            hi = hi.max(m);
        }
        Some((lo, hi))
    } else if VALID_AA.contains(&aa) {
        let m = aa.monoisotopic();
        Some((m, m))
    } else {
        None
    }
}
