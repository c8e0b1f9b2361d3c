use seqdb::ambiguous::AmbiguousSequenceIterator;
use seqdb::enumerator::ProteinSequenceEnumerator;
use seqdb::factory::Builder;
use seqdb::index::{default_decoy_accession, default_target_accession, FastaIndex};
use seqdb::mass::{Mass, H2O};
use seqdb::mgf::{MgfIndex, MgfReader};
use seqdb::modification::{FixedModificationIndex, Modification};
use seqdb::progress::NoProgress;
use std::path::PathBuf;

const FASTA: &str = "\
>sp|P00761|TRYP_PIG Trypsin OS=Sus scrofa PE=1 SV=1
FPTDDDDK
IVGGYTCAANSIPYQVSLNSGYHFCGGSLINSQWVVSAAHCYK
>sp|P02754|LACB_BOVIN Beta-lactoglobulin OS=Bos taurus GN=LGB PE=1 SV=3
MKCLLLALALTCGAQA*
>generic_03 a homemade entry with ambiguity
GASPKBZK
";

fn temp(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("seqdb_it_{}_{}", std::process::id(), name))
}

fn cleanup(path: &PathBuf) {
    std::fs::remove_file(FastaIndex::sidecar_path(path)).ok();
    std::fs::remove_file(path).ok();
}

#[test]
fn target_decoy_pipeline() -> Result<(), seqdb::Error> {
    let fasta = temp("pipeline.fasta");
    let concatenated = temp("pipeline_td.fasta");
    std::fs::write(&fasta, FASTA)?;
    cleanup(&concatenated);

    let factory = Builder::default().cache_size(10).make_factory();
    assert!(factory.load_fasta_file(&fasta, &NoProgress)?);
    assert_eq!(factory.n_targets()?, 3);
    assert!(!factory.concatenated_target_decoy()?);

    // multi-line records concatenate, stop characters vanish
    let trypsin = factory.get_protein("P00761")?;
    assert_eq!(trypsin.sequence.len(), 8 + 43);
    assert!(trypsin.sequence.starts_with("FPTDDDDKIVGG"));
    let lacb = factory.get_protein("P02754")?;
    assert_eq!(lacb.sequence, "MKCLLLALALTCGAQA");

    let header = factory.get_header("P02754")?;
    assert_eq!(header.taxonomy.as_deref(), Some("Bos taurus"));

    // concatenated target-decoy database
    assert!(factory.append_decoy_sequences(&concatenated, &NoProgress)?);
    assert_eq!(factory.n_targets()?, 3);
    assert_eq!(factory.n_sequences()?, 6);
    assert!(factory.concatenated_target_decoy()?);

    for accession in ["P00761", "P02754", "generic_03"] {
        let decoy_accession = default_decoy_accession(accession);
        assert_eq!(default_target_accession(&decoy_accession)?, accession);
        assert!(factory.is_decoy_accession(&decoy_accession)?);

        let target = factory.get_protein(accession)?;
        let decoy = factory.get_protein(&decoy_accession)?;
        assert!(decoy.decoy);
        assert_eq!(
            decoy.sequence,
            target.sequence.chars().rev().collect::<String>()
        );
    }

    // the concatenated file itself round-trips through a cold factory
    let cold = Builder::default().make_factory();
    assert!(cold.load_fasta_file(&concatenated, &NoProgress)?);
    assert_eq!(cold.n_sequences()?, 6);
    let decoys = cold
        .proteins()?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|p| p.decoy)
        .count();
    assert_eq!(decoys, 3);

    cleanup(&fasta);
    cleanup(&concatenated);
    Ok(())
}

#[test]
fn enumerate_modified_peptides_from_a_retrieved_protein() -> Result<(), seqdb::Error> {
    let fasta = temp("enumerate.fasta");
    std::fs::write(&fasta, FASTA)?;

    let factory = Builder::default().make_factory();
    assert!(factory.load_fasta_file(&fasta, &NoProgress)?);
    let protein = factory.get_protein("generic_03")?;
    assert_eq!(protein.sequence, "GASPKBZK");

    let mods = FixedModificationIndex::new([
        Modification::new("Acetyl", 42.010565, "[").unwrap(),
        Modification::new("Carbamidomethyl", 57.02146, "C").unwrap(),
    ])?;
    let enumerator = ProteinSequenceEnumerator::new(mods);

    let gaspk: f32 = "GASPK".bytes().map(|aa| aa.monoisotopic()).sum();
    let expected = gaspk + 42.010565 + H2O;
    let peptides = enumerator.enumerate_peptides(
        &protein.sequence,
        expected - 0.01,
        expected + 0.01,
    )?;
    let hit = peptides
        .iter()
        .find(|p| p.sequence == "GASPK")
        .expect("GASPK should fall in the window");
    assert_eq!(hit.protein_start, 0);
    assert_eq!(hit.nterm.as_deref(), Some("Acetyl"));
    assert!((hit.mass_min - expected).abs() < 0.01);

    // pruning: nothing longer than the window allows
    for p in &peptides {
        assert!(p.mass_min <= expected + 0.01);
        assert!(p.mass_max >= expected - 0.01);
    }

    // ambiguity codes expand to concrete sequences
    let resolved: Vec<String> = AmbiguousSequenceIterator::new("KBZK", 2)
        .map(|s| String::from_utf8(s).unwrap())
        .collect();
    assert_eq!(resolved.len(), 4);
    assert!(resolved.contains(&"KNQK".to_string()));
    assert!(resolved.contains(&"KDEK".to_string()));

    cleanup(&fasta);
    Ok(())
}

#[test]
fn spectra_next_to_the_database() -> Result<(), seqdb::Error> {
    let mgf = temp("adjacent.mgf");
    std::fs::write(
        &mgf,
        "BEGIN IONS\nTITLE=scan=1\nPEPMASS=421.76 1000.0\nCHARGE=2+\nRTINSECONDS=63.2\n\
         175.119 10\n276.167 22\n389.251 17\nEND IONS\n",
    )?;

    let spectra = MgfReader::parse(&std::fs::read_to_string(&mgf)?)?;
    assert_eq!(spectra.len(), 1);
    assert_eq!(spectra[0].charges, vec![2]);

    let index = MgfIndex::build(&mgf, &NoProgress)?.unwrap();
    let s = index.get_spectrum(&mgf, "scan=1")?;
    assert_eq!(s, spectra[0]);
    assert_eq!(s.mz.len(), 3);

    std::fs::remove_file(mgf).ok();
    Ok(())
}
