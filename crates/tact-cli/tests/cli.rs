use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn tact_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tact"))
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

const TAXONOMY_CSV: &str = "\
family,genus,species
Fam,GenA,a1
Fam,GenA,a2
Fam,GenA,a3
Fam,GenB,b1
Fam,GenB,b2
Fam,GenB,b3
";

const BACKBONE: &str = "((a1:2.0,(a2:1.0,a3:1.0):1.0):2.0);";

#[test]
fn build_taxonomy_then_add_taxa_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write(dir.path(), "taxonomy.csv", TAXONOMY_CSV);
    let backbone = write(dir.path(), "backbone.tre", BACKBONE);
    let taxonomy_tree = dir.path().join("taxonomy.tre");

    let status = Command::new(tact_bin())
        .args(["build-taxonomy"])
        .arg(&csv)
        .arg("--output")
        .arg(&taxonomy_tree)
        .status()
        .expect("run build-taxonomy");
    assert!(status.success());
    let rendered = fs::read_to_string(&taxonomy_tree).unwrap();
    assert!(rendered.contains("GenA"));
    assert!(rendered.contains("b3"));

    let out_base = dir.path().join("res");
    let status = Command::new(tact_bin())
        .args(["add-taxa"])
        .arg("--taxonomy")
        .arg(&taxonomy_tree)
        .arg("--backbone")
        .arg(&backbone)
        .arg("--output")
        .arg(&out_base)
        .args(["--seed", "23239"])
        .status()
        .expect("run add-taxa");
    assert!(status.success());

    let newick = fs::read_to_string(dir.path().join("res.newick.tre")).unwrap();
    for tip in ["a1", "a2", "a3", "b1", "b2", "b3"] {
        assert!(newick.contains(tip), "{tip} missing from output tree");
    }
    assert!(!newick.contains("[&"), "no rooting annotation expected");

    let nexus = fs::read_to_string(dir.path().join("res.nexus.tre")).unwrap();
    assert!(nexus.starts_with("#NEXUS"));

    let rates = fs::read_to_string(dir.path().join("res.rates.csv")).unwrap();
    let mut lines = rates.lines();
    assert_eq!(lines.next(), Some("taxon,birth,death,ccp,source"));
    assert!(rates.lines().count() > 1);

    assert!(dir.path().join("res.log.txt").exists());

    // check-trees over the result.
    let report = dir.path().join("report.csv");
    let status = Command::new(tact_bin())
        .args(["check-trees"])
        .arg(dir.path().join("res.newick.tre"))
        .arg("--backbone")
        .arg(&backbone)
        .arg("--taxonomy")
        .arg(&taxonomy_tree)
        .arg("--output")
        .arg(&report)
        .status()
        .expect("run check-trees");
    assert!(status.success());
    let report = fs::read_to_string(&report).unwrap();
    assert!(report.lines().next().unwrap().starts_with("node,taxonomy_tips"));
    assert!(report.contains("GenB"));
}

#[test]
fn same_seed_is_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write(dir.path(), "taxonomy.csv", TAXONOMY_CSV);
    let backbone = write(dir.path(), "backbone.tre", BACKBONE);
    let taxonomy_tree = dir.path().join("taxonomy.tre");
    assert!(Command::new(tact_bin())
        .args(["build-taxonomy"])
        .arg(&csv)
        .arg("--output")
        .arg(&taxonomy_tree)
        .status()
        .unwrap()
        .success());

    let mut outputs = Vec::new();
    for run in 0..2 {
        let base = dir.path().join(format!("run{run}"));
        assert!(Command::new(tact_bin())
            .args(["add-taxa"])
            .arg("--taxonomy")
            .arg(&taxonomy_tree)
            .arg("--backbone")
            .arg(&backbone)
            .arg("--output")
            .arg(&base)
            .args(["--seed", "7"])
            .status()
            .unwrap()
            .success());
        outputs.push(fs::read_to_string(format!("{}.newick.tre", base.display())).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn nonbinary_backbone_fails_validation_with_exit_1() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write(dir.path(), "taxonomy.csv", TAXONOMY_CSV);
    let backbone = write(dir.path(), "backbone.tre", "(a1:1.0,a2:1.0,a3:1.0);");
    let taxonomy_tree = dir.path().join("taxonomy.tre");
    assert!(Command::new(tact_bin())
        .args(["build-taxonomy"])
        .arg(&csv)
        .arg("--output")
        .arg(&taxonomy_tree)
        .status()
        .unwrap()
        .success());

    let status = Command::new(tact_bin())
        .args(["add-taxa"])
        .arg("--taxonomy")
        .arg(&taxonomy_tree)
        .arg("--backbone")
        .arg(&backbone)
        .arg("--output")
        .arg(dir.path().join("res"))
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn duplicate_ranks_in_csv_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write(
        dir.path(),
        "bad.csv",
        "family,genus,species\nFam,Fam,Fam sp1\n",
    );
    let status = Command::new(tact_bin())
        .args(["build-taxonomy"])
        .arg(&csv)
        .arg("--output")
        .arg(dir.path().join("out.tre"))
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
