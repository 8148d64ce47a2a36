use std::path::PathBuf;
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_goe"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(out.status.success(), "command failed: {}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).expect("stdout should be JSON")
}

#[test]
fn validate_single_sector() {
    let out = run(&["validate", "--sector", "leptons", "--bootstrap", "200", "--permutations", "200"]);
    let v = stdout_json(&out);
    let obj = v.as_object().unwrap();
    assert_eq!(obj.len(), 1);
    let leptons = &v["leptons"];
    assert_eq!(leptons["fermions"], serde_json::json!(["e", "mu", "tau"]));
    let mape = leptons["basic_metrics"]["mape"].as_f64().unwrap();
    assert!((mape - 2.150_438).abs() < 1e-4, "mape = {}", mape);
    assert_eq!(leptons["bootstrap"]["n_bootstrap"], 200);
}

#[test]
fn validate_all_sectors_by_default() {
    let out = run(&["validate", "--bootstrap", "50", "--permutations", "50"]);
    let v = stdout_json(&out);
    for key in ["leptons", "up_quarks", "down_quarks"] {
        assert!(v.get(key).is_some(), "missing sector {}", key);
    }
}

#[test]
fn validate_rejects_unknown_sector() {
    let out = run(&["validate", "--sector", "gluons"]);
    assert!(!out.status.success());
}

#[test]
fn scan_reports_best_point() {
    let out = run(&["scan", "--points", "20000", "--batch-size", "2500", "--seed", "5", "--threads", "2"]);
    let v = stdout_json(&out);
    assert_eq!(v["n_points"], 20000);
    assert_eq!(v["n_batches"], 8);
    let best = v["best"]["chi2"].as_f64().unwrap();
    assert!(best < 1.0, "best chi2 = {}", best);
    let within1 = v["within_1sigma"].as_u64().unwrap();
    let within2 = v["within_2sigma"].as_u64().unwrap();
    assert!(within1 > 0 && within1 <= within2);
}

#[test]
fn scan_rejects_zero_batch() {
    let out = run(&["scan", "--points", "10", "--batch-size", "0"]);
    assert!(!out.status.success());
}
