//! Dataset layout, lookup, and subset selection on a temporary tree.

use std::fs;
use std::path::Path;

use kbench_source::{
    code_hash, level_dir, list_problems, subset, ProblemSource, SourceError,
};

fn write_problem(dir: &Path, file: &str, body: &str) {
    fs::write(dir.join(file), body).unwrap();
}

fn dataset(names: &[&str]) -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let level = level_dir(root.path(), 1);
    fs::create_dir_all(&level).unwrap();
    for name in names {
        write_problem(&level, name, &format!("# {name}\nforward(x):\n    return x\n"));
    }
    write_problem(&level, "README.md", "not a problem");
    root
}

#[test]
fn problems_sorted_by_numeric_prefix() {
    let root = dataset(&["10_Ten.kbs", "2_Two.kbs", "1_One.kbs"]);
    let problems = list_problems(&level_dir(root.path(), 1)).unwrap();
    let ids: Vec<u32> = problems.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 10]);
    assert_eq!(problems[2].name, "Ten");
}

#[test]
fn fetch_by_level_and_id() {
    let root = dataset(&["1_Add_one.kbs", "2_Relu.kbs"]);
    let problem = ProblemSource::Dataset {
        root: root.path().to_path_buf(),
        level: 1,
        problem_id: 2,
    }
    .fetch()
    .unwrap();
    assert_eq!(problem.id, Some(2));
    assert_eq!(problem.name, "Relu");
    assert!(problem.source.contains("forward(x):"));
}

#[test]
fn fetch_detects_id_mismatch() {
    let root = dataset(&["1_One.kbs", "3_Three.kbs"]);
    let err = ProblemSource::Dataset {
        root: root.path().to_path_buf(),
        level: 1,
        problem_id: 2,
    }
    .fetch()
    .unwrap_err();
    assert!(matches!(
        err,
        SourceError::IdMismatch {
            requested: 2,
            found: 3,
            ..
        }
    ));
}

#[test]
fn fetch_out_of_range() {
    let root = dataset(&["1_One.kbs"]);
    for problem_id in [0, 5] {
        let err = ProblemSource::Dataset {
            root: root.path().to_path_buf(),
            level: 1,
            problem_id,
        }
        .fetch()
        .unwrap_err();
        assert!(matches!(err, SourceError::ProblemNotFound { .. }));
    }
}

#[test]
fn missing_level_is_not_found() {
    let root = dataset(&[]);
    let err = ProblemSource::Dataset {
        root: root.path().to_path_buf(),
        level: 9,
        problem_id: 1,
    }
    .fetch()
    .unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)));
}

#[test]
fn local_source_uses_file_name() {
    let root = dataset(&["4_Softplus.kbs"]);
    let path = level_dir(root.path(), 1).join("4_Softplus.kbs");
    let problem = ProblemSource::Local { path: path.clone() }.fetch().unwrap();
    assert_eq!(problem.id, Some(4));
    assert_eq!(problem.name, "Softplus");

    let plain = root.path().join("kernel.kbs");
    fs::write(&plain, "forward(x):\n    return x\n").unwrap();
    let problem = ProblemSource::Local { path: plain }.fetch().unwrap();
    assert_eq!(problem.id, None);
    assert_eq!(problem.name, "kernel");
}

#[test]
fn subset_is_deterministic_and_bounded() {
    let names: Vec<String> = (1..=12).map(|i| format!("{i}_P{i}.kbs")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let root = dataset(&refs);
    let dir = level_dir(root.path(), 1);

    let a = subset(&dir, 4, 42).unwrap();
    let b = subset(&dir, 4, 42).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 4);
    assert!(a.windows(2).all(|w| w[0].id < w[1].id));

    assert_eq!(subset(&dir, 100, 7).unwrap().len(), 12);
}

#[test]
fn problem_hash_ignores_comments() {
    let root = dataset(&["1_A.kbs", "2_B.kbs"]);
    let dir = level_dir(root.path(), 1);
    let a = fs::read_to_string(dir.join("1_A.kbs")).unwrap();
    let b = fs::read_to_string(dir.join("2_B.kbs")).unwrap();
    assert_ne!(a, b);
    assert_eq!(code_hash(&a), code_hash(&b));
}
