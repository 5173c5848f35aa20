//! End-to-end tests for the linking pipeline.

use entity_linker::config::LinkerConfig;
use entity_linker::embeddings::{write_npy, EmbeddingMatrix};
use entity_linker::export::OutputFormat;
use entity_linker::index::{CacheOutcome, CachePolicy};
use entity_linker::linker::DedupMode;
use entity_linker::{LinkInputs, Linker, LinkerError};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn write_csv_mapping(path: &Path, names: &[&str]) {
    let mut content = String::from("entity\n");
    for name in names {
        content.push_str(name);
        content.push('\n');
    }
    fs::write(path, content).unwrap();
}

fn write_matrix(path: &Path, rows: &[Vec<f32>]) {
    write_npy(path, &EmbeddingMatrix::from_rows(rows).unwrap()).unwrap();
}

fn five_rows() -> Vec<Vec<f32>> {
    vec![
        vec![1.0, 0.0],
        vec![0.9, 0.1],
        vec![-1.0, 0.0],
        vec![0.0, 1.0],
        vec![0.95, 0.05],
    ]
}

/// Temp dir holding the five-entity fixture.
fn five_entity_fixture() -> (TempDir, LinkInputs) {
    let dir = tempdir().unwrap();
    let mapping_path = dir.path().join("entities.csv");
    let embeddings_path = dir.path().join("embeddings.npy");
    write_csv_mapping(&mapping_path, &["A", "B", "C", "D", "E"]);
    write_matrix(&embeddings_path, &five_rows());
    let inputs = LinkInputs {
        mapping_path,
        embeddings_path,
        output_path: dir.path().join("similar_pairs.tsv"),
    };
    (dir, inputs)
}

fn config(dir: &Path, threshold: f32, k: usize, top_n: usize) -> LinkerConfig {
    let mut config = LinkerConfig { threshold, k, top_n, threads: 2, ..LinkerConfig::default() };
    config.cache.path = Some(dir.join("ann_index.bin"));
    config
}

#[test]
fn test_five_entity_scenario() {
    let (dir, inputs) = five_entity_fixture();
    let linker = Linker::new(config(dir.path(), 0.8, 4, 10)).unwrap();

    let report = linker.run(&inputs).unwrap();
    assert_eq!(report.entities, 5);
    assert_eq!(report.top_pairs, 3);
    assert_eq!(report.cache, CacheOutcome::Built);

    let output = fs::read_to_string(&inputs.output_path).unwrap();
    assert_eq!(output, "0.9986\tA\tE\n0.9983\tB\tE\n0.9939\tA\tB\n");
    for line in output.lines() {
        assert!(!line.contains('C') && !line.contains('D'), "unexpected pair: {}", line);
    }
}

#[test]
fn test_unsupported_mapping_fails_before_reading_matrix() {
    let dir = tempdir().unwrap();
    let mapping_path = dir.path().join("entities.txt");
    fs::write(&mapping_path, "entity\nA\n").unwrap();

    let linker = Linker::new(config(dir.path(), 0.5, 2, 5)).unwrap();
    let err = linker
        .run(&LinkInputs {
            mapping_path,
            // never created: reading it would be an I/O error instead
            embeddings_path: dir.path().join("missing.npy"),
            output_path: dir.path().join("out.tsv"),
        })
        .unwrap_err();

    assert!(matches!(err, LinkerError::UnsupportedFormat { ref extension, .. } if extension == "txt"));
    assert!(!dir.path().join("out.tsv").exists());
    assert!(!dir.path().join("ann_index.bin").exists());
}

#[test]
fn test_pickle_mapping_is_unsupported() {
    let dir = tempdir().unwrap();
    let linker = Linker::new(config(dir.path(), 0.5, 2, 5)).unwrap();
    let err = linker
        .load_inputs(&dir.path().join("entities.pickle"), &dir.path().join("e.npy"))
        .unwrap_err();
    assert_eq!(err.kind(), "unsupported_format");
}

#[test]
fn test_shape_mismatch_writes_nothing() {
    let (dir, inputs) = five_entity_fixture();
    write_csv_mapping(&inputs.mapping_path, &["A", "B", "C", "D"]);

    let err = Linker::new(config(dir.path(), 0.5, 2, 5)).unwrap().run(&inputs).unwrap_err();
    match err {
        LinkerError::ShapeMismatch { mapping_rows, matrix_rows, .. } => {
            assert_eq!(mapping_rows, 4);
            assert_eq!(matrix_rows, 5);
        }
        other => panic!("expected ShapeMismatch, got {}", other),
    }
    assert!(!inputs.output_path.exists());
}

#[test]
fn test_rerun_with_cache_is_byte_identical() {
    let (dir, inputs) = five_entity_fixture();
    let linker = Linker::new(config(dir.path(), 0.0, 4, 10)).unwrap();

    let first = linker.run(&inputs).unwrap();
    let first_bytes = fs::read(&inputs.output_path).unwrap();
    assert_eq!(first.cache, CacheOutcome::Built);

    let second = linker.run(&inputs).unwrap();
    let second_bytes = fs::read(&inputs.output_path).unwrap();
    assert_eq!(second.cache, CacheOutcome::Loaded);
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn test_stale_cache_rebuilt_or_rejected() {
    let (dir, inputs) = five_entity_fixture();
    Linker::new(config(dir.path(), 0.8, 4, 10)).unwrap().run(&inputs).unwrap();

    // same shape, different vectors
    let mut rows = five_rows();
    rows[3] = vec![0.99, 0.01];
    write_matrix(&inputs.embeddings_path, &rows);
    fs::remove_file(&inputs.output_path).unwrap();

    let mut strict = config(dir.path(), 0.8, 4, 10);
    strict.cache.policy = CachePolicy::Strict;
    let err = Linker::new(strict).unwrap().run(&inputs).unwrap_err();
    assert_eq!(err.kind(), "index_cache_mismatch");
    assert!(!inputs.output_path.exists());

    let report = Linker::new(config(dir.path(), 0.8, 4, 10)).unwrap().run(&inputs).unwrap();
    assert_eq!(report.cache, CacheOutcome::Rebuilt);
    let output = fs::read_to_string(&inputs.output_path).unwrap();
    assert!(output.lines().any(|l| l.ends_with("\tD\tE") || l.ends_with("\tA\tD")));
}

#[test]
fn test_all_pairs_stream_ignores_threshold() {
    let (dir, inputs) = five_entity_fixture();
    let all_path = dir.path().join("all_pairs.tsv");
    let mut cfg = config(dir.path(), 0.8, 4, 10);
    cfg.output.all_pairs_path = Some(all_path.clone());

    let report = Linker::new(cfg).unwrap().run(&inputs).unwrap();
    let all = fs::read_to_string(&all_path).unwrap();
    assert_eq!(report.all_pairs, Some(report.considered));
    assert_eq!(all.lines().count(), report.considered);
    // below-threshold pairs are present here but not in the top-N file
    assert!(all.lines().any(|l| l.starts_with('-') || l.starts_with("0.0") || l.starts_with("0.1")));
    assert_eq!(fs::read_to_string(&inputs.output_path).unwrap().lines().count(), 3);
}

#[test]
fn test_top_n_stream_can_be_disabled() {
    let (dir, inputs) = five_entity_fixture();
    let mut cfg = config(dir.path(), 0.8, 4, 10);
    cfg.output.write_top_n = false;
    cfg.output.all_pairs_path = Some(dir.path().join("all_pairs.tsv"));

    let report = Linker::new(cfg).unwrap().run(&inputs).unwrap();
    assert!(report.output_path.is_none());
    assert!(!inputs.output_path.exists());
    assert!(dir.path().join("all_pairs.tsv").exists());
}

#[test]
fn test_json_mapping_with_quoted_output() {
    let dir = tempdir().unwrap();
    let mapping_path = dir.path().join("entities.json");
    fs::write(&mapping_path, r#"{"x\ty": 0, "plain": 1, "far": 2}"#).unwrap();
    let embeddings_path = dir.path().join("embeddings.npy");
    write_matrix(&embeddings_path, &[vec![1.0, 0.0], vec![1.0, 0.1], vec![-1.0, 0.0]]);

    let mut cfg = config(dir.path(), 0.5, 3, 10);
    cfg.output.format = OutputFormat::QuotedTsv;
    cfg.dedup = DedupMode::Union;
    let output_path = dir.path().join("pairs.tsv");
    Linker::new(cfg)
        .unwrap()
        .run(&LinkInputs { mapping_path, embeddings_path, output_path: output_path.clone() })
        .unwrap();

    assert_eq!(fs::read_to_string(&output_path).unwrap(), "0.9950\t\"x\ty\"\tplain\n");
}

#[test]
fn test_missing_embeddings_is_io_error() {
    let dir = tempdir().unwrap();
    let mapping_path = dir.path().join("entities.csv");
    write_csv_mapping(&mapping_path, &["A"]);
    let err = Linker::new(config(dir.path(), 0.5, 2, 5))
        .unwrap()
        .run(&LinkInputs {
            mapping_path,
            embeddings_path: dir.path().join("nope.npy"),
            output_path: dir.path().join("out.tsv"),
        })
        .unwrap_err();
    assert_eq!(err.kind(), "io_error");
}

#[test]
fn test_failed_top_n_write_leaves_no_all_pairs_file() {
    let (dir, mut inputs) = five_entity_fixture();
    let all_path = dir.path().join("all.tsv");
    inputs.output_path = dir.path().join("no_such_dir").join("out.tsv");
    let mut cfg = config(dir.path(), 0.8, 4, 10);
    cfg.output.all_pairs_path = Some(all_path.clone());

    let err = Linker::new(cfg).unwrap().run(&inputs).unwrap_err();
    assert_eq!(err.kind(), "io_error");
    assert!(!all_path.exists());
    assert!(!dir.path().join("all.tsv.tmp").exists());
    assert!(!inputs.output_path.exists());
}

#[test]
fn test_empty_dataset_is_rejected_clearly() {
    let dir = tempdir().unwrap();
    let mapping_path = dir.path().join("entities.csv");
    write_csv_mapping(&mapping_path, &[]);
    let embeddings_path = dir.path().join("embeddings.npy");
    write_npy(&embeddings_path, &EmbeddingMatrix::new(0, 2, Vec::new()).unwrap()).unwrap();
    let output_path = dir.path().join("out.tsv");

    let err = Linker::new(config(dir.path(), 0.5, 2, 5))
        .unwrap()
        .run(&LinkInputs { mapping_path, embeddings_path, output_path: output_path.clone() })
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_mapping");
    assert!(err.to_string().contains("no entities"), "{}", err);
    assert!(!output_path.exists());
    assert!(!dir.path().join("ann_index.bin").exists());
}
