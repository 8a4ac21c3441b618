//! Integration tests for the in-memory and Parquet table builders.

use anyhow::Result;
use chrono::{Local, TimeDelta};
use ironhaul::index::{MTIME_COLUMN, PATH_COLUMN};
use ironhaul::io::glob::{expand_glob, pattern_in};
use ironhaul::io::parquet::{list_segments, segment_name};
use ironhaul::partition::worker_for_path;
use ironhaul::testing::{bump_mtime, write_jsonl_batch};
use ironhaul::*;
use std::collections::BTreeSet;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

const ROWS: usize = 32;

fn seed_files(dir: &Path, n: u64) -> Result<String> {
    ironhaul::logging::init_test_logging();
    for seed in 0..n {
        write_jsonl_batch(dir, ROWS, seed)?;
    }
    Ok(pattern_in(dir, "*.json"))
}

fn column_names(table: &arrow::record_batch::RecordBatch) -> Vec<String> {
    table.schema().fields().iter().map(|f| f.name().clone()).collect()
}

// Segment names carry a one-second timestamp; builds into the same table must
// start in different seconds.
fn next_second() {
    sleep(Duration::from_millis(1100));
}

#[test]
fn build_table_collects_every_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for seed in 0..64 {
        write_jsonl_batch(dir.path(), 256, seed)?;
    }
    let pattern = pattern_in(dir.path(), "*.json");

    let table = build_table(pattern.as_str(), JsonlExtractor::new(), Some(0))?;
    assert_eq!(table.num_rows(), 64 * 256);
    assert_eq!(
        column_names(&table),
        [PATH_COLUMN, MTIME_COLUMN, "a", "b", "c", "d"]
    );
    Ok(())
}

#[test]
fn build_table_from_explicit_paths() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = vec![
        write_jsonl_batch(dir.path(), 3, 1)?,
        write_jsonl_batch(dir.path(), 5, 2)?,
    ];
    let table = build_table(paths, JsonlExtractor::without_file_meta(), Some(0))?;
    assert_eq!(table.num_rows(), 8);
    assert_eq!(column_names(&table), ["a", "b", "c", "d"]);
    Ok(())
}

#[test]
fn build_table_respects_max_failures() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 4)?;
    std::fs::write(dir.path().join("broken-1.json"), "{not json\n")?;
    std::fs::write(dir.path().join("broken-2.json"), "[1, 2]\n")?;

    assert!(build_table(pattern.as_str(), JsonlExtractor::new(), Some(0)).is_err());
    assert!(build_table(pattern.as_str(), JsonlExtractor::new(), Some(1)).is_err());

    let table = build_table(pattern.as_str(), JsonlExtractor::new(), Some(2))?;
    assert_eq!(table.num_rows(), 4 * ROWS);
    let table = build_table(pattern.as_str(), JsonlExtractor::new(), None)?;
    assert_eq!(table.num_rows(), 4 * ROWS);
    Ok(())
}

#[test]
fn build_parquet_writes_one_segment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 8)?;
    let dest = dir.path().join("table.pqds");

    let report = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &BuildOptions::default())?;
    assert!(report.is_complete());
    assert_eq!(report.total_records(), 8 * ROWS as u64);
    assert_eq!(report.workers.len(), 1);
    assert_eq!(report.workers[0].counts.files, 8);

    let segments = list_segments(&dest)?;
    assert_eq!(segments.len(), 1);
    assert_eq!(report.segments().collect::<Vec<_>>(), [segments[0].as_path()]);
    let name = segments[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("part-") && name.ends_with("-0000.parquet"), "{name}");

    let table = read_table(&dest)?;
    assert_eq!(table.num_rows(), 8 * ROWS);
    assert_eq!(
        column_names(&table),
        [PATH_COLUMN, MTIME_COLUMN, "a", "b", "c", "d"]
    );

    // No temporary files are left behind.
    let leftovers: Vec<_> = std::fs::read_dir(&dest)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn existing_destination_requires_overwrite() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 2)?;
    let dest = dir.path().join("table.pqds");

    build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &BuildOptions::default())?;
    let first = list_segments(&dest)?;

    let err = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::DestinationExists(_))
    ));
    assert_eq!(list_segments(&dest)?, first);

    next_second();
    let options = BuildOptions::default().overwrite(true);
    build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
    let second = list_segments(&dest)?;
    assert_eq!(second.len(), 1);
    assert_ne!(second, first);
    assert_eq!(read_table(&dest)?.num_rows(), 2 * ROWS);
    Ok(())
}

#[test]
fn destination_must_be_a_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 1)?;
    let dest = dir.path().join("table.pqds");
    std::fs::write(&dest, "not a table")?;

    let options = BuildOptions::default().overwrite(true);
    let err = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::NotADirectory(_))
    ));
    Ok(())
}

#[test]
fn worker_id_option_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 1)?;
    let dest = dir.path().join("table.pqds");

    let cases = [
        BuildOptions::default().worker_id(0),
        BuildOptions::default().worker_id(0).workers(0),
        BuildOptions::default().worker_id(0).workers(2).overwrite(true),
        BuildOptions::default().worker_id(2).workers(2),
    ];
    for options in &cases {
        let err = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, options).unwrap_err();
        assert!(err.downcast_ref::<BuildError>().is_some(), "{options:?}: {err:#}");
    }
    assert!(matches!(
        build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &cases[2])
            .unwrap_err()
            .downcast_ref::<BuildError>(),
        Some(BuildError::WorkerIdWithOverwrite)
    ));
    assert!(matches!(
        build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &cases[3])
            .unwrap_err()
            .downcast_ref::<BuildError>(),
        Some(BuildError::WorkerIdOutOfRange { worker_id: 2, workers: 2 })
    ));
    // Nothing was created.
    assert!(!dest.exists());
    Ok(())
}

#[test]
fn parallel_build_writes_one_segment_per_nonempty_worker() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 16)?;
    let dest = dir.path().join("table.pqds");

    let options = BuildOptions::default().workers(2);
    let report = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
    assert!(report.is_complete());
    assert_eq!(report.workers.len(), 2);
    assert_eq!(report.workers[0].worker_id, 0);
    assert_eq!(report.workers[1].worker_id, 1);

    let owners: BTreeSet<_> = expand_glob(&pattern)?
        .iter()
        .map(|p| worker_for_path(p, 2))
        .collect();
    assert_eq!(list_segments(&dest)?.len(), owners.len());
    assert_eq!(read_table(&dest)?.num_rows(), 16 * ROWS);

    let files: u64 = report.workers.iter().map(|w| w.counts.files).sum();
    assert_eq!(files, 16);
    Ok(())
}

#[test]
fn separately_run_workers_cover_the_source_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 12)?;
    let dest = dir.path().join("table.pqds");

    for worker_id in 0..3 {
        let options = BuildOptions::default().workers(3).worker_id(worker_id);
        let report = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
        assert_eq!(report.workers[0].worker_id, worker_id);
    }

    let table = read_table(&dest)?;
    assert_eq!(table.num_rows(), 12 * ROWS);
    let index = FileModifiedIndex::from_parquet(&dest)?;
    assert_eq!(index.len(), 12);
    Ok(())
}

#[test]
fn failed_worker_is_reported_and_siblings_finish() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 10)?;
    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{oops\n")?;
    let dest = dir.path().join("table.pqds");

    let options = BuildOptions::default().workers(2).max_failures(Some(0));
    let report = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    let failed = worker_for_path(&broken, 2);
    assert_eq!(report.failures[0].worker_id, failed);
    assert_eq!(report.workers.len(), 1);
    assert_eq!(report.workers[0].worker_id, 1 - failed);
    Ok(())
}

#[test]
fn incremental_build_only_extracts_new_and_changed_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 6)?;
    let dest = dir.path().join("table.pqds");
    let options = BuildOptions::default().incremental(true);

    let first = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
    assert_eq!(first.total_records(), 6 * ROWS as u64);

    // Nothing changed: no new segment.
    next_second();
    let unchanged = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
    assert_eq!(unchanged.workers[0].counts.files, 0);
    assert_eq!(unchanged.segments().count(), 0);
    assert_eq!(list_segments(&dest)?.len(), 1);

    // One rewritten file and one new file.
    let changed = write_jsonl_batch(dir.path(), ROWS, 2)?;
    bump_mtime(&changed, 5)?;
    write_jsonl_batch(dir.path(), ROWS, 100)?;

    next_second();
    let second = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
    assert_eq!(second.workers[0].counts.files, 2);
    assert_eq!(second.total_records(), 2 * ROWS as u64);
    assert_eq!(list_segments(&dest)?.len(), 2);

    // The changed file appears twice: once per extraction.
    let table = read_table(&dest)?;
    assert_eq!(table.num_rows(), (6 + 2) * ROWS);
    Ok(())
}

#[test]
fn incremental_build_needs_index_columns() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 2)?;
    let dest = dir.path().join("table.pqds");

    build_parquet(
        pattern.as_str(),
        JsonlExtractor::without_file_meta(),
        &dest,
        &BuildOptions::default(),
    )?;

    next_second();
    let options = BuildOptions::default().incremental(true);
    let err = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingIndexColumns { .. })
    ));
    Ok(())
}

#[test]
fn closure_extractors_work_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 3)?;
    let dest = dir.path().join("sizes.pqds");

    let sizes = |path: &Path| -> Result<Vec<Record>> {
        let len = std::fs::metadata(path)?.len();
        Ok(vec![Record::new().with("bytes", len)])
    };
    let report = build_parquet(
        pattern.as_str(),
        with_file_meta(sizes),
        &dest,
        &BuildOptions::default(),
    )?;
    assert_eq!(report.total_records(), 3);

    let table = read_table(&dest)?;
    assert_eq!(column_names(&table), [PATH_COLUMN, MTIME_COLUMN, "bytes"]);
    Ok(())
}

#[test]
fn build_options_load_from_json() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("build.json");
    std::fs::write(
        &path,
        r#"{"incremental": true, "workers": 4, "writer": {"batch_size": 10, "buffer_size": "1 MiB"}}"#,
    )?;

    let options = BuildOptions::from_json_file(&path)?;
    assert!(options.incremental);
    assert!(!options.overwrite);
    assert_eq!(options.workers, Some(4));
    assert_eq!(options.worker_id, None);
    assert_eq!(options.max_failures, Some(0));
    assert_eq!(options.writer.batch_size, 10);
    assert_eq!(options.writer.buffer_size.to_bytes()?, 1 << 20);

    std::fs::write(&path, r#"{"max_failures": null}"#)?;
    assert_eq!(BuildOptions::from_json_file(&path)?.max_failures, None);
    Ok(())
}

#[test]
fn worker_counts_resolve() {
    use ironhaul::builders::resolve_workers;

    assert_eq!(resolve_workers(None), 1);
    assert_eq!(resolve_workers(Some(3)), 3);
    assert_eq!(resolve_workers(Some(0)), num_cpus::get());
    assert_eq!(resolve_workers(Some(-2)), num_cpus::get());
}

#[test]
fn failing_first_file_aborts_with_nothing_committed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 3)?;
    // Sorts before the batch files.
    std::fs::write(dir.path().join("aaa-broken.json"), "{oops\n")?;
    let dest = dir.path().join("table.pqds");

    let err = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &BuildOptions::default())
        .unwrap_err();
    assert!(format!("{err:#}").contains("aaa-broken.json"));
    assert!(list_segments(&dest)?.is_empty());
    Ok(())
}

#[test]
fn failures_within_budget_still_commit_successes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 3)?;
    std::fs::write(dir.path().join("aaa-broken.json"), "{oops\n")?;
    let dest = dir.path().join("table.pqds");

    let options = BuildOptions::default().max_failures(Some(1));
    let report = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
    assert_eq!(report.workers[0].counts.failures, 1);
    assert_eq!(report.workers[0].counts.files, 4);
    assert_eq!(read_table(&dest)?.num_rows(), 3 * ROWS);
    Ok(())
}

#[test]
fn incremental_workers_ignore_each_others_new_segments() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 6)?;
    let dest = dir.path().join("table.pqds");

    build_parquet(
        pattern.as_str(),
        JsonlExtractor::new(),
        &dest,
        &BuildOptions::default().workers(2),
    )?;
    for seed in 10..14 {
        write_jsonl_batch(dir.path(), ROWS, seed)?;
    }

    // Worker 1 indexes the table after worker 0 has already added to it.
    next_second();
    for worker_id in 0..2 {
        let options = BuildOptions::default()
            .incremental(true)
            .workers(2)
            .worker_id(worker_id);
        build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options)?;
    }

    assert_eq!(read_table(&dest)?.num_rows(), 10 * ROWS);
    assert_eq!(FileModifiedIndex::from_parquet(&dest)?.len(), 10);
    Ok(())
}

#[test]
fn type_error_after_flushes_keeps_flushed_row_groups() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("table.pqds");
    let extract = |p: &Path| -> Result<Vec<Record>> {
        Ok(if p.ends_with("a.txt") {
            (0..4).map(|i| Record::new().with("x", i)).collect()
        } else {
            vec![Record::new().with("x", 1.5), Record::new().with("x", 2.5)]
        })
    };
    let options = BuildOptions::default().writer(WriterOptions {
        batch_size: 2,
        buffer_size: 1_u64.into(),
        ..WriterOptions::default()
    });

    let err = build_parquet(Source::from_paths(["a.txt", "b.txt"]), extract, &dest, &options)
        .unwrap_err();
    assert!(format!("{err:#}").contains("b.txt"), "{err:#}");

    // Both row groups from a.txt were committed with a readable footer.
    assert_eq!(list_segments(&dest)?.len(), 1);
    assert_eq!(read_table(&dest)?.num_rows(), 4);
    Ok(())
}

#[test]
fn taken_segment_name_is_refused_before_extraction() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pattern = seed_files(dir.path(), 1)?;
    let dest = dir.path().join("table.pqds");
    std::fs::create_dir_all(&dest)?;

    // Claim the names for the build's start second, whenever it falls.
    let now = Local::now();
    let taken: Vec<_> = (0..3)
        .map(|ahead| dest.join(segment_name(&(now + TimeDelta::seconds(ahead)), 0)))
        .collect();
    for path in &taken {
        std::fs::write(path, "taken")?;
    }

    let options = BuildOptions::default().workers(1).worker_id(0);
    let err = build_parquet(pattern.as_str(), JsonlExtractor::new(), &dest, &options).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::SegmentExists(_))
    ));
    for path in &taken {
        assert_eq!(std::fs::read_to_string(path)?, "taken");
    }
    Ok(())
}

#[test]
fn segment_created_during_extraction_is_not_clobbered() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("table.pqds");

    let squatted = dest.clone();
    let extract = move |_: &Path| -> Result<Vec<Record>> {
        let now = Local::now();
        for back in 0..3 {
            let name = segment_name(&(now - TimeDelta::seconds(back)), 0);
            std::fs::write(squatted.join(name), "taken")?;
        }
        Ok(vec![Record::new().with("x", 1)])
    };

    let err = build_parquet(
        Source::from_paths(["only.txt"]),
        extract,
        &dest,
        &BuildOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::SegmentExists(_))
    ));

    for entry in std::fs::read_dir(&dest)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        assert!(!name.starts_with('.'), "temporary file left behind: {name}");
        assert_eq!(std::fs::read_to_string(entry.path())?, "taken");
    }
    Ok(())
}
