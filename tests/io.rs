//! Integration tests for sources, glob expansion and segment layout.

use anyhow::Result;
use chrono::{Local, TimeZone};
use ironhaul::io::glob::{expand_glob, iter_glob, pattern_in};
use ironhaul::io::parquet::{list_segments, read_batches, segment_name, table_files};
use ironhaul::*;
use std::fs::{create_dir_all, write};
use std::path::PathBuf;

#[test]
fn recursive_glob_skips_directories() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path();
    create_dir_all(base.join("a/b"))?;
    create_dir_all(base.join("c.json"))?;
    write(base.join("top.json"), "{}")?;
    write(base.join("a/mid.json"), "{}")?;
    write(base.join("a/b/deep.json"), "{}")?;
    write(base.join("a/b/other.txt"), "")?;

    let found = expand_glob(&pattern_in(base, "**/*.json"))?;
    let names: Vec<_> = found
        .iter()
        .map(|p| p.strip_prefix(base).map(PathBuf::from))
        .collect::<Result<_, _>>()?;
    assert_eq!(
        names,
        [
            PathBuf::from("a/b/deep.json"),
            PathBuf::from("a/mid.json"),
            PathBuf::from("top.json"),
        ]
    );

    let lazily: usize = iter_glob(&pattern_in(base, "**/*.json"))?.count();
    assert_eq!(lazily, 3);
    Ok(())
}

#[test]
fn pattern_in_escapes_the_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let odd = dir.path().join("runs [2024]");
    create_dir_all(&odd)?;
    write(odd.join("x.json"), "{}")?;

    assert_eq!(expand_glob(&pattern_in(&odd, "*.json"))?.len(), 1);
    Ok(())
}

#[test]
fn invalid_pattern_is_an_error() {
    assert!(iter_glob("[unclosed").is_err());
    assert!(Source::from("a/***/b").paths().is_err());
}

#[test]
fn explicit_paths_are_yielded_as_given() -> Result<()> {
    let source = Source::from_paths(["z.json", "a.json", "missing.json"]);
    let paths: Vec<_> = source.paths()?.collect();
    assert_eq!(
        paths,
        [
            PathBuf::from("z.json"),
            PathBuf::from("a.json"),
            PathBuf::from("missing.json")
        ]
    );
    // Each pass starts over.
    assert_eq!(source.paths()?.count(), 3);
    Ok(())
}

#[test]
fn segment_names_sort_by_build_then_worker() {
    let early = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let late = Local.with_ymd_and_hms(2024, 11, 2, 3, 4, 5).unwrap();
    let mut names = vec![
        segment_name(&late, 0),
        segment_name(&early, 12),
        segment_name(&early, 2),
    ];
    names.sort();
    assert_eq!(
        names,
        [
            "part-20240102030405-0002.parquet",
            "part-20240102030405-0012.parquet",
            "part-20241102030405-0000.parquet",
        ]
    );
}

#[test]
fn list_segments_ignores_temporary_and_foreign_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path();
    write(base.join("part-20240101000000-0001.parquet"), "")?;
    write(base.join("part-20240101000000-0000.parquet"), "")?;
    write(base.join(".part-abc.tmp"), "")?;
    write(base.join("notes.txt"), "")?;

    let segments = list_segments(base)?;
    assert_eq!(
        segments,
        [
            base.join("part-20240101000000-0000.parquet"),
            base.join("part-20240101000000-0001.parquet"),
        ]
    );
    assert!(list_segments(base.join("missing"))?.is_empty());
    Ok(())
}

#[test]
fn reads_a_single_file_or_a_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let table_dir = dir.path().join("t");
    create_dir_all(&table_dir)?;
    let file = table_dir.join("part-20240101000000-0000.parquet");

    let mut writer = BufferedTableWriter::create(&file, WriterOptions::default())?;
    for i in 0..5 {
        writer.write(Record::new().with("i", i).with("s", format!("s{i}")))?;
    }
    writer.close()?;

    assert_eq!(table_files(&file)?, [file.clone()]);
    assert_eq!(read_table(&file)?.num_rows(), 5);
    assert_eq!(read_table(&table_dir)?.num_rows(), 5);

    let projected = read_batches(&file, Some(&["s"][..]))?;
    assert_eq!(projected[0].num_columns(), 1);
    assert_eq!(projected[0].schema().field(0).name(), "s");
    assert!(read_batches(&file, Some(&["nope"][..])).is_err());

    let empty = read_table(dir.path().join("absent"))?;
    assert_eq!(empty.num_rows(), 0);
    Ok(())
}
