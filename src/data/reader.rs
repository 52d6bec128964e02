// ============================================================
// Layer 4 — Parallel Data Reader / Bucketizer
// ============================================================
// Reads three line-aligned token-id files (source-1, source-2,
// target) and puts every example into the first bucket it fits.
//
// File format: one example per line, whitespace-separated integer
// ids. Line n of each file belongs to the same example.
//
// Examples too long for the largest bucket are dropped silently;
// that is a filtering policy, not an error.

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::data::dataset::BucketedDataset;
use crate::domain::bucket::BucketTable;
use crate::domain::example::Example;

const PROGRESS_EVERY: usize = 100_000;

/// Read aligned id files from disk into per-bucket pools.
/// `max_size` of 0 means no limit on the number of lines.
pub fn read_data(
    source_path_1: &Path,
    source_path_2: &Path,
    target_path:   &Path,
    buckets:       &BucketTable,
    max_size:      usize,
) -> Result<BucketedDataset> {
    let open = |path: &Path| -> Result<BufReader<File>> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open data file '{}'", path.display()))?;
        Ok(BufReader::new(file))
    };

    read_streams(
        open(source_path_1)?,
        open(source_path_2)?,
        open(target_path)?,
        buckets,
        max_size,
    )
}

/// Bucketize from any three readers. Stops as soon as one stream
/// runs out or `max_size` lines were consumed.
pub fn read_streams<R1: BufRead, R2: BufRead, R3: BufRead>(
    source_1: R1,
    source_2: R2,
    target:   R3,
    buckets:  &BucketTable,
    max_size: usize,
) -> Result<BucketedDataset> {
    let mut dataset = BucketedDataset::new(buckets.len());
    let mut lines_1 = source_1.lines();
    let mut lines_2 = source_2.lines();
    let mut lines_t = target.lines();
    let mut counter = 0usize;
    let mut dropped = 0usize;

    while max_size == 0 || counter < max_size {
        let (Some(s1), Some(s2), Some(t)) = (lines_1.next(), lines_2.next(), lines_t.next())
        else {
            break;
        };
        counter += 1;
        if counter % PROGRESS_EVERY == 0 {
            tracing::info!("  reading data line {}", counter);
        }

        let example = Example::from_raw(
            &parse_ids(&s1?, counter)?,
            &parse_ids(&s2?, counter)?,
            &parse_ids(&t?, counter)?,
        );

        match buckets.assign(&example) {
            Some(bucket_id) => dataset.push(bucket_id, example),
            None            => dropped += 1,
        }
    }

    tracing::debug!(
        "Read {} lines: {} kept, {} dropped as too long",
        counter,
        dataset.total_size(),
        dropped,
    );
    Ok(dataset)
}

fn parse_ids(line: &str, line_no: usize) -> Result<Vec<u32>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<u32>()
                .with_context(|| format!("Invalid token id '{tok}' on line {line_no}"))
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bucket::Bucket;
    use crate::domain::example::EOS_ID;
    use std::io::Cursor;

    fn table() -> BucketTable {
        BucketTable::new(vec![Bucket::new(3, 3, 3), Bucket::new(6, 6, 6)]).unwrap()
    }

    #[test]
    fn test_examples_land_in_first_fitting_bucket() {
        let s1 = Cursor::new("4 5\n4 5 6 7\n4\n");
        let s2 = Cursor::new("6\n6\n6 6 6 6 6 6 6\n");
        let t  = Cursor::new("7\n7 8\n7\n");
        let data = read_streams(s1, s2, t, &table(), 0).unwrap();

        // line 1: lengths (3, 2, 2) with EOS → bucket 1 (3 is not < 3)
        // line 2: lengths (5, 2, 3)           → bucket 1
        // line 3: source-2 length 8           → dropped
        assert_eq!(data.bucket_sizes(), vec![0, 2]);
        assert_eq!(data.pool(1)[0].source_1, vec![4, 5, EOS_ID]);
    }

    #[test]
    fn test_stops_at_shortest_stream() {
        let s1 = Cursor::new("4\n4\n4\n");
        let s2 = Cursor::new("5\n5\n");
        let t  = Cursor::new("6\n6\n6\n");
        let data = read_streams(s1, s2, t, &table(), 0).unwrap();
        assert_eq!(data.total_size(), 2);
    }

    #[test]
    fn test_max_size_limits_lines() {
        let s1 = Cursor::new("4\n4\n4\n");
        let s2 = Cursor::new("5\n5\n5\n");
        let t  = Cursor::new("6\n6\n6\n");
        let data = read_streams(s1, s2, t, &table(), 2).unwrap();
        assert_eq!(data.total_size(), 2);
    }

    #[test]
    fn test_overlong_line_is_truncated_not_dropped() {
        let long: Vec<String> = (0..80).map(|i| (i + 4).to_string()).collect();
        let big = BucketTable::new(vec![Bucket::new(52, 52, 52)]).unwrap();
        let s1 = Cursor::new(format!("{}\n", long.join(" ")));
        let data = read_streams(s1, Cursor::new("5\n"), Cursor::new("6\n"), &big, 0).unwrap();
        assert_eq!(data.pool(0)[0].source_1.len(), 51);
    }

    #[test]
    fn test_bad_token_is_an_error() {
        let s1 = Cursor::new("4 x\n");
        let res = read_streams(s1, Cursor::new("5\n"), Cursor::new("6\n"), &table(), 0);
        assert!(res.is_err());
    }

    #[test]
    fn test_read_data_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a");
        let p2 = dir.path().join("b");
        let pt = dir.path().join("c");
        std::fs::write(&p1, "4\n").unwrap();
        std::fs::write(&p2, "5\n").unwrap();
        std::fs::write(&pt, "6\n").unwrap();
        let data = read_data(&p1, &p2, &pt, &table(), 0).unwrap();
        assert_eq!(data.bucket_sizes(), vec![1, 0]);

        let missing = read_data(&dir.path().join("nope"), &p2, &pt, &table(), 0);
        assert!(missing.is_err());
    }
}
