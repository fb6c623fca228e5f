use super::*;

use crate::bucket::{self, StrandPair};
use crate::internal;
use crate::Strand;

use rand::rngs::StdRng;
use rand::SeedableRng;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::thread;

//-----------------------------------------------------------------------------

fn create_store(name_part: &str, memory_budget: u64) -> (BucketStore, PathBuf) {
    let output_dir = internal::create_temp_dir(name_part);
    let params = StoreParams {
        memory_budget,
        ..StoreParams::new(&output_dir, "test")
    };
    (BucketStore::new(params), output_dir)
}

fn line_len(record: &AlignmentPair) -> u64 {
    let mut buffer = Vec::new();
    record.append_bedpe(&mut buffer);
    buffer.len() as u64
}

// Appends the records in canonical orientation and returns the expected read order for each bucket.
fn append_all(store: &BucketStore, records: &[AlignmentPair]) -> HashMap<PathBuf, Vec<String>> {
    let mut expected: HashMap<PathBuf, Vec<String>> = HashMap::new();
    for record in records {
        let mut record = record.clone();
        bucket::canonical_order(&mut record);
        let key = bucket::resolve(&record, false);
        let result = store.append(&key, &record);
        assert!(result.is_ok(), "Failed to append {}: {}", record.read, result.unwrap_err());
        expected.entry(store.params().bucket_file(&key)).or_default().push(record.read.clone());
    }
    expected
}

fn check_files(files: &[PathBuf], expected: &HashMap<PathBuf, Vec<String>>) {
    assert_eq!(files.len(), expected.len(), "Wrong number of bucket files");
    for file in files {
        let reads: Vec<String> = internal::read_lines(file).iter().map(|line| internal::routed_read(line)).collect();
        let truth = expected.get(file);
        assert!(truth.is_some(), "Unexpected bucket file {}", file.display());
        assert_eq!(&reads, truth.unwrap(), "Wrong records in {}", file.display());
    }
}

//-----------------------------------------------------------------------------

#[test]
fn buckets_are_created_lazily() {
    let (store, output_dir) = create_store("store-lazy", StoreParams::DEFAULT_MEMORY_BUDGET);
    assert_eq!(store.buckets(), 0);

    let a = internal::pair("s1", "r1", internal::end("chr1", 100, Strand::Forward), internal::end("chr2", 500, Strand::Reverse));
    let b = internal::pair("s1", "r2", internal::end("chr1", 900, Strand::Forward), internal::end("chr2", 100, Strand::Reverse));
    let c = internal::pair("s1", "r3", internal::end("chr1", 100, Strand::Forward), internal::end("chr1", 5000, Strand::Forward));
    let expected = append_all(&store, &[a, b, c]);
    assert_eq!(store.buckets(), 2);
    assert!(internal::list_files(&output_dir).is_empty(), "Records were written before the budget was exceeded");

    let files = store.finalize().unwrap();
    let names: Vec<String> = files.iter().map(|f| f.file_name().unwrap().to_string_lossy().to_string()).collect();
    assert_eq!(names, vec!["test.chr1.chr1.pp.bedpe", "test.chr1.chr2.pm.bedpe"]);
    check_files(&files, &expected);
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn conservation_under_small_budget() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let records = internal::random_pairs(&mut rng, "s1", "read", 2000);
    let (store, output_dir) = create_store("store-conservation", 4096);

    let expected = append_all(&store, &records);
    let statistics = store.statistics();
    assert!(statistics.flush_cycles > 0, "No flush cycles with a small budget");
    assert!(statistics.records_written > 0, "No records written before finalization");

    let files = store.finalize().unwrap();
    check_files(&files, &expected);
    let total: usize = files.iter().map(|file| internal::read_lines(file).len()).sum();
    assert_eq!(total, records.len(), "Records were lost or duplicated");
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn memory_bound() {
    let mut rng = StdRng::seed_from_u64(42);
    let records = internal::random_pairs(&mut rng, "sample", "r", 1500);
    let max_line = records.iter().map(line_len).max().unwrap();
    let budget = 2000;
    let (store, output_dir) = create_store("store-bound", budget);

    for record in records.iter() {
        let key = bucket::resolve(record, false);
        store.append(&key, record).unwrap();
        assert!(store.buffered_bytes() <= budget, "Buffered bytes exceed the budget after a flush cycle");
    }
    let statistics = store.statistics();
    assert!(
        statistics.peak_buffered_bytes <= budget + max_line,
        "Peak {} exceeds budget {} by more than one record", statistics.peak_buffered_bytes, budget
    );

    let _ = store.finalize().unwrap();
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn largest_bucket_is_flushed_first() {
    let small = internal::pair("s1", "small", internal::end("chr1", 100, Strand::Forward), internal::end("chr2", 100, Strand::Forward));
    let large = internal::pair("s1", "large", internal::end("chr1", 100, Strand::Reverse), internal::end("chr2", 100, Strand::Reverse));
    let unit = line_len(&small);
    assert_eq!(unit, line_len(&large));

    // Budget fits 4 records; the fifth append triggers a flush down to 2 records.
    let (store, output_dir) = create_store("store-largest", 4 * unit);
    let small_key = bucket::resolve(&small, false);
    let large_key = bucket::resolve(&large, false);
    store.append(&small_key, &small).unwrap();
    for _ in 0..3 {
        store.append(&large_key, &large).unwrap();
    }
    assert_eq!(store.statistics().flush_cycles, 0);
    store.append(&large_key, &large).unwrap();

    let statistics = store.statistics();
    assert_eq!(statistics.flush_cycles, 1);
    assert_eq!(statistics.batches_written, 1, "Only the largest bucket should be flushed");
    assert_eq!(statistics.records_written, 4);
    assert_eq!(store.buffered_bytes(), unit);
    assert!(!store.params().bucket_file(&small_key).exists());
    assert_eq!(internal::read_lines(&store.params().bucket_file(&large_key)).len(), 4);

    let files = store.finalize().unwrap();
    assert_eq!(files.len(), 2);
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn flush_is_visible_before_finalization() {
    let (store, output_dir) = create_store("store-early-flush", 200);
    let record = internal::pair("s1", "read", internal::end("chr1", 100, Strand::Forward), internal::end("chr1", 9000, Strand::Reverse));
    let key = bucket::resolve(&record, false);
    let path = store.params().bucket_file(&key);

    let mut appended = 0;
    while !path.exists() {
        store.append(&key, &record).unwrap();
        appended += 1;
        assert!(appended < 10, "No flush after {} records", appended);
    }
    let lines = internal::read_lines(&path);
    assert!(!lines.is_empty() && lines.len() <= appended);
    for line in lines.iter() {
        assert_eq!(internal::routed_read(line), "read");
    }

    store.append(&key, &record).unwrap();
    let files = store.finalize().unwrap();
    assert_eq!(files, vec![path.clone()]);
    assert_eq!(internal::read_lines(&path).len(), appended + 1);
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn stale_files_are_truncated() {
    let (store, output_dir) = create_store("store-stale", StoreParams::DEFAULT_MEMORY_BUDGET);
    let record = internal::pair("s1", "fresh", internal::end("chr1", 100, Strand::Forward), internal::end("chr2", 100, Strand::Forward));
    let key = bucket::resolve(&record, false);
    let path = store.params().bucket_file(&key);
    fs::write(&path, "stale line\n").unwrap();

    store.append(&key, &record).unwrap();
    let files = store.finalize().unwrap();
    let lines = internal::read_lines(&files[0]);
    assert_eq!(lines.len(), 1);
    assert_eq!(internal::routed_read(&lines[0]), "fresh");
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn manifest_matches_files_on_disk() {
    let mut rng = StdRng::seed_from_u64(7);
    let records = internal::random_pairs(&mut rng, "s1", "r", 500);
    let (store, output_dir) = create_store("store-files", 1024);
    let _ = append_all(&store, &records);
    let files = store.finalize().unwrap();

    let on_disk = internal::list_files(&output_dir);
    assert_eq!(files.iter().cloned().collect::<HashSet<_>>(), on_disk.iter().cloned().collect::<HashSet<_>>());
    for file in files.iter() {
        assert!(fs::metadata(file).unwrap().len() > 0, "Empty bucket file {}", file.display());
    }
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn concurrent_appends() {
    let threads = 4;
    let per_thread = 1000;
    let (store, output_dir) = create_store("store-concurrent", 8192);

    let inputs: Vec<Vec<AlignmentPair>> = (0..threads).map(|i| {
        let mut rng = StdRng::seed_from_u64(100 + i as u64);
        internal::random_pairs(&mut rng, "s1", &format!("t{}-", i), per_thread)
    }).collect();

    thread::scope(|scope| {
        for records in inputs.iter() {
            let store = &store;
            scope.spawn(move || {
                for record in records {
                    let key = bucket::resolve(record, false);
                    store.append(&key, record).unwrap();
                }
            });
        }
    });
    assert_eq!(store.buffered_bytes() + store.statistics().bytes_written, inputs.iter().flatten().map(line_len).sum::<u64>());
    let files = store.finalize().unwrap();

    // Every record appears once, and the records of each thread keep their order within a bucket.
    let mut seen: HashSet<String> = HashSet::new();
    for file in files.iter() {
        let mut last_index: HashMap<String, usize> = HashMap::new();
        for line in internal::read_lines(file) {
            let read = internal::routed_read(&line);
            let (prefix, index) = read.split_once('-').unwrap();
            let index: usize = index.parse().unwrap();
            if let Some(previous) = last_index.insert(prefix.to_string(), index) {
                assert!(previous < index, "Records of {} out of order in {}", prefix, file.display());
            }
            assert!(seen.insert(read.clone()), "Duplicate record {}", read);
        }
    }
    assert_eq!(seen.len(), threads * per_thread);
    internal::remove_temp_dir(&output_dir);
}

#[test]
fn write_failure_is_reported() {
    let output_dir = missing_dir();
    let params = StoreParams { memory_budget: 0, ..StoreParams::new(&output_dir, "test") };
    let store = BucketStore::new(params);
    let record = internal::pair("s1", "r", internal::end("chr1", 100, Strand::Forward), internal::end("chr2", 100, Strand::Forward));
    let key = bucket::resolve(&record, false);
    let result = store.append(&key, &record);
    assert!(matches!(result, Err(RouterError::Io { .. })), "Expected an I/O error, got {:?}", result);

    // The failed batch was swapped out, but the bucket file is still incomplete.
    assert_eq!(store.buffered_bytes(), 0);
    let result = store.finalize();
    assert!(matches!(result, Err(RouterError::InvalidState(_))), "A failed bucket was finalized: {:?}", result);
}

fn missing_dir() -> PathBuf {
    let parent = internal::create_temp_dir("store-missing");
    internal::remove_temp_dir(&parent);
    parent.join("does-not-exist")
}

#[test]
fn lumped_buckets() {
    let (store, output_dir) = create_store("store-lumped", StoreParams::DEFAULT_MEMORY_BUDGET);
    let plus_minus = internal::pair("s1", "pm", internal::end("chr1", 100, Strand::Forward), internal::end("chr2", 100, Strand::Reverse));
    let minus_plus = internal::pair("s1", "mp", internal::end("chr1", 100, Strand::Reverse), internal::end("chr2", 100, Strand::Forward));
    for record in [&plus_minus, &minus_plus] {
        let key = bucket::resolve(record, true);
        assert_eq!(key.strands, StrandPair::Mixed);
        store.append(&key, record).unwrap();
    }
    let files = store.finalize().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(internal::read_lines(&files[0]).len(), 2);
    internal::remove_temp_dir(&output_dir);
}

//-----------------------------------------------------------------------------
