use crate::config::{SortConfig, TempDirSpec};
use crate::error::SortError;
use crate::sort::merge::{MergeEngine, MergeStep};
use crate::sort::presort::Presorter;
use crate::sort::{SortManager, SorterState};
use crate::stream::{Distribution, StreamArray, StreamStatus};
use crate::tuple::{AttrType, OrderSpec, RecordComparator, Row, TupleType, Value};

fn small_config(tmp: &tempfile::TempDir, files: usize) -> SortConfig {
    let mut config = SortConfig::default();
    config.block_size = 64;
    config.sort_memory_kb = 1;
    config.max_files_per_sort = files;
    config.max_files_total = 16;
    config.temp_directories = vec![TempDirSpec {
        path: tmp.path().to_path_buf(),
        quota_blocks: 100_000,
    }];
    // Small step budget so multi-step merges are exercised.
    config.merge_step_rows = 128;
    config
}

fn manager(tmp: &tempfile::TempDir, files: usize) -> SortManager {
    SortManager::new(small_config(tmp, files), 64).unwrap()
}

fn int_schema() -> TupleType {
    TupleType::new(vec![AttrType::Int])
}

fn int_row(v: i64) -> Row {
    Row::new(vec![Value::Int(v)])
}

fn int_of(row: &Row) -> i64 {
    match row.value(0) {
        Value::Int(v) => *v,
        other => panic!("expected Int, got {:?}", other),
    }
}

fn sort_ints(mgr: &SortManager, input: &[i64]) -> Vec<i64> {
    let mut sorter = mgr
        .create_sort(int_schema(), vec![OrderSpec::asc(0)])
        .unwrap();
    for &v in input {
        sorter.add_tuple(&int_row(v)).unwrap();
    }
    while !sorter.run_merge_step().unwrap() {}
    assert_eq!(sorter.state(), SorterState::Cursor);
    let mut out = Vec::new();
    while let Some(row) = sorter.fetch_next().unwrap() {
        out.push(int_of(&row));
    }
    out
}

fn scrambled(n: i64) -> Vec<i64> {
    (0..n).map(|i| (i * 1103 + 251) % n).collect()
}

#[test]
fn presorter_spills_sorted_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let pool = mgr.pool().clone();
    assert!(pool.reserve(8));
    let mut array = StreamArray::new(2, mgr.temp(), &pool).unwrap();
    let cmp = RecordComparator::new(vec![OrderSpec::asc(0)]);
    let mut pre = Presorter::new(cmp.clone(), &pool, 2).unwrap();

    // Two 64-byte buffers hold about a dozen Int rows; 60 rows force
    // several spills.
    for v in scrambled(60) {
        pre.add_row(&int_row(v), &mut array).unwrap();
    }
    pre.flush(&mut array).unwrap();
    assert!(array.total_runs() > 1);

    // Every spilled run must be internally sorted.
    for i in 1..=2 {
        let s = array.stream_mut(i);
        if s.is_empty() {
            continue;
        }
        s.init_fetch().unwrap();
        let mut prev: Option<Vec<u8>> = None;
        loop {
            match s.get_next().unwrap() {
                StreamStatus::Run => {
                    let cur = s.current().to_vec();
                    if let Some(p) = &prev {
                        assert_ne!(
                            cmp.compare(p, &cur).unwrap(),
                            std::cmp::Ordering::Greater
                        );
                    }
                    prev = Some(cur);
                }
                StreamStatus::Eor => {
                    s.skip_eor().unwrap();
                    prev = None;
                }
                StreamStatus::Eos => break,
                other => panic!("unexpected status {:?}", other),
            }
        }
    }
}

#[test]
fn external_sort_orders_input() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 3);
    let input = scrambled(100);
    let out = sort_ints(&mgr, &input);
    let mut expect = input.clone();
    expect.sort();
    assert_eq!(out, expect);
}

#[test]
fn multi_pass_merge_orders_large_input() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 3);
    // 1 KB of presort memory over 64-byte blocks spills many runs, which
    // forces several polyphase passes.
    let input = scrambled(1000);
    let out = sort_ints(&mgr, &input);
    let mut expect = input.clone();
    expect.sort();
    assert_eq!(out, expect);
}

#[test]
fn merge_passes_respect_run_targets() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 3);
    let pool = mgr.pool().clone();
    assert!(pool.reserve(8));
    let mut array = StreamArray::new(3, mgr.temp(), &pool).unwrap();
    let cmp = RecordComparator::new(vec![OrderSpec::asc(0)]);
    let mut pre = Presorter::new(cmp.clone(), &pool, 2).unwrap();
    let input = scrambled(200);
    for &v in &input {
        pre.add_row(&int_row(v), &mut array).unwrap();
    }
    pre.flush(&mut array).unwrap();
    drop(pre);
    assert!(array.total_runs() > 3, "several runs are needed to force extra passes");
    assert_eq!(array.end_of_distribute().unwrap(), Distribution::Merge);

    // Tiny budgets, so the run accounting is observed between many steps.
    let mut engine = MergeEngine::new(cmp, &array, 512, 16);
    loop {
        match engine.step(&mut array).unwrap() {
            MergeStep::Continue => {
                for i in 0..array.file_count() + 1 {
                    assert!(
                        array.runs_actual(i) <= array.runs_target(i),
                        "stream {} over its run target in pass {}",
                        i,
                        engine.pass()
                    );
                }
            }
            MergeStep::Success => break,
        }
    }
    assert!(engine.pass() > 1, "merge was expected to take several passes");

    let idx = engine.result().unwrap();
    let schema = int_schema();
    let s = array.stream_mut(idx);
    s.init_fetch().unwrap();
    let mut out = Vec::new();
    loop {
        match s.get_next().unwrap() {
            StreamStatus::Run => {
                out.push(int_of(&Row::decode(s.current(), &schema).unwrap()));
            }
            StreamStatus::Eor | StreamStatus::Hold => s.skip_eor().unwrap(),
            StreamStatus::Eos => break,
            other => panic!("unexpected status {:?}", other),
        }
    }
    let mut expect = input;
    expect.sort();
    assert_eq!(out, expect);
}

#[test]
fn duplicate_keys_survive_the_sort() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let input: Vec<i64> = scrambled(300).into_iter().map(|v| v % 7).collect();
    let out = sort_ints(&mgr, &input);
    let mut expect = input.clone();
    expect.sort();
    assert_eq!(out, expect);
}

#[test]
fn descending_order_spec() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let mut sorter = mgr
        .create_sort(int_schema(), vec![OrderSpec::desc(0)])
        .unwrap();
    for v in [3i64, 1, 4, 1, 5] {
        sorter.add_tuple(&int_row(v)).unwrap();
    }
    while !sorter.run_merge_step().unwrap() {}
    let mut out = Vec::new();
    while let Some(row) = sorter.fetch_next().unwrap() {
        out.push(int_of(&row));
    }
    assert_eq!(out, vec![5, 4, 3, 1, 1]);
}

#[test]
fn passthrough_keeps_insertion_order() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let mut sorter = mgr.create_sort(int_schema(), Vec::new()).unwrap();
    for v in [9i64, 2, 7, 2] {
        sorter.add_tuple(&int_row(v)).unwrap();
    }
    assert_eq!(sorter.state(), SorterState::AddNoOrder);
    while !sorter.run_merge_step().unwrap() {}
    let mut out = Vec::new();
    while let Some(row) = sorter.fetch_next().unwrap() {
        out.push(int_of(&row));
    }
    assert_eq!(out, vec![9, 2, 7, 2]);
}

#[test]
fn zero_rows_yield_empty_cursor() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let mut sorter = mgr
        .create_sort(int_schema(), vec![OrderSpec::asc(0)])
        .unwrap();
    assert!(sorter.run_merge_step().unwrap());
    assert_eq!(sorter.fetch_next().unwrap(), None);
    assert_eq!(sorter.fetch_prev().unwrap(), None);
}

#[test]
fn in_memory_mode_touches_no_files() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = small_config(&tmp, 2);
    config.enabled = false;
    let mgr = SortManager::new(config, 64).unwrap();
    let input = scrambled(50);
    let out = sort_ints(&mgr, &input);
    let mut expect = input.clone();
    expect.sort();
    assert_eq!(out, expect);
    assert_eq!(mgr.temp().slots_in_use(), 0);
    assert_eq!(mgr.pool().in_use(), 0);
    assert_eq!(mgr.pool().reserved(), 0);
}

#[test]
fn cursor_direction_reversal() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let mut sorter = mgr
        .create_sort(int_schema(), vec![OrderSpec::asc(0)])
        .unwrap();
    for v in [2i64, 0, 1] {
        sorter.add_tuple(&int_row(v)).unwrap();
    }
    while !sorter.run_merge_step().unwrap() {}

    assert_eq!(int_of(&sorter.fetch_next().unwrap().unwrap()), 0);
    assert_eq!(int_of(&sorter.fetch_next().unwrap().unwrap()), 1);
    // Reversing re-yields the record just fetched.
    assert_eq!(int_of(&sorter.fetch_prev().unwrap().unwrap()), 1);
    assert_eq!(int_of(&sorter.fetch_prev().unwrap().unwrap()), 0);
    assert_eq!(sorter.fetch_prev().unwrap(), None);
    assert_eq!(int_of(&sorter.fetch_next().unwrap().unwrap()), 0);

    sorter.cursor_to_end().unwrap();
    assert_eq!(sorter.fetch_next().unwrap(), None);
    assert_eq!(int_of(&sorter.fetch_prev().unwrap().unwrap()), 2);
    sorter.cursor_to_begin().unwrap();
    assert_eq!(int_of(&sorter.fetch_next().unwrap().unwrap()), 0);
}

#[test]
fn fetch_before_cursor_latches_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let mut sorter = mgr
        .create_sort(int_schema(), vec![OrderSpec::asc(0)])
        .unwrap();
    sorter.add_tuple(&int_row(1)).unwrap();
    assert!(matches!(
        sorter.fetch_next(),
        Err(SortError::InvalidState(_))
    ));
    assert_eq!(sorter.state(), SorterState::Error);
    // The first error replays on every later call.
    assert!(matches!(
        sorter.add_tuple(&int_row(2)),
        Err(SortError::InvalidState(_))
    ));
    assert!(matches!(
        sorter.run_merge_step(),
        Err(SortError::InvalidState(_))
    ));
}

#[test]
fn rejects_order_column_outside_schema() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    // One-column schema, key on column 5.
    let err = mgr
        .create_sort(int_schema(), vec![OrderSpec::asc(5)])
        .unwrap_err();
    assert!(matches!(err, SortError::Config(_)), "{err:?}");
    assert_eq!(mgr.pool().reserved(), 0, "rejected sort leaves no reservation");
    assert_eq!(mgr.temp().slots_in_use(), 0);

    // Disabled mode rejects the same way.
    let mut config = small_config(&tmp, 2);
    config.enabled = false;
    let mem_mgr = SortManager::new(config, 64).unwrap();
    assert!(matches!(
        mem_mgr.create_sort(int_schema(), vec![OrderSpec::asc(1)]),
        Err(SortError::Config(_))
    ));
}

#[test]
fn oversized_row_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 2);
    let schema = TupleType::new(vec![AttrType::Text]);
    let mut sorter = mgr.create_sort(schema, vec![OrderSpec::asc(0)]).unwrap();
    // A 64-byte block cannot hold this row even when empty.
    let big = "x".repeat(200);
    assert!(matches!(
        sorter.add_tuple(&Row::new(vec![Value::Text(big)])),
        Err(SortError::RowTooLong { .. })
    ));
    assert_eq!(sorter.state(), SorterState::Error);
}

#[test]
fn drop_releases_pool_and_slots_at_every_phase() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 3);
    let pool = mgr.pool();
    let temp = mgr.temp();

    // Mid-add.
    {
        let mut sorter = mgr
            .create_sort(int_schema(), vec![OrderSpec::asc(0)])
            .unwrap();
        for v in scrambled(200) {
            sorter.add_tuple(&int_row(v)).unwrap();
        }
        assert!(temp.slots_in_use() > 0);
    }
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.reserved(), 0);
    assert_eq!(temp.slots_in_use(), 0);

    // Mid-merge.
    {
        let mut sorter = mgr
            .create_sort(int_schema(), vec![OrderSpec::asc(0)])
            .unwrap();
        for v in scrambled(500) {
            sorter.add_tuple(&int_row(v)).unwrap();
        }
        sorter.run_merge_step().unwrap();
    }
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.reserved(), 0);
    assert_eq!(temp.slots_in_use(), 0);

    // Cursor phase.
    {
        let mgr2 = mgr.clone();
        let input = scrambled(100);
        let _ = sort_ints(&mgr2, &input);
    }
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.reserved(), 0);
    assert_eq!(temp.slots_in_use(), 0);
}

#[test]
fn reservation_shrinks_toward_cursor() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = manager(&tmp, 3);
    let pool = mgr.pool();
    let total = mgr.config().sort_blocks();

    let mut sorter = mgr
        .create_sort(int_schema(), vec![OrderSpec::asc(0)])
        .unwrap();
    assert_eq!(pool.in_use() + pool.reserved(), total);
    for v in scrambled(400) {
        sorter.add_tuple(&int_row(v)).unwrap();
    }
    assert_eq!(pool.in_use() + pool.reserved(), total);
    while !sorter.run_merge_step().unwrap() {
        // During the merge only one page per stream remains claimed.
        assert!(pool.in_use() + pool.reserved() <= mgr.config().max_files_per_sort + 2);
    }
    // Cursor phase holds a single block.
    assert_eq!(pool.in_use() + pool.reserved(), 1);
    assert!(sorter.fetch_next().unwrap().is_some());
}

#[test]
fn concurrent_sorts_share_the_pool() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = small_config(&tmp, 2);
    config.max_files_total = 8;
    // Room for exactly two sorts' worth of blocks.
    let total = config.sort_blocks();
    let mgr = SortManager::new(config, total * 2).unwrap();

    let a = mgr.create_sort(int_schema(), vec![OrderSpec::asc(0)]).unwrap();
    let b = mgr.create_sort(int_schema(), vec![OrderSpec::asc(0)]).unwrap();
    assert!(matches!(
        mgr.create_sort(int_schema(), vec![OrderSpec::asc(0)]),
        Err(SortError::OutOfMemoryBlocks)
    ));
    drop(a);
    drop(b);
    assert!(mgr.create_sort(int_schema(), vec![OrderSpec::asc(0)]).is_ok());
}
