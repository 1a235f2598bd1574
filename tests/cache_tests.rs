use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc::{Receiver, Sender, channel},
    },
    thread,
};

use benchtrend::{
    AggregationCache, BenchTrendError, BuildHistory, BuildNumber, BuildRecord, BuildResult,
    CacheConfig, DirectoryProject, TrendService, ViewTarget,
    bench_utils::{BASE_TIMESTAMP_MS, HistoryShape, ReportFixture, generate_history},
    config::REPORT_DIR_NAME,
};

fn shape(configs: usize) -> HistoryShape {
    HistoryShape {
        builds: 4,
        configs,
        drivers: 2,
        test_cases: 3,
    }
}

#[test]
fn test_repeated_requests_parse_once() {
    let dir = tempfile::tempdir().unwrap();
    let project = generate_history(dir.path(), shape(2), 1).unwrap();
    let cache = AggregationCache::default();

    let first = cache.get(&project).unwrap();
    let parsed = cache.aggregator().parse_count();
    assert_eq!(parsed, 8);
    let second = cache.get(&project).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.aggregator().parse_count(), parsed);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn test_new_build_invalidates_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let project = generate_history(dir.path(), shape(1), 2).unwrap();
    let cache = AggregationCache::default();
    let before = cache.get(&project).unwrap();
    assert_eq!(before.latest_build(), Some(BuildNumber(4)));

    let record = project
        .create_build(BuildNumber(5), BASE_TIMESTAMP_MS + 10_000_000, BuildResult::Success)
        .unwrap();
    ReportFixture::new("config/suite-0.xml")
        .case("driver-0", "case/0", 1.0)
        .write_to(record.root_dir.join(REPORT_DIR_NAME), "report-0.xml")
        .unwrap();

    let after = cache.get(&project).unwrap();
    assert_eq!(after.latest_build(), Some(BuildNumber(5)));
    assert_eq!(after.report("config.suite-0.xml").unwrap().series().len(), 5);
    assert_eq!(cache.aggregator().pass_count(), 2);
}

#[test]
fn test_released_entry_is_rebuilt_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let project = generate_history(dir.path(), shape(1), 3).unwrap();
    let cache = AggregationCache::default();
    let first = cache.get(&project).unwrap();

    cache.release(&project);
    assert_eq!(cache.stats().entries, 0);
    let rebuilt = cache.get(&project).unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(*first, *rebuilt);

    cache.release_all();
    cache.get(&project).unwrap();
    assert_eq!(cache.aggregator().pass_count(), 3);
}

#[test]
fn test_least_recently_used_project_is_evicted() {
    let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
    let projects: Vec<DirectoryProject> = dirs
        .iter()
        .enumerate()
        .map(|(i, d)| generate_history(d.path(), shape(1), i as u64).unwrap())
        .collect();
    let cache = AggregationCache::new(&CacheConfig { max_projects: 2 });
    for project in &projects {
        cache.get(project).unwrap();
    }
    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.entries, 2);
}

#[test]
fn test_concurrent_readers_share_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let project = Arc::new(generate_history(dir.path(), shape(2), 4).unwrap());
    let cache = Arc::new(AggregationCache::default());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let project = Arc::clone(&project);
            thread::spawn(move || cache.get(&*project).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
    assert_eq!(cache.aggregator().pass_count(), 1);
}

#[test]
fn test_service_target_and_names() {
    let dir = tempfile::tempdir().unwrap();
    let single = generate_history(dir.path().join("single"), shape(1), 5).unwrap();
    let multi = generate_history(dir.path().join("multi"), shape(2), 6).unwrap();
    let service = TrendService::default();

    assert_eq!(
        service.target(&single),
        ViewTarget::Report("config.suite-0.xml".to_string())
    );
    assert_eq!(service.target(&multi), ViewTarget::Index);
    assert!(service.has_reports(&multi).unwrap());

    let names = service.test_case_names(&single, "config.suite-0.xml").unwrap();
    assert_eq!(names.get("case_0").map(String::as_str), Some("case/0"));
    assert!(service.test_case_names(&single, "missing").is_err());
    assert_eq!(service.cache_stats().entries, 2);
}

#[test]
fn test_service_target_falls_back_to_index_on_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let project = generate_history(dir.path(), shape(1), 7).unwrap();
    std::fs::write(
        project
            .build_dir(BuildNumber(2))
            .join(REPORT_DIR_NAME)
            .join("broken.xml"),
        "not xml",
    )
    .unwrap();
    let service = TrendService::default();
    assert_eq!(service.target(&project), ViewTarget::Index);
    assert!(service.parse_reports(&project).is_err());
}

#[test]
fn test_projects_with_the_same_directory_name_are_cached_apart() {
    let dir = tempfile::tempdir().unwrap();
    let small = generate_history(dir.path().join("a/proj"), shape(1), 8).unwrap();
    let large = generate_history(dir.path().join("b/proj"), shape(3), 9).unwrap();
    assert_eq!(small.project_name(), large.project_name());
    assert_ne!(small.cache_key(), large.cache_key());

    let cache = AggregationCache::default();
    assert_eq!(cache.get(&small).unwrap().len(), 1);
    assert_eq!(cache.get(&large).unwrap().len(), 3);
    assert_eq!(cache.get(&small).unwrap().len(), 1);
    assert_eq!(cache.aggregator().pass_count(), 2);
}

/// Holds the aggregation pass (the second `builds` call) until released.
struct GatedHistory {
    inner: DirectoryProject,
    calls: AtomicUsize,
    entered: Mutex<Sender<()>>,
    proceed: Mutex<Receiver<()>>,
}

impl BuildHistory for GatedHistory {
    fn project_name(&self) -> &str {
        self.inner.project_name()
    }

    fn cache_key(&self) -> String {
        self.inner.cache_key()
    }

    fn builds(&self) -> Result<Vec<BuildRecord>, BenchTrendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.entered.lock().unwrap().send(()).unwrap();
            self.proceed.lock().unwrap().recv().unwrap();
        }
        self.inner.builds()
    }
}

#[test]
fn test_slot_being_filled_is_not_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let (entered_tx, entered_rx) = channel();
    let (proceed_tx, proceed_rx) = channel();
    let gated = Arc::new(GatedHistory {
        inner: generate_history(dir.path().join("gated"), shape(1), 10).unwrap(),
        calls: AtomicUsize::new(0),
        entered: Mutex::new(entered_tx),
        proceed: Mutex::new(proceed_rx),
    });
    let other = generate_history(dir.path().join("other"), shape(1), 11).unwrap();
    let cache = Arc::new(AggregationCache::new(&CacheConfig { max_projects: 1 }));

    let filler = {
        let cache = Arc::clone(&cache);
        let gated = Arc::clone(&gated);
        thread::spawn(move || cache.get(&*gated).unwrap())
    };
    entered_rx.recv().unwrap();
    cache.get(&other).unwrap();
    assert_eq!(cache.stats().evictions, 0);
    proceed_tx.send(()).unwrap();
    let filled = filler.join().unwrap();

    let again = cache.get(&*gated).unwrap();
    assert!(Arc::ptr_eq(&filled, &again));
    assert_eq!(cache.aggregator().pass_count(), 2);
}
