//! Ivarator Module Tests
//!
//! ## Test Scopes
//! - **Config**: JSON round trip and defaults for omitted fields.
//! - **Selector**: priority order, shuffling within a priority, thresholds, live
//!   fall-through, no eligible entry.

#[cfg(test)]
mod tests {
    use crate::error::ExecutorError;
    use crate::ivarator::selector::{
        FreeSpaceSource, IvaratorCacheDirSelector, StatvfsSource, from_json, to_json,
    };
    use crate::ivarator::types::{
        DEFAULT_MIN_AVAILABLE_STORAGE_MIB, DEFAULT_MIN_AVAILABLE_STORAGE_PERCENT,
        DEFAULT_PRIORITY, IvaratorCacheDirConfig, StorageStats, local_path,
    };
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    const MIB: u64 = 1024 * 1024;

    #[derive(Default)]
    struct FakeFreeSpace {
        stats: Mutex<HashMap<String, StorageStats>>,
    }

    impl FakeFreeSpace {
        fn set(&self, uri: &str, available_mib: u64, total_mib: u64) {
            self.stats.lock().unwrap().insert(
                uri.to_string(),
                StorageStats {
                    total_bytes: total_mib * MIB,
                    available_bytes: available_mib * MIB,
                },
            );
        }
    }

    impl FreeSpaceSource for FakeFreeSpace {
        fn stats(&self, uri: &str) -> anyhow::Result<StorageStats> {
            self.stats
                .lock()
                .unwrap()
                .get(uri)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no such mount"))
        }
    }

    // ============================================================
    // CONFIG
    // ============================================================

    #[test]
    fn test_round_trip_preserves_order() {
        let dirs = vec![
            IvaratorCacheDirConfig::new("file:///data/ivarators").with_priority(1),
            IvaratorCacheDirConfig::new("hdfs://nn/ivarators")
                .with_priority(0)
                .with_min_available_storage_mib(512)
                .with_min_available_storage_percent(12.5),
            IvaratorCacheDirConfig::default(),
        ];

        let text = to_json(&dirs).unwrap();
        assert_eq!(from_json(&text).unwrap(), dirs);
    }

    #[test]
    fn test_wire_field_names() {
        let text = to_json(&[IvaratorCacheDirConfig::new("/tmp/a")]).unwrap();
        assert!(text.contains("\"basePathURI\":\"/tmp/a\""));
        assert!(text.contains("\"minAvailableStorageMiB\""));
        assert!(text.contains("\"minAvailableStoragePercent\""));
    }

    #[test]
    fn test_omitted_fields_take_defaults() {
        let parsed = from_json("[{}]").unwrap();

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].base_path_uri, None);
        assert_eq!(parsed[0].priority, DEFAULT_PRIORITY);
        assert_eq!(parsed[0].min_available_storage_mib, DEFAULT_MIN_AVAILABLE_STORAGE_MIB);
        assert_eq!(
            parsed[0].min_available_storage_percent,
            DEFAULT_MIN_AVAILABLE_STORAGE_PERCENT
        );
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(matches!(
            from_json("{\"basePathURI\": 3}"),
            Err(ExecutorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_local_path_resolution() {
        assert_eq!(local_path("file:///var/tmp"), Some(PathBuf::from("/var/tmp")));
        assert_eq!(local_path("/var/tmp"), Some(PathBuf::from("/var/tmp")));
        assert_eq!(local_path("hdfs://nn/tmp"), None);
    }

    // ============================================================
    // SELECTOR
    // ============================================================

    #[test]
    fn test_lowest_priority_value_wins() {
        let stats = Arc::new(FakeFreeSpace::default());
        let selector = IvaratorCacheDirSelector::new(
            vec![
                IvaratorCacheDirConfig::new("/slow").with_priority(5),
                IvaratorCacheDirConfig::new("/fast").with_priority(1),
                IvaratorCacheDirConfig::new("/unranked"),
            ],
            stats,
        );

        assert_eq!(selector.select().unwrap().path_uri, "/fast");
        let order: Vec<String> = selector.eligible().into_iter().map(|d| d.path_uri).collect();
        assert_eq!(order, vec!["/fast", "/slow", "/unranked"]);
    }

    #[test]
    fn test_equal_priorities_share_the_load() {
        let stats = Arc::new(FakeFreeSpace::default());
        let selector = IvaratorCacheDirSelector::new(
            vec![
                IvaratorCacheDirConfig::new("/spare").with_priority(2),
                IvaratorCacheDirConfig::new("/disk-a").with_priority(1),
                IvaratorCacheDirConfig::new("/disk-b").with_priority(1),
                IvaratorCacheDirConfig::new("/disk-c").with_priority(1),
            ],
            stats,
        );

        let mut picks: HashMap<String, usize> = HashMap::new();
        for _ in 0..300 {
            *picks.entry(selector.select().unwrap().path_uri).or_default() += 1;
        }
        assert_eq!(picks.len(), 3, "every equal-priority directory gets picked: {:?}", picks);
        assert!(!picks.contains_key("/spare"));

        // Shuffling never moves a lower priority ahead
        let order: Vec<String> = selector.eligible().into_iter().map(|d| d.path_uri).collect();
        assert_eq!(order.last().map(String::as_str), Some("/spare"));
        let mut head = order[..3].to_vec();
        head.sort();
        assert_eq!(head, vec!["/disk-a", "/disk-b", "/disk-c"]);
    }

    #[test]
    fn test_falls_through_when_directory_fills_up() {
        let stats = Arc::new(FakeFreeSpace::default());
        stats.set("/primary", 10_000, 20_000);
        stats.set("/secondary", 8_000, 20_000);

        let selector = IvaratorCacheDirSelector::new(
            vec![
                IvaratorCacheDirConfig::new("/primary")
                    .with_priority(0)
                    .with_min_available_storage_mib(1_000),
                IvaratorCacheDirConfig::new("/secondary")
                    .with_priority(1)
                    .with_min_available_storage_mib(1_000),
            ],
            stats.clone(),
        );
        assert_eq!(selector.select().unwrap().path_uri, "/primary");

        // Mid-evaluation the primary fills up; the next call re-checks and moves on
        stats.set("/primary", 500, 20_000);
        assert_eq!(selector.select().unwrap().path_uri, "/secondary");

        stats.set("/secondary", 10, 20_000);
        assert_eq!(selector.select(), Err(ExecutorError::NoEligibleDirectory));
    }

    #[test]
    fn test_both_thresholds_must_hold() {
        let stats = Arc::new(FakeFreeSpace::default());
        // Plenty of MiB, but only 5% free
        stats.set("/big", 5_000, 100_000);

        let dir = IvaratorCacheDirConfig::new("/big")
            .with_min_available_storage_mib(1_000)
            .with_min_available_storage_percent(10.0);
        let selector = IvaratorCacheDirSelector::new(vec![dir.clone()], stats.clone());
        assert!(!selector.is_eligible(&dir));

        stats.set("/big", 20_000, 100_000);
        assert!(selector.is_eligible(&dir));
    }

    #[test]
    fn test_entries_without_path_are_never_eligible() {
        let selector = IvaratorCacheDirSelector::new(
            vec![IvaratorCacheDirConfig::default().with_priority(0)],
            Arc::new(FakeFreeSpace::default()),
        );
        assert_eq!(selector.select(), Err(ExecutorError::NoEligibleDirectory));
    }

    #[test]
    fn test_unmeasurable_directory_with_threshold_is_skipped() {
        let selector = IvaratorCacheDirSelector::new(
            vec![
                IvaratorCacheDirConfig::new("/unknown")
                    .with_priority(0)
                    .with_min_available_storage_percent(1.0),
                IvaratorCacheDirConfig::new("/fallback").with_priority(1),
            ],
            Arc::new(FakeFreeSpace::default()),
        );
        assert_eq!(selector.select().unwrap().path_uri, "/fallback");
    }

    #[test]
    fn test_statvfs_reads_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", dir.path().display());

        let stats = StatvfsSource.stats(&uri).unwrap();
        assert!(stats.total_bytes > 0);
        assert!(stats.available_bytes <= stats.total_bytes);

        let selector = IvaratorCacheDirSelector::with_statvfs(vec![
            IvaratorCacheDirConfig::new(&uri).with_min_available_storage_mib(u64::MAX / MIB),
        ]);
        assert_eq!(selector.select(), Err(ExecutorError::NoEligibleDirectory));
    }
}
