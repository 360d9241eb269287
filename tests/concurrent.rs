use std::thread;

use swapmap::{Result, SwapMap, SwapMapOptions};
use tempfile::{tempdir, TempDir};

fn options(dir: &TempDir, name: &str) -> SwapMapOptions {
    SwapMapOptions::new().dir(dir.path()).base_name(name)
}

#[test]
fn overlapping_ranges_from_two_threads() -> Result<()> {
    let dir = tempdir()?;
    let map: SwapMap<u64, u64> = SwapMap::create(options(&dir, "ranges"))?;

    thread::scope(|scope| {
        let writer_a = &map;
        let writer_b = &map;
        scope.spawn(move || {
            for key in 10..=20u64 {
                writer_a.set(&key, &(key + 1)).expect("set from thread a");
            }
        });
        scope.spawn(move || {
            for key in 0..=10u64 {
                writer_b.set(&key, &(key + 2)).expect("set from thread b");
            }
        });
    });

    assert_eq!(map.len()?, 21);
    for (key, value) in map.iter_snapshot()? {
        let delta = value - key;
        assert!(
            delta == 1 || delta == 2,
            "key {key} holds {value}, expected key+1 or key+2"
        );
    }
    map.close()
}

#[test]
fn interleaved_writers_never_lose_disjoint_keys() -> Result<()> {
    let dir = tempdir()?;
    let map: SwapMap<u64, u64> = SwapMap::create(options(&dir, "disjoint"))?;
    let threads = 4u64;
    let per_thread = 25u64;

    thread::scope(|scope| {
        for t in 0..threads {
            let map = &map;
            scope.spawn(move || {
                for i in 0..per_thread {
                    let key = t * per_thread + i;
                    map.set(&key, &key).expect("set");
                }
            });
        }
    });

    assert_eq!(map.len()? as u64, threads * per_thread);
    for key in 0..threads * per_thread {
        assert_eq!(map.get(&key)?, key);
    }
    map.close()
}

#[test]
fn readers_and_writers_share_the_gate() -> Result<()> {
    let dir = tempdir()?;
    let map: SwapMap<u64, u64> = SwapMap::create(options(&dir, "mixed"))?;
    for key in 0..10u64 {
        map.set(&key, &key)?;
    }

    thread::scope(|scope| {
        let writer = &map;
        scope.spawn(move || {
            for key in 10..40u64 {
                writer.set(&key, &key).expect("set");
            }
        });
        let reader = &map;
        scope.spawn(move || {
            for _ in 0..30 {
                let snapshot = reader.iter_snapshot().expect("snapshot");
                for (k, v) in snapshot {
                    assert_eq!(k, v, "snapshot must be internally consistent");
                }
            }
        });
    });

    assert_eq!(map.len()?, 40);
    map.close()
}

#[test]
fn concurrent_close_is_tolerated() -> Result<()> {
    let dir = tempdir()?;
    let map: SwapMap<u64, u64> = SwapMap::create(options(&dir, "race-close"))?;
    map.set(&1, &1)?;

    thread::scope(|scope| {
        for _ in 0..4 {
            let map = &map;
            scope.spawn(move || {
                map.close().expect("close never fails for missing files");
            });
        }
    });
    map.close()
}
