#![cfg(not(loom))]

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;

use hazlist::backoff::SpinBackoff;
use hazlist::hazard_ptr::{Domain, DomainGlobal};
use hazlist::ordered_list::{NaturalOrder, OrderedList};

/// A Test-Value that counts its Drops, used to check that every Node is
/// reclaimed exactly once
#[derive(Debug)]
struct Tracked {
    key: u64,
    drops: Option<Arc<AtomicUsize>>,
}

impl Tracked {
    fn new(key: u64, drops: &Arc<AtomicUsize>) -> Self {
        Self {
            key,
            drops: Some(drops.clone()),
        }
    }

    /// A Key-only Value for Lookups, which does not take part in the
    /// Drop-Accounting
    fn key(key: u64) -> Self {
        Self { key, drops: None }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl PartialEq for Tracked {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for Tracked {}
impl PartialOrd for Tracked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Tracked {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key.cmp(&other.key)
    }
}

#[test]
fn single_thread_basic() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    let mut handle = Domain::register(&GLOBAL, 100).unwrap();

    let list = OrderedList::new();

    let results: Vec<bool> = [3u64, 1, 4, 1, 5, 9, 2, 6]
        .iter()
        .map(|value| list.insert(*value, &mut handle).unwrap())
        .collect();
    assert_eq!(
        vec![true, true, true, false, true, true, true, true],
        results
    );

    let values: Vec<u64> = list
        .iter(&mut handle)
        .unwrap()
        .map(|item| *item.unwrap().value())
        .collect();
    assert_eq!(vec![1, 2, 3, 4, 5, 6, 9], values);

    assert_eq!(true, list.erase(&4, &mut handle).unwrap());

    let values: Vec<u64> = list
        .iter(&mut handle)
        .unwrap()
        .map(|item| *item.unwrap().value())
        .collect();
    assert_eq!(vec![1, 2, 3, 5, 6, 9], values);
}

#[test]
fn round_trip() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    let mut handle = Domain::register(&GLOBAL, 100).unwrap();

    let list = OrderedList::new();
    let keys = [17u64, 3, 99, 41, 7, 23];

    for key in keys.iter() {
        assert_eq!(true, list.insert(*key, &mut handle).unwrap());
    }
    for key in keys.iter() {
        assert_eq!(true, list.find(key, &mut handle).unwrap());
    }
    for key in keys.iter() {
        assert_eq!(true, list.erase(key, &mut handle).unwrap());
    }
    for key in keys.iter() {
        assert_eq!(false, list.find(key, &mut handle).unwrap());
    }
}

#[test]
fn erase_is_idempotent() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    let mut handle = Domain::register(&GLOBAL, 100).unwrap();

    let list = OrderedList::new();
    list.insert(13u64, &mut handle).unwrap();

    assert_eq!(true, list.erase(&13, &mut handle).unwrap());
    assert_eq!(false, list.erase(&13, &mut handle).unwrap());
}

#[test]
fn boundaries() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    let mut handle = Domain::register(&GLOBAL, 100).unwrap();

    let list = OrderedList::new();

    // erasing from the empty List changes nothing and retires nothing
    assert_eq!(false, list.erase(&13u64, &mut handle).unwrap());
    assert_eq!(0, handle.pending());

    // insert into the empty List and erase the only Element again
    assert_eq!(true, list.insert(13u64, &mut handle).unwrap());
    assert_eq!(true, list.erase(&13, &mut handle).unwrap());
    assert_eq!(0, list.iter(&mut handle).unwrap().count());

    // the List is usable afterwards
    assert_eq!(true, list.insert(14u64, &mut handle).unwrap());
    assert_eq!(true, list.find(&14, &mut handle).unwrap());
}

#[test]
fn random_ops_match_reference() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    static GLOBAL: DomainGlobal = DomainGlobal::new();
    let mut handle = Domain::register(&GLOBAL, 100).unwrap();

    let list = OrderedList::new();
    let mut reference = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..10_000 {
        let key = rng.gen_range(0..64u64);
        if rng.gen_bool(0.5) {
            assert_eq!(reference.insert(key), list.insert(key, &mut handle).unwrap());
        } else {
            assert_eq!(reference.remove(&key), list.erase(&key, &mut handle).unwrap());
        }
    }

    let values: Vec<u64> = list
        .iter(&mut handle)
        .unwrap()
        .map(|item| *item.unwrap().value())
        .collect();
    let expected: Vec<u64> = reference.into_iter().collect();
    assert_eq!(expected, values);
}

#[test]
fn insert_erase_race() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    const KEYS: u64 = 1000;

    let drops = Arc::new(AtomicUsize::new(0));
    let list = Arc::new(OrderedList::new());

    let inserter = {
        let list = list.clone();
        let drops = drops.clone();
        thread::spawn(move || {
            let mut handle = Domain::register(&GLOBAL, 32).unwrap();
            let mut inserted = 0u64;
            for key in 0..KEYS {
                if list.insert(Tracked::new(key, &drops), &mut handle).unwrap() {
                    inserted += 1;
                }
            }
            inserted
        })
    };

    let eraser = {
        let list = list.clone();
        thread::spawn(move || {
            let mut handle = Domain::register(&GLOBAL, 32).unwrap();
            let mut erased = 0u64;
            for key in 0..KEYS {
                if list.erase(&Tracked::key(key), &mut handle).unwrap() {
                    erased += 1;
                }
            }
            erased
        })
    };

    let inserted = inserter.join().unwrap();
    let erased = eraser.join().unwrap();

    // all Keys are distinct, so every Insert has to succeed
    assert_eq!(KEYS, inserted);

    let mut handle = Domain::register(&GLOBAL, 32).unwrap();
    let remaining = list.iter(&mut handle).unwrap().count() as u64;
    assert_eq!(inserted - erased, remaining);

    // after claiming the Donations and dropping the List, every Node has to
    // be dropped exactly once
    handle.reclaim();
    drop(list);
    assert_eq!(KEYS as usize, drops.load(Ordering::SeqCst));
}

#[test]
fn retirement_under_pressure() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    const THREADS: usize = 4;
    const OPS: usize = 25_000;
    const THRESHOLD: usize = 32;
    const KEY_RANGE: u64 = 16;

    let drops = Arc::new(AtomicUsize::new(0));
    let list = Arc::new(OrderedList::new());

    let ths: Vec<_> = (0..THREADS)
        .map(|_| {
            let list = list.clone();
            let drops = drops.clone();
            thread::spawn(move || {
                let mut handle = Domain::register(&GLOBAL, THRESHOLD).unwrap();
                for i in 0..OPS {
                    let key = (i as u64) % KEY_RANGE;
                    list.insert(Tracked::new(key, &drops), &mut handle).unwrap();
                    list.erase(&Tracked::key(key), &mut handle).unwrap();

                    // the Threshold keeps the per-Thread Garbage bounded
                    assert!(handle.pending() <= THRESHOLD + 64);
                }
            })
        })
        .collect();

    for th in ths {
        th.join().unwrap();
    }

    let mut handle = Domain::register(&GLOBAL, THRESHOLD).unwrap();
    handle.reclaim();
    drop(list);

    assert_eq!(THREADS * OPS, drops.load(Ordering::SeqCst));
}

#[test]
fn iterator_weak_consistency() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    const KEYS: u64 = 1000;

    let list = Arc::new(OrderedList::new());
    let mut handle = Domain::register(&GLOBAL, 100).unwrap();

    for key in 1..=KEYS {
        list.insert(key, &mut handle).unwrap();
    }

    let eraser = {
        let list = list.clone();
        thread::spawn(move || {
            let mut handle = Domain::register(&GLOBAL, 32).unwrap();
            for key in (1..=KEYS).filter(|key| key % 2 == 1) {
                assert_eq!(true, list.erase(&key, &mut handle).unwrap());
            }
        })
    };

    let seen: Vec<u64> = list
        .iter(&mut handle)
        .unwrap()
        .map(|item| *item.unwrap().value())
        .collect();

    eraser.join().unwrap();

    // strictly increasing, so no Value can show up twice
    assert_eq!(true, seen.windows(2).all(|pair| pair[0] < pair[1]));

    // every even Key was present for the whole Iteration and has to be seen
    for key in (2..=KEYS).step_by(2) {
        assert_eq!(true, seen.binary_search(&key).is_ok());
    }

    handle.reclaim();
}

#[test]
fn spin_backoff_under_contention() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    const THREADS: usize = 4;
    const OPS: u64 = 5_000;

    let list: Arc<OrderedList<u64, NaturalOrder, SpinBackoff>> =
        Arc::new(OrderedList::with_comparator(NaturalOrder));

    let ths: Vec<_> = (0..THREADS)
        .map(|_| {
            let list = list.clone();
            thread::spawn(move || {
                let mut handle = Domain::register(&GLOBAL, 32).unwrap();
                for i in 0..OPS {
                    let key = i % 8;
                    list.insert(key, &mut handle).unwrap();
                    list.erase(&key, &mut handle).unwrap();
                }
            })
        })
        .collect();

    for th in ths {
        th.join().unwrap();
    }

    let mut handle = Domain::register(&GLOBAL, 32).unwrap();
    handle.reclaim();
    assert!(list.iter(&mut handle).unwrap().count() <= 8);
}

#[test]
fn concurrent_inserts_of_equal_key() {
    static GLOBAL: DomainGlobal = DomainGlobal::new();
    const THREADS: usize = 4;

    let list = Arc::new(OrderedList::new());

    let ths: Vec<_> = (0..THREADS)
        .map(|_| {
            let list = list.clone();
            thread::spawn(move || {
                let mut handle = Domain::register(&GLOBAL, 32).unwrap();
                list.insert(13u64, &mut handle).unwrap()
            })
        })
        .collect();

    let winners = ths
        .into_iter()
        .map(|th| th.join().unwrap())
        .filter(|won| *won)
        .count();

    // exactly one of the racing Inserts observes the empty Spot
    assert_eq!(1, winners);

    let mut handle = Domain::register(&GLOBAL, 32).unwrap();
    assert_eq!(1, list.iter(&mut handle).unwrap().count());
}
