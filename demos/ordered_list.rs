use std::sync::Arc;
use std::thread;

use hazlist::hazard_ptr::{Domain, DomainGlobal};
use hazlist::ordered_list::OrderedList;

const THREADS: u64 = 4;
const KEYS: u64 = 10000;

static GLOBAL: DomainGlobal = DomainGlobal::new();

pub fn main() {
    let list = Arc::new(OrderedList::new());

    let ths: Vec<_> = (0..THREADS)
        .map(|thread_nr| {
            let c_list = list.clone();
            thread::spawn(move || {
                let mut handle = Domain::register(&GLOBAL, 64).unwrap();

                let start = std::time::Instant::now();
                for i in 0..KEYS {
                    let key = i * THREADS + thread_nr;
                    c_list.insert(key, &mut handle).unwrap();
                }
                for i in 0..KEYS {
                    let key = i * THREADS + thread_nr;
                    assert!(c_list.erase(&key, &mut handle).unwrap());
                }
                let duration = start.elapsed();

                println!("Duration: {:?} / {}", duration, 2 * KEYS);
                println!("Duration-Per-Op: {:?}", duration / (2 * KEYS) as u32);
            })
        })
        .collect();

    for th in ths {
        th.join().unwrap();
    }

    let mut handle = Domain::register(&GLOBAL, 64).unwrap();
    handle.reclaim();
    println!("Remaining: {}", list.iter(&mut handle).unwrap().count());
}
