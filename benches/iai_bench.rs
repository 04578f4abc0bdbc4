use hazlist::hazard_ptr::{Domain, DomainGlobal};
use hazlist::ordered_list::OrderedList;

static GLOBAL: DomainGlobal = DomainGlobal::new();

fn ordered_list_inserts() -> u64 {
    let mut handle = Domain::register(&GLOBAL, 1024).unwrap();

    let list = OrderedList::new();
    for key in 0..100u64 {
        list.insert(key, &mut handle).unwrap();
    }

    let mut found = 0;
    for key in 0..100u64 {
        if list.find(&key, &mut handle).unwrap() {
            found += 1;
        }
    }
    found
}

fn ordered_list_insert_erase() -> bool {
    let mut handle = Domain::register(&GLOBAL, 1024).unwrap();

    let list = OrderedList::new();
    for key in 0..100u64 {
        list.insert(key, &mut handle).unwrap();
    }
    for key in 0..100u64 {
        list.erase(&key, &mut handle).unwrap();
    }

    handle.reclaim();
    handle.pending() == 0
}

iai::main!(ordered_list_inserts, ordered_list_insert_erase);
