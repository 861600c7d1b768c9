//! Double-buffered registry under a concurrent RT reader.

use super::common::POLL_INTERVAL;
use evo_controller_manager::DoubleBufferedRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const LIST_LEN: usize = 8;

#[test]
fn rt_reader_never_sees_a_torn_list() {
    let registry: Arc<DoubleBufferedRegistry<u64>> =
        Arc::new(DoubleBufferedRegistry::with_poll_interval(POLL_INTERVAL));
    let stop = Arc::new(AtomicBool::new(false));

    let reader = {
        let registry = Arc::clone(&registry);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut last_generation = 0u64;
            let mut views = 0u64;
            while !stop.load(Ordering::SeqCst) {
                // SAFETY: this is the only RT-side thread.
                let view = unsafe { registry.advance_rt_view() };
                if let Some(&generation) = view.first() {
                    assert_eq!(view.len(), LIST_LEN);
                    assert!(view.iter().all(|&g| g == generation), "torn list: {view:?}");
                    assert!(generation >= last_generation, "generation went backwards");
                    last_generation = generation;
                }
                views += 1;
            }
            views
        })
    };

    while registry.rt_slot().is_none() {
        thread::sleep(Duration::from_micros(50));
    }

    for generation in 1..=2000u64 {
        let guard = registry.lock();
        let mut slot = guard.acquire_mutation_slot();
        slot.clear();
        slot.extend(std::iter::repeat_n(generation, LIST_LEN));
        slot.commit();
        assert_eq!(registry.rt_slot(), Some(registry.updated_slot()));
    }

    stop.store(true, Ordering::SeqCst);
    let views = reader.join().unwrap();
    assert!(views > 0);
    assert_eq!(registry.lock().read_current()[0], 2000);
}

#[test]
fn commit_waits_for_the_rt_reader() {
    let registry: Arc<DoubleBufferedRegistry<u32>> =
        Arc::new(DoubleBufferedRegistry::with_poll_interval(POLL_INTERVAL));
    // This thread plays the RT side.
    // SAFETY: no other thread calls advance_rt_view.
    unsafe { registry.advance_rt_view() };
    assert_eq!(registry.rt_slot(), Some(0));

    let committed = Arc::new(AtomicBool::new(false));
    let writer = {
        let registry = Arc::clone(&registry);
        let committed = Arc::clone(&committed);
        thread::spawn(move || {
            let guard = registry.lock();
            let mut slot = guard.acquire_mutation_slot();
            slot.push(7);
            slot.commit();
            committed.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!committed.load(Ordering::SeqCst), "commit returned before the RT side moved");
    assert_eq!(registry.updated_slot(), 1);

    // SAFETY: still the only RT-side caller.
    let view = unsafe { registry.advance_rt_view() };
    assert_eq!(view, &[7]);
    writer.join().unwrap();
    assert!(committed.load(Ordering::SeqCst));
    assert_eq!(registry.rt_slot(), Some(1));
}

#[test]
fn writers_on_several_threads_are_serialized() {
    let registry: Arc<DoubleBufferedRegistry<usize>> =
        Arc::new(DoubleBufferedRegistry::with_poll_interval(POLL_INTERVAL));
    let stop = Arc::new(AtomicBool::new(false));

    let reader = {
        let registry = Arc::clone(&registry);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                // SAFETY: this is the only RT-side thread.
                let view = unsafe { registry.advance_rt_view() };
                let mut sorted = view.to_vec();
                sorted.sort_unstable();
                sorted.dedup();
                assert_eq!(sorted.len(), view.len(), "duplicate entry in {view:?}");
            }
        })
    };

    let writers: Vec<_> = (0..4)
        .map(|id| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for round in 0..100 {
                    let guard = registry.lock();
                    let mut slot = guard.stage_from_current();
                    slot.push(id * 1000 + round);
                    slot.commit();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    stop.store(true, Ordering::SeqCst);
    reader.join().unwrap();
    assert_eq!(registry.lock().read_current().len(), 400);
}
