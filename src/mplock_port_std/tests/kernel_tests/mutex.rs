//! `Mutex` across simulated processors
use mplock::{Config, Ipl, Mutex};
use mplock_port_std::StdPort;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use crate::{cpu, kernel, on_each_cpu, wait_until};

#[test]
fn mutual_exclusion_at_raised_ipl() {
    const CPUS: usize = 4;
    const ROUNDS: usize = 500;

    let k = kernel(CPUS, Config::DEFAULT);
    let mtx = Mutex::new(Ipl::NET);
    let holder = AtomicUsize::new(0);
    let counter = AtomicUsize::new(0);

    on_each_cpu(CPUS, |cpu| {
        for round in 0..ROUNDS {
            if round % 4 == 0 {
                while !mtx.try_enter(&k) {
                    thread::yield_now();
                }
            } else {
                mtx.enter(&k);
            }

            assert_eq!(mtx.owner(), Some(cpu));
            assert!(k.port().ipl_of(cpu) >= Ipl::NET);
            assert_eq!(holder.swap(cpu.index() + 1, Ordering::Relaxed), 0);

            let value = counter.load(Ordering::Relaxed);
            thread::yield_now();
            counter.store(value + 1, Ordering::Relaxed);

            holder.store(0, Ordering::Relaxed);
            mtx.leave(&k);
            assert_eq!(k.port().ipl_of(cpu), Ipl::NONE);
        }
        assert_eq!(k.mutex_level(cpu), 0);
    });

    assert_eq!(counter.load(Ordering::Relaxed), CPUS * ROUNDS);
    assert_eq!(mtx.owner(), None);
}

#[test]
fn failed_try_enter_restores_ipl() {
    let k = kernel(2, Config::DEFAULT);
    let mtx = Mutex::new(Ipl::CLOCK);

    mtx.enter(&k);
    thread::scope(|s| {
        StdPort::spawn_scoped_on(s, cpu(1), || {
            k.port().set_ipl(Ipl::BIO);
            assert!(!mtx.try_enter(&k));
            assert_eq!(k.port().ipl_of(cpu(1)), Ipl::BIO);
            assert_eq!(k.mutex_level(cpu(1)), 0);
        })
        .join()
        .unwrap();
    });
    mtx.leave(&k);
}

#[test]
fn waiter_gets_mutex_after_leave() {
    let k = kernel(2, Config::DEFAULT);
    let mtx = Mutex::new(Ipl::TTY);

    mtx.enter(&k);
    thread::scope(|s| {
        let waiter = StdPort::spawn_scoped_on(s, cpu(1), || {
            mtx.enter(&k);
            let owner = mtx.owner();
            mtx.leave(&k);
            owner
        });

        wait_until(|| k.cpu_spinning(cpu(1)) == 1);
        assert_eq!(mtx.owner(), Some(cpu(0)));
        mtx.leave(&k);

        assert_eq!(waiter.join().unwrap(), Some(cpu(1)));
    });
}

#[test]
#[should_panic(expected = "locking against myself")]
fn acquire_held_by_self() {
    let k = kernel(2, Config::DEFAULT);
    let mtx = Mutex::new(Ipl::BIO);
    mtx.enter(&k);
    mtx.enter(&k);
}

#[test]
#[should_panic(expected = "not owned by this CPU")]
fn release_never_acquired() {
    let k = kernel(2, Config::DEFAULT);
    let mtx = Mutex::new(Ipl::BIO);
    mtx.leave(&k);
}

#[test]
fn release_held_by_other() {
    let k = kernel(2, Config::DEFAULT);
    let mtx = Mutex::new(Ipl::NONE);

    mtx.enter(&k);
    let result = thread::scope(|s| {
        StdPort::spawn_scoped_on(s, cpu(1), || mtx.leave(&k)).join()
    });

    assert!(result.is_err());
    // The failed release is fatal and leaves the kernel panicking
    assert!(k.is_panicking());
}
