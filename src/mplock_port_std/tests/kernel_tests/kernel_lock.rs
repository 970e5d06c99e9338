//! The kernel lock grants waiting processors in ticket order, excludes
//! every other processor while held, and survives a release-all/re-acquire
//! round trip.
use mplock::Config;
use mplock_port_std::StdPort;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex as StdMutex,
    },
    thread,
};

use crate::{cpu, kernel, on_each_cpu, wait_until};

#[test]
fn fifo_ticket_order() {
    let k = kernel(4, Config::DEFAULT);
    let order = StdMutex::new(Vec::new());

    k.lock_kernel();

    thread::scope(|s| {
        let mut handles = Vec::new();
        for i in 1..4 {
            let (k, order) = (&k, &order);
            handles.push(StdPort::spawn_scoped_on(s, cpu(i), move || {
                k.lock_kernel();
                order.lock().unwrap().push(i);
                k.unlock_kernel();
            }));

            // Processor `i` has taken ticket `i + 1` before the next one
            // starts
            wait_until(|| k.kernel_lock().ticket().users() == i as u32 + 1);
        }

        k.unlock_kernel();

        for handle in handles {
            handle.join().unwrap();
        }
    });

    assert_eq!(*order.lock().unwrap(), [1, 2, 3]);
    assert!(k.port().reports().is_empty());
}

#[test]
fn mutual_exclusion() {
    const CPUS: usize = 4;
    const ROUNDS: usize = 300;

    let k = kernel(CPUS, Config::DEFAULT);
    let holder = AtomicUsize::new(0);
    let counter = AtomicUsize::new(0);

    on_each_cpu(CPUS, |cpu| {
        for round in 0..ROUNDS {
            let depth = 1 + round % 3;
            for _ in 0..depth {
                k.lock_kernel();
            }

            assert!(k.kernel_lock_held());
            let previous = holder.swap(cpu.index() + 1, Ordering::Relaxed);
            assert_eq!(previous, 0, "{cpu} entered while cpu{} held it", previous.wrapping_sub(1));

            // A non-atomic increment loses updates unless excluded
            let value = counter.load(Ordering::Relaxed);
            thread::yield_now();
            counter.store(value + 1, Ordering::Relaxed);

            holder.store(0, Ordering::Relaxed);
            for _ in 0..depth {
                k.unlock_kernel();
            }
            assert!(!k.kernel_lock_held());
        }
    });

    assert_eq!(counter.load(Ordering::Relaxed), CPUS * ROUNDS);
    assert_eq!(
        k.kernel_lock().ticket().serving(),
        (CPUS * ROUNDS) as u32 + 1
    );
}

#[test]
fn release_all_lets_others_in() {
    let k = kernel(2, Config::DEFAULT);
    let lock = k.kernel_lock();

    lock.acquire_count(&k, 3);
    let depth = lock.release_all(&k);
    assert_eq!(depth, 3);
    assert!(!lock.held(&k));

    thread::scope(|s| {
        StdPort::spawn_scoped_on(s, cpu(1), || {
            k.lock_kernel();
            assert!(lock.held_by(cpu(1)));
            assert!(!lock.held_by(cpu(0)));
            k.unlock_kernel();
        })
        .join()
        .unwrap();
    });

    lock.acquire_count(&k, depth);
    assert_eq!(lock.depth(cpu(0)), 3);
    assert_eq!(lock.release_all_but_one(&k), 2);
    k.unlock_kernel();
    assert!(!lock.held(&k));
    assert!(k.port().reports().is_empty());
}

#[test]
fn spinning_is_accounted() {
    let k = kernel(2, Config::DEFAULT);

    k.lock_kernel();
    thread::scope(|s| {
        let waiter = StdPort::spawn_scoped_on(s, cpu(1), || {
            k.lock_kernel();
            k.unlock_kernel();
        });

        wait_until(|| k.cpu_spinning(cpu(1)) == 1);
        k.unlock_kernel();
        waiter.join().unwrap();
    });

    assert_eq!(k.cpu_spinning(cpu(1)), 0);
}

#[test]
#[should_panic(expected = "not held lock")]
fn release_not_acquired() {
    let k = kernel(2, Config::DEFAULT);
    k.unlock_kernel();
}
