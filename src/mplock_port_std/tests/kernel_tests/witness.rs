//! Lock-order reversals observed on different processors
use mplock::{Config, Ipl, LockFlags, LockType, Mutex, Report, WitnessMode};
use mplock_port_std::StdPort;
use std::thread;

use crate::{cpu, kernel};

static VNODE: LockType = LockType::new("vnode");
static BUFQ: LockType = LockType::new("bufq");

fn named(name: &'static str, ty: &'static LockType) -> Mutex {
    Mutex::with_name(Ipl::BIO, name, ty, LockFlags::WITNESS)
}

#[test]
fn reversal_across_processors() {
    let k = kernel(2, Config::DEFAULT);
    let (a, b) = (named("vn0", &VNODE), named("bq0", &BUFQ));

    // cpu0: A then B
    a.enter(&k);
    b.enter(&k);
    b.leave(&k);
    a.leave(&k);

    // cpu1: B then A
    thread::scope(|s| {
        StdPort::spawn_scoped_on(s, cpu(1), || {
            b.enter(&k);
            a.enter(&k);
            a.leave(&k);
            b.leave(&k);
        })
        .join()
        .unwrap();
    });

    let reports = k.port().reports();
    assert_eq!(
        reports,
        [Report::LockOrderReversal {
            first: b.lock_object().info(),
            second: a.lock_object().info(),
            cpu: cpu(1),
        }]
    );
    assert!(reports[0].to_string().contains("lock order reversal"));
}

#[test]
fn consistent_order() {
    let k = kernel(2, Config::DEFAULT);
    let (a, b) = (named("vn0", &VNODE), named("bq0", &BUFQ));

    crate::on_each_cpu(2, |_| {
        for _ in 0..50 {
            a.enter(&k);
            b.enter(&k);
            b.leave(&k);
            a.leave(&k);
        }
    });

    assert!(k.port().reports().is_empty());
    assert!(k.witness_order_recorded(a.lock_object(), b.lock_object()));
    k.witness_dump();
}

#[test]
fn order_is_per_type() {
    let k = kernel(1, Config::DEFAULT);
    let (a0, b0) = (named("vn0", &VNODE), named("bq0", &BUFQ));
    let (a1, b1) = (named("vn1", &VNODE), named("bq1", &BUFQ));

    a0.enter(&k);
    b0.enter(&k);
    b0.leave(&k);
    a0.leave(&k);

    // Different instances, same types, reversed
    b1.enter(&k);
    a1.enter(&k);
    a1.leave(&k);
    b1.leave(&k);

    let reports = k.port().reports();
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0], Report::LockOrderReversal { .. }));
}

#[test]
fn kernel_lock_is_ordered() {
    let k = kernel(1, Config::DEFAULT);
    let a = named("vn0", &VNODE);

    k.lock_kernel();
    a.enter(&k);
    a.leave(&k);
    k.unlock_kernel();

    a.enter(&k);
    k.lock_kernel();
    k.unlock_kernel();
    a.leave(&k);

    let reports = k.port().reports();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        reports[0],
        Report::LockOrderReversal { first, second, .. }
            if first == a.lock_object().info()
                && second == k.kernel_lock().lock_object().info()
    ));
}

#[test]
fn fatal_mode_stops_the_kernel() {
    let k = kernel(1, Config::DEFAULT.witness(WitnessMode::Fatal));
    let (a, b) = (named("vn0", &VNODE), named("bq0", &BUFQ));

    a.enter(&k);
    b.enter(&k);
    b.leave(&k);
    a.leave(&k);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        b.enter(&k);
        a.enter(&k);
    }));

    assert!(result.is_err());
    assert!(k.is_panicking());
    assert_eq!(k.port().reports().len(), 1);
}

#[test]
fn kernels_keep_separate_orders() {
    let k1 = kernel(2, Config::DEFAULT);
    let k2 = kernel(2, Config::DEFAULT.witness(WitnessMode::Fatal));
    let (a, b) = (named("vn0", &VNODE), named("bq0", &BUFQ));

    a.enter(&k1);
    b.enter(&k1);
    b.leave(&k1);
    a.leave(&k1);

    // Reversed, but `k2` has never seen the first order
    b.enter(&k2);
    a.enter(&k2);
    a.leave(&k2);
    b.leave(&k2);

    assert!(k1.port().reports().is_empty());
    assert!(k2.port().reports().is_empty());
    assert!(!k2.is_panicking());
    assert!(k1.witness_order_recorded(a.lock_object(), b.lock_object()));
    assert!(k2.witness_order_recorded(b.lock_object(), a.lock_object()));
    assert!(!k2.witness_order_recorded(a.lock_object(), b.lock_object()));
}
