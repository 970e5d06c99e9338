//! A processor stuck spinning is reported once per exhausted spin budget
//! and keeps spinning.
use mplock::{Config, CpuId, Ipl, Mutex, Report};
use mplock_port_std::StdPort;
use std::thread;

use crate::{cpu, kernel, wait_until};

const BUDGET: u32 = 5;

fn spun_out_on(reports: &[Report], on: CpuId) -> Vec<&'static str> {
    reports
        .iter()
        .filter_map(|r| match *r {
            Report::SpunOut { func, cpu, .. } if cpu == on => Some(func),
            _ => None,
        })
        .collect()
}

#[test]
fn mutex_spinout() {
    let k = kernel(2, Config::DEFAULT.spinout(BUDGET));
    let mtx = Mutex::new(Ipl::BIO);

    mtx.enter(&k);
    thread::scope(|s| {
        let waiter = StdPort::spawn_scoped_on(s, cpu(1), || {
            mtx.enter(&k);
            mtx.leave(&k);
        });

        wait_until(|| k.port().busy_cycles(cpu(1)) >= 4 * BUDGET as u64 + 3);
        mtx.leave(&k);
        waiter.join().unwrap();
    });

    let cycles = k.port().busy_cycles(cpu(1));
    let spun_out = spun_out_on(&k.port().reports(), cpu(1));
    assert!(spun_out.len() >= 4);
    assert_eq!(spun_out.len() as u64, cycles / BUDGET as u64);
    assert!(spun_out.iter().all(|&func| func == "Mutex::enter"));
}

#[test]
fn kernel_lock_spinout() {
    let k = kernel(2, Config::DEFAULT.spinout(BUDGET));

    k.lock_kernel();
    thread::scope(|s| {
        let waiter = StdPort::spawn_scoped_on(s, cpu(1), || {
            k.lock_kernel();
            k.unlock_kernel();
        });

        wait_until(|| k.port().busy_cycles(cpu(1)) >= 2 * BUDGET as u64);
        k.unlock_kernel();
        waiter.join().unwrap();
    });

    let cycles = k.port().busy_cycles(cpu(1));
    let spun_out = spun_out_on(&k.port().reports(), cpu(1));
    assert_eq!(spun_out.len() as u64, cycles / BUDGET as u64);
    assert!(spun_out.iter().all(|&func| func == "MpLock::lock"));
}

#[test]
fn disabled_budget() {
    let k = kernel(2, Config::DEFAULT);
    let mtx = Mutex::new(Ipl::NONE);

    mtx.enter(&k);
    thread::scope(|s| {
        let waiter = StdPort::spawn_scoped_on(s, cpu(1), || {
            mtx.enter(&k);
            mtx.leave(&k);
        });

        wait_until(|| k.port().busy_cycles(cpu(1)) >= 100);
        mtx.leave(&k);
        waiter.join().unwrap();
    });

    assert!(k.port().reports().is_empty());
}
