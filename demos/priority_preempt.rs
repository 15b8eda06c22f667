//! Priority Preemption Demo
//!
//! Three tasks: Low(5), Med(10), High(15) — higher number preempts lower.
//! Med is CPU-bound; High wakes periodically and should always cut in
//! ahead of Med, regardless of how long Med has been running.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use ucosiii::os_task_create;
use ucosiii::task::OsTcb;
use ucosiii::time::os_time_dly;
use ucosiii::types::OsStkElement;

static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
static MED_RUNS: AtomicU32 = AtomicU32::new(0);
static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

static mut HIGH_STK: [OsStkElement; 256] = [0; 256];
static mut HIGH_TCB: OsTcb = OsTcb::new();
static mut MED_STK: [OsStkElement; 256] = [0; 256];
static mut MED_TCB: OsTcb = OsTcb::new();
static mut LOW_STK: [OsStkElement; 256] = [0; 256];
static mut LOW_TCB: OsTcb = OsTcb::new();

/// Highest priority: wakes every 100 ticks, should preempt Med instantly.
fn high_task_fn(_arg: *mut ()) -> ! {
    loop {
        let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[HIGH] ran #{}", n);
        let _ = os_time_dly(100);
    }
}

/// Medium priority: CPU-bound, never yields voluntarily except at the end
/// of each burst. Demonstrates that High still cuts in mid-burst.
fn med_task_fn(_arg: *mut ()) -> ! {
    loop {
        let n = MED_RUNS.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[MED] burst #{}", n);
        for _ in 0..200_000 {
            cortex_m::asm::nop();
        }
        let _ = os_time_dly(10);
    }
}

/// Lowest priority: only runs when both High and Med are blocked.
fn low_task_fn(_arg: *mut ()) -> ! {
    loop {
        let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[LOW] ran #{}", n);
        let _ = os_time_dly(500);
    }
}

#[entry]
fn main() -> ! {
    info!("Priority Preemption Demo: Low(5) Med(10) High(15)");

    ucosiii::os_init().expect("OS init failed");

    unsafe {
        os_task_create(&mut LOW_TCB, &mut LOW_STK, "L", low_task_fn, 5).unwrap();
        os_task_create(&mut MED_TCB, &mut MED_STK, "M", med_task_fn, 10).unwrap();
        os_task_create(&mut HIGH_TCB, &mut HIGH_STK, "H", high_task_fn, 15).unwrap();
    }

    info!("Starting...");
    ucosiii::os_start().expect("OS start failed");

    loop {
        cortex_m::asm::wfi();
    }
}
