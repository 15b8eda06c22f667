//! Time management module
//!
//! Delays, timeouts, and the tick-advancement algorithm (§4.3/§4.6): moving
//! expired tasks off the delayed lists, swapping the current/overflow
//! delayed lists on tick-counter wrap, and driving round-robin time
//! slicing.

use core::ptr::NonNull;

use crate::config::{CFG_TICK_RATE_HZ, CFG_USE_TIME_SLICING};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{OsTaskState, OsTick, OS_TICK_MAX};

/// Delay the calling task for `ticks` system ticks. `ticks == 0` returns
/// immediately without yielding.
pub fn os_time_dly(ticks: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }
    if ticks == 0 {
        return Ok(());
    }

    critical_section(|_cs| unsafe {
        if let Some(cur) = kernel::tcb_cur_ptr() {
            kernel::remove_from_ready(cur);
            (*cur.as_ptr()).task_state = OsTaskState::Blocked;
            add_current_to_delayed(cur, ticks);
        }
    });

    sched::os_sched();
    Ok(())
}

/// Delay expressed as hours/minutes/seconds/milliseconds, converted to
/// ticks at `CFG_TICK_RATE_HZ`.
pub fn os_time_dly_hmsm(hours: u16, minutes: u8, seconds: u8, milliseconds: u16) -> OsResult<()> {
    if minutes > 59 || seconds > 59 || milliseconds > 999 {
        return Err(OsError::StateInvalid);
    }

    let total_ms =
        (hours as u32) * 3_600_000 + (minutes as u32) * 60_000 + (seconds as u32) * 1000 + (milliseconds as u32);
    let ticks = (total_ms * CFG_TICK_RATE_HZ) / 1000;

    os_time_dly(ticks)
}

/// Block until `*prev_wake + increment`, for tasks that want a fixed wakeup
/// cadence instead of a fixed inter-call delay (repeated calls with the same
/// `increment` produce wakeups spaced exactly `increment` ticks apart, as
/// long as the task keeps up). The wake time is compared against the current
/// tick on the circular tick axis, grounded on `xTaskDelayUntil`
/// (`examples/original_source/tasks.c`), so a wrap on either side is handled
/// without special-casing: delay iff the wake time is strictly in the future.
pub fn os_time_dly_until(prev_wake: &mut OsTick, increment: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }

    let should_delay = critical_section(|_cs| {
        let current_tick = kernel::KERNEL.tick_get();
        let time_to_wake = prev_wake.wrapping_add(increment);

        let should_delay = if current_tick < *prev_wake {
            // The tick count wrapped since the last call; only delay if the
            // wake time wrapped too and still lies ahead of now.
            time_to_wake < *prev_wake && time_to_wake > current_tick
        } else {
            time_to_wake < *prev_wake || time_to_wake > current_tick
        };

        *prev_wake = time_to_wake;

        if should_delay {
            unsafe {
                if let Some(cur) = kernel::tcb_cur_ptr() {
                    kernel::remove_from_ready(cur);
                    (*cur.as_ptr()).task_state = OsTaskState::Blocked;
                    add_current_to_delayed(cur, time_to_wake.wrapping_sub(current_tick));
                }
            }
        }

        should_delay
    });

    if should_delay {
        sched::os_sched();
    }
    Ok(())
}

/// Wake a delayed or indefinitely-blocked task early, as if its timeout
/// had simply elapsed (no `Abort` pend status, unlike [`os_time_abort_delay`]).
pub fn os_time_dly_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }

    critical_section(|_cs| unsafe {
        if !(tcb.as_ref().is_blocked() || tcb.as_ref().is_suspended()) {
            return Err(OsError::TaskNotDly);
        }

        kernel::detach_state_item(tcb);
        kernel::detach_event_item(tcb);
        kernel::add_to_ready(tcb);

        Ok(())
    })?;

    sched::os_sched();
    Ok(())
}

/// §4.3 abort_delay: forcibly wake a task blocked on a timeout (or blocked
/// indefinitely) before its condition is met, setting `delay_aborted` so the
/// waiter can tell "aborted" apart from "timed out"/"matched" once it runs
/// again — `wait_bits`/`sync` surface this as `OsError::PendAbort`.
pub fn os_time_abort_delay(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    let should_yield = critical_section(|_cs| unsafe {
        if !tcb.as_ref().is_blocked() {
            return Err(OsError::TaskNotDly);
        }

        kernel::detach_state_item(tcb);
        kernel::detach_event_item(tcb);
        (*tcb.as_ptr()).delay_aborted = true;

        Ok(if kernel::KERNEL.scheduler_suspended() > 0 {
            let item = NonNull::from(&mut (*tcb.as_ptr()).event_item);
            kernel::sched_mut().pending_ready_list.insert_end(item);
            false
        } else {
            kernel::add_to_ready(tcb);
            tcb.as_ref().prio > kernel::current_prio()
        })
    })?;

    if should_yield {
        sched::os_sched();
    }
    Ok(())
}

/// Current tick count.
#[inline]
pub fn os_time_get() -> OsTick {
    kernel::KERNEL.tick_get()
}

/// §4.3 add_current_to_delayed: park `tcb` on the appropriate delayed list
/// (or the suspended list, for an indefinite wait), clearing `delay_aborted`
/// so a stale abort from a previous wait doesn't leak into this one. Called
/// both by `os_time_dly` and by the event-list placement functions in
/// [`crate::sched`] when a blocking call carries a timeout.
pub(crate) unsafe fn add_current_to_delayed(tcb: NonNull<OsTcb>, ticks: OsTick) {
    unsafe {
        (*tcb.as_ptr()).delay_aborted = false;

        if sched::is_indefinite(ticks) {
            let mut item = NonNull::from(&mut (*tcb.as_ptr()).state_item);
            item.as_mut().set_value(OS_TICK_MAX);
            kernel::sched_mut().suspended_list.insert_end(item);
            return;
        }

        let current_tick = kernel::KERNEL.tick_get();
        let wake_at = current_tick.wrapping_add(ticks);

        let mut item = NonNull::from(&mut (*tcb.as_ptr()).state_item);
        item.as_mut().set_value(wake_at);

        let sched = kernel::sched_mut();
        if wake_at < current_tick {
            // Wrapped past OsTick::MAX: this task belongs with the tasks
            // that were already delayed across the next tick-counter wrap.
            sched.overflow_delayed().insert_ordered(item);
        } else {
            sched.current_delayed().insert_ordered(item);
            if wake_at < sched.next_task_unblock_time() {
                sched.set_next_task_unblock_time(wake_at);
            }
        }
    }
}

/// §4.6 tick-advancement algorithm: advance the tick counter by one,
/// swapping the delayed-list roles on wraparound, waking every task whose
/// delay has now elapsed, and rotating the ready list for time-sliced
/// round robin. Returns whether a higher-priority task became ready.
pub(crate) fn tick_advance() -> bool {
    let mut yield_needed = false;

    unsafe {
        let new_tick = kernel::KERNEL.tick_increment();

        if new_tick == 0 {
            kernel::sched_mut().swap_delayed_lists();
        }

        while kernel::sched_mut().next_task_unblock_time() <= new_tick {
            let sched = kernel::sched_mut();
            let Some(tcb) = sched.current_delayed().head_owner() else {
                sched.set_next_task_unblock_time(OS_TICK_MAX);
                break;
            };

            let wake_at = sched.current_delayed().head_value();
            if wake_at > new_tick {
                sched.set_next_task_unblock_time(wake_at);
                break;
            }

            sched::wake_on_timeout(tcb);

            if tcb.as_ref().prio > kernel::current_prio() {
                yield_needed = true;
            }

            let next_head = kernel::sched_mut().current_delayed().head_value();
            kernel::sched_mut().set_next_task_unblock_time(next_head);
        }

        if CFG_USE_TIME_SLICING {
            if let Some(cur) = kernel::tcb_cur_ptr() {
                let cur_ref = &mut *cur.as_ptr();
                if cur_ref.time_quanta > 0 {
                    cur_ref.time_quanta_ctr = cur_ref.time_quanta_ctr.saturating_sub(1);
                    if cur_ref.time_quanta_ctr == 0 {
                        cur_ref.time_quanta_ctr = cur_ref.time_quanta;
                        if sched::rotate_ready_list(cur_ref.prio) {
                            yield_needed = true;
                        }
                    }
                }
            }
        }
    }

    yield_needed
}

/// Tick handler invoked by the port's system-tick interrupt. Ticks that
/// arrive while the scheduler is suspended are counted in
/// `pended_ticks` and replayed by `os_sched_resume_all` (§4.5) instead of
/// being processed here.
pub fn os_tick_handler() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    kernel::KERNEL.int_enter();

    if kernel::KERNEL.scheduler_suspended() > 0 {
        kernel::KERNEL.pend_tick();
    } else {
        let yield_needed = critical_section(|_cs| tick_advance());
        if yield_needed {
            kernel::KERNEL.set_yield_pending(true);
        }
    }

    kernel::os_int_exit();
}

/// SysTick interrupt handler.
#[no_mangle]
pub extern "C" fn SysTick() {
    os_tick_handler();
}
