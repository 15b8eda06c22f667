//! Scheduling algorithms and the event-list blocking protocol
//!
//! `switch_context` picks the next task to run; `os_sched` is the public
//! entry point callers use to ask for a (possibly deferred) reschedule.
//! The remaining functions implement the shared protocol every blocking
//! primitive (event groups, and any future primitive) uses to park a task
//! on an event list with an optional timeout and to wake it back up again.

use core::ptr::NonNull;

use crate::kernel;
use crate::list::{List, ListItem};
use crate::task::OsTcb;
use crate::types::{OsPrio, OsTaskState, OsTick, OS_TICK_MAX};

/// §4.7: select the next task to run. If the scheduler is currently
/// suspended, defers by recording that a switch is owed instead of
/// touching the ready lists.
pub fn switch_context() {
    if kernel::KERNEL.scheduler_suspended() > 0 {
        kernel::KERNEL.set_yield_pending(true);
        return;
    }

    kernel::KERNEL.take_yield_pending();

    unsafe {
        let sched = kernel::sched_mut();
        let highest = sched.top_ready_priority();
        if let Some(tcb) = sched.ready_lists[highest as usize].get_owner_of_next_entry() {
            kernel::set_tcb_high_rdy_ptr(Some(tcb));
            kernel::set_prio_high_rdy(highest);
        }
    }
}

/// Main scheduling entry point: selects the next task and asks the port
/// for a context switch if it differs from the one currently running.
/// A no-op before the scheduler is running or from inside an ISR (ISR
/// code paths go through `os_int_exit` instead).
pub fn os_sched() {
    if !kernel::KERNEL.is_running() {
        return;
    }
    if crate::critical::is_isr_context() {
        return;
    }

    let _cs = crate::critical::CriticalSection::enter();

    if kernel::KERNEL.scheduler_suspended() > 0 {
        kernel::KERNEL.set_yield_pending(true);
        return;
    }

    switch_context();

    unsafe {
        if kernel::tcb_high_rdy_ptr() != kernel::tcb_cur_ptr() {
            crate::port::os_ctx_sw();
        }
    }
}

/// Round-robin rotation for tasks sharing a priority (§4.6 step 3),
/// advancing the list's cursor past the current task. A no-op when fewer
/// than two tasks share the priority.
pub(crate) unsafe fn rotate_ready_list(prio: OsPrio) -> bool {
    unsafe {
        let sched = kernel::sched_mut();
        let list = &mut sched.ready_lists[prio as usize];
        if list.len() < 2 {
            return false;
        }
        list.get_owner_of_next_entry();
        true
    }
}

/// Sort key used for ordered event lists: higher priority sorts first
/// (smaller key), so the list head is always the most urgent waiter.
fn ordered_key(prio: OsPrio) -> OsTick {
    kernel::event_key_for_prio(prio)
}

/// Detach the calling task from the ready list and block it on `event_list`
/// in priority order, arming a timeout of `ticks` (or blocking forever if
/// `ticks == OS_TICK_MAX`). Must be called from within a critical section.
pub fn place_on_event_list(event_list: &mut List<OsTcb>, ticks: OsTick) {
    unsafe {
        let Some(tcb) = kernel::tcb_cur_ptr() else {
            return;
        };

        kernel::remove_from_ready(tcb);

        let prio = tcb.as_ref().prio;
        let mut event_item = NonNull::from(&mut (*tcb.as_ptr()).event_item);
        event_item.as_mut().set_value(ordered_key(prio));
        event_list.insert_ordered(event_item);

        (*tcb.as_ptr()).task_state = OsTaskState::Blocked;
        crate::time::add_current_to_delayed(tcb, ticks);
    }
}

/// Like [`place_on_event_list`], but the event list is not kept in
/// priority order: `item_value` is the caller-chosen tag a later bulk scan
/// (event-group bit tests) reads back via the list item.
pub fn place_on_unordered_event_list(event_list: &mut List<OsTcb>, item_value: OsTick, ticks: OsTick) {
    unsafe {
        let Some(tcb) = kernel::tcb_cur_ptr() else {
            return;
        };

        kernel::remove_from_ready(tcb);

        let mut event_item = NonNull::from(&mut (*tcb.as_ptr()).event_item);
        event_item.as_mut().set_value(item_value);
        event_list.insert_end(event_item);

        (*tcb.as_ptr()).task_state = OsTaskState::Blocked;
        crate::time::add_current_to_delayed(tcb, ticks);
    }
}

/// Wake the highest-priority waiter on an ordered event list (its head).
/// Returns `true` if the woken task outranks the one currently running,
/// i.e. the caller should request a reschedule.
pub fn remove_from_event_list(event_list: &mut List<OsTcb>) -> bool {
    unsafe {
        let Some(tcb) = event_list.head_owner() else {
            return false;
        };

        let event_item = NonNull::from(&mut (*tcb.as_ptr()).event_item);
        event_list.remove(event_item);
        kernel::detach_state_item(tcb);

        if kernel::KERNEL.scheduler_suspended() > 0 {
            let sched = kernel::sched_mut();
            sched.pending_ready_list.insert_end(event_item);
            false
        } else {
            kernel::add_to_ready(tcb);
            tcb.as_ref().prio > kernel::current_prio()
        }
    }
}

/// Wake one specific waiter found during an unordered-list scan (event
/// groups' `set_bits`). `item` must belong to `event_list`.
pub fn remove_from_unordered_event_list(mut item: NonNull<ListItem<OsTcb>>) -> bool {
    unsafe {
        let Some(mut container) = item.as_ref().container() else {
            return false;
        };
        container.as_mut().remove(item);

        let Some(tcb) = item.as_ref().owner() else {
            return false;
        };
        kernel::detach_state_item(tcb);

        if kernel::KERNEL.scheduler_suspended() > 0 {
            let sched = kernel::sched_mut();
            sched.pending_ready_list.insert_end(item);
            false
        } else {
            kernel::add_to_ready(tcb);
            tcb.as_ref().prio > kernel::current_prio()
        }
    }
}

/// Reset a task's event-list sort key back to its priority-ordered form
/// after it has been used for an unordered wait, so a subsequent ordinary
/// (priority-ordered) wait on the task behaves correctly.
pub fn reset_event_item_value(tcb: NonNull<OsTcb>) {
    unsafe {
        (*tcb.as_ptr()).event_item.set_value(ordered_key(tcb.as_ref().prio));
    }
}

/// Called when a blocked task's delay expires without the condition it was
/// waiting for being met. Detaches it from both the event list and the
/// delayed list and makes it ready.
pub(crate) unsafe fn wake_on_timeout(tcb: NonNull<OsTcb>) {
    unsafe {
        kernel::detach_event_item(tcb);
        kernel::detach_state_item(tcb);
        kernel::add_to_ready(tcb);
    }
}

/// `true` when `ticks` means "block forever" for event-list placement.
#[inline]
pub fn is_indefinite(ticks: OsTick) -> bool {
    ticks == OS_TICK_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_indefinite_only_for_max_tick() {
        assert!(is_indefinite(OS_TICK_MAX));
        assert!(!is_indefinite(0));
        assert!(!is_indefinite(OS_TICK_MAX - 1));
    }

    #[test]
    fn ordered_key_inverts_priority() {
        let high = ordered_key(20);
        let low = ordered_key(5);
        assert!(high < low, "a higher priority must sort before a lower one");
    }
}
