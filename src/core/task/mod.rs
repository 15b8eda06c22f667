//! Task management module
//!
//! Provides task creation, deletion, suspension and resumption.

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::config::{CFG_PRIO_MAX, CFG_STK_SIZE_MIN, CFG_TIME_QUANTA_DEFAULT};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::types::{AllocOrigin, OsPrio, OsStkElement, OsTaskState, OsTick};

/// Task entry point function type
pub type OsTaskFn = fn(*mut ()) -> !;

#[allow(clippy::too_many_arguments)]
unsafe fn create_common(
    tcb: *mut OsTcb,
    name: &str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: OsTick,
    alloc_origin: AllocOrigin,
) -> OsResult<NonNull<OsTcb>> {
    if tcb.is_null() {
        return Err(OsError::TcbInvalid);
    }
    if stk_base.is_null() {
        return Err(OsError::StkInvalid);
    }
    if stk_size < CFG_STK_SIZE_MIN {
        return Err(OsError::StkSizeInvalid);
    }
    if prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::PrioInvalid);
    }

    let tcb_ref = unsafe { &mut *tcb };
    tcb_ref.init();
    tcb_ref.set_name(name);
    tcb_ref.prio = prio;
    tcb_ref.base_prio = prio;
    tcb_ref.time_quanta = time_quanta;
    tcb_ref.time_quanta_ctr = time_quanta;
    tcb_ref.alloc_origin = alloc_origin;

    let stk_ptr = unsafe {
        crate::port::os_task_stk_init(task_fn, arg, stk_base, stk_size, crate::types::opt::NONE)
    };
    tcb_ref.stk_ptr = stk_ptr;
    tcb_ref.stk_base = stk_base;
    tcb_ref.stk_size = stk_size;

    tcb_ref.task_entry_addr = task_fn as usize as u32;
    tcb_ref.task_entry_arg = arg;

    tcb_ref.bind_self();

    let tcb_nonnull = unsafe { NonNull::new_unchecked(tcb) };
    unsafe {
        kernel::add_to_ready(tcb_nonnull);
    }

    Ok(tcb_nonnull)
}

/// Create a new task using static references. This is the recommended way
/// to create tasks: both the TCB and the stack are caller-provided static
/// storage (the only allocation mode this build supports).
///
/// # Example
/// ```ignore
/// static mut TASK_TCB: OsTcb = OsTcb::new();
/// static mut TASK_STK: [OsStkElement; 256] = [0; 256];
///
/// fn my_task(_: *mut ()) -> ! {
///     loop { /* ... */ }
/// }
///
/// os_task_create(
///     unsafe { &mut TASK_TCB },
///     unsafe { &mut TASK_STK },
///     "MyTask",
///     my_task,
///     5,
/// ).expect("Task creation failed");
/// ```
pub fn os_task_create(
    tcb: &'static mut OsTcb,
    stack: &'static mut [OsStkElement],
    name: &str,
    task_fn: OsTaskFn,
    prio: OsPrio,
) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskCreateIsr);
    }

    critical_section(|_cs| unsafe {
        create_common(
            tcb as *mut OsTcb,
            name,
            task_fn,
            core::ptr::null_mut(),
            prio,
            stack.as_mut_ptr(),
            stack.len(),
            CFG_TIME_QUANTA_DEFAULT,
            AllocOrigin::StaticStackStaticTcb,
        )?;

        if kernel::KERNEL.is_running() {
            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Internal task creation for kernel use (idle task, timer daemon). Runs
/// without a surrounding critical section of its own since callers
/// (`os_init`) already hold one.
#[doc(hidden)]
pub unsafe fn os_task_create_internal(
    tcb: *mut OsTcb,
    name: &str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: OsTick,
    _opt: crate::types::OsOpt,
) -> OsResult<()> {
    unsafe {
        create_common(
            tcb,
            name,
            task_fn,
            arg,
            prio,
            stk_base,
            stk_size,
            time_quanta,
            AllocOrigin::StaticStackStaticTcb,
        )
        .map(|_| ())
    }
}

/// Delete a task. Passing `None` deletes the calling task.
///
/// The TCB's storage is never freed by this build (`CFG_SUPPORT_DYNAMIC_ALLOCATION`
/// is false): the task is moved to the termination list and the idle task
/// decrements `tasks_waiting_cleanup` once it has passed over the TCB, per §4.2.
pub fn os_task_del(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::TaskDelIsr);
    }

    critical_section(|_cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?,
        };

        let prio = unsafe { tcb_ptr.as_ref().prio };
        if prio == crate::config::CFG_PRIO_IDLE {
            return Err(OsError::TaskDelIdle);
        }

        unsafe {
            if tcb_ptr.as_ref().is_ready() {
                kernel::remove_from_ready(tcb_ptr);
            } else {
                kernel::detach_state_item(tcb_ptr);
            }
            kernel::detach_event_item(tcb_ptr);
        }

        let is_current = unsafe { kernel::tcb_cur_ptr() } == Some(tcb_ptr);

        unsafe {
            let tcb_mut = &mut *tcb_ptr.as_ptr();
            tcb_mut.task_state = OsTaskState::Terminated;
            let item_ptr = NonNull::from(&mut tcb_mut.state_item);
            let sched = kernel::sched_mut();
            sched.termination_list.insert_end(item_ptr);
            sched.tasks_waiting_cleanup += 1;
        }

        if is_current {
            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Explicitly suspend a task regardless of what it is currently doing
/// (ready, blocked with a timeout, or already blocked indefinitely).
/// Passing `None` suspends the calling task.
pub fn os_task_suspend(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::TaskSuspendIsr);
    }

    critical_section(|_cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?,
        };

        let prio = unsafe { tcb_ptr.as_ref().prio };
        if prio == crate::config::CFG_PRIO_IDLE {
            return Err(OsError::TaskSuspendIdle);
        }

        unsafe {
            if tcb_ptr.as_ref().is_ready() {
                kernel::remove_from_ready(tcb_ptr);
            } else {
                kernel::detach_state_item(tcb_ptr);
            }
            kernel::detach_event_item(tcb_ptr);

            let tcb_mut = &mut *tcb_ptr.as_ptr();
            tcb_mut.task_state = OsTaskState::Suspended;
            let item_ptr = NonNull::from(&mut tcb_mut.state_item);
            kernel::sched_mut().suspended_list.insert_end(item_ptr);
        }

        let is_current = unsafe { kernel::tcb_cur_ptr() } == Some(tcb_ptr);
        if is_current {
            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Resume an explicitly-suspended task, making it ready immediately. Does
/// not restore a prior delay: a task suspended mid-delay wakes up ready,
/// not re-armed with its remaining timeout, matching the deferred-timeout
/// semantics chosen for `abort_delay`.
pub fn os_task_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::TaskResumeIsr);
    }

    critical_section(|_cs| {
        if unsafe { !tcb.as_ref().is_suspended() } {
            return Err(OsError::TaskNotSuspended);
        }

        unsafe {
            kernel::detach_state_item(tcb);
            kernel::add_to_ready(tcb);
        }

        crate::sched::os_sched();
        Ok(())
    })
}

/// ISR-safe resume. If the scheduler is currently suspended, the task is
/// parked on the pending-ready list instead and picked up by
/// `os_sched_resume_all` (§4.5).
pub fn os_task_resume_from_isr(tcb: NonNull<OsTcb>) -> OsResult<bool> {
    critical_section(|_cs| {
        if unsafe { !tcb.as_ref().is_suspended() } {
            return Err(OsError::TaskNotSuspended);
        }

        unsafe {
            kernel::detach_state_item(tcb);

            if kernel::KERNEL.scheduler_suspended() > 0 {
                let item_ptr = NonNull::from(&mut (*tcb.as_ptr()).event_item);
                kernel::sched_mut().pending_ready_list.insert_end(item_ptr);
                Ok(false)
            } else {
                kernel::add_to_ready(tcb);
                Ok(tcb.as_ref().prio > kernel::current_prio())
            }
        }
    })
}
