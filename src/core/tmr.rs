//! Software timers: the timer daemon task and its command queue (§4.10)
//!
//! Timers live on one of two intrusive ordered lists (`active[0]`,
//! `active[1]`), keyed by absolute expiry tick, with the roles of
//! "current" and "overflow" swapped by index on tick-counter wrap — the
//! same technique `SchedState` uses for its delayed lists. All requests
//! (start/stop/reset/change-period/delete, plus arbitrary pended function
//! calls used to defer ISR work into task context) go through a
//! fixed-capacity command queue consumed by a single daemon task.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::config::{CFG_TIMER_QUEUE_LEN, CFG_TIMER_TASK_PRIO};
use crate::critical::{critical_section, is_isr_context};
use crate::core::cs_cell::CsCell;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::list::{List, ListItem};
use crate::task::OsTcb;
use crate::types::{OsObjType, OsStkElement, OsTick, OS_TICK_MAX};

/// Command discriminants, numbered exactly as `original_source/include/timers.h`
/// names them, so `kind as i32 >= FIRST_FROM_ISR_COMMAND` is the one
/// predicate that decides "task-originated vs ISR-originated".
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommandKind {
    ExecuteCallbackFromIsr = -2,
    ExecuteCallback = -1,
    StartDontTrace = 0,
    Start = 1,
    Reset = 2,
    Stop = 3,
    ChangePeriod = 4,
    Delete = 5,
    StartFromIsr = 6,
    ResetFromIsr = 7,
    StopFromIsr = 8,
    ChangePeriodFromIsr = 9,
}

pub const FIRST_FROM_ISR_COMMAND: i32 = TimerCommandKind::StartFromIsr as i32;

impl TimerCommandKind {
    #[inline]
    pub fn is_isr_originated(self) -> bool {
        self as i32 >= FIRST_FROM_ISR_COMMAND
    }
}

/// A pended function call: the mechanism ISR code uses to run arbitrary
/// work in the daemon's task context (event-group `set_bits_from_isr` and
/// similar are built on top of this).
pub type PendedFn = extern "C" fn(*mut (), *mut ());

#[derive(Clone, Copy)]
struct TimerCommand {
    kind: TimerCommandKind,
    timer: Option<NonNull<OsTmr>>,
    /// New period for `ChangePeriod*`; unused otherwise.
    time: OsTick,
    pended_fn: Option<PendedFn>,
    arg1: *mut (),
    arg2: *mut (),
}

unsafe impl Send for TimerCommand {}

struct CommandQueue {
    slots: [Option<TimerCommand>; CFG_TIMER_QUEUE_LEN],
    head: usize,
    len: usize,
}

impl CommandQueue {
    const fn new() -> Self {
        CommandQueue {
            slots: [None; CFG_TIMER_QUEUE_LEN],
            head: 0,
            len: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.len == CFG_TIMER_QUEUE_LEN
    }

    fn push(&mut self, cmd: TimerCommand) {
        let idx = (self.head + self.len) % CFG_TIMER_QUEUE_LEN;
        self.slots[idx] = Some(cmd);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<TimerCommand> {
        if self.len == 0 {
            return None;
        }
        let cmd = self.slots[self.head].take();
        self.head = (self.head + 1) % CFG_TIMER_QUEUE_LEN;
        self.len -= 1;
        cmd
    }
}

struct TmrState {
    active: [List<OsTmr>; 2],
    idx: usize,
    queue: CommandQueue,
    last_seen_tick: OsTick,
}

impl TmrState {
    const fn new() -> Self {
        TmrState {
            active: [List::new(), List::new()],
            idx: 0,
            queue: CommandQueue::new(),
            last_seen_tick: 0,
        }
    }
}

static TMR_STATE: CsCell<TmrState> = CsCell::new(TmrState::new());
static DAEMON_TCB_PTR: AtomicPtr<OsTcb> = AtomicPtr::new(core::ptr::null_mut());

unsafe fn state_mut() -> &'static mut TmrState {
    unsafe { TMR_STATE.get_unchecked() }
}

fn daemon_tcb() -> NonNull<OsTcb> {
    NonNull::new(DAEMON_TCB_PTR.load(Ordering::Acquire)).expect("timer daemon not initialized")
}

/// Create the daemon task and prepare the active-timer lists. Called once
/// from `os_init`, already inside a critical section.
pub(crate) unsafe fn init(tcb: *mut OsTcb, stk: *mut OsStkElement, stk_len: usize) {
    unsafe {
        let state = state_mut();
        state.active[0].init();
        state.active[1].init();
        state.idx = 0;
        state.queue = CommandQueue::new();
        state.last_seen_tick = kernel::KERNEL.tick_get();

        crate::task::os_task_create_internal(
            tcb,
            "TmrDaemon",
            daemon_task,
            core::ptr::null_mut(),
            CFG_TIMER_TASK_PRIO,
            stk,
            stk_len,
            0,
            crate::types::opt::NONE,
        )
        .expect("timer daemon creation failed");

        DAEMON_TCB_PTR.store(tcb, Ordering::Release);
    }
}

fn queue_send(cmd: TimerCommand) -> OsResult<()> {
    let was_blocked = critical_section(|_cs| unsafe {
        let state = state_mut();
        if state.queue.is_full() {
            return Err(OsError::TmrQueueFull);
        }
        state.queue.push(cmd);
        Ok(!daemon_tcb().as_ref().is_ready())
    })?;

    if was_blocked {
        let _ = crate::time::os_time_dly_resume(daemon_tcb());
    }
    Ok(())
}

/// Run `callback(arg1, arg2)` in the daemon's task context instead of
/// directly in the caller's (ISR or otherwise). Event-group
/// `set_bits_from_isr`/`clear_from_isr` are built on top of this.
pub fn pend_function_call(callback: PendedFn, arg1: *mut (), arg2: *mut ()) -> OsResult<()> {
    let kind = if is_isr_context() {
        TimerCommandKind::ExecuteCallbackFromIsr
    } else {
        TimerCommandKind::ExecuteCallback
    };

    queue_send(TimerCommand {
        kind,
        timer: None,
        time: 0,
        pended_fn: Some(callback),
        arg1,
        arg2,
    })
}

unsafe fn detach(tmr: NonNull<OsTmr>) {
    unsafe {
        let item = NonNull::from(&mut (*tmr.as_ptr()).item);
        if let Some(mut container) = item.as_ref().container() {
            container.as_mut().remove(item);
        }
    }
}

unsafe fn schedule(tmr: NonNull<OsTmr>, expiry: OsTick, now: OsTick) {
    unsafe {
        let state = state_mut();
        let mut item = NonNull::from(&mut (*tmr.as_ptr()).item);
        item.as_mut().set_value(expiry);
        if expiry < now {
            state.active[1 - state.idx].insert_ordered(item);
        } else {
            state.active[state.idx].insert_ordered(item);
        }
    }
}

fn check_wrap(now: OsTick) {
    unsafe {
        let state = state_mut();
        if now < state.last_seen_tick {
            state.idx = 1 - state.idx;
        }
        state.last_seen_tick = now;
    }
}

fn dispatch(cmd: TimerCommand) {
    critical_section(|_cs| unsafe {
        let now = kernel::KERNEL.tick_get();
        match cmd.kind {
            TimerCommandKind::Start
            | TimerCommandKind::StartFromIsr
            | TimerCommandKind::StartDontTrace
            | TimerCommandKind::Reset
            | TimerCommandKind::ResetFromIsr => {
                if let Some(tmr) = cmd.timer {
                    detach(tmr);
                    let period = (*tmr.as_ptr()).period;
                    let expiry = now.wrapping_add(period);
                    (*tmr.as_ptr()).active = true;
                    schedule(tmr, expiry, now);
                }
            }
            TimerCommandKind::Stop | TimerCommandKind::StopFromIsr => {
                if let Some(tmr) = cmd.timer {
                    detach(tmr);
                    (*tmr.as_ptr()).active = false;
                }
            }
            TimerCommandKind::ChangePeriod | TimerCommandKind::ChangePeriodFromIsr => {
                if let Some(tmr) = cmd.timer {
                    (*tmr.as_ptr()).period = cmd.time;
                    detach(tmr);
                    let expiry = now.wrapping_add(cmd.time);
                    (*tmr.as_ptr()).active = true;
                    schedule(tmr, expiry, now);
                }
            }
            TimerCommandKind::Delete => {
                if let Some(tmr) = cmd.timer {
                    detach(tmr);
                    (*tmr.as_ptr()).active = false;
                    (*tmr.as_ptr()).obj_type = OsObjType::None;
                }
            }
            TimerCommandKind::ExecuteCallback | TimerCommandKind::ExecuteCallbackFromIsr => {
                if let Some(cb) = cmd.pended_fn {
                    cb(cmd.arg1, cmd.arg2);
                }
            }
        }
    });
}

fn process_expired() {
    let now = kernel::KERNEL.tick_get();
    check_wrap(now);

    critical_section(|_cs| unsafe {
        loop {
            let state = state_mut();
            let idx = state.idx;
            let Some(tmr_ptr) = state.active[idx].head_owner() else {
                break;
            };
            let expiry = state.active[idx].head_value();
            if expiry > now {
                break;
            }

            detach(tmr_ptr);

            let tmr = &mut *tmr_ptr.as_ptr();
            if let Some(cb) = tmr.callback {
                cb(tmr_ptr.as_ptr());
            }

            if tmr.auto_reload && tmr.active {
                let new_expiry = expiry.wrapping_add(tmr.period);
                schedule(tmr_ptr, new_expiry, now);
            } else {
                tmr.active = false;
            }
        }
    });
}

fn compute_wait_ticks() -> OsTick {
    critical_section(|_cs| unsafe {
        let state = state_mut();
        let head_value = state.active[state.idx].head_value();
        if head_value == OS_TICK_MAX {
            return OS_TICK_MAX;
        }
        let now = kernel::KERNEL.tick_get();
        head_value.saturating_sub(now)
    })
}

fn daemon_task(_: *mut ()) -> ! {
    loop {
        let wait_ticks = compute_wait_ticks();

        let cmd = critical_section(|_cs| unsafe { state_mut().queue.pop() });
        let cmd = match cmd {
            Some(cmd) => Some(cmd),
            None if wait_ticks == 0 => None,
            None => {
                let _ = crate::time::os_time_dly(wait_ticks);
                critical_section(|_cs| unsafe { state_mut().queue.pop() })
            }
        };

        if let Some(cmd) = cmd {
            dispatch(cmd);
        }

        process_expired();
    }
}

/// A software timer. Periodic (`auto_reload`) or one-shot, invoking
/// `callback(self)` from the daemon task when it expires.
pub struct OsTmr {
    obj_type: OsObjType,
    item: ListItem<OsTmr>,
    period: OsTick,
    auto_reload: bool,
    active: bool,
    callback: Option<fn(*mut OsTmr)>,
}

impl OsTmr {
    pub const fn new() -> Self {
        OsTmr {
            obj_type: OsObjType::None,
            item: ListItem::new(),
            period: 0,
            auto_reload: false,
            active: false,
            callback: None,
        }
    }

    /// Finish construction at the timer's final static address.
    pub fn init(&mut self, period: OsTick, auto_reload: bool, callback: fn(*mut OsTmr)) -> OsResult<()> {
        if period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }
        let self_ptr = NonNull::from(&*self);
        self.period = period;
        self.auto_reload = auto_reload;
        self.callback = Some(callback);
        self.active = false;
        self.item.set_owner(self_ptr);
        self.obj_type = OsObjType::Timer;
        Ok(())
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn send(&mut self, kind: TimerCommandKind, time: OsTick) -> OsResult<()> {
        if self.obj_type != OsObjType::Timer {
            return Err(OsError::ObjType);
        }
        queue_send(TimerCommand {
            kind,
            timer: Some(NonNull::from(&mut *self)),
            time,
            pended_fn: None,
            arg1: core::ptr::null_mut(),
            arg2: core::ptr::null_mut(),
        })
    }

    pub fn start(&mut self) -> OsResult<()> {
        let kind = if is_isr_context() { TimerCommandKind::StartFromIsr } else { TimerCommandKind::Start };
        self.send(kind, 0)
    }

    pub fn reset(&mut self) -> OsResult<()> {
        let kind = if is_isr_context() { TimerCommandKind::ResetFromIsr } else { TimerCommandKind::Reset };
        self.send(kind, 0)
    }

    pub fn stop(&mut self) -> OsResult<()> {
        let kind = if is_isr_context() { TimerCommandKind::StopFromIsr } else { TimerCommandKind::Stop };
        self.send(kind, 0)
    }

    pub fn change_period(&mut self, new_period: OsTick) -> OsResult<()> {
        if new_period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }
        let kind = if is_isr_context() {
            TimerCommandKind::ChangePeriodFromIsr
        } else {
            TimerCommandKind::ChangePeriod
        };
        self.send(kind, new_period)
    }

    pub fn delete(&mut self) -> OsResult<()> {
        self.send(TimerCommandKind::Delete, 0)
    }
}

impl Default for OsTmr {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTmr {}
unsafe impl Sync for OsTmr {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_queue_is_fifo() {
        let mut q = CommandQueue::new();
        assert!(q.pop().is_none());

        for i in 0..CFG_TIMER_QUEUE_LEN {
            let cmd = TimerCommand {
                kind: TimerCommandKind::Start,
                timer: None,
                time: i as OsTick,
                pended_fn: None,
                arg1: core::ptr::null_mut(),
                arg2: core::ptr::null_mut(),
            };
            assert!(!q.is_full() || i == CFG_TIMER_QUEUE_LEN);
            q.push(cmd);
        }
        assert!(q.is_full());

        for i in 0..CFG_TIMER_QUEUE_LEN {
            assert_eq!(q.pop().unwrap().time, i as OsTick);
        }
        assert!(q.pop().is_none());
    }

    #[test]
    fn from_isr_discriminant_threshold() {
        assert!(!TimerCommandKind::Start.is_isr_originated());
        assert!(!TimerCommandKind::Delete.is_isr_originated());
        assert!(TimerCommandKind::StartFromIsr.is_isr_originated());
        assert!(TimerCommandKind::ChangePeriodFromIsr.is_isr_originated());
    }

    #[test]
    fn timer_init_rejects_zero_period() {
        let mut tmr = OsTmr::new();
        assert_eq!(tmr.init(0, false, |_| {}), Err(OsError::TmrInvalidPeriod));
    }
}
