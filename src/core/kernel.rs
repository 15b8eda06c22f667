//! Global kernel state and initialization
//!
//! This module owns the scheduler singleton: the atomic kernel flags, the
//! per-priority ready lists, the two delayed-task lists, the suspended and
//! termination lists, and the CPU context-switch state the port reads
//! directly. Initialization, starting the scheduler, and the
//! suspend/resume-all deferred-work protocol live here because they all
//! operate directly on this shared state.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::{CFG_MAX_TASK_NAME_LEN, CFG_PRIO_MAX, CFG_TIMER_QUEUE_LEN, CFG_TIMER_STK_SIZE, CFG_USE_TIMERS};
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::list::{List, ListItem};
use crate::prio::PrioTable;
use crate::task::OsTcb;
use crate::types::{OsNestingCtr, OsPrio, OsTaskState, OsTick, OS_TICK_MAX};

// ============ Kernel State Structures ============

/// Atomic kernel flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    /// Nesting counter for scheduler suspension (§4.5). Distinct from the
    /// interrupt-masking critical section: interrupts keep firing while
    /// this is non-zero, they just defer their scheduling work.
    scheduler_suspended: AtomicU8,
    /// Ticks that occurred while the scheduler was suspended, applied in
    /// bulk when it is finally resumed.
    pended_ticks: AtomicU32,
    /// Set when a higher-priority task became ready while switching
    /// contexts was not possible (suspended, or inside an ISR).
    yield_pending: AtomicBool,
    tick_counter: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            scheduler_suspended: AtomicU8::new(0),
            pended_ticks: AtomicU32::new(0),
            yield_pending: AtomicBool::new(false),
            tick_counter: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.scheduler_suspended.store(0, Ordering::SeqCst);
        self.pended_ticks.store(0, Ordering::SeqCst);
        self.yield_pending.store(false, Ordering::SeqCst);
        self.tick_counter.store(0, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn tick_get(&self) -> OsTick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn scheduler_suspended(&self) -> OsNestingCtr {
        self.scheduler_suspended.load(Ordering::SeqCst)
    }

    /// Returns the post-increment tick count.
    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> OsTick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        if self.is_running() {
            let nesting = self.int_nesting.fetch_add(1, Ordering::Relaxed);
            if nesting == 254 {
                self.int_nesting.store(254, Ordering::Relaxed);
            }
        }
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn int_nesting_dec(&self) -> OsNestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
        nesting.saturating_sub(1)
    }

    /// §4.5 suspend_all: nestable, must not be called from an ISR.
    pub(crate) fn suspend_all(&self) {
        self.scheduler_suspended.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the suspension counter; returns the resulting depth.
    pub(crate) fn scheduler_resume_one(&self) -> OsNestingCtr {
        let prev = self.scheduler_suspended.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "scheduler resume without matching suspend");
        prev - 1
    }

    pub(crate) fn pend_tick(&self) {
        self.pended_ticks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn take_pended_ticks(&self) -> u32 {
        self.pended_ticks.swap(0, Ordering::SeqCst)
    }

    pub(crate) fn set_yield_pending(&self, val: bool) {
        self.yield_pending.store(val, Ordering::SeqCst);
    }

    pub(crate) fn take_yield_pending(&self) -> bool {
        self.yield_pending.swap(false, Ordering::SeqCst)
    }
}

// ============ Global Instances ============

pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

/// Scheduler state: every task-bearing list the kernel knows about.
pub struct SchedState {
    pub(crate) ready_lists: [List<OsTcb>; CFG_PRIO_MAX],
    /// Two physical lists; `delayed_idx` says which one is logically
    /// "current" (the other is the overflow list). Swapped by index on
    /// tick-counter wrap so no `List` value, which is self-referential
    /// once initialized, is ever moved.
    delayed_lists: [List<OsTcb>; 2],
    delayed_idx: usize,
    pub(crate) pending_ready_list: List<OsTcb>,
    pub(crate) suspended_list: List<OsTcb>,
    pub(crate) termination_list: List<OsTcb>,
    pub(crate) prio_tbl: PrioTable,
    next_task_unblock_time: OsTick,
    pub(crate) tasks_waiting_cleanup: usize,
    pub(crate) num_overflows: u32,
}

impl SchedState {
    const fn new() -> Self {
        Self {
            ready_lists: [List::new(); CFG_PRIO_MAX],
            delayed_lists: [List::new(), List::new()],
            delayed_idx: 0,
            pending_ready_list: List::new(),
            suspended_list: List::new(),
            termination_list: List::new(),
            prio_tbl: PrioTable::new(),
            next_task_unblock_time: OS_TICK_MAX,
            tasks_waiting_cleanup: 0,
            num_overflows: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Initialize every embedded list at its final address. Must be called
    /// exactly once, from `os_init`, before any list operation.
    pub(crate) fn init_lists(&mut self) {
        for list in self.ready_lists.iter_mut() {
            list.init();
        }
        self.delayed_lists[0].init();
        self.delayed_lists[1].init();
        self.pending_ready_list.init();
        self.suspended_list.init();
        self.termination_list.init();
        self.prio_tbl.init();
        self.delayed_idx = 0;
        self.next_task_unblock_time = OS_TICK_MAX;
    }

    #[inline]
    pub(crate) fn current_delayed(&mut self) -> &mut List<OsTcb> {
        &mut self.delayed_lists[self.delayed_idx]
    }

    #[inline]
    pub(crate) fn overflow_delayed(&mut self) -> &mut List<OsTcb> {
        &mut self.delayed_lists[1 - self.delayed_idx]
    }

    /// Swap which physical list is "current" (tick counter wrap, §4.6 step 1).
    pub(crate) fn swap_delayed_lists(&mut self) {
        self.delayed_idx = 1 - self.delayed_idx;
        self.num_overflows = self.num_overflows.wrapping_add(1);
        self.next_task_unblock_time = self.current_delayed().head_value();
    }

    #[inline]
    pub(crate) fn next_task_unblock_time(&self) -> OsTick {
        self.next_task_unblock_time
    }

    #[inline]
    pub(crate) fn set_next_task_unblock_time(&mut self, value: OsTick) {
        self.next_task_unblock_time = value;
    }

    /// Highest priority with at least one ready task (§3's `top_ready_priority`
    /// hint). Computed from the priority bitmap rather than cached
    /// separately, which keeps it trivially consistent.
    pub(crate) fn top_ready_priority(&self) -> OsPrio {
        self.prio_tbl.get_highest()
    }

    #[inline]
    pub(crate) fn ready_list(&mut self, prio: OsPrio) -> &mut List<OsTcb> {
        &mut self.ready_lists[prio as usize]
    }
}

pub(crate) static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

/// IDLE task TCB and stack
static mut IDLE_TCB: OsTcb = OsTcb::new();
static mut IDLE_STK: [crate::types::OsStkElement; 128] = [0; 128];

/// Timer daemon TCB, stack and command-queue storage (created only when
/// `CFG_USE_TIMERS` is set).
static mut TIMER_TCB: OsTcb = OsTcb::new();
static mut TIMER_STK: [crate::types::OsStkElement; CFG_TIMER_STK_SIZE] = [0; CFG_TIMER_STK_SIZE];

// ============ CPU/Context Switch State ============

#[repr(C)]
pub struct CpuState {
    pub tcb_cur: *mut OsTcb,
    pub tcb_high_rdy: *mut OsTcb,
    pub prio_cur: OsPrio,
    pub prio_high_rdy: OsPrio,
    pub except_stk_base: u32,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: core::ptr::null_mut(),
            tcb_high_rdy: core::ptr::null_mut(),
            prio_cur: 0,
            prio_high_rdy: 0,
            except_stk_base: 0,
        }
    }

    pub fn reset(&mut self) {
        self.tcb_cur = core::ptr::null_mut();
        self.tcb_high_rdy = core::ptr::null_mut();
        self.prio_cur = 0;
        self.prio_high_rdy = 0;
    }

    #[inline(always)]
    pub unsafe fn tcb_cur_ptr(&self) -> Option<NonNull<OsTcb>> {
        NonNull::new(self.tcb_cur)
    }

    #[inline(always)]
    pub unsafe fn set_tcb_cur(&mut self, tcb: Option<NonNull<OsTcb>>) {
        self.tcb_cur = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    }

    #[inline(always)]
    pub unsafe fn tcb_high_rdy_ptr(&self) -> Option<NonNull<OsTcb>> {
        NonNull::new(self.tcb_high_rdy)
    }

    #[inline(always)]
    pub unsafe fn set_tcb_high_rdy(&mut self, tcb: Option<NonNull<OsTcb>>) {
        self.tcb_high_rdy = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    }

    #[inline(always)]
    pub unsafe fn get_prio_cur(&self) -> OsPrio {
        self.prio_cur
    }

    #[inline(always)]
    pub unsafe fn set_prio_cur(&mut self, prio: OsPrio) {
        self.prio_cur = prio;
    }

    #[inline(always)]
    pub unsafe fn get_prio_high_rdy(&self) -> OsPrio {
        self.prio_high_rdy
    }

    #[inline(always)]
    pub unsafe fn set_prio_high_rdy(&mut self, prio: OsPrio) {
        self.prio_high_rdy = prio;
    }
}

#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState::new();

#[no_mangle]
pub static OS_KA_BASEPRI_Boundary: u32 = 0;

// ============ Initialization ============

fn os_idle_task(_: *mut ()) -> ! {
    loop {
        // Drain the termination list under critical section (§4.2): the
        // cleanup counter must be decremented under the same critical
        // section that pops the list, not afterwards.
        critical_section(|_cs| unsafe {
            let sched = SCHED.get_unchecked();
            if let Some(tcb) = sched.termination_list.head_owner() {
                let item_ptr = NonNull::from(&mut (*tcb.as_ptr()).state_item);
                sched.termination_list.remove(item_ptr);
                sched.tasks_waiting_cleanup = sched.tasks_waiting_cleanup.saturating_sub(1);
                // Storage is always caller-provided in this configuration
                // (CFG_SUPPORT_DYNAMIC_ALLOCATION is false), so there is
                // nothing further to free here; a future allocator-backed
                // build would match on `alloc_origin` and free here.
            }
        });

        #[cfg(target_arch = "arm")]
        cortex_m::asm::nop();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

unsafe fn os_reset_globals() {
    KERNEL.reset();
    unsafe {
        CPU_STATE.reset();
        SCHED.get_unchecked().reset();
    }
}

// ============ Public API ============

/// Initialize the RTOS kernel. Must be called before any other OS function.
#[allow(static_mut_refs)]
pub fn os_init() -> OsResult<()> {
    unsafe {
        os_reset_globals();
    }

    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    critical_section(|_cs| {
        unsafe {
            SCHED.get_unchecked().init_lists();

            crate::task::os_task_create_internal(
                &raw mut IDLE_TCB,
                "Idle",
                os_idle_task,
                core::ptr::null_mut(),
                crate::config::CFG_PRIO_IDLE,
                IDLE_STK.as_mut_ptr(),
                IDLE_STK.len(),
                0,
                0,
            )
            .expect("IDLE task creation failed");

            if CFG_USE_TIMERS {
                crate::tmr::init(&raw mut TIMER_TCB, TIMER_STK.as_mut_ptr(), TIMER_STK.len());
            }
        }

        KERNEL.set_initialized(true);
    });

    Ok(())
}

/// Start multitasking. Never returns under normal operation.
pub fn os_start() -> OsResult<()> {
    if !KERNEL.is_initialized() {
        return Err(OsError::OsNotInit);
    }
    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    critical_section(|_cs| {
        let sched = unsafe { SCHED.get_unchecked() };
        let high_prio = sched.prio_tbl.get_highest();

        unsafe {
            CPU_STATE.prio_high_rdy = high_prio;
            CPU_STATE.prio_cur = high_prio;

            match sched.ready_lists[high_prio as usize].head_owner() {
                Some(head) => {
                    CPU_STATE.tcb_high_rdy = head.as_ptr();
                    CPU_STATE.tcb_cur = head.as_ptr();
                }
                None => return,
            }
        }

        KERNEL.set_running(true);
    });

    crate::port::os_cpu_systick_init(16_000_000 / crate::config::CFG_TICK_RATE_HZ);

    unsafe {
        CPU_STATE.tcb_cur = CPU_STATE.tcb_high_rdy;
        crate::port::os_start_high_rdy()
    };

    Ok(())
}

/// Exit an ISR, switching context if a higher-priority task is now ready.
pub fn os_int_exit() {
    if !KERNEL.is_running() {
        return;
    }

    let _cs = CriticalSection::enter();

    let old_nesting = KERNEL.int_nesting();
    if old_nesting == 0 {
        return;
    }

    let new_nesting = KERNEL.int_nesting_dec();

    if new_nesting == 0 && KERNEL.scheduler_suspended() == 0 {
        crate::sched::switch_context();
        unsafe {
            if CPU_STATE.tcb_high_rdy_ptr() != CPU_STATE.tcb_cur_ptr() {
                crate::port::os_int_ctx_sw();
            }
        }
    }
}

/// §4.5 suspend_all: nestable, may not be called from an ISR.
pub fn os_sched_suspend_all() -> OsResult<()> {
    if crate::critical::is_isr_context() {
        return Err(OsError::SchedLockIsr);
    }
    KERNEL.suspend_all();
    Ok(())
}

/// §4.5 resume_all: on transition to fully-resumed, drains the
/// pending-ready list, applies pended ticks, and yields if warranted.
/// Returns `true` iff a yield happened here.
pub fn os_sched_resume_all() -> OsResult<bool> {
    if crate::critical::is_isr_context() {
        return Err(OsError::SchedUnlockIsr);
    }

    critical_section(|_cs| {
        let depth = KERNEL.scheduler_resume_one();
        if depth != 0 {
            return Ok(false);
        }

        let mut yield_needed = false;
        unsafe {
            let sched = SCHED.get_unchecked();

            // 1. Drain tasks readied while suspended.
            while let Some(tcb) = sched.pending_ready_list.head_owner() {
                let event_item = NonNull::from(&mut (*tcb.as_ptr()).event_item);
                sched.pending_ready_list.remove(event_item);
                crate::kernel::detach_state_item(tcb);
                crate::kernel::add_to_ready(tcb);

                if (*tcb.as_ptr()).prio > crate::kernel::current_prio() {
                    yield_needed = true;
                }
            }

            // 2. Apply ticks that accrued while suspended.
            let mut pending = KERNEL.take_pended_ticks();
            while pending > 0 {
                if crate::time::tick_advance() {
                    yield_needed = true;
                }
                pending -= 1;
            }
        }

        if KERNEL.take_yield_pending() {
            yield_needed = true;
        }

        if yield_needed {
            crate::sched::os_sched();
        }

        Ok(yield_needed)
    })
}

// ============ Internal accessors for other modules ============

#[inline(always)]
pub(crate) unsafe fn sched_mut() -> &'static mut SchedState {
    unsafe { SCHED.get_unchecked() }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn tcb_cur_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { CPU_STATE.tcb_cur_ptr() }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_tcb_cur_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.set_tcb_cur(tcb) }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn tcb_high_rdy_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { CPU_STATE.tcb_high_rdy_ptr() }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_tcb_high_rdy_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.set_tcb_high_rdy(tcb) }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_prio_high_rdy(prio: OsPrio) {
    unsafe { CPU_STATE.set_prio_high_rdy(prio) }
}

/// Priority of the currently-running task, or `CFG_PRIO_IDLE` before the
/// scheduler has started.
#[inline]
#[allow(static_mut_refs)]
pub(crate) fn current_prio() -> OsPrio {
    unsafe {
        match CPU_STATE.tcb_cur_ptr() {
            Some(tcb) => tcb.as_ref().prio,
            None => crate::config::CFG_PRIO_IDLE,
        }
    }
}

/// Detach a TCB's state item from whichever list currently holds it
/// (ready / delayed / overflow-delayed / suspended / termination), without
/// any priority-table bookkeeping. Callers that know they're detaching
/// from a ready list should use [`remove_from_ready`] instead so the
/// priority bitmap stays consistent.
pub(crate) unsafe fn detach_state_item(tcb: NonNull<OsTcb>) {
    unsafe {
        let item_ptr = NonNull::from(&mut (*tcb.as_ptr()).state_item);
        if let Some(mut container) = item_ptr.as_ref().container() {
            container.as_mut().remove(item_ptr);
        }
    }
}

/// Detach a TCB's event item from whichever event list currently holds it.
pub(crate) unsafe fn detach_event_item(tcb: NonNull<OsTcb>) {
    unsafe {
        let item_ptr = NonNull::from(&mut (*tcb.as_ptr()).event_item);
        if let Some(mut container) = item_ptr.as_ref().container() {
            container.as_mut().remove(item_ptr);
        }
    }
}

/// Add `tcb` to the ready list at its current priority and mark it Ready.
pub(crate) unsafe fn add_to_ready(tcb: NonNull<OsTcb>) {
    unsafe {
        let prio = (*tcb.as_ptr()).prio;
        let sched = sched_mut();
        let item_ptr = NonNull::from(&mut (*tcb.as_ptr()).state_item);
        sched.ready_lists[prio as usize].insert_end(item_ptr);
        sched.prio_tbl.insert(prio);
        (*tcb.as_ptr()).task_state = OsTaskState::Ready;
    }
}

/// Remove `tcb` from its ready list, clearing the priority bitmap bit if
/// that was the last ready task at the priority.
pub(crate) unsafe fn remove_from_ready(tcb: NonNull<OsTcb>) {
    unsafe {
        let prio = (*tcb.as_ptr()).prio;
        detach_state_item(tcb);
        let sched = sched_mut();
        if sched.ready_lists[prio as usize].is_empty() {
            sched.prio_tbl.remove(prio);
        }
    }
}

/// Returns `CFG_MAX_TASK_NAME_LEN`, exposed for callers that size name buffers.
#[allow(dead_code)]
pub(crate) const fn max_task_name_len() -> usize {
    CFG_MAX_TASK_NAME_LEN
}

/// Compute an event-list sort key that places a task in priority order
/// (higher priority -> smaller key, so the list head is the most urgent
/// waiter). Shared by ordered event-list placement and by the reset
/// protocol after unordered (event-group style) wakeups.
pub(crate) fn event_key_for_prio(prio: OsPrio) -> OsTick {
    (CFG_PRIO_MAX as OsTick).saturating_sub(prio as OsTick)
}

/// Re-export for modules that need a bare `ListItem<OsTcb>` constructor
/// without importing `crate::list` directly.
pub(crate) type TcbListItem = ListItem<OsTcb>;
