//! Task Control Block (TCB) definition
//!
//! The TCB contains all the information needed to manage a task. A task is
//! reachable from exactly one state list via `state_item` (ready, one of the
//! two delayed lists, suspended, or termination), and, while blocked on a
//! primitive, is additionally linked into that primitive's event list via
//! `event_item`.

use core::ptr::NonNull;

use crate::config::{CFG_MAX_TASK_NAME_LEN, CFG_NOTIFY_ARRAY_ENTRIES};
use crate::list::ListItem;
use crate::types::{AllocOrigin, OsNotifyState, OsPrio, OsStkElement, OsTaskState};

/// Task Control Block
#[repr(C)]
pub struct OsTcb {
    // ============ Stack pointer (must stay first: the port's context
    // switch dereferences the TCB pointer and reads this field directly) ============
    pub stk_ptr: *mut OsStkElement,

    // ============ Stack information ============
    pub stk_base: *mut OsStkElement,
    pub stk_size: usize,

    // ============ State & event list linkage ============
    pub state_item: ListItem<OsTcb>,
    pub event_item: ListItem<OsTcb>,

    // ============ Task identification ============
    name_buf: [u8; CFG_MAX_TASK_NAME_LEN],
    name_len: u8,

    // ============ Priority ============
    pub prio: OsPrio,
    pub base_prio: OsPrio,

    // ============ State ============
    pub task_state: OsTaskState,

    // ============ Critical section nesting (reserved; the kernel's
    // critical section is currently global rather than per-task, see
    // core::critical) ============
    pub critical_nesting: u8,

    // ============ Time slicing ============
    pub time_quanta: u32,
    pub time_quanta_ctr: u32,

    // ============ Task notifications ============
    pub notify_value: [u32; CFG_NOTIFY_ARRAY_ENTRIES],
    pub notify_state: [OsNotifyState; CFG_NOTIFY_ARRAY_ENTRIES],

    // ============ Delay/abort bookkeeping ============
    pub delay_aborted: bool,

    // ============ Allocation origin, consulted by delete() ============
    pub alloc_origin: AllocOrigin,

    // ============ Task entry point ============
    pub task_entry_addr: u32,
    pub task_entry_arg: *mut (),
}

impl OsTcb {
    /// Create a new, uninitialized TCB
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_size: 0,

            state_item: ListItem::new(),
            event_item: ListItem::new(),

            name_buf: [0; CFG_MAX_TASK_NAME_LEN],
            name_len: 0,

            prio: 0,
            base_prio: 0,

            task_state: OsTaskState::Ready,

            critical_nesting: 0,

            time_quanta: 0,
            time_quanta_ctr: 0,

            notify_value: [0; CFG_NOTIFY_ARRAY_ENTRIES],
            notify_state: [OsNotifyState::NotWaiting; CFG_NOTIFY_ARRAY_ENTRIES],

            delay_aborted: false,

            alloc_origin: AllocOrigin::StaticStackStaticTcb,

            task_entry_addr: 0,
            task_entry_arg: core::ptr::null_mut(),
        }
    }

    /// Reset TCB to default values, preserving nothing.
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// Copy `name` into the fixed-capacity name buffer, truncating if needed.
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(CFG_MAX_TASK_NAME_LEN);
        self.name_buf[..len].copy_from_slice(&bytes[..len]);
        self.name_len = len as u8;
    }

    /// Task name as UTF-8, or `"?"` if it was truncated on a non-boundary
    /// (names are expected to be ASCII in practice).
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name_buf[..self.name_len as usize]).unwrap_or("?")
    }

    /// Bind both list items' owner pointer to `self`. Must be called once
    /// the TCB has reached its final, stable storage address.
    pub fn bind_self(&mut self) {
        let self_ptr = NonNull::from(&*self);
        self.state_item.set_owner(self_ptr);
        self.event_item.set_owner(self_ptr);
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.task_state == OsTaskState::Ready
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.task_state == OsTaskState::Blocked
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.task_state == OsTaskState::Suspended
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.task_state == OsTaskState::Terminated
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}
