//! Event groups ("event flags" in this kernel's vocabulary — see
//! [`crate::error::OsError`]'s `Flag*` variants, which already named the
//! primitive this way before this module existed).
//!
//! A 32-bit word of application bits plus a list of tasks waiting for some
//! combination of them to be set. The top 8 bits of every `OsFlags` value
//! are reserved for control flags passed through a waiter's event-item
//! sort key; callers never see them in a wait mask.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::list::List;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{OsFlags, OsObjType, OsTick};

const CONTROL_BITS: OsFlags = 0xFF00_0000;
const CLEAR_ON_EXIT: OsFlags = 0x0100_0000;
const WAIT_FOR_ALL: OsFlags = 0x0200_0000;
const UNBLOCKED_DUE_TO_BIT_SET: OsFlags = 0x0400_0000;
const APP_BITS_MASK: OsFlags = !CONTROL_BITS;

/// An event group: application bits plus its list of unordered waiters.
pub struct OsFlagGrp {
    obj_type: OsObjType,
    bits: AtomicU32,
    waiters: List<OsTcb>,
}

impl OsFlagGrp {
    pub const fn new() -> Self {
        OsFlagGrp {
            obj_type: OsObjType::None,
            bits: AtomicU32::new(0),
            waiters: List::new(),
        }
    }

    /// Finish construction at the group's final static address.
    pub fn init(&mut self) {
        self.bits.store(0, Ordering::SeqCst);
        self.waiters.init();
        self.obj_type = OsObjType::Flag;
    }

    #[inline]
    fn test_match(bits: OsFlags, mask: OsFlags, wait_all: bool) -> bool {
        if wait_all {
            bits & mask == mask
        } else {
            bits & mask != 0
        }
    }

    /// Current bits, read under critical section.
    pub fn bits(&self) -> OsFlags {
        critical_section(|_cs| self.bits.load(Ordering::SeqCst))
    }

    /// Block until `wait_mask`'s bits are satisfied (any or all, per
    /// `wait_all`), or `ticks` elapse. Returns the bits observed at the
    /// moment the wait ended — callers distinguish "timed out" from
    /// "matched" by re-testing the mask against the returned value.
    pub fn wait_bits(&mut self, wait_mask: OsFlags, clear_on_exit: bool, wait_all: bool, ticks: OsTick) -> OsResult<OsFlags> {
        if wait_mask == 0 || wait_mask & CONTROL_BITS != 0 {
            return Err(OsError::FlagInvalidMask);
        }
        if self.obj_type != OsObjType::Flag {
            return Err(OsError::ObjType);
        }

        kernel::os_sched_suspend_all()?;

        let current = self.bits.load(Ordering::SeqCst);
        if Self::test_match(current, wait_mask, wait_all) {
            if clear_on_exit {
                self.bits.fetch_and(!wait_mask, Ordering::SeqCst);
            }
            kernel::os_sched_resume_all()?;
            return Ok(current);
        }

        if ticks == 0 {
            kernel::os_sched_resume_all()?;
            return Ok(current);
        }

        let mut control = 0;
        if clear_on_exit {
            control |= CLEAR_ON_EXIT;
        }
        if wait_all {
            control |= WAIT_FOR_ALL;
        }
        sched::place_on_unordered_event_list(&mut self.waiters, wait_mask | control, ticks);

        let yielded = kernel::os_sched_resume_all()?;
        if !yielded {
            sched::os_sched();
        }

        let tcb = unsafe { kernel::tcb_cur_ptr() }.expect("current task pointer");
        let outcome = unsafe { tcb.as_ref().event_item.value() };
        let aborted = unsafe { tcb.as_ref().delay_aborted };
        sched::reset_event_item_value(tcb);

        if outcome & UNBLOCKED_DUE_TO_BIT_SET != 0 {
            return Ok(outcome & APP_BITS_MASK);
        }

        if aborted {
            return Err(OsError::PendAbort);
        }

        // Timed out: the condition may have been met in the interim.
        Ok(critical_section(|_cs| {
            let current = self.bits.load(Ordering::SeqCst);
            if clear_on_exit && Self::test_match(current, wait_mask, wait_all) {
                self.bits.fetch_and(!wait_mask, Ordering::SeqCst);
            }
            self.bits.load(Ordering::SeqCst)
        }))
    }

    /// OR `set_mask` into the group's bits and wake every waiter whose
    /// condition is now satisfied. Returns the bits after the set (and
    /// after any `CLEAR_ON_EXIT` waiters cleared their portion).
    pub fn set_bits(&mut self, set_mask: OsFlags) -> OsResult<OsFlags> {
        if set_mask & CONTROL_BITS != 0 {
            return Err(OsError::FlagInvalidMask);
        }

        kernel::os_sched_suspend_all()?;

        self.bits.fetch_or(set_mask, Ordering::SeqCst);

        let mut pending_clear: OsFlags = 0;
        let mut yield_needed = false;

        let mut maybe_item = self.waiters.head_item();
        while let Some(mut item) = maybe_item {
            let next = self.waiters.item_after(item);

            let (owner, value) = unsafe { (item.as_ref().owner(), item.as_ref().value()) };
            if owner.is_some() {
                let wait_mask = value & APP_BITS_MASK;
                let wait_all = value & WAIT_FOR_ALL != 0;
                let clear_on_exit = value & CLEAR_ON_EXIT != 0;
                let current_bits = self.bits.load(Ordering::SeqCst);

                if Self::test_match(current_bits, wait_mask, wait_all) {
                    if clear_on_exit {
                        pending_clear |= wait_mask;
                    }
                    unsafe {
                        item.as_mut().set_value(current_bits | UNBLOCKED_DUE_TO_BIT_SET);
                    }
                    if sched::remove_from_unordered_event_list(item) {
                        yield_needed = true;
                    }
                }
            }

            maybe_item = next;
        }

        if pending_clear != 0 {
            self.bits.fetch_and(!pending_clear, Ordering::SeqCst);
        }

        let final_bits = self.bits.load(Ordering::SeqCst);

        let yielded = kernel::os_sched_resume_all()?;
        if yield_needed && !yielded {
            sched::os_sched();
        }

        Ok(final_bits)
    }

    /// AND-NOT `clear_mask` out of the group's bits. Returns the bits as
    /// they were immediately before clearing.
    pub fn clear_bits(&self, clear_mask: OsFlags) -> OsResult<OsFlags> {
        if clear_mask & CONTROL_BITS != 0 {
            return Err(OsError::FlagInvalidMask);
        }
        Ok(critical_section(|_cs| self.bits.fetch_and(!clear_mask, Ordering::SeqCst)))
    }

    /// Rendezvous primitive: OR `set_mask` in, then block until every bit
    /// in `wait_mask` is set (by this call or any other task's `set_bits`),
    /// clearing `wait_mask` once satisfied. Returns the bits observed when
    /// the wait ended.
    pub fn sync(&mut self, set_mask: OsFlags, wait_mask: OsFlags, ticks: OsTick) -> OsResult<OsFlags> {
        if wait_mask == 0 || (wait_mask | set_mask) & CONTROL_BITS != 0 {
            return Err(OsError::FlagInvalidMask);
        }

        kernel::os_sched_suspend_all()?;

        let original = self.bits.load(Ordering::SeqCst);
        self.set_bits(set_mask)?;
        let rendezvous_bits = original | set_mask;

        if rendezvous_bits & wait_mask == wait_mask {
            self.bits.fetch_and(!wait_mask, Ordering::SeqCst);
            kernel::os_sched_resume_all()?;
            return Ok(rendezvous_bits);
        }

        if ticks == 0 {
            kernel::os_sched_resume_all()?;
            return Ok(rendezvous_bits);
        }

        sched::place_on_unordered_event_list(&mut self.waiters, wait_mask | CLEAR_ON_EXIT | WAIT_FOR_ALL, ticks);

        let yielded = kernel::os_sched_resume_all()?;
        if !yielded {
            sched::os_sched();
        }

        let tcb = unsafe { kernel::tcb_cur_ptr() }.expect("current task pointer");
        let outcome = unsafe { tcb.as_ref().event_item.value() };
        let aborted = unsafe { tcb.as_ref().delay_aborted };
        sched::reset_event_item_value(tcb);

        if outcome & UNBLOCKED_DUE_TO_BIT_SET != 0 {
            Ok(outcome & APP_BITS_MASK)
        } else if aborted {
            Err(OsError::PendAbort)
        } else {
            Ok(critical_section(|_cs| self.bits.load(Ordering::SeqCst)))
        }
    }

    /// Wake every waiter with a zero-bit payload, signaling deletion. This
    /// build never frees group storage (`CFG_SUPPORT_DYNAMIC_ALLOCATION` is
    /// false); the caller's static storage simply stops being used.
    pub fn delete(&mut self) -> OsResult<()> {
        kernel::os_sched_suspend_all()?;

        while let Some(mut item) = self.waiters.head_item() {
            unsafe {
                item.as_mut().set_value(UNBLOCKED_DUE_TO_BIT_SET);
            }
            sched::remove_from_unordered_event_list(item);
        }

        self.obj_type = OsObjType::None;
        kernel::os_sched_resume_all()?;
        Ok(())
    }
}

impl Default for OsFlagGrp {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsFlagGrp {}
unsafe impl Sync for OsFlagGrp {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;

    use crate::types::{OsTaskState, OS_TICK_MAX};

    #[test]
    fn set_and_clear_bits_under_critical_section() {
        let mut grp = OsFlagGrp::new();
        grp.init();

        assert_eq!(grp.bits(), 0);
        assert_eq!(grp.clear_bits(0x01).unwrap(), 0);
    }

    #[test]
    fn rejects_control_bits_in_masks() {
        let mut grp = OsFlagGrp::new();
        grp.init();

        assert_eq!(grp.wait_bits(CONTROL_BITS, false, false, 0), Err(OsError::FlagInvalidMask));
        assert_eq!(grp.set_bits(CONTROL_BITS).unwrap_err(), OsError::FlagInvalidMask);
        assert_eq!(grp.clear_bits(CONTROL_BITS).unwrap_err(), OsError::FlagInvalidMask);
    }

    #[test]
    fn rejects_zero_wait_mask() {
        let mut grp = OsFlagGrp::new();
        grp.init();
        assert_eq!(grp.wait_bits(0, false, false, 0), Err(OsError::FlagInvalidMask));
    }

    #[test]
    fn wait_bits_returns_immediately_when_mask_already_set() {
        let mut grp = OsFlagGrp::new();
        grp.init();

        grp.set_bits(0x3).unwrap();

        assert_eq!(grp.wait_bits(0x1, false, false, OS_TICK_MAX).unwrap(), 0x3);
        // clear_on_exit only clears the tested bits, not the whole word.
        assert_eq!(grp.wait_bits(0x3, true, true, OS_TICK_MAX).unwrap(), 0x3);
        assert_eq!(grp.bits(), 0);
    }

    /// Links a standalone TCB's event item onto `grp`'s waiter list with the
    /// given tag, the same linkage `place_on_unordered_event_list`
    /// establishes for a task that calls `wait_bits`/`sync` and actually
    /// blocks. The TCB is never registered with the kernel (no `os_init`,
    /// no ready list): this exercises `set_bits`'/`sync`'s waiter scan in
    /// isolation, since the host port cannot switch real tasks.
    fn park_as_waiter(grp: &mut OsFlagGrp, tcb: &mut OsTcb, tag: OsFlags) -> NonNull<OsTcb> {
        tcb.bind_self();
        tcb.task_state = OsTaskState::Blocked;
        let tcb_ptr = NonNull::from(&*tcb);
        unsafe {
            let mut item = NonNull::from(&mut tcb.event_item);
            item.as_mut().set_value(tag);
            grp.waiters.insert_end(item);
        }
        tcb_ptr
    }

    /// `set_bits`/`sync` route a matched waiter through the global ready
    /// lists (via the pending-ready list while the scheduler is held
    /// suspended), so exercising their wake path needs those lists
    /// initialized once. Bundled into a single test, rather than one per
    /// scenario, since the global scheduler state this touches isn't
    /// synchronized across threads and every other test in this crate
    /// deliberately avoids it.
    #[test]
    fn set_bits_and_sync_drive_the_global_ready_lists() {
        const BIT0: OsFlags = 0x1;
        const BIT1: OsFlags = 0x2;
        const BIT2: OsFlags = 0x4;
        const ALL: OsFlags = BIT0 | BIT1 | BIT2;

        unsafe {
            kernel::sched_mut().init_lists();
        }

        // S3: set_bits wakes exactly the waiters whose condition is now
        // met, leaving the rest on the waiter list.
        {
            let mut grp = OsFlagGrp::new();
            grp.init();

            let mut tcb1 = OsTcb::new();
            let mut tcb2 = OsTcb::new();
            let mut tcb3 = OsTcb::new();

            let w1 = park_as_waiter(&mut grp, &mut tcb1, BIT0); // any-of {bit0}
            let w2 = park_as_waiter(&mut grp, &mut tcb2, BIT0 | BIT1 | WAIT_FOR_ALL); // all-of {bit0,bit1}
            let w3 = park_as_waiter(&mut grp, &mut tcb3, BIT2); // any-of {bit2}

            grp.set_bits(BIT0 | BIT1).unwrap();

            unsafe {
                assert_eq!(w1.as_ref().event_item.value() & UNBLOCKED_DUE_TO_BIT_SET, UNBLOCKED_DUE_TO_BIT_SET);
                assert_eq!(w1.as_ref().event_item.value() & APP_BITS_MASK, BIT0 | BIT1);
                assert!(!w1.as_ref().event_item.is_linked());

                assert_eq!(w2.as_ref().event_item.value() & UNBLOCKED_DUE_TO_BIT_SET, UNBLOCKED_DUE_TO_BIT_SET);
                assert!(!w2.as_ref().event_item.is_linked());

                assert!(w3.as_ref().event_item.is_linked(), "W3 is still waiting on bit2");
            }
        }

        // S4: the caller that completes a rendezvous must see the union of
        // all three bits, even though the nested `set_bits` call it
        // triggers clears every bit right back out again (each earlier
        // waiter set `CLEAR_ON_EXIT` on its own call into `sync`).
        {
            let mut grp = OsFlagGrp::new();
            grp.init();
            // W1 and W2 each OR'd their own bit in before blocking on the full mask.
            grp.set_bits(BIT0).unwrap();
            grp.set_bits(BIT1).unwrap();

            let mut tcb1 = OsTcb::new();
            let mut tcb2 = OsTcb::new();
            park_as_waiter(&mut grp, &mut tcb1, ALL | CLEAR_ON_EXIT | WAIT_FOR_ALL);
            park_as_waiter(&mut grp, &mut tcb2, ALL | CLEAR_ON_EXIT | WAIT_FOR_ALL);

            let result = grp.sync(BIT2, ALL, 0).unwrap();
            assert_eq!(result, ALL, "the completing caller must observe all three bits");
            assert_eq!(grp.bits(), 0, "the wait mask is cleared once the rendezvous completes");
        }
    }
}
