//! Critical section handling for the kernel
//!
//! Provides a nestable interrupt-masking primitive for protecting shared
//! scheduler state. Re-entrant the way `portENTER_CRITICAL`/`portEXIT_CRITICAL`
//! are in a single-core FreeRTOS port: only the outermost `enter()` actually
//! disables interrupts, and only the matching outermost drop restores them.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Nesting depth of the critical section
static NESTING: AtomicU8 = AtomicU8::new(0);

/// Interrupt-enable state captured at the outermost `enter()`
static WAS_ACTIVE: AtomicBool = AtomicBool::new(false);

/// RAII guard for critical sections
///
/// When the outermost guard is created, interrupts are disabled. When the
/// outermost guard is dropped, interrupts are restored to their state prior
/// to the first `enter()` in the nest.
pub struct CriticalSection {
    _private: (),
}

impl CriticalSection {
    /// Enter a critical section, disabling interrupts if not already nested.
    #[inline(always)]
    pub fn enter() -> Self {
        #[cfg(target_arch = "arm")]
        {
            let was_active = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            if NESTING.load(Ordering::Relaxed) == 0 {
                WAS_ACTIVE.store(was_active, Ordering::Relaxed);
            }
        }

        NESTING.fetch_add(1, Ordering::AcqRel);
        CriticalSection { _private: () }
    }

    /// Check if we're currently in a critical section (any nesting depth)
    #[inline(always)]
    pub fn is_active() -> bool {
        NESTING.load(Ordering::Acquire) > 0
    }

    /// Current nesting depth
    #[inline(always)]
    pub fn nesting() -> u8 {
        NESTING.load(Ordering::Acquire)
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        let prev_depth = NESTING.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev_depth > 0, "critical section underflow");

        if prev_depth == 1 {
            #[cfg(target_arch = "arm")]
            if WAS_ACTIVE.load(Ordering::Relaxed) {
                unsafe { cortex_m::interrupt::enable() };
            }
        }
    }
}

/// Execute a closure with interrupts disabled
///
/// The closure receives a reference to the critical section guard,
/// which can be used to access [`crate::core::cs_cell::CsCell`] protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}

/// Mask priority levels using BASEPRI (Cortex-M3/M4/M7)
///
/// This allows selective interrupt masking where only interrupts
/// with a priority value >= the mask value are blocked.
#[inline]
pub fn set_basepri(priority: u8) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "msr BASEPRI, {}",
            in(reg) priority as u32,
            options(nomem, nostack, preserves_flags)
        );
    }

    #[cfg(not(target_arch = "arm"))]
    {
        let _ = priority;
    }
}

/// Get current BASEPRI value
#[inline]
pub fn get_basepri() -> u8 {
    #[cfg(target_arch = "arm")]
    {
        let basepri: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, BASEPRI",
                out(reg) basepri,
                options(nomem, nostack, preserves_flags)
            );
        }
        basepri as u8
    }

    #[cfg(not(target_arch = "arm"))]
    {
        0
    }
}
