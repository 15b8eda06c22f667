//! Compile-time configuration for the kernel
//!
//! These constants control the behavior and resource limits of the RTOS.
//! Names and the option set mirror the configuration surface a FreeRTOS-style
//! kernel exposes (`configMAX_PRIORITIES`, `configUSE_TIME_SLICING`, ...).

/// Maximum number of priority levels. Priority `CFG_PRIO_MAX - 1` is the
/// most urgent; priority 0 is the least urgent (reserved for the idle task).
pub const CFG_PRIO_MAX: usize = 64;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Default time quanta (in ticks) for round-robin scheduling
pub const CFG_TIME_QUANTA_DEFAULT: u32 = 10;

/// Minimum task stack size, in stack elements
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Maximum length of a task name, including the NUL terminator is not
/// required (names are stored as a length-prefixed byte buffer)
pub const CFG_MAX_TASK_NAME_LEN: usize = 16;

/// Idle task priority. Fixed at the bottom of the priority range.
pub const CFG_PRIO_IDLE: u8 = 0;

/// Preemptive scheduling: a task becoming ready at a higher priority than
/// the running task causes an immediate switch. When false, switches only
/// happen at explicit yield points.
pub const CFG_USE_PREEMPTION: bool = true;

/// Round-robin time slicing among ready tasks of equal priority
pub const CFG_USE_TIME_SLICING: bool = true;

/// Idle task yields immediately if another task at the idle priority
/// is also ready (keeps the idle-priority tier responsive)
pub const CFG_IDLE_SHOULD_YIELD: bool = true;

/// Whether the software timer daemon task is created at os_init()
pub const CFG_USE_TIMERS: bool = true;

/// Priority of the software timer daemon task. Kept high so pended
/// ISR work (set_bits_from_isr, timer commands) is serviced promptly.
pub const CFG_TIMER_TASK_PRIO: u8 = (CFG_PRIO_MAX - 2) as u8;

/// Capacity of the timer daemon's command queue
pub const CFG_TIMER_QUEUE_LEN: usize = 10;

/// Stack depth (in stack elements) of the timer daemon task
pub const CFG_TIMER_STK_SIZE: usize = 128;

/// At least one of static/dynamic allocation must be supported. This
/// implementation supports only caller-provided (static) storage: no
/// allocator crate is part of the dependency stack.
pub const CFG_SUPPORT_STATIC_ALLOCATION: bool = true;
pub const CFG_SUPPORT_DYNAMIC_ALLOCATION: bool = false;

/// Number of notification slots per task
pub const CFG_NOTIFY_ARRAY_ENTRIES: usize = 1;

/// Feature toggles
pub const CFG_USE_EVENT_GROUPS: bool = true;
pub const CFG_USE_MUTEXES: bool = false;
pub const CFG_USE_COUNTING_SEMAPHORES: bool = false;
pub const CFG_USE_QUEUE_SETS: bool = false;

/// Stack overflow checking level: 0 = disabled, 1 = watermark check,
/// 2 = watermark + pattern check. Only level 0 is implemented.
pub const CFG_CHECK_FOR_STACK_OVERFLOW: u8 = 0;

/// Tickless idle is an explicit Non-goal; the constant is retained so the
/// configuration surface matches the spec, but no code branches on it.
pub const CFG_USE_TICKLESS_IDLE: bool = false;
