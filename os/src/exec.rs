// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel: initialization, the run loop, and power mode.
//!
//! # Starting the scheduler
//!
//! An application builds one [`Kernel`] around its [`TickSource`], calls
//! [`Kernel::init`], registers its tasks, and then calls [`Kernel::run`],
//! which never returns:
//!
//! ```ignore
//! let mut kernel: Kernel<'_, _> = Kernel::new(SysTickSource::new(cp.SYST, 16_000_000));
//! kernel.init()?;
//! kernel.create_task(&toggle_led0, 0, 300)?;
//! kernel.create_task(&toggle_led1, 5, 500)?;
//! kernel.run()
//! ```
//!
//! Because `run` never returns, tasks can borrow from `main`'s stack frame.
//!
//! # Run state
//!
//! The run loop checks a process-wide [`RunState`] flag on every iteration.
//! While it's [`RunState::Enabled`] the tick source is kept running and one
//! scheduling pass is made per iteration. While it's [`RunState::Disabled`]
//! the tick source is stopped and no scheduling happens at all: task counters
//! and Ready/Waiting states are frozen exactly as they were, and pick up where
//! they left off when the flag is set again.
//!
//! [`set_run_state`] is the only way to change the flag. It's safe to call
//! from anywhere, including an interrupt handler -- the usual arrangement is
//! a button ISR that toggles it.
//!
//! # Idle behavior
//!
//! While disabled, [`Kernel::run`] idles the processor with `WFI` between
//! iterations, so it sleeps until the next interrupt (such as the one that
//! re-enables it). To do something else, such as entering a vendor-specific
//! deep-sleep mode or feeding a watchdog, start the kernel with
//! [`Kernel::run_with_idle`] instead.
//!
//! While enabled, the run loop never sleeps; it polls for ticks continuously.
//!
//! # Testing without hardware
//!
//! [`Kernel::step`] performs exactly one iteration of the run loop and reports
//! what it did, so a test can drive the kernel against a fake tick source
//! with no real time passing.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::log;
use crate::sched::Scheduler;
use crate::table::{Full, NotFound, Task, TaskId, DEFAULT_CAPACITY};
use crate::tick::{self, TickMode, TickSource, TICK_PENDING, TICK_PERIOD};

/// Whether the scheduler should be doing work.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunState {
    /// Ticks are counted and tasks are dispatched.
    Enabled,
    /// The tick source is stopped and nothing is scheduled.
    Disabled,
}

/// Backing store for the run state; `true` means enabled. Written by
/// `set_run_state` (from any context), read by the run loop.
static RUN_ENABLED: AtomicBool = AtomicBool::new(true);

/// Sets the run state. ISR-safe.
pub fn set_run_state(state: RunState) {
    log::debug!("run state: {}", state);
    RUN_ENABLED.store(state == RunState::Enabled, Ordering::Release);
}

/// Reads the current run state. ISR-safe.
pub fn run_state() -> RunState {
    if RUN_ENABLED.load(Ordering::Acquire) {
        RunState::Enabled
    } else {
        RunState::Disabled
    }
}

/// Error returned by [`Kernel::init`] if the kernel is already initialized.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlreadyInitialized;

impl fmt::Display for AlreadyInitialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheduler already initialized")
    }
}

/// Error returned by [`Kernel::deinit`] if the kernel isn't initialized.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotInitialized;

impl fmt::Display for NotInitialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheduler not initialized")
    }
}

/// Lifecycle of a [`Kernel`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerState {
    /// Freshly constructed, or after `deinit`.
    NotInitialized,
    /// Between `init` and `deinit`.
    Initialized,
}

/// What the tick source is doing, as far as the kernel knows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Ticking {
    /// Never started.
    Idle,
    Running,
    /// Stopped by the run loop; resume rather than restart.
    Stopped,
}

/// Outcome of one run loop iteration, from [`Kernel::step`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// The run state was disabled; nothing was scheduled.
    Suspended,
    /// A scheduling pass was made. Holds the task that was dispatched, if
    /// any.
    Pass(Option<TaskId>),
}

/// The scheduler core: task table, engine, and the tick source driving them.
///
/// `'t` is the lifetime of the registered tasks, `S` the tick source, and
/// `N` the task table capacity.
#[derive(Debug)]
pub struct Kernel<'t, S, const N: usize = DEFAULT_CAPACITY> {
    source: S,
    scheduler: Scheduler<'t, N>,
    state: SchedulerState,
    ticking: Ticking,
}

impl<'t, S: TickSource, const N: usize> Kernel<'t, S, N> {
    /// Wraps `source` in an uninitialized kernel with an empty task table.
    pub fn new(source: S) -> Self {
        Self {
            source,
            scheduler: Scheduler::new(),
            state: SchedulerState::NotInitialized,
            ticking: Ticking::Idle,
        }
    }

    /// Clears the task table, configures the tick source for periodic
    /// [`TICK_PERIOD`] ticks, and installs the tick interrupt handler. The
    /// source is (re)started on the first enabled [`step`][Kernel::step]
    /// afterward.
    ///
    /// Fails if the kernel is already initialized.
    pub fn init(&mut self) -> Result<(), AlreadyInitialized> {
        if self.state == SchedulerState::Initialized {
            log::warning!("init: already initialized");
            return Err(AlreadyInitialized);
        }

        self.scheduler.tasks_mut().clear();
        TICK_PENDING.take();
        self.source.configure(TickMode::Periodic, TICK_PERIOD);
        self.source.set_tick_callback(tick::on_tick);
        // The source may have been stopped behind our back since the last
        // session, so the next enabled step starts it afresh.
        self.ticking = Ticking::Idle;
        self.state = SchedulerState::Initialized;

        log::info!("sos initialized: {} task slots, {} ms tick", N, TICK_PERIOD.0);
        Ok(())
    }

    /// Clears the task table and returns to the uninitialized state.
    ///
    /// This does *not* stop the tick source; ticks will keep arriving until
    /// the application stops it.
    pub fn deinit(&mut self) -> Result<(), NotInitialized> {
        if self.state != SchedulerState::Initialized {
            log::warning!("deinit: not initialized");
            return Err(NotInitialized);
        }

        self.scheduler.tasks_mut().clear();
        self.state = SchedulerState::NotInitialized;

        log::info!("sos deinitialized");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Registers a task. See [`TaskTable::create_task`][crate::TaskTable::create_task].
    pub fn create_task(
        &mut self,
        task: &'t dyn Task,
        delay: u16,
        period: u16,
    ) -> Result<TaskId, Full> {
        self.scheduler.tasks_mut().create_task(task, delay, period)
    }

    /// Removes a task. See [`TaskTable::delete_task`][crate::TaskTable::delete_task].
    pub fn delete_task(&mut self, id: TaskId) -> Result<(), NotFound> {
        self.scheduler.tasks_mut().delete_task(id)
    }

    /// Replaces a task's body and timing. See
    /// [`TaskTable::modify_task`][crate::TaskTable::modify_task], including
    /// its caveat about stale ids.
    pub fn modify_task(
        &mut self,
        task: &'t dyn Task,
        delay: u16,
        period: u16,
        id: TaskId,
    ) -> Result<(), NotFound> {
        self.scheduler.tasks_mut().modify_task(task, delay, period, id)
    }

    /// The scheduling engine and its task table.
    pub fn scheduler(&self) -> &Scheduler<'t, N> {
        &self.scheduler
    }

    /// The tick source.
    pub fn tick_source(&self) -> &S {
        &self.source
    }

    /// The tick source, mutably. Handy for firing a fake source from a test.
    pub fn tick_source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Performs one iteration of the run loop.
    ///
    /// If the run state is enabled, makes sure the tick source is running,
    /// then makes one scheduling pass. If it's disabled, makes sure the tick
    /// source is stopped and does nothing else.
    pub fn step(&mut self) -> Step {
        match run_state() {
            RunState::Enabled => {
                self.keep_ticking();
                Step::Pass(self.scheduler.pass(&TICK_PENDING))
            }
            RunState::Disabled => {
                self.stop_ticking();
                Step::Suspended
            }
        }
    }

    /// Runs the scheduler forever, idling the processor while disabled.
    ///
    /// [`init`][Kernel::init] should be called first.
    pub fn run(&mut self) -> ! {
        self.run_with_idle(idle)
    }

    /// Extended version of [`run`][Kernel::run] that calls `idle_hook`
    /// instead of the default idle behavior whenever an iteration finds the
    /// run state disabled.
    ///
    /// If you would like the processor to sleep when idle, you will need to
    /// call `WFI` yourself from within `idle_hook`.
    pub fn run_with_idle(&mut self, mut idle_hook: impl FnMut()) -> ! {
        loop {
            if self.step() == Step::Suspended {
                idle_hook();
            }
        }
    }

    fn keep_ticking(&mut self) {
        match self.ticking {
            Ticking::Running => return,
            Ticking::Idle => {
                log::debug!("tick source started");
                self.source.start();
            }
            Ticking::Stopped => {
                log::debug!("tick source resumed");
                self.source.resume();
            }
        }
        self.ticking = Ticking::Running;
    }

    fn stop_ticking(&mut self) {
        if self.ticking == Ticking::Running {
            log::debug!("tick source stopped");
            self.source.stop();
            self.ticking = Ticking::Stopped;
        }
    }
}

/// Default idle behavior for [`Kernel::run`].
fn idle() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            cortex_m::asm::wfi();
        } else {
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;
    use crate::testutil::{self, Call, FakeTick};
    use crate::TaskState;

    fn nop() {}

    const NOTHING: [usize; 0] = [];

    /// Fires one tick, makes the pass that consumes it, then steps until an
    /// iteration dispatches nothing. Returns the dispatched task indices.
    fn tick(kernel: &mut Kernel<'_, FakeTick, 4>) -> Vec<usize> {
        kernel.tick_source_mut().fire();
        let mut ran = Vec::new();
        if let Step::Pass(Some(id)) = kernel.step() {
            ran.push(id.index());
        }
        while let Step::Pass(Some(id)) = kernel.step() {
            ran.push(id.index());
        }
        ran
    }

    #[test]
    fn init_configures_source() {
        let _lock = testutil::serialize();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        assert_eq!(kernel.state(), SchedulerState::NotInitialized);
        kernel.init().unwrap();
        assert_eq!(kernel.state(), SchedulerState::Initialized);

        let src = kernel.tick_source();
        assert_eq!(
            src.calls(),
            [Call::Configure(TickMode::Periodic, TICK_PERIOD), Call::SetCallback],
        );
        assert!(src.has_handler());
    }

    #[test]
    fn init_twice_fails() {
        let _lock = testutil::serialize();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        assert_eq!(kernel.init(), Ok(()));
        assert_eq!(kernel.init(), Err(AlreadyInitialized));
        assert_eq!(kernel.deinit(), Ok(()));
        assert_eq!(kernel.init(), Ok(()));
    }

    #[test]
    fn deinit_requires_init() {
        let _lock = testutil::serialize();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        assert_eq!(kernel.deinit(), Err(NotInitialized));
        kernel.init().unwrap();
        kernel.deinit().unwrap();
        assert_eq!(kernel.deinit(), Err(NotInitialized));
    }

    #[test]
    fn init_and_deinit_clear_tasks() {
        let _lock = testutil::serialize();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        let early = kernel.create_task(&nop, 0, 1).unwrap();
        kernel.init().unwrap();
        assert!(!kernel.scheduler().tasks().contains(early));

        let id = kernel.create_task(&nop, 0, 1).unwrap();
        kernel.deinit().unwrap();
        assert!(!kernel.scheduler().tasks().contains(id));
        assert_eq!(kernel.delete_task(id), Err(NotFound));
    }

    #[test]
    fn deinit_leaves_source_running() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        kernel.step();
        assert!(kernel.tick_source().is_running());

        kernel.deinit().unwrap();
        assert!(kernel.tick_source().is_running());
        assert!(!kernel.tick_source().calls().contains(&Call::Stop));
    }

    #[test]
    fn reinit_restarts_source_stopped_after_deinit() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();

        let hits = Cell::new(0);
        let task = || hits.set(hits.get() + 1);

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        kernel.step();
        kernel.deinit().unwrap();
        kernel.tick_source_mut().stop();
        assert!(!kernel.tick_source().is_running());

        kernel.init().unwrap();
        let id = kernel.create_task(&task, 0, 1).unwrap();
        kernel.step();
        assert!(kernel.tick_source().is_running());
        assert_eq!(kernel.tick_source().calls().last(), Some(&Call::Start));

        assert_eq!(tick(&mut kernel), [id.index()]);
        assert_eq!(tick(&mut kernel), [id.index()]);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn stale_tick_is_discarded_by_init() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        let id = kernel.create_task(&nop, 0, 1);
        assert!(id.is_ok());
        TICK_PENDING.raise();
        kernel.init().unwrap();
        let id = kernel.create_task(&nop, 0, 1).unwrap();

        kernel.step();
        assert_eq!(kernel.scheduler().tasks().state(id), Some(TaskState::Waiting));
    }

    #[test]
    fn first_step_starts_source() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        assert_eq!(kernel.step(), Step::Pass(None));
        assert_eq!(kernel.step(), Step::Pass(None));

        let starts = kernel
            .tick_source()
            .calls()
            .iter()
            .filter(|c| **c == Call::Start)
            .count();
        assert_eq!(starts, 1);
        assert!(kernel.tick_source().is_running());
    }

    #[test]
    fn runs_tasks_on_ticks() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();

        let hits = Cell::new(0);
        let task = || hits.set(hits.get() + 1);

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        let id = kernel.create_task(&task, 1, 2).unwrap();
        kernel.step();

        assert_eq!(tick(&mut kernel), NOTHING);
        assert_eq!(tick(&mut kernel), [id.index()]);
        assert_eq!(tick(&mut kernel), NOTHING);
        assert_eq!(tick(&mut kernel), [id.index()]);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn one_shot_through_kernel() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();

        let hits = Cell::new(0);
        let task = || hits.set(hits.get() + 1);

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        let id = kernel.create_task(&task, 0, 0).unwrap();
        kernel.step();

        assert_eq!(tick(&mut kernel), [id.index()]);
        for _ in 0..5 {
            assert_eq!(tick(&mut kernel), NOTHING);
        }
        assert_eq!(hits.get(), 1);
        assert_eq!(kernel.delete_task(id), Err(NotFound));
    }

    #[test]
    fn disable_stops_and_freezes() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();
        scopeguard::defer! { set_run_state(RunState::Enabled) }

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        let id = kernel.create_task(&nop, 3, 4).unwrap();
        kernel.step();

        // Two ticks in: counter has gone 3 -> 2 -> 1.
        assert_eq!(tick(&mut kernel), NOTHING);
        assert_eq!(tick(&mut kernel), NOTHING);

        set_run_state(RunState::Disabled);
        assert_eq!(kernel.step(), Step::Suspended);
        assert!(!kernel.tick_source().is_running());

        // A stopped source delivers nothing, however long we wait.
        for _ in 0..50 {
            kernel.tick_source_mut().fire();
            assert_eq!(kernel.step(), Step::Suspended);
        }
        let stops = kernel
            .tick_source()
            .calls()
            .iter()
            .filter(|c| **c == Call::Stop)
            .count();
        assert_eq!(stops, 1);

        set_run_state(RunState::Enabled);
        assert_eq!(kernel.step(), Step::Pass(None));
        assert_eq!(kernel.tick_source().calls().last(), Some(&Call::Resume));

        // Picks up exactly where it left off: due on the fourth tick overall.
        assert_eq!(tick(&mut kernel), NOTHING);
        assert_eq!(tick(&mut kernel), [id.index()]);
        assert_eq!(tick(&mut kernel), NOTHING);
        assert_eq!(tick(&mut kernel), NOTHING);
        assert_eq!(tick(&mut kernel), NOTHING);
        assert_eq!(tick(&mut kernel), [id.index()]);
    }

    #[test]
    fn disabled_before_start_never_starts() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();
        scopeguard::defer! { set_run_state(RunState::Enabled) }
        set_run_state(RunState::Disabled);

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        assert_eq!(kernel.step(), Step::Suspended);
        assert!(!kernel.tick_source().calls().contains(&Call::Stop));

        set_run_state(RunState::Enabled);
        kernel.step();
        assert!(kernel.tick_source().calls().contains(&Call::Start));
        assert!(!kernel.tick_source().calls().contains(&Call::Resume));
    }

    #[test]
    fn run_state_round_trips() {
        let _lock = testutil::serialize();
        testutil::enable_for_test();

        assert_eq!(run_state(), RunState::Enabled);
        set_run_state(RunState::Disabled);
        assert_eq!(run_state(), RunState::Disabled);
        set_run_state(RunState::Enabled);
        assert_eq!(run_state(), RunState::Enabled);
    }

    #[test]
    fn full_table_reported() {
        let _lock = testutil::serialize();

        let mut kernel: Kernel<'_, _, 4> = Kernel::new(FakeTick::default());
        kernel.init().unwrap();
        for i in 0..4 {
            assert_eq!(kernel.create_task(&nop, 0, 1).map(TaskId::index), Ok(i));
        }
        assert_eq!(kernel.create_task(&nop, 0, 1), Err(Full));
    }
}
