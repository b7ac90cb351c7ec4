//! Background ticker
//!
//! Everything time-based in the peripheral core advances from one periodic
//! step, run every [`ModelConfig::tick_period_us`] microseconds on its own
//! thread:
//!
//! 1. DIGIC clock and timers advance one step
//! 2. deferred interrupts count down and the next one due is delivered
//! 3. matching HPTimers raise the HPTimer interrupt
//! 4. pending CF DMA transfers make progress
//!
//! Steps 1-3 run under the IRQ lock, step 4 under the CF lock. The two are
//! never held together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::peripherals::{CfController, Interrupts};

/// Run one ticker step. Does nothing while the CPU is halted.
pub fn tick(irq: &Interrupts, cf: &CfController, model: &ModelConfig) {
    let cpu = irq.cpu();
    if cpu.is_halted() {
        return;
    }

    let hptimer_fired = {
        let mut domain = irq.lock();
        domain.clock.advance();
        domain.timers.advance();
        let rearm = domain.timers.reload(model.os_timer_id) >> 8;
        domain.intc.service_scheduled(model.timer_interrupt, rearm, cpu);
        let clock = domain.clock.value();
        domain.hptimers.check(clock)
    };

    if hptimer_fired {
        irq.trigger(model.hptimer_interrupt, 0);
    }

    for id in cf.service(cpu, model) {
        irq.trigger(id, 0);
    }
}

/// Handle to the ticker thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct BackgroundTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTicker {
    /// Start ticking every `model.tick_period_us`
    pub fn spawn(irq: Interrupts, cf: CfController, model: ModelConfig) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let period = Duration::from_micros(model.tick_period_us.max(1));

        let handle = thread::Builder::new()
            .name("eos-ticker".to_string())
            .spawn(move || {
                log::debug!("ticker started, period {:?}", period);
                while !flag.load(Ordering::Relaxed) {
                    tick(&irq, &cf, &model);
                    thread::sleep(period);
                }
                log::debug!("ticker stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("ticker thread panicked");
            }
        }
    }
}

impl Drop for BackgroundTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
