use crate::hal::{ActuatorChannel, HardwareFault, HardwarePort, HardwareSnapshot, SetupFaults};
use serde::{Deserialize, Serialize};
use tracing::debug;

// Default rates for soak runs of the simulator
const READ_FAULT_RATE_PERCENT: f32 = 1.0;
const WRITE_FAULT_RATE_PERCENT: f32 = 0.5;
const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Fault injection statistics for telemetry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FaultInjectionStats {
    pub reads_attempted: u64,
    pub read_faults_injected: u64,
    pub writes_attempted: u64,
    pub write_faults_injected: u64,
}

/// Configuration for fault injection behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    pub read_fault_rate_percent: f32,
    pub write_fault_rate_percent: f32,
    pub seed: u64,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read_fault_rate_percent: READ_FAULT_RATE_PERCENT,
            write_fault_rate_percent: WRITE_FAULT_RATE_PERCENT,
            seed: DEFAULT_SEED,
        }
    }
}

/// Probabilistic fault source
#[derive(Debug)]
pub struct FaultInjector {
    config: FaultInjectionConfig,
    stats: FaultInjectionStats,

    // Simple Linear Congruential Generator for deterministic testing
    rng_state: u64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::new_with_config(FaultInjectionConfig::default())
    }

    pub fn new_with_config(config: FaultInjectionConfig) -> Self {
        Self {
            rng_state: config.seed,
            config,
            stats: FaultInjectionStats::default(),
        }
    }

    fn should_fail_read(&mut self) -> bool {
        self.stats.reads_attempted += 1;
        let rate = self.config.read_fault_rate_percent;
        let inject = self.config.enabled && self.roll(rate);
        if inject {
            self.stats.read_faults_injected += 1;
        }
        inject
    }

    fn should_fail_write(&mut self) -> bool {
        self.stats.writes_attempted += 1;
        let rate = self.config.write_fault_rate_percent;
        let inject = self.config.enabled && self.roll(rate);
        if inject {
            self.stats.write_faults_injected += 1;
        }
        inject
    }

    fn roll(&mut self, rate_percent: f32) -> bool {
        self.random_float() < (rate_percent / 100.0)
    }

    pub fn get_stats(&self) -> &FaultInjectionStats {
        &self.stats
    }

    pub fn get_config(&self) -> &FaultInjectionConfig {
        &self.config
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    fn next_random(&mut self) -> u64 {
        // Linear Congruential Generator: X(n+1) = (aX(n) + c) mod m
        // Using parameters from Numerical Recipes
        self.rng_state = self.rng_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.rng_state
    }

    #[allow(clippy::cast_precision_loss)]
    fn random_float(&mut self) -> f32 {
        (self.next_random() as f32) / (u64::MAX as f32)
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps any port and fails a configurable share of its reads and writes.
/// Setup is passed through untouched.
#[derive(Debug)]
pub struct FaultyPort<P: HardwarePort> {
    inner: P,
    injector: FaultInjector,
}

impl<P: HardwarePort> FaultyPort<P> {
    pub fn new(inner: P, config: FaultInjectionConfig) -> Self {
        Self {
            inner,
            injector: FaultInjector::new_with_config(config),
        }
    }

    pub fn injector(&self) -> &FaultInjector {
        &self.injector
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: HardwarePort> HardwarePort for FaultyPort<P> {
    fn setup(&mut self) -> SetupFaults {
        self.inner.setup()
    }

    fn update(&mut self) -> Result<HardwareSnapshot, HardwareFault> {
        // The platform is still read so a simulated clock keeps advancing.
        let snapshot = self.inner.update()?;
        if self.injector.should_fail_read() {
            debug!("injecting read fault");
            return Err(HardwareFault::ReadFailed("injected read fault".into()));
        }
        Ok(snapshot)
    }

    fn set_actuator(&mut self, channel: ActuatorChannel, volts: f64) -> Result<(), HardwareFault> {
        if self.injector.should_fail_write() {
            debug!("injecting write fault on {}", channel);
            return Err(HardwareFault::WriteFailed {
                channel,
                reason: "injected write fault".into(),
            });
        }
        self.inner.set_actuator(channel, volts)
    }
}
