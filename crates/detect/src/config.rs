//! Static configuration and runtime tunables.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DetectError;

/// Default debounce timer period (500ms).
pub const DEFAULT_TIMER_PERIOD_MS: u64 = 500;
/// Default settle time after routing the ADC (10ms).
pub const DEFAULT_READ_ADC_DELAY_MS: u64 = 10;
/// Default settle time after driving the switch GPIO (30ms).
pub const DEFAULT_SWITCH_GPIO_DELAY_MS: u64 = 30;
/// Default gap between the two button status samples (80ms).
pub const DEFAULT_BUTTON_SETTLE_MS: u64 = 80;

/// How interrupt work is handed to the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Single pending slot per work kind. A button request that arrives while
    /// detection is pending is discarded and counted.
    #[default]
    Coalescing,
    /// Every request is queued in arrival order.
    Queued,
}

/// Device configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    pub timer_period_ms: u64,
    pub read_adc_delay_ms: u64,
    pub switch_gpio_delay_ms: u64,
    pub button_settle_ms: u64,
    pub dispatch: DispatchPolicy,
    /// Initial detect polarity flag. `false` arms the detect line on low.
    pub detect_active_low: bool,
    /// Initial button polarity flag. `false` arms the button line on low.
    pub button_active_low: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            timer_period_ms: DEFAULT_TIMER_PERIOD_MS,
            read_adc_delay_ms: DEFAULT_READ_ADC_DELAY_MS,
            switch_gpio_delay_ms: DEFAULT_SWITCH_GPIO_DELAY_MS,
            button_settle_ms: DEFAULT_BUTTON_SETTLE_MS,
            dispatch: DispatchPolicy::default(),
            detect_active_low: false,
            button_active_low: false,
        }
    }
}

impl DetectConfig {
    pub fn from_json(json: &str) -> Result<Self, DetectError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn button_settle(&self) -> Duration {
        Duration::from_millis(self.button_settle_ms)
    }
}

/// Parameters that may be read and changed while the device runs.
#[derive(Debug)]
pub struct Tunables {
    timer_period_ms: AtomicU64,
    read_adc_delay_ms: AtomicU64,
    switch_gpio_delay_ms: AtomicU64,
    discarded_button_irqs: AtomicU64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self::from_config(&DetectConfig::default())
    }
}

impl Tunables {
    pub fn from_config(config: &DetectConfig) -> Self {
        Self {
            timer_period_ms: AtomicU64::new(config.timer_period_ms),
            read_adc_delay_ms: AtomicU64::new(config.read_adc_delay_ms),
            switch_gpio_delay_ms: AtomicU64::new(config.switch_gpio_delay_ms),
            discarded_button_irqs: AtomicU64::new(0),
        }
    }

    pub fn timer_period(&self) -> Duration {
        Duration::from_millis(self.timer_period_ms.load(Ordering::Relaxed))
    }

    pub fn set_timer_period(&self, period: Duration) {
        self.timer_period_ms
            .store(duration_ms(period), Ordering::Relaxed);
    }

    pub fn read_adc_delay(&self) -> Duration {
        Duration::from_millis(self.read_adc_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_read_adc_delay(&self, delay: Duration) {
        self.read_adc_delay_ms
            .store(duration_ms(delay), Ordering::Relaxed);
    }

    pub fn switch_gpio_delay(&self) -> Duration {
        Duration::from_millis(self.switch_gpio_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_switch_gpio_delay(&self, delay: Duration) {
        self.switch_gpio_delay_ms
            .store(duration_ms(delay), Ordering::Relaxed);
    }

    /// Button requests dropped because detection was already pending.
    pub fn discarded_button_irqs(&self) -> u64 {
        self.discarded_button_irqs.load(Ordering::Relaxed)
    }

    pub(crate) fn record_discarded_button_irq(&self) -> u64 {
        self.discarded_button_irqs.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_discarded_button_irqs(&self) {
        self.discarded_button_irqs.store(0, Ordering::Relaxed);
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
