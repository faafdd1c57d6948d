//! Headset type classification from filtered ADC samples.

use std::sync::Arc;
use std::thread;

use headset_events::HeadsetType;
use headset_hal::regs::HEADMIC_ADC_CHANNEL;
use headset_hal::{AdcPath, AnalogFrontEnd, AnalogSourceRef, HalError};

use crate::config::Tunables;

/// Raw conversions taken per filtered sample.
pub const ADC_FIFO_COUNT: usize = 5;
/// Mic and ground closer than this read "the same".
pub const DISPARITY_THRESHOLD: i32 = 400;
/// Mic below this (with mic ~ ground) means no mic ring.
pub const GND_THRESHOLD: i32 = 200;
/// Mic below this (with mic ~ ground) means a button edge cannot be real.
pub const BUTTON_NEAR_ZERO: i32 = 500;

/// Classify from a mic-path sample and a ground-path sample.
///
/// Never returns [`HeadsetType::Apple`].
pub fn classify_samples(adc_mic: i32, adc_l: i32) -> HeadsetType {
    if (adc_mic - adc_l).abs() < DISPARITY_THRESHOLD {
        if adc_mic.abs() < GND_THRESHOLD {
            HeadsetType::NoMic
        } else {
            HeadsetType::NorthAmerica
        }
    } else {
        HeadsetType::Normal
    }
}

/// `false` when mic and ground agree and the mic sits near zero.
pub fn plausible_button_samples(adc_mic: i32, adc_l: i32) -> bool {
    !((adc_mic - adc_l).abs() < DISPARITY_THRESHOLD && adc_mic.abs() < BUTTON_NEAR_ZERO)
}

/// Reads filtered samples through the analog front end.
pub struct AnalogClassifier {
    afe: AnalogFrontEnd,
    adc: AnalogSourceRef,
    tunables: Arc<Tunables>,
}

impl AnalogClassifier {
    pub fn new(afe: AnalogFrontEnd, adc: AnalogSourceRef, tunables: Arc<Tunables>) -> Self {
        Self {
            afe,
            adc,
            tunables,
        }
    }

    /// One filtered sample on `path`.
    ///
    /// Returns the middle conversion of the FIFO as taken, without sorting.
    /// This matches the front end's settling behavior; do not replace it with
    /// a sorted median.
    pub fn read_filtered(&self, path: AdcPath) -> Result<i32, HalError> {
        self.afe.init_detect()?;
        self.afe.set_detect_circuit(true)?;
        self.afe.route_adc(path)?;

        let settle = self.tunables.read_adc_delay();
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        let mut fifo = [0i32; ADC_FIFO_COUNT];
        for slot in fifo.iter_mut() {
            *slot = self.adc.read_raw(HEADMIC_ADC_CHANNEL)?;
        }
        let sample = fifo[ADC_FIFO_COUNT / 2];

        tracing::debug!(?path, sample, ?fifo, "filtered ADC sample");
        Ok(sample)
    }

    pub fn classify(&self) -> Result<HeadsetType, HalError> {
        let adc_mic = self.read_filtered(AdcPath::Mic)?;
        let adc_l = self.read_filtered(AdcPath::Ground)?;
        let headset_type = classify_samples(adc_mic, adc_l);
        tracing::info!(adc_mic, adc_l, ?headset_type, "classified accessory");
        Ok(headset_type)
    }

    pub fn is_plausible_button(&self) -> Result<bool, HalError> {
        let adc_mic = self.read_filtered(AdcPath::Mic)?;
        let adc_l = self.read_filtered(AdcPath::Ground)?;
        let plausible = plausible_button_samples(adc_mic, adc_l);
        tracing::debug!(adc_mic, adc_l, plausible, "button plausibility");
        Ok(plausible)
    }
}

impl std::fmt::Debug for AnalogClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogClassifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headset_hal::sim::{SimBoard, SimFault};
    use std::time::Duration;

    fn classifier(sim: &SimBoard) -> AnalogClassifier {
        let board = sim.board();
        let tunables = Arc::new(Tunables::default());
        tunables.set_read_adc_delay(Duration::ZERO);
        AnalogClassifier::new(
            AnalogFrontEnd::new(board.registers.unwrap()),
            board.adc.unwrap(),
            tunables,
        )
    }

    #[test]
    fn test_classify_samples() {
        assert_eq!(classify_samples(80, 80), HeadsetType::NoMic);
        assert_eq!(classify_samples(80, 5000), HeadsetType::Normal);
        assert_eq!(classify_samples(500, 500), HeadsetType::NorthAmerica);
        assert_eq!(classify_samples(3000, 500), HeadsetType::Normal);
        assert_eq!(classify_samples(50, 60), HeadsetType::NoMic);
    }

    #[test]
    fn test_classify_threshold_edges() {
        // Exactly at the disparity threshold counts as different.
        assert_eq!(classify_samples(400, 0), HeadsetType::Normal);
        assert_eq!(classify_samples(399, 0), HeadsetType::NorthAmerica);
        // Exactly at the ground threshold counts as a mic.
        assert_eq!(classify_samples(200, 200), HeadsetType::NorthAmerica);
        assert_eq!(classify_samples(199, 199), HeadsetType::NoMic);
        assert_eq!(classify_samples(-150, -100), HeadsetType::NoMic);
    }

    #[test]
    fn test_plausible_button_samples() {
        assert!(!plausible_button_samples(0, 0));
        assert!(!plausible_button_samples(499, 450));
        assert!(plausible_button_samples(500, 450));
        assert!(plausible_button_samples(250, 3000));
    }

    #[test]
    fn test_read_filtered_takes_unsorted_middle() {
        let sim = SimBoard::new();
        let classifier = classifier(&sim);
        sim.script_adc([900, 10, 42, 7, 1000]);

        assert_eq!(classifier.read_filtered(AdcPath::Mic).unwrap(), 42);
        assert_eq!(sim.adc_reads(), ADC_FIFO_COUNT);
    }

    #[test]
    fn test_classify_reads_both_paths() {
        let sim = SimBoard::new();
        let classifier = classifier(&sim);

        sim.set_adc(3000, 500);
        assert_eq!(classifier.classify().unwrap(), HeadsetType::Normal);

        sim.set_adc(50, 60);
        assert_eq!(classifier.classify().unwrap(), HeadsetType::NoMic);

        sim.set_adc(1200, 1100);
        assert_eq!(classifier.classify().unwrap(), HeadsetType::NorthAmerica);
    }

    #[test]
    fn test_adc_fault_propagates() {
        let sim = SimBoard::new();
        let classifier = classifier(&sim);
        sim.set_fault(SimFault::Adc, true);

        assert!(matches!(classifier.classify(), Err(HalError::Adc { .. })));
        assert!(classifier.is_plausible_button().is_err());
    }
}
