//! End-to-end scenarios against the simulated board.
//!
//! Interrupts are delivered by calling `handle_irq` after changing the
//! simulated hardware, the way a platform handler would.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use headset_detect::{
    new_callback, ButtonDefinition, DetectConfig, DetectError, DispatchPolicy, HeadsetDevice,
    HeadsetType, IrqEvent, KeyCode, PlugState, SwitchState,
};
use headset_events::InMemorySink;
use headset_hal::sim::SimBoard;
use headset_hal::TriggerLevel;

const TIMER_MS: u64 = 30;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config() -> DetectConfig {
    DetectConfig {
        timer_period_ms: TIMER_MS,
        read_adc_delay_ms: 0,
        switch_gpio_delay_ms: 0,
        button_settle_ms: 5,
        ..DetectConfig::default()
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let give_up = Instant::now() + Duration::from_secs(3);
    while Instant::now() < give_up {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Long enough for any stray timer expiry to have run.
fn settle() {
    thread::sleep(Duration::from_millis(TIMER_MS * 4));
}

struct Rig {
    sim: SimBoard,
    sink: Arc<InMemorySink>,
    device: HeadsetDevice,
}

fn rig_with(config: DetectConfig, buttons: Vec<ButtonDefinition>) -> Rig {
    init_tracing();
    let sim = SimBoard::new();
    let sink = Arc::new(InMemorySink::new());
    let device = HeadsetDevice::builder(sim.board())
        .config(config)
        .plug_sink(sink.clone())
        .key_sink(sink.clone())
        .buttons(buttons)
        .build()
        .expect("device builds");
    Rig { sim, sink, device }
}

fn rig() -> Rig {
    rig_with(
        fast_config(),
        vec![
            ButtonDefinition::new(0, 500, KeyCode::VOLUMEUP),
            ButtonDefinition::new(500, 1000, KeyCode::VOLUMEDOWN),
        ],
    )
}

impl Rig {
    fn insert(&self, mic: i32, ground: i32) {
        self.sim.set_adc(mic, ground);
        self.sim.plug(true);
        let runs = self.device.stats().detect_runs;
        self.device.handle_irq(IrqEvent::DetectEdge);
        assert!(wait_until(|| self.device.stats().detect_runs > runs));
    }

    fn remove(&self) {
        self.sim.plug(false);
        let runs = self.device.stats().detect_runs;
        self.device.handle_irq(IrqEvent::DetectEdge);
        assert!(wait_until(|| self.device.stats().detect_runs > runs));
    }

    fn button(&self, down: bool) {
        self.sim.set_button(down);
        let runs = self.device.stats().button_runs;
        self.device.handle_irq(IrqEvent::ButtonEdge);
        assert!(wait_until(|| self.device.stats().button_runs > runs));
    }
}

// =============================================================================
// Plug detection
// =============================================================================

mod detection {
    use super::*;

    #[test]
    fn test_normal_headset_insert() {
        let rig = rig();
        rig.insert(3000, 500);

        assert_eq!(rig.sink.plug_states(), vec![SwitchState::HeadsetMic]);
        assert!(rig.device.button_irq_enabled());
        assert_eq!(rig.sim.button_line().polarity, Some(TriggerLevel::High));
        assert_eq!(rig.device.plug_state(), PlugState::Inserted);
        assert_eq!(rig.device.headset_type(), Some(HeadsetType::Normal));
    }

    #[test]
    fn test_headphone_insert() {
        let rig = rig();
        rig.insert(50, 60);

        assert_eq!(rig.sink.plug_states(), vec![SwitchState::HeadsetNoMic]);
        assert!(!rig.device.button_irq_enabled());
        assert!(!rig.sim.bias_on());
        assert_eq!(rig.device.headset_type(), Some(HeadsetType::NoMic));
    }

    #[test]
    fn test_unplug_publishes_removed() {
        let rig = rig();
        rig.insert(3000, 500);
        rig.remove();

        assert_eq!(
            rig.sink.plug_states(),
            vec![SwitchState::HeadsetMic, SwitchState::Removed]
        );
        assert!(!rig.device.button_irq_enabled());
        assert!(!rig.sim.bias_on());
        assert_eq!(rig.device.plug_state(), PlugState::Removed);
        assert_eq!(rig.device.headset_type(), None);
    }

    #[test]
    fn test_edge_burst_runs_detection_once() {
        let rig = rig();
        rig.sim.set_adc(3000, 500);

        for i in 0..10 {
            rig.sim.plug(i % 2 == 0);
            rig.device.handle_irq(IrqEvent::DetectEdge);
            thread::sleep(Duration::from_millis(2));
        }
        rig.sim.plug(true);
        rig.device.handle_irq(IrqEvent::DetectEdge);

        assert!(wait_until(|| rig.device.stats().detect_runs == 1));
        settle();
        assert_eq!(rig.device.stats().detect_runs, 1);
        assert_eq!(rig.device.stats().timer_fires, 1);
        assert_eq!(rig.sink.plug_states(), vec![SwitchState::HeadsetMic]);
    }

    #[test]
    fn test_every_edge_flips_detect_polarity() {
        let rig = rig();
        for _ in 0..4 {
            rig.device.handle_irq(IrqEvent::DetectEdge);
        }
        use TriggerLevel::{High, Low};
        assert_eq!(
            rig.sim.detect_line().polarity_history,
            vec![Low, High, Low, High, Low]
        );
    }

    #[test]
    fn test_observers_notified_with_raw_level() {
        let rig = rig();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let id = rig.device.subscribe(new_callback(move |level, _| {
            seen_clone.lock().unwrap().push(level);
        }));

        rig.insert(3000, 500);
        rig.remove();
        assert!(rig.device.unsubscribe(id));
        rig.insert(3000, 500);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_timer_period_is_tunable_at_runtime() {
        let rig = rig();
        rig.device
            .tunables()
            .set_timer_period(Duration::from_millis(400));
        rig.sim.set_adc(3000, 500);
        rig.sim.plug(true);
        rig.device.handle_irq(IrqEvent::DetectEdge);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(rig.device.stats().detect_runs, 0);
        assert!(wait_until(|| rig.device.stats().detect_runs == 1));
    }
}

// =============================================================================
// Buttons
// =============================================================================

mod buttons {
    use super::*;

    #[test]
    fn test_press_and_release() {
        let rig = rig();
        rig.insert(250, 3000);

        rig.button(true);
        assert_eq!(rig.sink.key_events(), vec![(KeyCode::VOLUMEUP, true)]);

        rig.button(false);
        assert_eq!(
            rig.sink.key_events(),
            vec![(KeyCode::VOLUMEUP, true), (KeyCode::VOLUMEUP, false)]
        );
    }

    #[test]
    fn test_button_edges_flip_button_polarity() {
        let rig = rig();
        rig.insert(250, 3000);
        rig.button(true);
        rig.button(false);

        use TriggerLevel::{High, Low};
        // Build arms low, detection arms high, then one flip per edge.
        assert_eq!(
            rig.sim.button_line().polarity_history,
            vec![Low, High, Low, High]
        );
    }

    #[test]
    fn test_unplug_releases_held_button() {
        let rig = rig_with(
            fast_config(),
            vec![ButtonDefinition::new(100, 200, KeyCode::MEDIA)],
        );
        rig.insert(150, 3000);
        rig.button(true);
        assert_eq!(rig.sink.key_events(), vec![(KeyCode::MEDIA, true)]);
        rig.sink.clear();

        rig.remove();
        // Edges after unplug are masked.
        rig.device.handle_irq(IrqEvent::ButtonEdge);
        settle();

        assert_eq!(rig.sink.key_events(), vec![(KeyCode::MEDIA, false)]);
    }

    #[test]
    fn test_no_key_events_while_removed() {
        let rig = rig();
        rig.insert(250, 3000);
        rig.remove();

        rig.sim.set_button(true);
        for _ in 0..3 {
            rig.device.handle_irq(IrqEvent::ButtonEdge);
        }
        settle();

        assert!(rig.sink.key_events().is_empty());
        assert_eq!(rig.device.stats().button_runs, 0);
    }

    #[test]
    fn test_detect_edge_masks_button_before_work_runs() {
        let rig = rig();
        rig.insert(250, 3000);

        rig.sim.plug(false);
        rig.device.handle_irq(IrqEvent::DetectEdge);
        rig.device.handle_irq(IrqEvent::ButtonEdge);
        assert!(wait_until(|| rig.device.stats().detect_runs == 2));
        settle();

        assert!(rig.sink.key_events().is_empty());
    }

    #[test]
    fn test_implausible_button_rechecks_plug() {
        let rig = rig();
        rig.insert(3000, 500);

        rig.sim.set_adc(20, 30);
        rig.button(true);

        assert!(rig.sink.key_events().is_empty());
        assert_eq!(rig.device.stats().false_triggers, 1);
        // The false trigger re-armed detection, which now sees a headphone.
        assert!(wait_until(|| rig.device.stats().detect_runs == 2));
        assert!(wait_until(|| rig.sink.plug_states().len() == 2));
        assert_eq!(
            rig.sink.plug_states(),
            vec![SwitchState::HeadsetMic, SwitchState::HeadsetNoMic]
        );
    }

    #[test]
    fn test_unmatched_sample_still_reports_reserved_press() {
        let rig = rig();
        rig.insert(1500, 4000);
        rig.button(true);

        assert_eq!(rig.sink.key_events(), vec![(KeyCode::RESERVED, true)]);
    }

    #[test]
    fn test_headphone_ignores_button_edges() {
        let rig = rig();
        rig.insert(50, 60);
        rig.sim.set_button(true);
        rig.device.handle_irq(IrqEvent::ButtonEdge);
        settle();

        assert_eq!(rig.device.stats().button_runs, 0);
        assert!(rig.sink.key_events().is_empty());
    }
}

// =============================================================================
// Dispatch policy
// =============================================================================

mod dispatch {
    use super::*;

    fn slow_button_config(dispatch: DispatchPolicy) -> DetectConfig {
        DetectConfig {
            button_settle_ms: 200,
            dispatch,
            ..fast_config()
        }
    }

    #[test]
    fn test_coalescing_drops_button_behind_pending_detect() {
        let rig = rig_with(
            slow_button_config(DispatchPolicy::Coalescing),
            vec![ButtonDefinition::new(0, 500, KeyCode::VOLUMEUP)],
        );
        rig.insert(250, 3000);
        rig.sim.set_button(true);

        rig.device.handle_irq(IrqEvent::ButtonEdge);
        rig.device.handle_irq(IrqEvent::TimerFired);
        rig.device.handle_irq(IrqEvent::ButtonEdge);

        assert!(wait_until(|| rig.device.stats().detect_runs == 2));
        settle();
        let stats = rig.device.stats();
        assert_eq!(stats.discarded_button_irqs, 1);
        assert_eq!(stats.button_runs, 1);
        assert_eq!(rig.device.tunables().discarded_button_irqs(), 1);
    }

    #[test]
    fn test_queued_keeps_every_request() {
        let rig = rig_with(
            slow_button_config(DispatchPolicy::Queued),
            vec![ButtonDefinition::new(0, 500, KeyCode::VOLUMEUP)],
        );
        rig.insert(250, 3000);
        rig.sim.set_button(true);

        rig.device.handle_irq(IrqEvent::ButtonEdge);
        rig.device.handle_irq(IrqEvent::TimerFired);
        rig.device.handle_irq(IrqEvent::ButtonEdge);

        assert!(wait_until(|| rig.device.stats().button_runs == 2));
        let stats = rig.device.stats();
        assert_eq!(stats.discarded_button_irqs, 0);
        assert_eq!(stats.detect_runs, 2);
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_shutdown_stops_everything() {
        let rig = rig();
        rig.insert(3000, 500);
        rig.device.shutdown();

        assert!(!rig.sim.detect_line().enabled);
        assert!(!rig.device.button_irq_enabled());

        let events = rig.sink.len();
        rig.sim.plug(false);
        rig.device.handle_irq(IrqEvent::DetectEdge);
        rig.device.handle_irq(IrqEvent::TimerFired);
        settle();
        assert_eq!(rig.sink.len(), events);

        rig.device.shutdown();
    }

    #[test]
    fn test_shutdown_during_detection_keeps_button_masked() {
        let rig = rig_with(
            DetectConfig {
                switch_gpio_delay_ms: 150,
                ..fast_config()
            },
            vec![ButtonDefinition::new(0, 500, KeyCode::VOLUMEUP)],
        );
        rig.sim.set_adc(3000, 500);
        rig.sim.plug(true);
        rig.device.handle_irq(IrqEvent::TimerFired);
        thread::sleep(Duration::from_millis(40));

        rig.device.shutdown();

        assert!(!rig.device.button_irq_enabled());
        assert!(!rig.sim.button_line().enabled);
        assert!(!rig.sim.button_line().enable_history.contains(&true));
    }

    #[test]
    fn test_shutdown_cancels_pending_timer() {
        let rig = rig();
        rig.sim.plug(true);
        rig.device.handle_irq(IrqEvent::DetectEdge);
        rig.device.shutdown();
        settle();

        assert_eq!(rig.device.stats().detect_runs, 0);
        assert!(rig.sink.is_empty());
    }

    #[test]
    fn test_detection_runs_without_buttons() {
        init_tracing();
        let sim = SimBoard::new();
        let sink = Arc::new(InMemorySink::new());
        let device = HeadsetDevice::builder(sim.board())
            .config(fast_config())
            .plug_sink(sink.clone())
            .build()
            .unwrap();
        assert!(matches!(
            device.button_fault(),
            Some(DetectError::MissingCapability("key sink"))
        ));

        sim.set_adc(3000, 500);
        sim.plug(true);
        device.handle_irq(IrqEvent::DetectEdge);
        assert!(wait_until(|| sink.plug_states() == vec![SwitchState::HeadsetMic]));

        device.handle_irq(IrqEvent::ButtonEdge);
        settle();
        assert_eq!(device.stats().button_runs, 0);
    }

    #[test]
    fn test_invalid_buttons_reported() {
        init_tracing();
        let sim = SimBoard::new();
        let sink = Arc::new(InMemorySink::new());
        let device = HeadsetDevice::builder(sim.board())
            .config(fast_config())
            .plug_sink(sink.clone())
            .key_sink(sink)
            .buttons(vec![
                ButtonDefinition::new(0, 100, KeyCode::MEDIA),
                ButtonDefinition::new(100, 200, KeyCode::MEDIA),
            ])
            .build()
            .unwrap();

        assert!(matches!(
            device.button_fault(),
            Some(DetectError::DuplicateKeyCode(KeyCode::MEDIA))
        ));
    }

    #[test]
    fn test_config_from_json() {
        let config = DetectConfig::from_json(
            r#"{"timer_period_ms": 30, "read_adc_delay_ms": 0, "switch_gpio_delay_ms": 0,
                "button_settle_ms": 5, "dispatch": "queued"}"#,
        )
        .unwrap();
        let rig = rig_with(config, vec![ButtonDefinition::new(0, 500, KeyCode::MEDIA)]);
        rig.insert(3000, 500);
        assert_eq!(rig.sink.plug_states(), vec![SwitchState::HeadsetMic]);
    }
}
