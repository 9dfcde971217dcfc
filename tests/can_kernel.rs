//! Integration tests for the Märklin CAN kernel against the simulated Gleisbox

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use rs_trackside::config::CanConfig;
use rs_trackside::hal::{MockDecoderController, MockInputController, MockOutputController};
use rs_trackside::kernel::{Kernel, KernelState};
use rs_trackside::logging::Logger;
use rs_trackside::protocol::marklin_can::simulation::SIMULATED_NODE_UID;
use rs_trackside::protocol::marklin_can::{
    CanNotice, CanSimulation, Command, MarklinCan, Message, PowerState,
};
use rs_trackside::traits::{
    DecoderChangeFlags, DecoderKey, DecoderProtocol, DecoderState, InputChannel, OutputChannel,
    TriState,
};
use rs_trackside::CommandError;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Rig {
    kernel: Kernel<MarklinCan>,
    decoders: Rc<RefCell<MockDecoderController>>,
    inputs: Rc<RefCell<MockInputController>>,
    outputs: Rc<RefCell<MockOutputController>>,
    states: Rc<RefCell<Vec<KernelState>>>,
    notices: Rc<RefCell<Vec<CanNotice>>>,
    wire: Receiver<Message>,
}

fn fast() -> CanConfig {
    CanConfig::default()
        .with_discovery_timeout_ms(100)
        .with_request_timeout_ms(100)
}

fn rig_with(config: CanConfig, sim: CanSimulation, logger: Logger) -> Rig {
    let (tx, wire) = mpsc::channel();
    let mut kernel = Kernel::new(config, sim.with_wire_tap(tx), logger);

    let mfx = DecoderKey::new(DecoderProtocol::Mfx, 5);
    let decoders = Rc::new(RefCell::new(MockDecoderController::new().with_decoder(mfx)));
    let inputs = Rc::new(RefCell::new(MockInputController::new()));
    let outputs = Rc::new(RefCell::new(MockOutputController::for_protocol::<MarklinCan>()));
    kernel.set_decoder_controller(decoders.clone());
    kernel.set_input_controller(inputs.clone());
    kernel.set_output_controller(outputs.clone());

    let states = Rc::new(RefCell::new(Vec::new()));
    let seen = states.clone();
    kernel.on_state_changed(move |state| seen.borrow_mut().push(state));

    let notices = Rc::new(RefCell::new(Vec::new()));
    let seen = notices.clone();
    kernel.on_notice(move |notice: &CanNotice| seen.borrow_mut().push(notice.clone()));

    Rig {
        kernel,
        decoders,
        inputs,
        outputs,
        states,
        notices,
        wire,
    }
}

fn rig(sim: CanSimulation) -> Rig {
    rig_with(fast(), sim, Logger::new("cs2"))
}

fn started(rig: &mut Rig) {
    rig.kernel.start().unwrap();
    assert!(rig
        .kernel
        .run_until(TIMEOUT, |k| k.state() == KernelState::Started));
}

fn has_notice(notices: &RefCell<Vec<CanNotice>>, f: impl Fn(&CanNotice) -> bool) -> bool {
    notices.borrow().iter().any(f)
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn startup_states_in_order() {
    let mut rig = rig(CanSimulation::new());
    started(&mut rig);
    assert_eq!(
        *rig.states.borrow(),
        vec![
            KernelState::Initial,
            KernelState::DiscoverNodes,
            KernelState::ReadNodeDescriptors,
            KernelState::ConfigureDevice,
            KernelState::DownloadCatalog,
            KernelState::Started,
        ]
    );
}

#[test]
fn discovered_node_is_described() {
    let mut rig = rig(CanSimulation::new());
    started(&mut rig);

    let notices = rig.notices.borrow();
    let node = notices
        .iter()
        .rev()
        .find_map(|n| match n {
            CanNotice::NodeChanged(node) if node.uid == SIMULATED_NODE_UID => Some(node),
            _ => None,
        })
        .expect("node notice");
    assert!(node.description.is_some());
    assert_eq!(node.readings.len(), 1);
    assert_eq!(node.configurations.len(), 1);
}

#[test]
fn locomotive_list_is_downloaded() {
    let mut rig = rig(CanSimulation::new());
    started(&mut rig);

    let notices = rig.notices.borrow();
    let list = notices
        .iter()
        .find_map(|n| match n {
            CanNotice::LocomotiveList(list) => Some(list),
            _ => None,
        })
        .expect("locomotive list notice");
    assert_eq!(list.locomotives.len(), 3);
    assert_eq!(list.locomotives[0].name, "BR 86");
    assert_eq!(list.locomotives[1].address, 200);
}

#[test]
fn skipping_the_locomotive_list() {
    let config = fast().with_download_locomotive_list(false);
    let mut rig = rig_with(config, CanSimulation::new(), Logger::new("cs2"));
    started(&mut rig);
    assert!(!has_notice(&rig.notices, |n| matches!(n, CanNotice::LocomotiveList(_))));
    assert!(!rig
        .wire
        .try_iter()
        .any(|m| m.command() == Some(Command::ConfigData)));
}

#[test]
fn silent_bus_still_starts() {
    let config = CanConfig::default()
        .with_discovery_timeout_ms(30)
        .with_request_timeout_ms(20)
        .with_request_attempts(2);
    let mut rig = rig_with(config, CanSimulation::new().never_respond(), Logger::new("cs2"));
    started(&mut rig);
    assert!(rig.notices.borrow().is_empty());

    let requests = rig
        .wire
        .try_iter()
        .filter(|m| m.command() == Some(Command::ConfigData))
        .count();
    assert_eq!(requests, 2);
}

#[test]
fn corrupt_stream_is_retried_then_abandoned() {
    let config = fast().with_request_attempts(2);
    let mut rig = rig_with(config, CanSimulation::new().corrupt_crc(), Logger::new("cs2"));
    started(&mut rig);
    assert!(!has_notice(&rig.notices, |n| matches!(n, CanNotice::LocomotiveList(_))));

    let requests = rig
        .wire
        .try_iter()
        .filter(|m| m.command() == Some(Command::ConfigData))
        .count();
    assert_eq!(requests, 2);
}

#[test]
fn debug_dumps_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast()
        .with_debug_status_data_config(true)
        .with_debug_config_stream(true);
    let logger = Logger::new("cs2").with_debug_dir(dir.path());
    let mut rig = rig_with(config, CanSimulation::new(), logger);
    started(&mut rig);

    let node = dir.path().join("cs2").join("node_47431234.json");
    let json = std::fs::read_to_string(node).unwrap();
    assert!(json.contains("\"uid\""));
    assert!(dir.path().join("cs2").join("loks.bin").exists());
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn power_commands_are_confirmed() {
    let mut rig = rig(CanSimulation::new());
    started(&mut rig);

    rig.kernel.system_go().unwrap();
    assert!(rig.kernel.run_until(TIMEOUT, |_| {
        has_notice(&rig.notices, |n| *n == CanNotice::Power(PowerState::Go))
    }));
    rig.kernel.system_stop().unwrap();
    assert!(rig.kernel.run_until(TIMEOUT, |_| {
        has_notice(&rig.notices, |n| *n == CanNotice::Power(PowerState::Stop))
    }));
}

#[test]
fn commands_before_started_are_held() {
    let mut rig = rig(CanSimulation::new());
    rig.kernel.start().unwrap();
    rig.kernel.system_go().unwrap();

    assert!(rig.kernel.run_until(TIMEOUT, |_| {
        has_notice(&rig.notices, |n| *n == CanNotice::Power(PowerState::Go))
    }));
    // the confirmation can only follow the last startup state
    assert_eq!(rig.kernel.state(), KernelState::Started);
}

#[test]
fn accessory_switches_and_falls_back() {
    let config = fast().with_default_switch_time_ms(50);
    let mut rig = rig_with(config, CanSimulation::new(), Logger::new("cs2"));
    started(&mut rig);

    rig.kernel
        .set_output(OutputChannel::AccessoryMotorola, 1, true)
        .unwrap();
    assert!(rig.kernel.run_until(TIMEOUT, |_| {
        rig.outputs
            .borrow()
            .updates
            .contains(&(OutputChannel::AccessoryMotorola, 1, TriState::True))
    }));
    assert!(rig.kernel.run_until(TIMEOUT, |_| {
        rig.outputs.borrow().value(OutputChannel::AccessoryMotorola, 1) == TriState::False
    }));
}

#[test]
fn accessory_address_is_checked() {
    let rig = rig(CanSimulation::new());
    assert_eq!(
        rig.kernel.set_output(OutputChannel::AccessoryDcc, 4097, true),
        Err(CommandError::AddressOutOfRange {
            address: 4097,
            min: 1,
            max: 4096
        })
    );
}

#[test]
fn feedback_reaches_inputs() {
    let mut rig = rig(CanSimulation::new().with_feedback(12, true));
    started(&mut rig);
    assert!(rig.kernel.run_until(TIMEOUT, |_| {
        rig.inputs.borrow().value(InputChannel::S88, 12) == TriState::True
    }));
}

#[test]
fn throttle_change_is_echoed_to_decoder() {
    let mut rig = rig(CanSimulation::new());
    started(&mut rig);

    let key = DecoderKey::new(DecoderProtocol::Mfx, 5);
    let mut state = DecoderState::new(key);
    state.throttle = 0.5;
    rig.kernel
        .decoder_changed(&state, DecoderChangeFlags::THROTTLE, 0)
        .unwrap();

    assert!(rig.kernel.run_until(TIMEOUT, |_| {
        rig.decoders
            .borrow()
            .decoders
            .get(&key)
            .is_some_and(|d| (d.throttle - 0.5).abs() < 0.01)
    }));
}
