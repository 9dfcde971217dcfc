//! Runs both protocol kernels against their in-process simulators.
//!
//! The Märklin CAN kernel discovers the simulated Gleisbox, reads its
//! descriptors, downloads the locomotive list and then switches track
//! power and an accessory. The DIY kernel completes its handshake, then
//! drives an output and toggles a simulated input.
//!
//! # Usage
//!
//! ```sh
//! cargo run --example simulation
//! RUST_LOG=debug cargo run --example simulation
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context};
use rs_trackside::config::{CanConfig, DiyConfig, LogConfig};
use rs_trackside::hal::{MockDecoderController, MockInputController, MockOutputController};
use rs_trackside::kernel::{Kernel, KernelState, Protocol};
use rs_trackside::logging::{self, Logger};
use rs_trackside::protocol::diy::{Diy, DiyNotice, DiySimulation, IoState, SimulateInputAction};
use rs_trackside::protocol::marklin_can::{CanNotice, CanSimulation, MarklinCan};
use rs_trackside::traits::{InputChannel, OutputChannel};

const TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    logging::init(&LogConfig::default())?;

    println!("=================================");
    println!("  rs-trackside simulation");
    println!("=================================");
    println!();

    run_can()?;
    println!();
    run_diy()?;
    Ok(())
}

/// Kernel with mock controllers and state changes printed under `label`.
fn kernel<P: Protocol>(
    config: P::Config,
    transport: impl rs_trackside::Transport<P::Message> + 'static,
    label: &'static str,
) -> (Kernel<P>, Rc<RefCell<MockInputController>>, Rc<RefCell<MockOutputController>>) {
    let mut kernel = Kernel::new(config, transport, Logger::new(label));
    let inputs = Rc::new(RefCell::new(
        MockInputController::new().with_addresses(InputChannel::Input, &[1, 2]),
    ));
    let outputs = Rc::new(RefCell::new(MockOutputController::for_protocol::<P>()));
    kernel.set_decoder_controller(Rc::new(RefCell::new(MockDecoderController::new())));
    kernel.set_input_controller(inputs.clone());
    kernel.set_output_controller(outputs.clone());
    kernel.on_state_changed(move |state| println!("[{label}] state: {state:?}"));
    (kernel, inputs, outputs)
}

fn start<P: Protocol>(kernel: &mut Kernel<P>) -> anyhow::Result<()> {
    kernel.start().context("starting kernel")?;
    if !kernel.run_until(TIMEOUT, |k| k.state() == KernelState::Started) {
        bail!("kernel did not start: {:?}", kernel.last_error());
    }
    Ok(())
}

fn run_can() -> anyhow::Result<()> {
    let config = CanConfig::default()
        .with_discovery_timeout_ms(200)
        .with_default_switch_time_ms(100);
    let (mut kernel, inputs, outputs) =
        kernel::<MarklinCan>(config, CanSimulation::new().with_feedback(3, true), "cs2");
    kernel.on_notice(|notice: &CanNotice| match notice {
        CanNotice::Power(power) => println!("[cs2] power: {power:?}"),
        CanNotice::NodeChanged(node) => println!(
            "[cs2] node 0x{:08X} {:?} v{}.{}, {} reading(s)",
            node.uid,
            node.device_id,
            node.version.0,
            node.version.1,
            node.readings.len()
        ),
        CanNotice::LocomotiveList(list) => {
            for loco in &list.locomotives {
                println!("[cs2] locomotive {:>3} {} ({:?})", loco.address, loco.name, loco.protocol);
            }
        }
    });
    start(&mut kernel)?;

    kernel.system_go()?;
    kernel.set_output(OutputChannel::AccessoryDcc, 7, true)?;
    kernel.run_until(Duration::from_millis(500), |_| false);

    for (channel, address, value) in &outputs.borrow().updates {
        println!("[cs2] output {channel:?} {address}: {value:?}");
    }
    for (channel, address, value) in &inputs.borrow().updates {
        println!("[cs2] input {channel:?} {address}: {value:?}");
    }
    kernel.stop();
    Ok(())
}

fn run_diy() -> anyhow::Result<()> {
    let sim = DiySimulation::new().with_input(1, IoState::True);
    let (mut kernel, inputs, outputs) = kernel::<Diy>(DiyConfig::default(), sim, "diy");
    kernel.on_notice(|notice: &DiyNotice| println!("[diy] notice: {notice:?}"));
    start(&mut kernel)?;

    kernel.set_output(12, true)?;
    kernel.simulate_input_change(2, SimulateInputAction::Toggle)?;
    kernel.run_until(Duration::from_millis(300), |_| false);

    for (channel, address, value) in &outputs.borrow().updates {
        println!("[diy] output {channel:?} {address}: {value:?}");
    }
    for (channel, address, value) in &inputs.borrow().updates {
        println!("[diy] input {channel:?} {address}: {value:?}");
    }
    kernel.stop();
    Ok(())
}
