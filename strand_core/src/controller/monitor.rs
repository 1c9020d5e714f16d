//! Post-bring-up monitoring: fault intake, periodic error-counter
//! reset, and the bus-drop detector
//!
//! Runs on every controller tick while the segment is `Up`. The drop
//! detector reads the well-known identity register of every discovered
//! node in address order and declares a drop at the first mismatch; a
//! drop is handled exactly like a hardware-reported line fault. The
//! scan cadence and the error-counter reset period are configured
//! independently and may interleave freely.

use super::{BusController, ControllerState};
use log::{debug, warn};
use strand_types::{regs, FaultEvent, FaultKind, NodeAddr};

impl BusController {
    /// One monitor pass (state `Up`).
    pub(crate) fn monitor_tick(&mut self) {
        let ticks = self.bump_monitor_tick();

        // hardware-reported faults take precedence
        if let Some(event) = self.take_fault_event() {
            self.enter_recovering(event);
            return;
        }

        if self.error_reset_due() {
            self.reset_error_counters();
        }

        let interval = self.active_config().drop_check_interval as u64;
        if interval > 0 && ticks % interval == 0 {
            if let Some(event) = self.run_drop_scan() {
                self.enter_recovering(event);
            }
        }
    }

    /// Clear the line error counters on every node, master first.
    fn reset_error_counters(&mut self) {
        debug!("resetting line error counters");
        if let Err(err) = self
            .stack_mut()
            .write_register(NodeAddr::Master, regs::ERR_RESET, 0x01)
        {
            warn!("error-counter reset on master failed: {}", err);
        }
        for index in 0..self.node_count() as u8 {
            let node = NodeAddr::Slave(index);
            if let Err(err) = self.stack_mut().write_register(node, regs::ERR_RESET, 0x01) {
                warn!("error-counter reset on {} failed: {}", node, err);
            }
        }
    }

    /// Verify every discovered node still answers with the expected
    /// identity. Returns the drop as a fault event at the first
    /// mismatching node.
    fn run_drop_scan(&mut self) -> Option<FaultEvent> {
        debug_assert_eq!(self.state(), ControllerState::Up);
        for index in 0..self.node_count() as u8 {
            let node = NodeAddr::Slave(index);
            match self.stack_mut().read_register(node, regs::IDENTITY) {
                Ok(value) if value == regs::IDENTITY_EXPECTED => {}
                Ok(value) => {
                    warn!(
                        "bus drop at {}: identity 0x{:02x}, expected 0x{:02x}",
                        node,
                        value,
                        regs::IDENTITY_EXPECTED
                    );
                    // the detector sees a mismatch, not an electrical
                    // cause; recovery is kind-independent
                    return Some(FaultEvent {
                        node,
                        kind: FaultKind::Unknown,
                    });
                }
                Err(err) => {
                    warn!("bus drop at {}: identity read failed ({})", node, err);
                    return Some(FaultEvent {
                        node,
                        kind: FaultKind::Unknown,
                    });
                }
            }
        }
        None
    }
}
