//! Joint model and the robot adapter seam.
//!
//! The command channel does not know what kind of machine it drives.  It sees
//! an ordered set of named joints (axes), each with a current value and a
//! home value, and it needs two things:
//!
//! - read every joint to build `G1` (move) and `G92` (set position) payloads;
//! - write individual joints when the firmware reports where it actually is.
//!
//! [`RobotAdapter`] is that narrow capability.  [`JointTable`] is the
//! in-memory implementation used by the host binary and by tests.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::protocol::messages::{JointReading, LINEAR_MOVE_COMMAND, SET_POSITION_COMMAND};

/// One named axis of the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    /// Axis letter(s) used on the wire, e.g. `X` or `U`.
    pub name: String,
    /// Current commanded or reported value.
    #[serde(default)]
    pub value: f64,
    /// Value the axis returns to on "go home".
    #[serde(default)]
    pub home: f64,
}

impl Joint {
    pub fn new(name: impl Into<String>, value: f64, home: f64) -> Self {
        Self {
            name: name.into(),
            value,
            home,
        }
    }
}

/// Read/write access to a robot's joints.
#[cfg_attr(test, mockall::automock)]
pub trait RobotAdapter: Send {
    /// All joints in wire order.
    fn joints(&self) -> Vec<Joint>;

    /// Sets the current value of the named joint.  Returns `false` when the
    /// robot has no joint by that name.
    fn set_joint_value(&mut self, name: &str, value: f64) -> bool;
}

/// A fixed, ordered list of joints held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointTable {
    joints: Vec<Joint>,
}

impl JointTable {
    pub fn new(joints: Vec<Joint>) -> Self {
        Self { joints }
    }

    /// Looks a joint up by name.
    pub fn get(&self, name: &str) -> Option<&Joint> {
        self.joints.iter().find(|j| j.name == name)
    }
}

impl RobotAdapter for JointTable {
    fn joints(&self) -> Vec<Joint> {
        self.joints.clone()
    }

    fn set_joint_value(&mut self, name: &str, value: f64) -> bool {
        match self.joints.iter_mut().find(|j| j.name == name) {
            Some(joint) => {
                joint.value = value;
                true
            }
            None => false,
        }
    }
}

/// Lets a UI thread and the channel actor share one robot.
///
/// A poisoned lock is recovered rather than propagated: joint values are
/// plain numbers and stay meaningful after a panic elsewhere.
impl<R: RobotAdapter> RobotAdapter for Arc<Mutex<R>> {
    fn joints(&self) -> Vec<Joint> {
        match self.lock() {
            Ok(guard) => guard.joints(),
            Err(poisoned) => poisoned.into_inner().joints(),
        }
    }

    fn set_joint_value(&mut self, name: &str, value: f64) -> bool {
        match self.lock() {
            Ok(mut guard) => guard.set_joint_value(name, value),
            Err(poisoned) => poisoned.into_inner().set_joint_value(name, value),
        }
    }
}

// ── Payload builders ──────────────────────────────────────────────────────────

/// Renders a joint value the way the firmware expects: fixed three decimals.
fn format_value(value: f64) -> String {
    format!("{value:.3}")
}

fn joint_payload<F>(command: &str, joints: &[Joint], pick: F) -> String
where
    F: Fn(&Joint) -> f64,
{
    let mut payload = String::from(command);
    for joint in joints {
        payload.push(' ');
        payload.push_str(&joint.name);
        payload.push_str(&format_value(pick(joint)));
    }
    payload
}

/// `G1` move to every joint's current value, e.g. `G1 X10.000 Y20.000`.
pub fn goto_payload(joints: &[Joint]) -> String {
    joint_payload(LINEAR_MOVE_COMMAND, joints, |j| j.value)
}

/// `G92` declaring every joint to be at its home value.
pub fn set_home_payload(joints: &[Joint]) -> String {
    joint_payload(SET_POSITION_COMMAND, joints, |j| j.home)
}

/// Moves every joint's current value to its home value (locally; nothing is
/// sent).
pub fn go_home(robot: &mut dyn RobotAdapter) {
    for joint in robot.joints() {
        robot.set_joint_value(&joint.name, joint.home);
    }
}

/// Writes a position report into the robot.  Readings for joints the robot
/// does not have are skipped.  Returns how many joints were updated.
pub fn apply_position_report(robot: &mut dyn RobotAdapter, readings: &[JointReading]) -> usize {
    readings
        .iter()
        .filter(|r| robot.set_joint_value(&r.name, r.value))
        .count()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
