//! Body-sensor source: battery charge and actuator temperatures.

use std::sync::Arc;

use serde_json::Value;

use super::{
    error::SourceResult,
    memory::{read_f64, RobotMemory},
    Batch, Fields, Sample,
};

const BATTERY_KEY: &str = "Device/SubDeviceList/Battery/Charge/Sensor/Value";

/// Actuators whose temperature is reported every cycle.
pub const JOINTS: [&str; 18] = [
    "HeadYaw",
    "HeadPitch",
    "LShoulderPitch",
    "LShoulderRoll",
    "LElbowYaw",
    "LElbowRoll",
    "LWristYaw",
    "RShoulderPitch",
    "RShoulderRoll",
    "RElbowYaw",
    "RElbowRoll",
    "RWristYaw",
    "HipRoll",
    "HipPitch",
    "KneePitch",
    "WheelFL",
    "WheelFR",
    "WheelB",
];

fn temperature_key(joint: &str) -> String {
    format!("Device/SubDeviceList/{}/Temperature/Sensor/Value", joint)
}

pub struct BodySensorSource {
    memory: Arc<dyn RobotMemory>,
}

impl BodySensorSource {
    pub fn new(memory: Arc<dyn RobotMemory>) -> Self {
        Self { memory }
    }

    pub(super) async fn check(&self) -> bool {
        self.memory.is_available().await
    }

    /// Reads every sensor on its own; an unreadable sensor is recorded as a
    /// failure and the remaining values are still reported.
    pub(super) async fn sample(&self) -> SourceResult<Batch> {
        let mut batch = Batch::default();

        match read_f64(self.memory.as_ref(), BATTERY_KEY).await {
            Ok(charge) => {
                let mut fields = Fields::new();
                fields.insert("charge".into(), Value::from(charge));
                batch.samples.push(Sample::new("battery", fields));
            }
            Err(e) => batch.failures.push(e),
        }

        let mut temperatures = Fields::new();
        for joint in JOINTS {
            match read_f64(self.memory.as_ref(), &temperature_key(joint)).await {
                Ok(celsius) => {
                    temperatures.insert(joint.into(), Value::from(celsius));
                }
                Err(e) => batch.failures.push(e),
            }
        }
        if !temperatures.is_empty() {
            batch.samples.push(Sample::new("temperature", temperatures));
        }

        Ok(batch)
    }
}
