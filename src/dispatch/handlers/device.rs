use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::dispatch::error::HandlerError;
use crate::services::DeviceService;

macro_rules! device_op {
    ($name:ident => $operation:ident, $request:literal, $done:literal) => {
        pub async fn $name(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
            info!(device_sn = %device_sn, "{}", $request);
            self.service
                .$operation(&device_sn, &payload)
                .await
                .map_err(|e| HandlerError::service(stringify!($operation), e))?;
            info!(device_sn = %device_sn, "{}", $done);
            Ok(())
        }
    };
}

/// Device configuration and maintenance commands.
#[derive(Clone)]
pub struct DeviceHandler {
    service: Arc<dyn DeviceService>,
}

impl DeviceHandler {
    pub fn new(service: Arc<dyn DeviceService>) -> Self {
        DeviceHandler { service }
    }

    device_op!(set_config => set_config, "Set Config Request", "Config Set");
    device_op!(get_config => get_config, "Get Config Request", "Config Retrieved");
    device_op!(set_net_info => set_network_info, "Set Network Info Request", "Network Info Set");
    device_op!(set_time => set_time, "Set Time Request", "Time Set");
    device_op!(
        restart_device => restart_device,
        "Restart Device Request",
        "Device Restart Initiated"
    );
    device_op!(device_reset => reset_device, "Device Reset Request", "Device Reset Initiated");
    device_op!(
        device_disable => disable_device,
        "Device Disable/Enable Request",
        "Device Status Changed"
    );
    device_op!(
        device_upgrade => upgrade_device,
        "Device Upgrade Request",
        "Device Upgrade Initiated"
    );
    device_op!(
        device_information => device_info,
        "Device Information Request",
        "Device Information Retrieved"
    );
    device_op!(
        camera_calibrate => calibrate_camera,
        "Camera Calibration Request",
        "Camera Calibration Initiated"
    );
    device_op!(control => remote_control, "Remote Control Request", "Remote Control Executed");
    device_op!(extract_log => extract_log, "Extract Log Request", "Log Extracted");
    device_op!(password => set_password, "Device Password Request", "Device Password Set");
}
