//! Handler groups, one per command category.
//!
//! Handlers are thin: log the request, hand `(device_sn, payload)` to the matching service,
//! log the result. Service failures come back as
//! [`HandlerError`](super::error::HandlerError) and the router logs them.

pub mod device;
pub mod events;
pub mod personal;
pub mod records;
pub mod secret;
pub mod user_password;

use serde_json::Value;

use self::device::DeviceHandler;
use self::events::EventHandler;
use self::personal::PersonalHandler;
use self::records::RecordsHandler;
use self::secret::SecretHandler;
use self::user_password::UserPasswordHandler;
use super::router::{DispatchTable, DispatchTableBuilder};
use crate::services::Services;

macro_rules! route {
    ($builder:expr, $handler:expr, { $($command:literal => $method:ident),* $(,)? }) => {{
        let mut builder: DispatchTableBuilder = $builder;
        $(
            let handler = $handler.clone();
            builder = builder.route($command, move |device_sn: String, payload: Value| {
                let handler = handler.clone();
                async move { handler.$method(device_sn, payload).await }
            });
        )*
        builder
    }};
}

/// Number of elements when the result is an array, zero otherwise.
pub(crate) fn result_len(result: &Value) -> usize {
    result.as_array().map_or(0, Vec::len)
}

/// Wires every known command to its handler.
pub fn build_dispatch_table(services: &Services) -> DispatchTable {
    let personal = PersonalHandler::new(services.personnel.clone());
    let records = RecordsHandler::new(services.records.clone());
    let device = DeviceHandler::new(services.device.clone());
    let events = EventHandler::new(services.events.clone());
    let user_passwords = UserPasswordHandler::new(services.user_passwords.clone());
    let secrets = SecretHandler::new(services.secrets.clone());

    let builder = DispatchTable::builder();
    let builder = route!(builder, personal, {
        "personCreate" => person_create,
        "personDelete" => person_delete,
        "personFind" => person_find,
        "whiteListSync" => white_list_sync,
        "whiteListFind" => white_list_find,
        "registerFeats" => register_feats,
    });
    let builder = route!(builder, records, {
        "deleteRecords" => delete_records,
        "findRecords" => find_records,
        "reportRecords" => report_records,
    });
    let builder = route!(builder, device, {
        "setConfig" => set_config,
        "getConfig" => get_config,
        "setNetInfo" => set_net_info,
        "setTime" => set_time,
        "restartDevice" => restart_device,
        "deviceReset" => device_reset,
        "deviceDisable" => device_disable,
        "deviceUpgrade" => device_upgrade,
        "deviceInformation" => device_information,
        "cameraCalibrate" => camera_calibrate,
        "control" => control,
        "extractLog" => extract_log,
        "password" => password,
    });
    let builder = route!(builder, events, {
        "alarm" => alarm,
        "heartbeat" => heartbeat,
        "lwt" => lwt,
        "connect" => connect,
        "dcs" => dcs,
        "onlineCheck_reply" => online_check_reply,
    });
    let builder = route!(builder, user_passwords, {
        "userpassword/add" => add,
        "userpassword/del" => delete,
        "userpassword/find" => find,
    });
    let builder = route!(builder, secrets, {
        "secretSync" => secret_sync,
    });

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::topics::COMMANDS;
    use crate::services::memory::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn every_registered_command_has_a_handler() {
        let table = build_dispatch_table(&Services::from_shared(Arc::new(MemoryStore::default())));
        assert_eq!(table.len(), COMMANDS.len());
        for entry in COMMANDS {
            assert!(table.contains(entry.command), "missing {}", entry.command);
        }
    }

    #[test]
    fn result_len_counts_arrays_only() {
        assert_eq!(result_len(&serde_json::json!([1, 2, 3])), 3);
        assert_eq!(result_len(&serde_json::json!({"a": 1})), 0);
    }
}
