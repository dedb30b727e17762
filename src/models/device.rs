use serde::{Deserialize, Serialize};

// Row stored in user_devices.csv
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub phone_number: String,
    pub user_agent: String,
    pub last_login_ip: Option<String>,
    pub last_activity_time: String, // ISO format
}

// Bound-device view shown on the appointments page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub ip_address: Option<String>,
}
