/// Who a simulated device is and where it connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub host_name: String,
    pub primary_key: String,
}
