//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                    |
//! |----------------|--------------------|--------------------------------|
//! | `controller`   | ActuatorPort       | Refrigeration controller (RS485 Modbus RTU) |
//! | `device_id`    | -                  | eFuse MAC                      |
//! | `hardware`     | SensorPort         | DHT11, door contact, battery ADC |
//! |                | ButtonPort         | BOOT / RESET buttons, status LED |
//! | `nvs`          | StoragePort        | NVS / in-memory store          |
//! | `system`       | SystemPort         | Heap allocator, restart        |
//! | `time`         | TimePort           | ESP32 system timer, SNTP       |
//! | `wifi`         | StationPort        | ESP-IDF WiFi STA               |
//! |                | ConfigPortal       | SoftAP + HTTP form             |
//! |                | ConnectivityPort   | `LinkMonitor` (shared status)  |

pub mod controller;
pub mod device_id;
pub mod hardware;
pub mod nvs;
pub mod system;
pub mod time;
pub mod wifi;
