//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements               | Connects to                 |
//! |------------|--------------------------|-----------------------------|
//! | `log_sink` | EventSink                | Serial log output           |
//! | `nvs`      | ConfigPort, StoragePort  | NVS / in-memory store       |
//! | `readings` | ReadingsPort             | Acquisition task mailbox    |
//! | `time`     |                          | ESP32 system timer, RTC     |

pub mod log_sink;
pub mod nvs;
pub mod readings;
pub mod time;
