//! GPIO assignments for the controller board.
//!
//! Single source of truth: drivers reference this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Relay outputs (opto-isolated SSR / mechanical relay modules)
// ---------------------------------------------------------------------------

/// Heater element relay.  HIGH = energised unless the relay config is inverted.
pub const HEATER_RELAY_GPIO: i32 = 4;
/// CO2 solenoid valve relay.
pub const CO2_RELAY_GPIO: i32 = 5;

// ---------------------------------------------------------------------------
// UART debug
// ---------------------------------------------------------------------------

pub const UART_TX_GPIO: i32 = 17;
pub const UART_RX_GPIO: i32 = 18;
