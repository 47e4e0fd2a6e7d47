//! GPIO / peripheral pin assignments for the meter node board (ESP32-WROOM).
//!
//! Single source of truth for wiring.  `main.rs` takes the matching typed
//! pins from `esp_idf_hal`; these constants are what it logs and what the
//! default configuration uses for bus addresses.

// ---------------------------------------------------------------------------
// I2C bus (INA219 + INA3221 share it)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;

/// INA219 on the feeder line (A0 high).
pub const INA219_ADDR: u8 = 0x41;
/// INA3221 on the three transformer branches (A0 to GND).
pub const INA3221_ADDR: u8 = 0x40;

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Theft-alert LED, active HIGH.
pub const ALERT_LED_GPIO: i32 = 2;

/// Link status RGB LED (LEDC channels 0-2, common cathode).
pub const STATUS_LED_R_GPIO: i32 = 13;
pub const STATUS_LED_G_GPIO: i32 = 12;
pub const STATUS_LED_B_GPIO: i32 = 14;
