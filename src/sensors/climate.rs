//! DHT11 temperature / humidity sensor on a single-wire data line.
//!
//! ## Frame
//!
//! ```text
//!  byte 0     byte 1     byte 2     byte 3          byte 4
//! ┌─────────┬──────────┬──────────┬───────────────┬──────────┐
//! │ RH int  │ RH tenth │ T int    │ b7=sign T tenth│ checksum │
//! └─────────┴──────────┴──────────┴───────────────┴──────────┘
//! ```
//!
//! Each bit is a ~50 µs LOW followed by a HIGH pulse: ~27 µs = 0,
//! ~70 µs = 1.  The checksum is the low byte of the sum of bytes 0-3.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: bit-banged on `DHT_DATA_GPIO` (open-drain, configured in
//! `hw_init`).  On host/test: reads from static atomics for injection.

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// HIGH pulses longer than this decode as a 1 bit.
pub const ONE_THRESHOLD_US: u32 = 40;

/// The sensor needs at least this long between conversions.
pub const MIN_INTERVAL_MS: u64 = 1_000;

#[cfg(not(target_os = "espidf"))]
static SIM_TEMP_TENTHS: AtomicI32 = AtomicI32::new(-182);
#[cfg(not(target_os = "espidf"))]
static SIM_HUMIDITY_TENTHS: AtomicI32 = AtomicI32::new(655);
#[cfg(not(target_os = "espidf"))]
static SIM_FAIL: AtomicBool = AtomicBool::new(false);

/// Inject a host-side reading (tenths of a unit).
#[cfg(not(target_os = "espidf"))]
pub fn sim_set_climate(temp_tenths: i32, humidity_tenths: i32) {
    SIM_TEMP_TENTHS.store(temp_tenths, Ordering::Relaxed);
    SIM_HUMIDITY_TENTHS.store(humidity_tenths, Ordering::Relaxed);
}

/// Make host-side reads fail (sensor unplugged).
#[cfg(not(target_os = "espidf"))]
pub fn sim_set_climate_fault(failed: bool) {
    SIM_FAIL.store(failed, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimateError {
    /// No response or a pulse outside its time budget.
    Timeout,
    Checksum,
}

/// Pack 40 HIGH-pulse widths into the 5-byte frame.
pub fn bits_to_frame(high_us: &[u32; 40]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, &width) in high_us.iter().enumerate() {
        if width > ONE_THRESHOLD_US {
            frame[i / 8] |= 0x80 >> (i % 8);
        }
    }
    frame
}

/// Validate the checksum and convert the frame.
pub fn decode_frame(frame: &[u8; 5]) -> Result<ClimateReading, ClimateError> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(ClimateError::Checksum);
    }
    let humidity_pct = f32::from(frame[0]) + f32::from(frame[1]) / 10.0;
    let magnitude = f32::from(frame[2]) + f32::from(frame[3] & 0x7F) / 10.0;
    let temperature_c = if frame[3] & 0x80 != 0 { -magnitude } else { magnitude };
    Ok(ClimateReading {
        temperature_c,
        humidity_pct,
    })
}

pub struct ClimateSensor {
    _data_gpio: i32,
    last: Option<ClimateReading>,
    last_read_ms: Option<u64>,
}

impl ClimateSensor {
    pub fn new(data_gpio: i32) -> Self {
        Self {
            _data_gpio: data_gpio,
            last: None,
            last_read_ms: None,
        }
    }

    /// One conversion.  Calls closer than [`MIN_INTERVAL_MS`] return the
    /// previous good value.
    pub fn read(&mut self, now_ms: u64) -> Result<ClimateReading, ClimateError> {
        if let (Some(at), Some(last)) = (self.last_read_ms, self.last) {
            if now_ms.saturating_sub(at) < MIN_INTERVAL_MS {
                return Ok(last);
            }
        }
        let reading = self.acquire()?;
        self.last = Some(reading);
        self.last_read_ms = Some(now_ms);
        Ok(reading)
    }

    #[cfg(not(target_os = "espidf"))]
    fn acquire(&self) -> Result<ClimateReading, ClimateError> {
        if SIM_FAIL.load(Ordering::Relaxed) {
            return Err(ClimateError::Timeout);
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(ClimateReading {
            temperature_c: SIM_TEMP_TENTHS.load(Ordering::Relaxed) as f32 / 10.0,
            humidity_pct: SIM_HUMIDITY_TENTHS.load(Ordering::Relaxed) as f32 / 10.0,
        })
    }

    #[cfg(target_os = "espidf")]
    fn acquire(&self) -> Result<ClimateReading, ClimateError> {
        use esp_idf_svc::sys::{esp_rom_delay_us, esp_timer_get_time, gpio_get_level, gpio_set_level};

        let pin = self._data_gpio;
        let now_us = || unsafe { esp_timer_get_time() };
        // Wait while the line sits at `level`; returns the time spent.
        let wait_while = |level: i32, budget_us: i64| -> Result<u32, ClimateError> {
            let start = now_us();
            // SAFETY: read-only register access on a configured pin.
            while unsafe { gpio_get_level(pin) } == level {
                let spent = now_us() - start;
                if spent > budget_us {
                    return Err(ClimateError::Timeout);
                }
            }
            u32::try_from(now_us() - start).map_err(|_| ClimateError::Timeout)
        };

        // SAFETY: the sensor worker is the only user of this pin.
        unsafe {
            gpio_set_level(pin, 0);
            esp_rom_delay_us(20_000);
            gpio_set_level(pin, 1);
            esp_rom_delay_us(30);
        }

        // Response: 80 µs LOW, 80 µs HIGH.
        wait_while(1, 100)?;
        wait_while(0, 100)?;
        wait_while(1, 100)?;

        let mut high_us = [0u32; 40];
        for width in &mut high_us {
            wait_while(0, 80)?;
            *width = wait_while(1, 100)?;
        }
        decode_frame(&bits_to_frame(&high_us))
    }
}
