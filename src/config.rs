use std::time::Duration;

/// Unscented transform spread parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterTuning {
    pub alpha: f64,
    pub beta: f64,
    pub kappa: f64,
}

impl Default for FilterTuning {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 2.0,
            kappa: -1.0,
        }
    }
}

impl FilterTuning {
    /// Defaults overridden by `MOTIONFUSION_UKF_ALPHA`, `MOTIONFUSION_UKF_BETA`
    /// and `MOTIONFUSION_UKF_KAPPA`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            alpha: read_env_f64("MOTIONFUSION_UKF_ALPHA", defaults.alpha),
            beta: read_env_f64("MOTIONFUSION_UKF_BETA", defaults.beta),
            kappa: read_env_f64("MOTIONFUSION_UKF_KAPPA", defaults.kappa),
        }
    }
}

/// Settings for the USB control-transfer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Timeout applied to every control transfer.
    pub timeout: Duration,
    /// Log every transfer at trace level.
    pub trace_transfers: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            trace_transfers: false,
        }
    }
}

impl TransportConfig {
    /// Defaults overridden by `MOTIONFUSION_USB_TIMEOUT_MS` and
    /// `MOTIONFUSION_USB_TRACE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: Duration::from_millis(read_env_u64(
                "MOTIONFUSION_USB_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )),
            trace_transfers: read_env_bool("MOTIONFUSION_USB_TRACE", defaults.trace_transfers),
        }
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    let v = value.trim().to_ascii_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
