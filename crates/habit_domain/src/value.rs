/// Converts between stored ("raw") values and what the user types or reads.
///
/// Minute habits store seconds and show minutes with one decimal place; every
/// other unit stores the number it displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueAdapter {
    minute_unit: bool,
}

impl ValueAdapter {
    pub fn new(minute_unit: bool) -> Self {
        Self { minute_unit }
    }

    pub fn for_unit(unit: &str) -> Self {
        Self::new(unit.trim().eq_ignore_ascii_case("minutes"))
    }

    pub fn is_minute_unit(&self) -> bool {
        self.minute_unit
    }

    /// `None` means the input must not be committed.
    pub fn to_raw(&self, display: f64) -> Option<f64> {
        if !display.is_finite() || display < 0.0 {
            return None;
        }
        if self.minute_unit {
            Some((display * 60.0).round())
        } else {
            Some(display)
        }
    }

    pub fn parse_input(&self, input: &str) -> Option<f64> {
        input
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|value| self.to_raw(value))
    }

    /// Goals and thresholds authored in display units, as raw units for comparison.
    pub fn target_to_raw(&self, display: f64) -> f64 {
        self.to_raw(display).unwrap_or(0.0)
    }

    /// Signed display delta as a raw delta.
    pub fn delta_to_raw(&self, delta: f64) -> f64 {
        if !delta.is_finite() {
            return 0.0;
        }
        if self.minute_unit {
            (delta * 60.0).round()
        } else {
            delta
        }
    }

    /// Read-only rendering. Exactly zero renders empty so "unset" and "zero"
    /// look the same in the input affordance.
    pub fn to_display(&self, raw: f64) -> String {
        if !raw.is_finite() || raw == 0.0 {
            return String::new();
        }
        if self.minute_unit {
            format!("{:.1}", raw / 60.0)
        } else {
            format!("{raw}")
        }
    }

    /// Prefill for an editable input; non-positive values start empty.
    pub fn to_input(&self, raw: f64) -> String {
        if !raw.is_finite() || raw <= 0.0 {
            return String::new();
        }
        self.to_display(raw)
    }

    pub fn step(&self) -> &'static str {
        if self.minute_unit {
            "0.1"
        } else {
            "1"
        }
    }
}

/// `mm:ss`, minutes unbounded.
pub fn format_seconds(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Whole percentage of `current` against `target`, clamped to 0..=100.
pub fn percent(current: f64, target: f64) -> u8 {
    if !target.is_finite() || target <= 0.0 || !current.is_finite() {
        return 0;
    }
    ((current / target) * 100.0).floor().clamp(0.0, 100.0) as u8
}
