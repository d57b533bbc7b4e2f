//! Fixed-width numeric arguments for ZUp commands.

/// Digits before and after the decimal point a supply expects for one quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub leading: usize,
    pub trailing: usize,
}

impl NumberFormat {
    pub const fn new(leading: usize, trailing: usize) -> Self {
        NumberFormat { leading, trailing }
    }

    pub fn format(&self, value: f64) -> String {
        format(value, self.leading, self.trailing)
    }
}

/// Formats `value` as `leading` + `.` + `trailing` digits, zero padded on the left.
///
/// Rounds half away from zero, which is how the supply interprets surplus digits.
/// Values too wide for the field are not truncated; range checks happen before formatting.
pub fn format(value: f64, leading: usize, trailing: usize) -> String {
    let scale = 10f64.powi(trailing as i32);
    let rounded = (value * scale).round() / scale;
    format!(
        "{:0width$.prec$}",
        rounded,
        width = leading + trailing + 1,
        prec = trailing
    )
}
