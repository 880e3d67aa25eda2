use std::time::{Duration, Instant};
use tracing::info;

/// Logs when a top-level command starts and how long it took.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        info!("▶ {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("■ {} finished in {:.2?}", self.label, self.start.elapsed());
    }
}

/// Thousands separators: 1160592 → "1,160,592".
pub fn fmt_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// "$1,299.50", or a dash when absent.
pub fn fmt_usd(amount: Option<f64>) -> String {
    match amount {
        Some(v) => {
            let cents = (v.abs() * 100.0).round() as i64;
            let sign = if v < 0.0 && cents > 0 { "-" } else { "" };
            format!("{}${}.{:02}", sign, fmt_number(cents / 100), cents % 100)
        }
        None => "—".to_string(),
    }
}
