// src/translation/format.rs - number formatting for generated machine code
//
// Firmware output is compared byte for byte against reference files, so
// fixed-point formatting rounds exact halfway values away from zero, and
// plain formatting switches to exponent notation at the usual thresholds.

/// True when `value` sits exactly halfway between two multiples of
/// `10^-digits`.
fn is_exact_tie(value: f64, digits: usize) -> bool {
    if value == 0.0 || !value.is_finite() {
        return false;
    }
    let bits = value.abs().to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exp2) = if exponent == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), exponent - 1075)
    };
    // value * 10^d * 2 is an odd integer exactly when the lowest set bit of
    // the binary value sits at 2^-(d+1).
    mantissa.trailing_zeros() as i64 + exp2 == -(digits as i64 + 1)
}

/// Adds one unit in the last place of a plain decimal string.
fn increment_last_digit(text: &str) -> String {
    let mut digits: Vec<u8> = text.bytes().collect();
    let mut i = digits.len();
    loop {
        if i == 0 {
            digits.insert(0, b'1');
            break;
        }
        i -= 1;
        match digits[i] {
            b'.' => continue,
            b'9' => digits[i] = b'0',
            d => {
                digits[i] = d + 1;
                break;
            }
        }
    }
    String::from_utf8(digits).unwrap_or_default()
}

/// Formats `value` with exactly `digits` decimals, rounding halfway values
/// away from zero.
pub fn to_fixed(value: f64, digits: usize) -> String {
    if !value.is_finite() || value.abs() >= 1e21 {
        return js_number(value);
    }
    let value = if value == 0.0 { 0.0 } else { value };
    let magnitude = value.abs();
    let body = if is_exact_tie(magnitude, digits) {
        // One more digit is exact here: it ends in the deciding 5.
        let longer = format!("{:.*}", digits + 1, magnitude);
        let trimmed = &longer[..longer.len() - 1];
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        increment_last_digit(trimmed)
    } else {
        format!("{:.*}", digits, magnitude)
    };
    if value < 0.0 {
        format!("-{}", body)
    } else {
        body
    }
}

/// Shortest text that reads back as `value`, using exponent notation for
/// very large or very small magnitudes.
pub fn js_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let text = format!("{:e}", value);
        match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => text,
        }
    } else {
        format!("{}", value)
    }
}

/// Formats with `digits` decimals when given, else as a plain number.
pub fn num_to_string(value: f64, digits: Option<usize>) -> String {
    match digits {
        Some(digits) => to_fixed(value, digits),
        None => js_number(value),
    }
}

/// Rounds halfway values away from zero.
pub fn round_half_away(value: f64) -> f64 {
    if value >= 0.0 {
        (value + 0.5).floor()
    } else {
        (value - 0.5).floor()
    }
}
