//! Kubernetes resource quantity parsing
//!
//! Only what victim ranking needs: CPU in millicores and memory in bytes.
//! Unparseable quantities yield `None` and are treated as zero requests.

/// Parse a CPU quantity ("250m", "2", "0.5") into millicores
pub fn parse_cpu_millicores(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    if let Some(milli) = quantity.strip_suffix('m') {
        return milli.parse::<u64>().ok();
    }
    if let Some(micro) = quantity.strip_suffix('u') {
        return micro.parse::<u64>().ok().map(|v| v / 1_000);
    }
    if let Some(nano) = quantity.strip_suffix('n') {
        return nano.parse::<u64>().ok().map(|v| v / 1_000_000);
    }

    let cores: f64 = quantity.parse().ok()?;
    if cores < 0.0 {
        return None;
    }
    Some((cores * 1000.0).round() as u64)
}

/// Parse a memory quantity ("128Mi", "1G", "129e6", "1024") into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    const BINARY: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
    ];
    const DECIMAL: &[(&str, u64)] = &[
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    let quantity = quantity.trim();

    for (suffix, multiplier) in BINARY.iter().chain(DECIMAL.iter()) {
        if let Some(number) = quantity.strip_suffix(suffix) {
            let value: f64 = number.parse().ok()?;
            return scale(value, *multiplier as f64);
        }
    }

    // Plain number, possibly in exponent notation
    let value: f64 = quantity.parse().ok()?;
    scale(value, 1.0)
}

fn scale(value: f64, multiplier: f64) -> Option<u64> {
    let bytes = value * multiplier;
    if !bytes.is_finite() || bytes < 0.0 {
        return None;
    }
    Some(bytes.round() as u64)
}
