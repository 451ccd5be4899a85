// Copyright 2025 The gmp-operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::types::error::{Error, InvalidDurationSnafu};
use snafu::ensure;

const UNITS: [&str; 6] = ["s", "m", "h", "d", "w", "y"];

/// Validates a Prometheus duration such as `30s`, `1h30m` or `500ms` and returns
/// its length in milliseconds.
///
/// Units must appear from largest to smallest and each at most once, as the
/// consuming workloads reject anything else.
pub fn parse_duration(value: &str) -> Result<u64, Error> {
    let invalid = || InvalidDurationSnafu {
        value: value.to_owned(),
    };
    ensure!(!value.is_empty(), invalid());

    let mut total: u64 = 0;
    let mut last_rank = usize::MAX;
    let mut rest = value;

    while !rest.is_empty() {
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        ensure!(digits > 0, invalid());
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid().build())?;
        rest = &rest[digits..];

        let unit = if rest.starts_with("ms") {
            "ms"
        } else {
            match UNITS.iter().find(|u| rest.starts_with(**u)) {
                Some(u) => *u,
                None => return invalid().fail(),
            }
        };
        rest = &rest[unit.len()..];

        let rank = rank(unit);
        ensure!(rank < last_rank, invalid());
        last_rank = rank;

        total = amount
            .checked_mul(unit_millis(unit))
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| invalid().build())?;
    }

    Ok(total)
}

fn rank(unit: &str) -> usize {
    match unit {
        "ms" => 0,
        "s" => 1,
        "m" => 2,
        "h" => 3,
        "d" => 4,
        "w" => 5,
        _ => 6,
    }
}

fn unit_millis(unit: &str) -> u64 {
    match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        _ => 365 * 86_400_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_durations() {
        assert_eq!(parse_duration("30s").unwrap(), 30_000);
        assert_eq!(parse_duration("500ms").unwrap(), 500);
        assert_eq!(parse_duration("1h30m").unwrap(), 5_400_000);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1m1h").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("1.5m").is_err());
    }
}
