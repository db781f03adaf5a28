//! Time-embedding "comb" identifiers.
//!
//! A comb is a random v4 UUID whose last six bytes (as printed) carry its
//! creation time:
//!
//! | bytes    | content                                                 |
//! |----------|---------------------------------------------------------|
//! | `10..12` | big-endian `u16`, whole days since 1900-01-01 UTC       |
//! | `12..16` | big-endian `u32`, time of day in 1/300 second ticks     |
//!
//! The tick count is `milliseconds / 3.333333`, truncated, which is what the
//! ids already minted by the rest of the system contain.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MS_PER_TICK: f64 = 3.333333;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Comb(Uuid);

impl Comb {
    pub fn generate() -> Self {
        Self::from_parts(Uuid::new_v4(), Utc::now())
    }

    /// Stamps `time` into the last six bytes of `seed`.
    pub fn from_parts(seed: Uuid, time: DateTime<Utc>) -> Self {
        let mut bytes = *seed.as_bytes();

        let days = (time.date_naive() - epoch_date()).num_days().clamp(0, u16::MAX as i64) as u16;
        let ms_of_day = time.num_seconds_from_midnight() as f64 * 1000.0
            + f64::from(time.nanosecond() % 1_000_000_000) / 1_000_000.0;
        let ticks = (ms_of_day / MS_PER_TICK) as u32;

        bytes[10..12].copy_from_slice(&days.to_be_bytes());
        bytes[12..16].copy_from_slice(&ticks.to_be_bytes());

        Comb(Uuid::from_bytes(bytes))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// The embedded creation time, at 1/300 s resolution.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let bytes = self.0.as_bytes();
        let days = u16::from_be_bytes([bytes[10], bytes[11]]);
        let ticks = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

        let midnight = Utc.from_utc_datetime(
            &(epoch_date() + Duration::days(i64::from(days)))
                .and_hms_opt(0, 0, 0)
                .unwrap_or_default(),
        );
        midnight + Duration::milliseconds(i64::from(ticks) * 10 / 3)
    }

    /// Stable bin selector used by the hub pool.
    pub fn route_hash(&self) -> usize {
        let folded = self
            .0
            .as_bytes()
            .chunks_exact(4)
            .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
            .fold(0u32, |acc, word| acc ^ word);
        (folded as i32).unsigned_abs() as usize
    }
}

impl From<Uuid> for Comb {
    fn from(uuid: Uuid) -> Self {
        Comb(uuid)
    }
}

impl std::fmt::Display for Comb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for Comb {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Comb)
    }
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn from_parts_matches_known_combs() {
        let cases = [
            (
                "a58db474-43d8-42f1-b4ee-0c17647cd0c0",
                utc(2022, 3, 12, 12, 12, 0),
                "a58db474-43d8-42f1-b4ee-ae5600c90cc1",
            ),
            (
                "f776e6ee-511f-4352-bb28-88513002bdeb",
                utc(2021, 5, 10, 10, 52, 0),
                "f776e6ee-511f-4352-bb28-ad2400b313c1",
            ),
            (
                "51a25fc7-3cad-497d-8e2f-8d77011648a1",
                utc(1999, 2, 26, 16, 53, 13),
                "51a25fc7-3cad-497d-8e2f-8d77011649cd",
            ),
            (
                "bfb8f353-3b32-4a9e-bef6-24fe0b54bfb0",
                utc(2024, 10, 20, 1, 32, 16),
                "bfb8f353-3b32-4a9e-bef6-b20f00195780",
            ),
        ];

        for (seed, time, expected) in cases {
            let comb = Comb::from_parts(Uuid::parse_str(seed).unwrap(), time);
            assert_eq!(comb.uuid(), Uuid::parse_str(expected).unwrap());
        }
    }

    #[test]
    fn timestamp_recovers_creation_time() {
        let time = utc(2024, 10, 20, 1, 32, 16);
        let comb = Comb::from_parts(Uuid::new_v4(), time);
        let drift = (comb.timestamp() - time).num_milliseconds().abs();
        assert!(drift <= 4, "drift was {drift}ms");
    }

    #[test]
    fn timestamp_decodes_known_comb() {
        let comb: Comb = "a58db474-43d8-42f1-b4ee-ae5600c90cc1".parse().unwrap();
        let decoded = comb.timestamp();
        assert_eq!(decoded.date_naive(), NaiveDate::from_ymd_opt(2022, 3, 12).unwrap());
        assert_eq!((decoded.hour(), decoded.minute()), (12, 12));
    }

    #[test]
    fn route_hash_is_stable() {
        let comb: Comb = "f776e6ee-511f-4352-bb28-ad2400b313c1".parse().unwrap();
        assert_eq!(comb.route_hash(), comb.route_hash());
        assert_eq!(comb.route_hash(), Comb::from(comb.uuid()).route_hash());
    }
}
