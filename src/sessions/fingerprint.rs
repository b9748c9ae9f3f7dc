//! Desktop browser fingerprints.
//!
//! A session keeps the same user agent across restarts; a new one is only
//! synthesized the first time a session is created.

use rand::prelude::IndexedRandom;
use rand::Rng;

const PLATFORMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10_15_7",
    "X11; Linux x86_64",
];

/// Major Chrome versions to pick from.
const CHROME_MAJORS: std::ops::RangeInclusive<u32> = 120..=131;

/// Returns a random desktop Chrome user agent.
pub fn desktop_user_agent() -> String {
    let mut rng = rand::rng();
    let platform = PLATFORMS.choose(&mut rng).copied().unwrap_or(PLATFORMS[0]);
    let major = rng.random_range(CHROME_MAJORS);
    format!(
        "Mozilla/5.0 ({platform}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{major}.0.0.0 Safari/537.36"
    )
}
