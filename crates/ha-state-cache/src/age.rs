//! Human-readable cache age

use std::time::Duration;

/// Describe how long ago the cache was refreshed
///
/// Zero components are omitted and units are pluralized, e.g.
/// `The cache was last refreshed 1 hour, 5 seconds ago.`
pub fn describe_age(age: Option<Duration>) -> String {
    let Some(age) = age else {
        return "The cache has not been refreshed yet.".to_string();
    };

    let total = age.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    let parts: Vec<String> = [(hours, "hour"), (minutes, "minute"), (seconds, "second")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n} {unit}{}", if n == 1 { "" } else { "s" }))
        .collect();

    if parts.is_empty() {
        "The cache was last refreshed just now.".to_string()
    } else {
        format!("The cache was last refreshed {} ago.", parts.join(", "))
    }
}
