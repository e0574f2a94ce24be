//! Normalized opening hours: a 7-day map of open/close ranges in 24 h
//! "HH:MM" form. Serialized shape: `{"mon": [["09:00","17:00"]], ...}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Mon,
        Day::Tue,
        Day::Wed,
        Day::Thu,
        Day::Fri,
        Day::Sat,
        Day::Sun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Day::Mon => "mon",
            Day::Tue => "tue",
            Day::Wed => "wed",
            Day::Thu => "thu",
            Day::Fri => "fri",
            Day::Sat => "sat",
            Day::Sun => "sun",
        }
    }

    /// Accepts full names, three-letter forms, two-letter forms, and
    /// schema.org DayOfWeek URIs.
    pub fn from_token(token: &str) -> Option<Day> {
        let t = token
            .trim()
            .trim_end_matches('.')
            .rsplit('/')
            .next()?
            .to_ascii_lowercase();
        Some(match t.as_str() {
            "monday" | "mon" | "mo" => Day::Mon,
            "tuesday" | "tue" | "tues" | "tu" => Day::Tue,
            "wednesday" | "wed" | "we" => Day::Wed,
            "thursday" | "thu" | "thurs" | "th" => Day::Thu,
            "friday" | "fri" | "fr" => Day::Fri,
            "saturday" | "sat" | "sa" => Day::Sat,
            "sunday" | "sun" | "su" => Day::Sun,
            _ => return None,
        })
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TimeRange = (String, String);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoursMap(pub BTreeMap<Day, Vec<TimeRange>>);

/// Normalize a time token to "HH:MM": accepts 9:00, 09.00, 9h00, 0900.
pub fn normalize_time(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_ascii_lowercase();
    s = s.replace(['.', 'h'], ":");
    if !s.contains(':') && (s.len() == 3 || s.len() == 4) {
        s.insert(s.len() - 2, ':');
    }
    let (h, m) = s.split_once(':')?;
    let h: u8 = h.trim().parse().ok()?;
    let m: u8 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(format!("{h:02}:{m:02}"))
}

impl HoursMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert a range, keeping ranges sorted and deduplicated per day.
    pub fn add_range(&mut self, day: Day, open: String, close: String) {
        let ranges = self.0.entry(day).or_default();
        let range = (open, close);
        if !ranges.contains(&range) {
            ranges.push(range);
            ranges.sort();
        }
    }

    /// Union of two hour maps (used when multiple blocks describe the same
    /// schedule).
    pub fn merge(&mut self, other: &HoursMap) {
        for (day, ranges) in &other.0 {
            for (open, close) in ranges {
                self.add_range(*day, open.clone(), close.clone());
            }
        }
    }

    /// Intersection per day; the more restrictive schedule wins when two
    /// equally-ranked sources contradict each other.
    pub fn intersect(&self, other: &HoursMap) -> HoursMap {
        let mut out = HoursMap::default();
        for (day, ranges) in &self.0 {
            let Some(theirs) = other.0.get(day) else {
                continue;
            };
            for (open_a, close_a) in ranges {
                for (open_b, close_b) in theirs {
                    let open = open_a.max(open_b);
                    let close = close_a.min(close_b);
                    if open < close {
                        out.add_range(*day, open.clone(), close.clone());
                    }
                }
            }
        }
        out
    }

    /// Render to the canonical text form, e.g.
    /// `mon 09:00-17:00,19:00-22:00; sat 10:00-14:00`.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(day, ranges)| {
                let spans = ranges
                    .iter()
                    .map(|(o, c)| format!("{o}-{c}"))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{day} {spans}")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Parse the canonical text form back. `parse(render(h)) == h`.
    pub fn parse(text: &str) -> Option<HoursMap> {
        let mut out = HoursMap::default();
        for part in text.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (day_token, spans) = part.split_once(' ')?;
            let day = Day::from_token(day_token)?;
            for span in spans.split(',') {
                let (open, close) = span.trim().split_once('-')?;
                out.add_range(day, normalize_time(open)?, normalize_time(close)?);
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HoursMap {
        let mut h = HoursMap::default();
        h.add_range(Day::Mon, "09:00".into(), "17:00".into());
        h.add_range(Day::Mon, "19:00".into(), "22:00".into());
        h.add_range(Day::Sat, "10:00".into(), "14:00".into());
        h
    }

    #[test]
    fn normalize_time_variants() {
        assert_eq!(normalize_time("9:00").unwrap(), "09:00");
        assert_eq!(normalize_time("0900").unwrap(), "09:00");
        assert_eq!(normalize_time("9.30").unwrap(), "09:30");
        assert_eq!(normalize_time("19h00").unwrap(), "19:00");
        assert_eq!(normalize_time("23:59").unwrap(), "23:59");
        assert!(normalize_time("25:00").is_none());
        assert!(normalize_time("9:75").is_none());
    }

    #[test]
    fn day_tokens() {
        assert_eq!(Day::from_token("Monday"), Some(Day::Mon));
        assert_eq!(Day::from_token("https://schema.org/Saturday"), Some(Day::Sat));
        assert_eq!(Day::from_token("tue"), Some(Day::Tue));
        assert_eq!(Day::from_token("noday"), None);
    }

    #[test]
    fn render_parse_round_trip() {
        let h = sample();
        assert_eq!(HoursMap::parse(&h.render()).unwrap(), h);
    }

    #[test]
    fn serde_shape() {
        let h = sample();
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["mon"][0][0], "09:00");
        assert_eq!(json["mon"][1][1], "22:00");
        let back: HoursMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn merge_unions_ranges() {
        let mut a = sample();
        let mut b = HoursMap::default();
        b.add_range(Day::Mon, "09:00".into(), "17:00".into());
        b.add_range(Day::Sun, "11:00".into(), "16:00".into());
        a.merge(&b);
        assert_eq!(a.0[&Day::Mon].len(), 2);
        assert_eq!(a.0[&Day::Sun].len(), 1);
    }

    #[test]
    fn intersect_takes_restrictive_overlap() {
        let mut a = HoursMap::default();
        a.add_range(Day::Mon, "09:00".into(), "17:00".into());
        let mut b = HoursMap::default();
        b.add_range(Day::Mon, "10:00".into(), "18:00".into());
        b.add_range(Day::Tue, "10:00".into(), "18:00".into());

        let i = a.intersect(&b);
        assert_eq!(i.0[&Day::Mon], vec![("10:00".to_string(), "17:00".to_string())]);
        assert!(!i.0.contains_key(&Day::Tue));
    }
}
