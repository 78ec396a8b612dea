// src/time.rs
//
// Musical time expressions.
//
// Everything here is pure data: a `TransportTime` only becomes ticks or
// seconds once a transport resolves it against its PPQ, time signature
// and tempo curve.

use std::fmt;
use std::str::FromStr;

use crate::error::{TimeParseError, TimingError, TimingResult};

/// Default pulses per quarter note.
pub const DEFAULT_PPQ: u32 = 192;

/// Largest accepted note value ("256n").
const MAX_SUBDIVISION: u32 = 256;

// ===============================
// MARK: Time signature
// ===============================

/// Meter, e.g. 4/4 or 6/8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeSignature {
    numerator: u32,
    denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> TimingResult<Self> {
        if numerator == 0 {
            return Err(TimingError::InvalidValue {
                name: "time signature numerator",
                expected: "at least 1",
                value: 0.0,
            });
        }
        if !denominator.is_power_of_two() {
            return Err(TimingError::InvalidValue {
                name: "time signature denominator",
                expected: "a power of two",
                value: f64::from(denominator),
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    #[inline]
    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    #[inline]
    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Length of one measure in quarter notes (6/8 -> 3.0).
    #[inline]
    pub fn quarters_per_measure(&self) -> f64 {
        f64::from(self.numerator) * 4.0 / f64::from(self.denominator)
    }

    /// Length of one measure in ticks.
    #[inline]
    pub fn ticks_per_measure(&self, ppq: u32) -> f64 {
        self.quarters_per_measure() * f64::from(ppq)
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

// ===============================
// MARK: Bars:beats:sixteenths
// ===============================

/// Zero-based musical position. Beats are quarter notes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BarsBeatsSixteenths {
    pub bars: u64,
    pub beats: u32,
    pub sixteenths: f64,
}

impl BarsBeatsSixteenths {
    pub fn new(bars: u64, beats: u32, sixteenths: f64) -> Self {
        Self {
            bars,
            beats,
            sixteenths,
        }
    }

    pub fn from_ticks(ticks: u64, ppq: u32, signature: TimeSignature) -> Self {
        let quarters = ticks as f64 / f64::from(ppq);
        let per_measure = signature.quarters_per_measure();

        let bars = (quarters / per_measure).floor();
        let in_bar = quarters - bars * per_measure;
        let beats = in_bar.floor();
        let sixteenths = (in_bar - beats) * 4.0;

        Self {
            bars: bars as u64,
            beats: beats as u32,
            sixteenths,
        }
    }

    /// Nearest tick to this position.
    pub fn to_ticks(&self, ppq: u32, signature: TimeSignature) -> u64 {
        let quarters = self.bars as f64 * signature.quarters_per_measure()
            + f64::from(self.beats)
            + self.sixteenths / 4.0;
        (quarters * f64::from(ppq)).round().max(0.0) as u64
    }
}

impl fmt::Display for BarsBeatsSixteenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.bars, self.beats, self.sixteenths)
    }
}

impl FromStr for BarsBeatsSixteenths {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unrecognized = || TimeParseError::Unrecognized(s.to_string());

        let parts: Vec<&str> = s.trim().split(':').map(str::trim).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(unrecognized());
        }

        let bars = parts[0].parse::<u64>().map_err(|_| unrecognized())?;
        let beats = parts[1].parse::<u32>().map_err(|_| unrecognized())?;
        let sixteenths = match parts.get(2) {
            Some(part) => part
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(unrecognized)?,
            None => 0.0,
        };

        Ok(Self::new(bars, beats, sixteenths))
    }
}

// ===============================
// MARK: Note values
// ===============================

/// Plain, triplet or dotted note value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoteKind {
    #[default]
    Straight,
    Triplet,
    Dotted,
}

/// A note value such as "4n", "8t" or "4n.".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Notation {
    subdivision: u32,
    kind: NoteKind,
}

impl Notation {
    /// A straight eighth note ("8n").
    pub const EIGHTH: Notation = Notation {
        subdivision: 8,
        kind: NoteKind::Straight,
    };

    pub fn new(subdivision: u32, kind: NoteKind) -> Result<Self, TimeParseError> {
        if !subdivision.is_power_of_two() || subdivision > MAX_SUBDIVISION {
            return Err(TimeParseError::Subdivision(subdivision.to_string()));
        }
        Ok(Self { subdivision, kind })
    }

    #[inline]
    pub fn subdivision(&self) -> u32 {
        self.subdivision
    }

    #[inline]
    pub fn kind(&self) -> NoteKind {
        self.kind
    }

    /// Length in ticks at `ppq`.
    pub fn ticks(&self, ppq: u32) -> f64 {
        let straight = f64::from(ppq) * 4.0 / f64::from(self.subdivision);
        match self.kind {
            NoteKind::Straight => straight,
            NoteKind::Triplet => straight * 2.0 / 3.0,
            NoteKind::Dotted => straight * 1.5,
        }
    }
}

impl fmt::Display for Notation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NoteKind::Straight => write!(f, "{}n", self.subdivision),
            NoteKind::Triplet => write!(f, "{}t", self.subdivision),
            NoteKind::Dotted => write!(f, "{}n.", self.subdivision),
        }
    }
}

impl FromStr for Notation {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, kind) = if let Some(rest) = s.strip_suffix("n.") {
            (rest, NoteKind::Dotted)
        } else if let Some(rest) = s.strip_suffix('n') {
            (rest, NoteKind::Straight)
        } else if let Some(rest) = s.strip_suffix('t') {
            (rest, NoteKind::Triplet)
        } else {
            return Err(TimeParseError::Unrecognized(s.to_string()));
        };

        let subdivision = digits
            .parse::<u32>()
            .map_err(|_| TimeParseError::Unrecognized(s.to_string()))?;
        if !subdivision.is_power_of_two() || subdivision > MAX_SUBDIVISION {
            return Err(TimeParseError::Subdivision(s.to_string()));
        }
        Ok(Self { subdivision, kind })
    }
}

// ===============================
// MARK: Transport time
// ===============================

/// A time expression understood by the transport.
///
/// String forms:
/// - `"1.5"`: seconds
/// - `"192i"`: ticks
/// - `"4n"`, `"8t"`, `"4n."`: note values
/// - `"2m"`: measures
/// - `"1:2:3"`: bars:beats:sixteenths
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportTime {
    Seconds(f64),
    Ticks(u64),
    Note(Notation),
    Measures(f64),
    Position(BarsBeatsSixteenths),
}

impl From<f64> for TransportTime {
    fn from(seconds: f64) -> Self {
        TransportTime::Seconds(seconds)
    }
}

impl From<Notation> for TransportTime {
    fn from(note: Notation) -> Self {
        TransportTime::Note(note)
    }
}

impl From<BarsBeatsSixteenths> for TransportTime {
    fn from(position: BarsBeatsSixteenths) -> Self {
        TransportTime::Position(position)
    }
}

impl FromStr for TransportTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TimeParseError::Empty);
        }
        let unrecognized = || TimeParseError::Unrecognized(s.to_string());
        let non_negative = |text: &str| {
            text.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(unrecognized)
        };

        if s.contains(':') {
            return s.parse().map(TransportTime::Position);
        }
        if let Some(ticks) = s.strip_suffix('i') {
            return ticks
                .parse::<u64>()
                .map(TransportTime::Ticks)
                .map_err(|_| unrecognized());
        }
        if let Some(measures) = s.strip_suffix('m') {
            return non_negative(measures).map(TransportTime::Measures);
        }
        if s.ends_with('n') || s.ends_with("n.") || s.ends_with('t') {
            return s.parse().map(TransportTime::Note);
        }
        let seconds = s.strip_suffix('s').unwrap_or(s);
        non_negative(seconds).map(TransportTime::Seconds)
    }
}

impl fmt::Display for TransportTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportTime::Seconds(seconds) => write!(f, "{seconds}"),
            TransportTime::Ticks(ticks) => write!(f, "{ticks}i"),
            TransportTime::Note(note) => write!(f, "{note}"),
            TransportTime::Measures(measures) => write!(f, "{measures}m"),
            TransportTime::Position(position) => write!(f, "{position}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_time_signature() {
        let common = TimeSignature::default();
        assert_eq!(common.to_string(), "4/4");
        assert_eq!(common.quarters_per_measure(), 4.0);

        let compound = TimeSignature::new(6, 8).unwrap();
        assert_eq!(compound.quarters_per_measure(), 3.0);
        assert_eq!(compound.ticks_per_measure(192), 576.0);

        assert!(TimeSignature::new(3, 5).is_err());
        assert!(TimeSignature::new(0, 4).is_err());
    }

    #[test]
    fn test_notation_ticks() {
        let ppq = DEFAULT_PPQ;
        let ticks = |s: &str| s.parse::<Notation>().unwrap().ticks(ppq);

        assert_eq!(ticks("4n"), 192.0);
        assert_eq!(ticks("8n"), 96.0);
        assert_eq!(ticks("1n"), 768.0);
        assert_eq!(ticks("8t"), 64.0);
        assert_eq!(ticks("4n."), 288.0);
    }

    #[test]
    fn test_notation_rejects_bad_subdivision() {
        assert_eq!(
            "3n".parse::<Notation>(),
            Err(TimeParseError::Subdivision("3n".into()))
        );
        assert!("512n".parse::<Notation>().is_err());
        assert!("xn".parse::<Notation>().is_err());
        assert!(Notation::new(12, NoteKind::Straight).is_err());
    }

    #[test]
    fn test_bbs_from_ticks() {
        let ts = TimeSignature::default();
        let position = BarsBeatsSixteenths::from_ticks(192 * 4 + 192 + 48, 192, ts);
        assert_eq!(position.bars, 1);
        assert_eq!(position.beats, 1);
        assert_relative_eq!(position.sixteenths, 1.0, epsilon = 1e-9);
        assert_eq!(position.to_string(), "1:1:1");
    }

    #[test]
    fn test_bbs_to_ticks_in_compound_meter() {
        let ts = TimeSignature::new(6, 8).unwrap();
        let position: BarsBeatsSixteenths = "2:1:2".parse().unwrap();
        // 2 bars of 3 quarters, 1 quarter, half a quarter
        assert_eq!(position.to_ticks(192, ts), (6 * 192 + 192 + 96) as u64);
        assert_eq!(
            BarsBeatsSixteenths::from_ticks(position.to_ticks(192, ts), 192, ts),
            position
        );
    }

    #[test]
    fn test_bbs_parse_errors() {
        assert!("1".parse::<BarsBeatsSixteenths>().is_err());
        assert!("1:2:3:4".parse::<BarsBeatsSixteenths>().is_err());
        assert!("a:0:0".parse::<BarsBeatsSixteenths>().is_err());
        assert_eq!(
            "3:2".parse::<BarsBeatsSixteenths>(),
            Ok(BarsBeatsSixteenths::new(3, 2, 0.0))
        );
    }

    #[test]
    fn test_transport_time_parse() {
        assert_eq!("192i".parse(), Ok(TransportTime::Ticks(192)));
        assert_eq!("2m".parse(), Ok(TransportTime::Measures(2.0)));
        assert_eq!("0.5".parse(), Ok(TransportTime::Seconds(0.5)));
        assert_eq!("1.5s".parse(), Ok(TransportTime::Seconds(1.5)));
        assert_eq!(
            "1:0:0".parse(),
            Ok(TransportTime::Position(BarsBeatsSixteenths::new(1, 0, 0.0)))
        );
        assert!(matches!(
            "8t".parse::<TransportTime>(),
            Ok(TransportTime::Note(n)) if n.kind() == NoteKind::Triplet
        ));
    }

    #[test]
    fn test_transport_time_parse_errors() {
        assert_eq!("".parse::<TransportTime>(), Err(TimeParseError::Empty));
        assert!("-1".parse::<TransportTime>().is_err());
        assert!("soon".parse::<TransportTime>().is_err());
        assert!("1.5i".parse::<TransportTime>().is_err());
    }

    #[test]
    fn test_transport_time_display() {
        assert_eq!(TransportTime::Ticks(96).to_string(), "96i");
        assert_eq!(TransportTime::Measures(2.0).to_string(), "2m");
        assert_eq!(TransportTime::from(0.25).to_string(), "0.25");
    }
}
