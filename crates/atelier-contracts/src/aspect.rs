use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Framing ratios accepted by the generation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

/// Enumeration order doubles as the tie-break order for [`AspectRatio::closest`].
pub const SUPPORTED_ASPECT_RATIOS: [AspectRatio; 10] = [
    AspectRatio::Square,
    AspectRatio::Landscape3x2,
    AspectRatio::Portrait2x3,
    AspectRatio::Portrait3x4,
    AspectRatio::Landscape4x3,
    AspectRatio::Portrait4x5,
    AspectRatio::Landscape5x4,
    AspectRatio::Portrait9x16,
    AspectRatio::Landscape16x9,
    AspectRatio::Ultrawide21x9,
];

impl AspectRatio {
    pub fn terms(self) -> (u32, u32) {
        match self {
            Self::Square => (1, 1),
            Self::Landscape3x2 => (3, 2),
            Self::Portrait2x3 => (2, 3),
            Self::Portrait3x4 => (3, 4),
            Self::Landscape4x3 => (4, 3),
            Self::Portrait4x5 => (4, 5),
            Self::Landscape5x4 => (5, 4),
            Self::Portrait9x16 => (9, 16),
            Self::Landscape16x9 => (16, 9),
            Self::Ultrawide21x9 => (21, 9),
        }
    }

    /// Width divided by height.
    pub fn value(self) -> f64 {
        let (w, h) = self.terms();
        w as f64 / h as f64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape3x2 => "3:2",
            Self::Portrait2x3 => "2:3",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait4x5 => "4:5",
            Self::Landscape5x4 => "5:4",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
            Self::Ultrawide21x9 => "21:9",
        }
    }

    /// Closest supported ratio to `width / height`.
    ///
    /// Total: degenerate dimensions (zero, negative, non-finite) yield `1:1`.
    pub fn closest(width: f64, height: f64) -> Self {
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Self::Square;
        }
        Self::closest_to_value(width / height)
    }

    pub fn closest_to_value(target: f64) -> Self {
        let mut best = SUPPORTED_ASPECT_RATIOS[0];
        let mut best_delta = f64::MAX;
        for candidate in SUPPORTED_ASPECT_RATIOS {
            let delta = (candidate.value() - target).abs();
            if delta < best_delta {
                best = candidate;
                best_delta = delta;
            }
        }
        best
    }

    /// Explicit ratio text wins over dimensions. Text naming an unsupported
    /// `w:h` snaps to the nearest member; unparseable text falls back to the
    /// dimensions. The second value reports whether snapping happened.
    pub fn resolve(explicit: Option<&str>, width: u32, height: u32) -> (Self, bool) {
        if let Some(raw) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
            if let Ok(exact) = raw.parse::<Self>() {
                return (exact, false);
            }
            if let Some((left, right)) = parse_ratio_terms(raw) {
                return (Self::closest(left, right), true);
            }
        }
        (Self::closest(width as f64, height as f64), false)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().replace('/', ":");
        SUPPORTED_ASPECT_RATIOS
            .into_iter()
            .find(|candidate| candidate.as_str() == normalized)
            .ok_or_else(|| format!("unsupported aspect ratio '{raw}'"))
    }
}

fn parse_ratio_terms(raw: &str) -> Option<(f64, f64)> {
    let normalized = raw.trim().replace('/', ":");
    let (left, right) = normalized.split_once(':')?;
    let left = left.trim().parse::<f64>().ok()?;
    let right = right.trim().parse::<f64>().ok()?;
    if left > 0.0 && right > 0.0 {
        Some((left, right))
    } else {
        None
    }
}
