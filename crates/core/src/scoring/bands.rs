use serde::{Deserialize, Serialize};

/// Lowest score any banded measurement can fall to.
pub const BAND_SCORE_FLOOR: f64 = 20.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum BandDirection {
    /// Lower values are better; a band matches when `value <= threshold`.
    Descending,
    /// Higher values are better; a band matches when `value >= threshold`.
    Ascending,
}

/// Scoring rule applied once a value falls past the last band.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum BandTail {
    /// `base - (value - threshold) * slope`, where `threshold` and `base` come
    /// from the last band.
    LinearDecay { slope: f64 },
    /// `value * factor`.
    Proportional { factor: f64 },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Band {
    pub threshold: f64,
    pub score: f64,
}

/// Ordered threshold table: the first matching band wins.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BandTable {
    pub direction: BandDirection,
    pub bands: [Band; 4],
    pub tail: BandTail,
}

const fn band(threshold: f64, score: f64) -> Band {
    Band { threshold, score }
}

/// Local jitter, percent.
pub const JITTER_BANDS: BandTable = BandTable {
    direction: BandDirection::Descending,
    bands: [band(0.5, 100.0), band(1.0, 85.0), band(1.5, 70.0), band(2.5, 50.0)],
    tail: BandTail::LinearDecay { slope: 10.0 },
};

/// Local shimmer, percent.
pub const SHIMMER_BANDS: BandTable = BandTable {
    direction: BandDirection::Descending,
    bands: [band(3.0, 100.0), band(5.0, 85.0), band(7.0, 70.0), band(10.0, 50.0)],
    tail: BandTail::LinearDecay { slope: 5.0 },
};

/// Harmonics-to-noise ratio, dB.
pub const HNR_BANDS: BandTable = BandTable {
    direction: BandDirection::Ascending,
    bands: [band(25.0, 100.0), band(20.0, 85.0), band(15.0, 70.0), band(10.0, 50.0)],
    tail: BandTail::Proportional { factor: 3.0 },
};

/// Filler occurrences per 100 words.
pub const FILLER_RATIO_BANDS: BandTable = BandTable {
    direction: BandDirection::Descending,
    bands: [band(1.0, 100.0), band(2.0, 85.0), band(4.0, 70.0), band(6.0, 50.0)],
    tail: BandTail::LinearDecay { slope: 5.0 },
};

impl BandTable {
    pub fn score(&self, value: f64) -> f64 {
        for b in &self.bands {
            let matched = match self.direction {
                BandDirection::Descending => value <= b.threshold,
                BandDirection::Ascending => value >= b.threshold,
            };
            if matched {
                return b.score;
            }
        }

        let last = self.bands[self.bands.len() - 1];
        let tail = match self.tail {
            BandTail::LinearDecay { slope } => last.score - (value - last.threshold) * slope,
            BandTail::Proportional { factor } => value * factor,
        };
        tail.max(BAND_SCORE_FLOOR)
    }
}
