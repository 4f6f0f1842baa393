//! Variants, engagement outcomes and running tallies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two content alternatives under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub const BOTH: [Variant; 2] = [Variant::A, Variant::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four engagement categories an observer can choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeField {
    Like,
    Comment,
    Share,
    Quote,
}

impl OutcomeField {
    pub const ALL: [OutcomeField; 4] = [
        OutcomeField::Like,
        OutcomeField::Comment,
        OutcomeField::Share,
        OutcomeField::Quote,
    ];

    /// JSON key used by the oracle.
    pub fn key(&self) -> &'static str {
        match self {
            OutcomeField::Like => "like",
            OutcomeField::Comment => "comment",
            OutcomeField::Share => "share",
            OutcomeField::Quote => "quote",
        }
    }
}

/// A metric a verdict is computed for: one outcome field or the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Like,
    Comment,
    Share,
    Quote,
    Total,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Like,
        Metric::Comment,
        Metric::Share,
        Metric::Quote,
        Metric::Total,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Like => "like",
            Metric::Comment => "comment",
            Metric::Share => "share",
            Metric::Quote => "quote",
            Metric::Total => "total",
        }
    }
}

/// One simulated observer's decision.
///
/// Fields are counts rather than booleans: the oracle is asked for 0/1 but
/// integer answers are kept as given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSample {
    pub like: u32,
    pub comment: u32,
    pub share: u32,
    pub quote: u32,
}

impl OutcomeSample {
    /// The all-zero sample used when nothing could be extracted.
    pub const ZERO: OutcomeSample = OutcomeSample {
        like: 0,
        comment: 0,
        share: 0,
        quote: 0,
    };

    pub fn new(like: u32, comment: u32, share: u32, quote: u32) -> Self {
        Self {
            like,
            comment,
            share,
            quote,
        }
    }

    pub fn get(&self, field: OutcomeField) -> u32 {
        match field {
            OutcomeField::Like => self.like,
            OutcomeField::Comment => self.comment,
            OutcomeField::Share => self.share,
            OutcomeField::Quote => self.quote,
        }
    }

    pub fn set(&mut self, field: OutcomeField, value: u32) {
        match field {
            OutcomeField::Like => self.like = value,
            OutcomeField::Comment => self.comment = value,
            OutcomeField::Share => self.share = value,
            OutcomeField::Quote => self.quote = value,
        }
    }
}

/// Per-variant accumulated counts.
///
/// Only [`RunningTally::record`] mutates the counters, so `total` always equals
/// the sum of the four fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTally {
    like: u64,
    comment: u64,
    share: u64,
    quote: u64,
    total: u64,
    samples: u64,
}

impl RunningTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: &OutcomeSample) {
        self.like = self.like.saturating_add(sample.like as u64);
        self.comment = self.comment.saturating_add(sample.comment as u64);
        self.share = self.share.saturating_add(sample.share as u64);
        self.quote = self.quote.saturating_add(sample.quote as u64);
        self.total = self.like + self.comment + self.share + self.quote;
        self.samples += 1;
    }

    pub fn count(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Like => self.like,
            Metric::Comment => self.comment,
            Metric::Share => self.share,
            Metric::Quote => self.quote,
            Metric::Total => self.total,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of samples folded into this tally.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}
