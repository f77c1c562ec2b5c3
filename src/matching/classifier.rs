//! Classification of the match evidence.
//!
//! Two classifiers are available: a plain threshold on the confidence
//! value and a Mamdani-style fuzzy classifier over two linguistic
//! variables, the confidence of match (CONF) and the listening duration
//! (CDUR). The fuzzy sets use trapezoid membership functions saturating
//! at the edges; rule antecedents combine with `min` and each class
//! aggregates its rules with `max`.

use crate::config::IdMode;

/// Outcome of a classification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No clear evidence of a match.
    Unidentified,
    /// Some similarity, but low confidence.
    SoundsLike,
    /// Clear evidence with strong confidence.
    Identified,
    /// Not enough evidence yet; keep listening.
    Listening,
}

/// Membership cut points of one fuzzy set: `x1` (rise start), `x2`
/// (plateau) and `x3` (fall end). Edge sets saturate beyond `x2`.
#[derive(Debug, Clone, Copy, Default)]
struct Cuts {
    x1: f64,
    x2: f64,
    x3: f64,
}

/// Fuzzy rule-based classifier of (confidence, duration) pairs.
#[derive(Debug, Clone)]
pub struct FuzzyClassifier {
    conf_low: Cuts,
    conf_med: Cuts,
    conf_high: Cuts,
    cdur_short: Cuts,
    cdur_med: Cuts,
    cdur_long: Cuts,
}

impl FuzzyClassifier {
    pub fn new(mode: IdMode) -> Self {
        let mut c = Self {
            conf_low: Cuts::default(),
            conf_med: Cuts::default(),
            conf_high: Cuts::default(),
            cdur_short: Cuts::default(),
            cdur_med: Cuts::default(),
            cdur_long: Cuts::default(),
        };
        c.set_mode(mode);
        c
    }

    /// Install the cut points of the given identification mode.
    pub fn set_mode(&mut self, mode: IdMode) {
        match mode {
            IdMode::Easy => {
                self.conf_low = Cuts { x1: 0.0, x2: 0.55, x3: 0.65 };
                self.conf_med = Cuts { x1: 0.60, x2: 0.70, x3: 0.80 };
                self.conf_high = Cuts { x1: 0.75, x2: 0.90, x3: 0.0 };
                self.cdur_short = Cuts { x1: 0.0, x2: 1.5, x3: 3.0 };
                self.cdur_med = Cuts { x1: 2.0, x2: 10.0, x3: 22.0 };
                self.cdur_long = Cuts { x1: 17.5, x2: 20.0, x3: 0.0 };
            }
            IdMode::Strict => {
                self.conf_low = Cuts { x1: 0.0, x2: 0.55, x3: 0.65 };
                self.conf_med = Cuts { x1: 0.60, x2: 0.70, x3: 0.92 };
                self.conf_high = Cuts { x1: 0.875, x2: 0.95, x3: 0.0 };
                self.cdur_short = Cuts { x1: 0.0, x2: 2.0, x3: 5.0 };
                self.cdur_med = Cuts { x1: 2.8, x2: 12.0, x3: 19.2 };
                self.cdur_long = Cuts { x1: 15.0, x2: 20.0, x3: 0.0 };
            }
        }
    }

    /// Classify the given confidence (`hu`) and listening duration in
    /// seconds (`dt`).
    pub fn process(&self, hu: f64, dt: f64) -> Decision {
        let conf_low = falling(hu, self.conf_low);
        let conf_med = triangle(hu, self.conf_med);
        let conf_high = rising(hu, self.conf_high);
        let cdur_short = falling(dt, self.cdur_short);
        let cdur_med = triangle(dt, self.cdur_med);
        let cdur_long = rising(dt, self.cdur_long);

        // LISTENING: everything short, and low-to-medium confidence at
        // medium durations
        let listening = (conf_high.min(cdur_short))
            .max(conf_med.min(cdur_short))
            .max(conf_med.min(cdur_med))
            .max(conf_low.min(cdur_short))
            .max(conf_low.min(cdur_med));

        // IDENTIFIED: high confidence once enough audio has been heard
        let identified = (conf_high.min(cdur_med)).max(conf_high.min(cdur_long));

        // SOUNDS_LIKE: persistent medium confidence
        let sounds_like = conf_med.min(cdur_long);

        // UNIDENTIFIED: persistent low confidence
        let unidentified = conf_low.min(cdur_long);

        let mut decision = Decision::Unidentified;
        let mut best = unidentified;
        for (value, class) in [
            (sounds_like, Decision::SoundsLike),
            (identified, Decision::Identified),
            (listening, Decision::Listening),
        ] {
            if value > best {
                best = value;
                decision = class;
            }
        }
        decision
    }
}

/// Membership saturating to 1 below x2, falling to 0 at x3.
fn falling(x: f64, c: Cuts) -> f64 {
    if x <= c.x2 {
        1.0
    } else {
        ((c.x3 - x) / (c.x3 - c.x2)).max(0.0)
    }
}

/// Triangular membership rising from x1 to x2, falling to x3.
fn triangle(x: f64, c: Cuts) -> f64 {
    if x <= c.x2 {
        ((x - c.x1) / (c.x2 - c.x1)).max(0.0)
    } else {
        ((c.x3 - x) / (c.x3 - c.x2)).max(0.0)
    }
}

/// Membership rising from x1, saturating to 1 above x2.
fn rising(x: f64, c: Cuts) -> f64 {
    if x >= c.x2 {
        1.0
    } else {
        ((x - c.x1) / (c.x2 - c.x1)).max(0.0)
    }
}

/// Threshold classifier for the binary identification type.
#[derive(Debug, Clone, Copy)]
pub struct BinaryClassifier {
    pub threshold: f32,
    pub min_time: f32,
}

impl BinaryClassifier {
    pub fn new(threshold: f32, min_time: f32) -> Self {
        Self { threshold, min_time }
    }

    /// `Identified` once the confidence reaches the threshold and the
    /// minimum listening time has elapsed; `Listening` while below the
    /// minimum time; `Unidentified` otherwise.
    pub fn process(&self, conf: f64, dt: f64) -> Decision {
        if dt < f64::from(self.min_time) {
            return Decision::Listening;
        }
        if conf >= f64::from(self.threshold) {
            Decision::Identified
        } else {
            Decision::Unidentified
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_easy_decisions() {
        let c = FuzzyClassifier::new(IdMode::Easy);

        // early on, everything is listening
        assert_eq!(c.process(0.95, 1.0), Decision::Listening);
        assert_eq!(c.process(0.30, 1.0), Decision::Listening);

        // high confidence at medium duration identifies
        assert_eq!(c.process(0.95, 10.0), Decision::Identified);
        assert_eq!(c.process(0.95, 20.0), Decision::Identified);

        // persistent medium confidence sounds like
        assert_eq!(c.process(0.70, 20.0), Decision::SoundsLike);

        // persistent low confidence gives up
        assert_eq!(c.process(0.30, 20.0), Decision::Unidentified);
    }

    #[test]
    fn fuzzy_strict_is_harder_to_convince() {
        let easy = FuzzyClassifier::new(IdMode::Easy);
        let strict = FuzzyClassifier::new(IdMode::Strict);

        // 0.9 confidence at 10 s: easy identifies, strict keeps listening
        assert_eq!(easy.process(0.90, 10.0), Decision::Identified);
        assert_eq!(strict.process(0.90, 10.0), Decision::Listening);

        // but overwhelming evidence convinces both
        assert_eq!(strict.process(0.97, 18.0), Decision::Identified);
    }

    #[test]
    fn binary_threshold_and_min_time() {
        let c = BinaryClassifier::new(0.6, 0.0);
        assert_eq!(c.process(0.7, 1.0), Decision::Identified);
        assert_eq!(c.process(0.5, 1.0), Decision::Unidentified);

        let c = BinaryClassifier::new(0.6, 5.0);
        assert_eq!(c.process(0.9, 2.0), Decision::Listening);
        assert_eq!(c.process(0.9, 6.0), Decision::Identified);
    }

    #[test]
    fn binary_threshold_is_monotonic() {
        // raising the threshold can never turn an unidentified clip into
        // an identified one
        for &conf in &[0.55, 0.7, 0.93] {
            let low = BinaryClassifier::new(0.6, 0.0).process(conf, 3.0);
            let high = BinaryClassifier::new(0.95, 0.0).process(conf, 3.0);
            if high == Decision::Identified {
                assert_eq!(low, Decision::Identified);
            }
        }
    }
}
