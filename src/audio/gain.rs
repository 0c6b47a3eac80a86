//! Saturating PCM gain

/// Linear gain derived once from a dB value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    db: f64,
    linear: f64,
}

impl Gain {
    pub fn from_db(db: f64) -> Self {
        let linear = if db != 0.0 { 10f64.powf(db / 20.0) } else { 1.0 };
        Self { db, linear }
    }

    pub fn db(&self) -> f64 {
        self.db
    }

    pub fn linear(&self) -> f64 {
        self.linear
    }

    /// 0 dB leaves samples untouched
    pub fn is_unity(&self) -> bool {
        self.db == 0.0
    }

    /// Scale one sample, clamping to the i16 range instead of wrapping
    pub fn apply_sample(&self, sample: i16) -> i16 {
        let scaled = (sample as f64 * self.linear).round();
        scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }

    /// Scale a block in place
    pub fn apply(&self, samples: &mut [i16]) {
        if self.is_unity() {
            return;
        }
        for s in samples.iter_mut() {
            *s = self.apply_sample(*s);
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::from_db(0.0)
    }
}
