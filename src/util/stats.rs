use std::fmt::Display;

/// Running min, max and mean of a count, such as solver iterations per ray.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub count: usize,
    /// Zero while there are no samples.
    pub min: usize,
    pub max: usize,
    pub total: u64,
}

impl Stats {
    pub fn add_sample(&mut self, value: usize) {
        self.min = if self.count == 0 { value } else { self.min.min(value) };
        self.max = self.max.max(value);
        self.total += value as u64;
        self.count += 1;
    }

    pub fn merge(&self, other: &Self) -> Self {
        let min = match (self.count, other.count) {
            (0, _) => other.min,
            (_, 0) => self.min,
            _ => self.min.min(other.min),
        };
        Stats {
            count: self.count + other.count,
            min,
            max: self.max.max(other.max),
            total: self.total + other.total,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total as f64 / self.count as f64)
    }
}

impl FromIterator<usize> for Stats {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut stats = Stats::default();
        iter.into_iter().for_each(|value| stats.add_sample(value));
        stats
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mean() {
            None => write!(f, "no samples"),
            Some(mean) => write!(
                f,
                "{}..={}, mean {mean:.2} over {} samples",
                self.min, self.max, self.count
            ),
        }
    }
}
